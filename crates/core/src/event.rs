use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approval::ApprovalChoice;
use crate::message::{ContentPart, TokenUsage, ToolResult};
use crate::turn::ToolCallState;

/// Everything the engine reports while a turn runs.
///
/// Events for one tool call are ordered relative to each other but may
/// interleave with events from sibling calls in the same step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    TurnBegin {
        turn_id: Uuid,
    },
    StepBegin {
        seq: u32,
    },
    StepInterrupted {
        seq: u32,
    },
    CompactionBegin {
        tokens_before: u64,
    },
    CompactionEnd {
        tokens_before: u64,
        tokens_after: u64,
    },
    /// Token/context usage after each completed step.
    StatusUpdate {
        usage: TokenUsage,
        context_tokens: u64,
    },
    /// An incremental text/thinking/media fragment from the model stream.
    #[serde(rename = "content_part")]
    Content {
        part: ContentPart,
    },
    ToolCall {
        id: String,
        tool: String,
        state: ToolCallState,
    },
    /// Streamed raw argument text for a tool call still being emitted.
    ToolCallPart {
        id: String,
        delta: String,
    },
    ToolResult {
        result: ToolResult,
    },
    ApprovalResponse {
        request_id: Uuid,
        response: ApprovalChoice,
    },
    /// A nested event from a delegated child turn, tagged with the
    /// delegation tool call id so consumers can demultiplex.
    Subagent {
        call_id: String,
        event: Box<EngineEvent>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let ev = EngineEvent::StepBegin { seq: 3 };
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"type":"step_begin","seq":3}"#);
    }

    #[test]
    fn test_content_part_event_rename() {
        let ev = EngineEvent::Content {
            part: ContentPart::text("hi"),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"content_part\""));
    }

    #[test]
    fn test_subagent_wrapping_roundtrip() {
        let inner = EngineEvent::ToolResult {
            result: ToolResult::ok("c9", "file_read", "data"),
        };
        let ev = EngineEvent::Subagent {
            call_id: "call_7".into(),
            event: Box::new(inner.clone()),
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: EngineEvent = serde_json::from_str(&json).unwrap();
        match back {
            EngineEvent::Subagent { call_id, event } => {
                assert_eq!(call_id, "call_7");
                assert_eq!(*event, inner);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
