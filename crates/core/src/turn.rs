use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{ContentPart, ToolCallRecord};

/// Terminal and in-flight states of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Running,
    Finished,
    Cancelled,
    MaxStepsReached,
}

impl TurnStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnStatus::Running)
    }
}

/// Resolution state of a single proposed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallState {
    Pending,
    AwaitingApproval,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
}

/// One model round-trip within a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based, monotonic within the turn.
    pub seq: u32,
    pub parts: Vec<ContentPart>,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Retryable model errors absorbed before this step completed.
    pub retries: u32,
}

/// One user-input-to-completion cycle. Immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: Uuid,
    pub input: Vec<ContentPart>,
    pub steps: Vec<StepRecord>,
    pub status: TurnStatus,
}

impl TurnRecord {
    pub fn new(input: Vec<ContentPart>) -> Self {
        Self {
            id: Uuid::new_v4(),
            input,
            steps: Vec::new(),
            status: TurnStatus::Running,
        }
    }

    /// Final assistant text of the last step, if any.
    pub fn final_text(&self) -> String {
        self.steps
            .last()
            .map(|s| {
                s.parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!TurnStatus::Running.is_terminal());
        assert!(TurnStatus::Finished.is_terminal());
        assert!(TurnStatus::MaxStepsReached.is_terminal());
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&TurnStatus::MaxStepsReached).unwrap(),
            "\"max_steps_reached\""
        );
        assert_eq!(
            serde_json::to_string(&ToolCallState::AwaitingApproval).unwrap(),
            "\"awaiting_approval\""
        );
    }

    #[test]
    fn test_final_text_skips_thinking() {
        let mut turn = TurnRecord::new(vec![ContentPart::text("hi")]);
        turn.steps.push(StepRecord {
            seq: 1,
            parts: vec![
                ContentPart::Thinking {
                    text: "pondering".into(),
                },
                ContentPart::text("answer"),
            ],
            tool_calls: vec![],
            retries: 0,
        });
        assert_eq!(turn.final_text(), "answer");
    }
}
