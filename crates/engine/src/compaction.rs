//! Context compaction: replace a prefix of the ledger with a generated
//! summary so the next model call fits the window.
//!
//! The summary comes from a model call; if that fails, an extractive
//! fallback (first sentence of each replaced message) keeps compaction from
//! ever blocking a turn. Postcondition either way: strictly fewer estimated
//! tokens than before.

use tokio::sync::mpsc;
use tracing::{info, warn};

use turnstile_core::Message;
use turnstile_model::{ModelClient, ModelRequest};

use crate::ledger::ContextLedger;

const SUMMARY_PROMPT: &str = "Summarize the conversation below for an AI coding assistant that \
will continue it. Preserve decisions made, files touched, command results, and open problems. \
Be concise; plain prose.";

pub struct Compactor {
    pub keep_recent: usize,
}

impl Compactor {
    /// Runs synchronously within the step loop: no step begins while a
    /// compaction is open. Returns (tokens_before, tokens_after).
    pub async fn compact(
        &self,
        ledger: &mut ContextLedger,
        model: &dyn ModelClient,
        model_name: &str,
    ) -> (u64, u64) {
        let before = ledger.tokens();
        let split_at = ledger.len().saturating_sub(self.keep_recent);
        let prefix = &ledger.messages()[..split_at];
        let transcript = render_transcript(prefix);

        let mut summary = match self.model_summary(model, model_name, &transcript).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => extractive_summary(prefix),
            Err(e) => {
                warn!(error = %e, "summary model call failed, using extractive fallback");
                extractive_summary(prefix)
            }
        };

        // The estimate must strictly decrease across a compaction.
        while ledger.projected_replace(&summary, self.keep_recent) >= before && summary.len() > 16 {
            let mut cut = summary.len() / 2;
            while !summary.is_char_boundary(cut) {
                cut -= 1;
            }
            summary.truncate(cut);
        }

        ledger.replace_prefix(summary, self.keep_recent);
        let after = ledger.tokens();
        info!(tokens_before = before, tokens_after = after, "compacted context");
        (before, after)
    }

    async fn model_summary(
        &self,
        model: &dyn ModelClient,
        model_name: &str,
        transcript: &str,
    ) -> anyhow::Result<String> {
        let request = ModelRequest {
            model: model_name.to_string(),
            system_prompt: SUMMARY_PROMPT.to_string(),
            messages: vec![Message::user_text(transcript)],
            tools: vec![],
            thinking_enabled: false,
            max_tokens: Some(1024),
        };
        // Deltas are not surfaced during compaction; backends tolerate a
        // closed sink and keep assembling.
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let completion = model.stream(&request, tx).await?;
        Ok(completion
            .parts
            .iter()
            .filter_map(|p| match p {
                turnstile_core::ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

fn role_label(message: &Message) -> &'static str {
    match message {
        Message::User { .. } => "user",
        Message::Assistant { .. } => "assistant",
        Message::Tool { .. } => "tool",
        Message::Summary { .. } => "summary",
    }
}

fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("[{}] {}", role_label(m), m.text()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// First sentence of each message; deterministic, never fails.
fn extractive_summary(messages: &[Message]) -> String {
    let lines: Vec<String> = messages
        .iter()
        .map(|m| {
            let text = m.text();
            let first = text
                .split(['.', '!', '?', '\n'])
                .next()
                .unwrap_or(&text)
                .trim()
                .to_string();
            format!("[{}] {}", role_label(m), first)
        })
        .collect();
    format!("[Compacted {} messages]\n{}", messages.len(), lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_model::{MockModel, ModelError};

    fn bulky_ledger() -> ContextLedger {
        let mut ledger = ContextLedger::new();
        for i in 0..12 {
            ledger.append(Message::user_text(format!(
                "Message number {i}. {}",
                "filler ".repeat(120)
            )));
        }
        ledger
    }

    #[tokio::test]
    async fn test_compaction_strictly_decreases_tokens() {
        let mut ledger = bulky_ledger();
        let model = MockModel::new().push_text("short summary of everything");
        let compactor = Compactor { keep_recent: 4 };
        let (before, after) = compactor.compact(&mut ledger, &model, "mock").await;
        assert!(after < before);
        assert_eq!(ledger.len(), 5);
        assert!(matches!(ledger.messages()[0], Message::Summary { .. }));
    }

    #[tokio::test]
    async fn test_extractive_fallback_on_model_failure() {
        let mut ledger = bulky_ledger();
        let model = MockModel::new().push_error(ModelError::Timeout);
        let compactor = Compactor { keep_recent: 4 };
        let (before, after) = compactor.compact(&mut ledger, &model, "mock").await;
        assert!(after < before);
        match &ledger.messages()[0] {
            Message::Summary { text, replaced } => {
                assert_eq!(*replaced, 8);
                assert!(text.contains("Message number 0"));
            }
            other => panic!("expected summary, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_summary_is_truncated() {
        let mut ledger = bulky_ledger();
        let before = ledger.tokens();
        // Model produces a summary longer than the whole prefix.
        let model = MockModel::new().push_text("verbose ".repeat(5_000));
        let compactor = Compactor { keep_recent: 4 };
        let (_, after) = compactor.compact(&mut ledger, &model, "mock").await;
        assert!(after < before);
    }

    #[tokio::test]
    async fn test_oversized_multibyte_summary_is_truncated() {
        let mut ledger = bulky_ledger();
        let before = ledger.tokens();
        // Three-byte characters put the halfway point inside a code point.
        let model = MockModel::new().push_text("日".repeat(5_001));
        let compactor = Compactor { keep_recent: 4 };
        let (_, after) = compactor.compact(&mut ledger, &model, "mock").await;
        assert!(after < before);
        match &ledger.messages()[0] {
            Message::Summary { text, .. } => assert!(text.chars().all(|c| c == '日')),
            other => panic!("expected summary, got {other:?}"),
        }
    }
}
