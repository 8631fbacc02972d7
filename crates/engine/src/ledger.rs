//! The ordered message log and its running token estimate.
//!
//! Exactly one writer: the turn engine's own step loop. Sub-agents own a
//! separate ledger; nothing here is shared across the turn tree.

use turnstile_core::{EngineConfig, Message, TokenUsage};

/// Per-message bookkeeping overhead, in tokens.
const MESSAGE_OVERHEAD: u64 = 8;

/// Rough bytes-per-token ratio for the estimate between backend reports.
const BYTES_PER_TOKEN: u64 = 4;

pub struct ContextLedger {
    messages: Vec<Message>,
    estimated_tokens: u64,
    last_usage: TokenUsage,
}

impl ContextLedger {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            estimated_tokens: 0,
            last_usage: TokenUsage::default(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn tokens(&self) -> u64 {
        self.estimated_tokens
    }

    pub fn last_usage(&self) -> TokenUsage {
        self.last_usage
    }

    fn estimate(message: &Message) -> u64 {
        let mut bytes = message.text().len() as u64;
        if let Message::Assistant { tool_calls, .. } = message {
            for call in tool_calls {
                bytes += call.name.len() as u64 + call.arguments.to_string().len() as u64;
            }
        }
        bytes / BYTES_PER_TOKEN + MESSAGE_OVERHEAD
    }

    /// Append one message; the usage estimate is recomputed on every append.
    pub fn append(&mut self, message: Message) {
        self.estimated_tokens += Self::estimate(&message);
        self.messages.push(message);
    }

    /// Rebase the estimate on backend-reported token accounting, which is
    /// authoritative for everything currently in context.
    pub fn record_usage(&mut self, usage: TokenUsage) {
        if usage.is_empty() {
            return;
        }
        self.last_usage = usage;
        self.estimated_tokens = usage.total();
    }

    pub fn needs_compaction(&self, config: &EngineConfig) -> bool {
        self.estimated_tokens + config.compaction_headroom_tokens >= config.max_context_tokens
    }

    /// Whether there is enough history for compaction to make progress.
    pub fn compactable(&self, keep_recent: usize) -> bool {
        self.messages.len() > keep_recent + 1
    }

    /// Estimated tokens if `replace_prefix` ran with this summary now.
    pub fn projected_replace(&self, summary: &str, keep_recent: usize) -> u64 {
        let split_at = self.messages.len().saturating_sub(keep_recent);
        let tail: u64 = self.messages[split_at..].iter().map(Self::estimate).sum();
        tail + summary.len() as u64 / BYTES_PER_TOKEN + MESSAGE_OVERHEAD
    }

    /// Replace everything but the `keep_recent` tail with one summary
    /// message and recompute the estimate from scratch.
    pub fn replace_prefix(&mut self, summary: String, keep_recent: usize) {
        let split_at = self.messages.len().saturating_sub(keep_recent);
        let tail = self.messages.split_off(split_at);
        let replaced = self.messages.len();
        self.messages = Vec::with_capacity(tail.len() + 1);
        self.messages.push(Message::Summary {
            text: summary,
            replaced,
        });
        self.messages.extend(tail);
        self.estimated_tokens = self.messages.iter().map(Self::estimate).sum();
    }
}

impl Default for ContextLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filler(n: usize) -> String {
        "x".repeat(n)
    }

    #[test]
    fn test_estimate_grows_with_appends() {
        let mut ledger = ContextLedger::new();
        assert_eq!(ledger.tokens(), 0);
        ledger.append(Message::user_text(filler(400)));
        let after_one = ledger.tokens();
        assert!(after_one >= 100);
        ledger.append(Message::user_text(filler(400)));
        assert!(ledger.tokens() > after_one);
    }

    #[test]
    fn test_reported_usage_rebases_estimate() {
        let mut ledger = ContextLedger::new();
        ledger.append(Message::user_text(filler(4000)));
        ledger.record_usage(TokenUsage {
            input_tokens: 37,
            output_tokens: 5,
            cached_tokens: 0,
        });
        assert_eq!(ledger.tokens(), 42);
        // Empty usage reports are ignored.
        ledger.record_usage(TokenUsage::default());
        assert_eq!(ledger.tokens(), 42);
    }

    #[test]
    fn test_needs_compaction_threshold() {
        let config = EngineConfig {
            max_context_tokens: 1_000,
            compaction_headroom_tokens: 200,
            ..Default::default()
        };
        let mut ledger = ContextLedger::new();
        ledger.append(Message::user_text(filler(2_000))); // ~500 tokens
        assert!(!ledger.needs_compaction(&config));
        ledger.append(Message::user_text(filler(2_000)));
        assert!(ledger.needs_compaction(&config));
    }

    #[test]
    fn test_replace_prefix_keeps_tail_and_shrinks() {
        let mut ledger = ContextLedger::new();
        for i in 0..10 {
            ledger.append(Message::user_text(format!("{} {}", filler(200), i)));
        }
        let before = ledger.tokens();
        ledger.replace_prefix("short summary".into(), 3);
        assert_eq!(ledger.len(), 4);
        assert!(ledger.tokens() < before);
        match &ledger.messages()[0] {
            Message::Summary { replaced, .. } => assert_eq!(*replaced, 7),
            other => panic!("expected summary, got {other:?}"),
        }
        assert!(ledger.messages()[3].text().ends_with('9'));
    }
}
