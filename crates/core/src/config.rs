use serde::{Deserialize, Serialize};

/// Resource limits and policy knobs for the turn engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Steps after which a turn ends as `max_steps_reached`.
    pub max_steps_per_turn: u32,
    /// Retryable model errors absorbed per step before the turn fails.
    pub max_retries_per_step: u32,
    /// Context window of the configured model, in tokens.
    pub max_context_tokens: u64,
    /// Compaction triggers when estimated tokens + headroom reach the window.
    pub compaction_headroom_tokens: u64,
    /// Messages kept verbatim at the tail when compacting.
    pub compaction_keep_recent: usize,
    /// Skip all approval prompts when set.
    pub auto_approve: bool,
    /// Extra iterations after a finished turn: 0 disables, -1 is unbounded.
    pub extra_iterations: i64,
    /// Substring in the final assistant text that stops extra iterations.
    pub stop_signal: String,
    /// Nesting limit for delegated sub-agent turns.
    pub max_subagent_depth: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps_per_turn: 24,
            max_retries_per_step: 3,
            max_context_tokens: 128_000,
            compaction_headroom_tokens: 8_000,
            compaction_keep_recent: 8,
            auto_approve: false,
            extra_iterations: 0,
            stop_signal: "::done::".to_string(),
            max_subagent_depth: 3,
        }
    }
}

impl EngineConfig {
    /// Whether another extra iteration may run after `completed` of them.
    pub fn allows_extra_iteration(&self, completed: i64) -> bool {
        self.extra_iterations < 0 || completed < self.extra_iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extra_iteration_bounds() {
        let mut config = EngineConfig::default();
        assert!(!config.allows_extra_iteration(0));

        config.extra_iterations = 2;
        assert!(config.allows_extra_iteration(0));
        assert!(config.allows_extra_iteration(1));
        assert!(!config.allows_extra_iteration(2));

        config.extra_iterations = -1;
        assert!(config.allows_extra_iteration(10_000));
    }
}
