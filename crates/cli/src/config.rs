use turnstile_core::EngineConfig;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a coding assistant operating inside a project \
workspace. Use the available tools to inspect and modify the project; keep answers grounded \
in what the tools report.";

/// Runtime configuration, environment-driven.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the OpenAI-compatible backend. Absent means `prompt`
    /// fails with `llm-not-configured`.
    pub api_key: Option<String>,
    /// Override for the backend base URL.
    pub base_url: Option<String>,
    pub model: String,
    pub system_prompt: String,
    /// SQLite session database; empty string disables persistence.
    pub db_path: Option<String>,
    pub log_dir: Option<String>,
    pub log_level: String,
    pub engine: EngineConfig,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            max_steps_per_turn: env_parse("TURNSTILE_MAX_STEPS").unwrap_or(defaults.max_steps_per_turn),
            max_retries_per_step: env_parse("TURNSTILE_MAX_RETRIES")
                .unwrap_or(defaults.max_retries_per_step),
            max_context_tokens: env_parse("TURNSTILE_MAX_CONTEXT_TOKENS")
                .unwrap_or(defaults.max_context_tokens),
            auto_approve: env_parse("TURNSTILE_AUTO_APPROVE").unwrap_or(defaults.auto_approve),
            extra_iterations: env_parse("TURNSTILE_EXTRA_ITERATIONS")
                .unwrap_or(defaults.extra_iterations),
            stop_signal: std::env::var("TURNSTILE_STOP_SIGNAL")
                .unwrap_or_else(|_| defaults.stop_signal.clone()),
            max_subagent_depth: env_parse("TURNSTILE_MAX_SUBAGENT_DEPTH")
                .unwrap_or(defaults.max_subagent_depth),
            ..defaults
        };

        Self {
            api_key: std::env::var("TURNSTILE_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok(),
            base_url: std::env::var("TURNSTILE_BASE_URL").ok(),
            model: std::env::var("TURNSTILE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            system_prompt: std::env::var("TURNSTILE_SYSTEM_PROMPT")
                .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string()),
            db_path: std::env::var("TURNSTILE_DB").ok().filter(|p| !p.is_empty()),
            log_dir: std::env::var("TURNSTILE_LOG_DIR").ok().filter(|d| !d.is_empty()),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            engine,
        }
    }
}
