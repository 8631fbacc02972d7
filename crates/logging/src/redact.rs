//! Scrubs credentials from strings before they reach a log line.

use std::sync::LazyLock;

use regex::Regex;

static API_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(sk-[A-Za-z0-9_\-]{16,})|(Bearer\s+[A-Za-z0-9\-\._~+/]+=*)")
        .expect("static pattern")
});

/// Replace API keys and bearer tokens with a placeholder.
pub fn redact_secrets(input: &str) -> String {
    API_KEY_RE.replace_all(input, "[REDACTED]").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_and_tokens_are_scrubbed() {
        let raw = "auth failed for sk-abcdefghijklmnop1234 using Bearer eyJhbGciOiJIUzI1NiJ9";
        let clean = redact_secrets(raw);
        assert!(!clean.contains("sk-abcdefghijklmnop1234"));
        assert!(!clean.contains("eyJhbGciOiJIUzI1NiJ9"));
        assert_eq!(clean.matches("[REDACTED]").count(), 2);
    }

    #[test]
    fn test_plain_text_untouched() {
        let raw = "listening on stdio";
        assert_eq!(redact_secrets(raw), raw);
    }
}
