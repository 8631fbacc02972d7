//! Logging setup and log hygiene helpers for the Turnstile binary.

pub mod logger;
pub mod redact;

pub use logger::init_logging;
pub use redact::redact_secrets;
