//! The Model Client capability: a uniform streaming interface over
//! heterogeneous LLM backends.
//!
//! Backends yield incremental text/thinking/tool-call deltas and finish with
//! an assembled completion. Errors are classified retryable vs fatal so the
//! engine can bound retries at step granularity.

pub mod client;
pub mod error;
pub mod mock;
pub mod openai;

pub use client::{Completion, CompletionBuilder, ModelClient, ModelDelta, ModelRequest};
pub use error::ModelError;
pub use mock::{MockModel, MockOutcome};
pub use openai::OpenAiCompatClient;
