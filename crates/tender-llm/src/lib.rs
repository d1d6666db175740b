//! Chat-completion provider abstraction and the OpenAI-compatible backend.

pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod openai;
pub mod provider;
pub(crate) mod retry;

pub use error::LlmError;
pub use openai::OpenAiProvider;
pub use provider::{LlmProvider, Message, Role};
