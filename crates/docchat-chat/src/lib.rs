//! Chat runnables over external LLM APIs (OpenAI/Azure OpenAI/Anthropic).
//!
//! `get_llm` builds a provider model, `get_runnable` wraps it as plain chat
//! or a document chain, and sinks receive the streamed reply.

pub mod chains;
pub mod model;
pub mod prompt;
pub mod providers;
pub mod runnable;
pub mod sink;
pub mod types;

pub use model::{complete, get_llm, ChatModel, ProviderModel, SharedModel};
pub use prompt::PromptInput;
pub use runnable::{get_runnable, Runnable};
pub use sink::{ChannelSink, NullSink, StdoutSink, StreamHandler, TokenSink};
pub use types::*;
