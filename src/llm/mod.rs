//! LLM Provider Layer
//!
//! Retrying, timeout-aware generate/stream abstraction over OpenAI-style
//! chat-completion backends. Two reference implementations exist: a local
//! inference server (`local_chat`) and a hosted API behind bearer auth
//! (`remote_api`, disabled by default). Agents depend only on the
//! [`LlmProvider`] trait; backends are swappable per run.

pub mod local_chat;
pub mod provider;
pub mod remote_api;
pub mod streaming;
pub mod types;
pub mod wire;

pub use provider::{get_provider, reset_provider_cache, LlmProvider, TokenStream};
pub use types::{
    ChatMessage, ChatRole, GenerateParams, LlmResult, ProviderError, ProviderStatus, TokenChunk,
    Usage,
};
