//! Provider Abstraction
//!
//! The `LlmProvider` capability set consumed by agents, and the process-wide
//! provider cache (one shared instance per configured backend; initialized
//! once, read-only after).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use tracing::info;

use crate::config::{ProviderConfig, ProviderKind};
use crate::llm::local_chat::LocalChatProvider;
use crate::llm::remote_api::RemoteApiProvider;
use crate::llm::types::{
    ChatMessage, GenerateParams, LlmResult, ProviderError, ProviderStatus,
};

pub use crate::llm::types::TokenStream;

/// Capability set every LLM backend implements. Implementations must be safe
/// for concurrent calls on a shared instance.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Check backend health and enumerate models when possible.
    async fn ping(&self) -> ProviderStatus;

    /// Generate a complete response, applying the retry policy internally.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerateParams,
    ) -> Result<LlmResult, ProviderError>;

    /// Stream response tokens. Reasoning segments are filtered out before
    /// tokens become visible.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerateParams,
    ) -> Result<TokenStream, ProviderError>;
}

lazy_static! {
    static ref PROVIDER_CACHE: Mutex<HashMap<String, Arc<dyn LlmProvider>>> =
        Mutex::new(HashMap::new());
}

/// Fetch (or lazily build) the shared provider for a configuration. The
/// cache is keyed by backend kind, base URL, and model, so distinct
/// configurations coexist.
pub fn get_provider(config: &ProviderConfig) -> Arc<dyn LlmProvider> {
    let key = config.cache_key();
    let mut cache = PROVIDER_CACHE.lock();
    if let Some(provider) = cache.get(&key) {
        return Arc::clone(provider);
    }

    let provider: Arc<dyn LlmProvider> = match config.kind {
        ProviderKind::LocalChat => Arc::new(LocalChatProvider::new(config.clone())),
        ProviderKind::RemoteApi => Arc::new(RemoteApiProvider::new(config.clone())),
    };
    info!(provider = config.kind.as_str(), base_url = %config.base_url, "LLM provider initialized");
    cache.insert(key, Arc::clone(&provider));
    provider
}

/// Drop all cached providers. Test hook only.
pub fn reset_provider_cache() {
    PROVIDER_CACHE.lock().clear();
}
