//! Local Chat-Completion Provider
//!
//! Talks to a local OpenAI-compatible inference server (LM Studio, llama.cpp
//! server, vLLM, ...). Retries timeouts, connection failures, and 5xx with
//! exponential backoff; 4xx and schema errors surface immediately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::llm::provider::{LlmProvider, TokenStream};
use crate::llm::streaming::spawn_token_relay;
use crate::llm::types::{
    ChatMessage, GenerateParams, LlmResult, ProviderError, ProviderStatus,
};
use crate::llm::wire::{
    classify_send_error, classify_status, ChatCompletionRequest, ChatCompletionResponse,
    ModelListResponse,
};
use crate::sanitize::strip_reasoning_blocks;

const PING_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LocalChatProvider {
    client: Client,
    config: ProviderConfig,
}

impl LocalChatProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(10)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, config }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    /// One non-streaming attempt; retry classification happens in `generate`.
    async fn generate_once(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<LlmResult, ProviderError> {
        let response = self
            .client
            .post(self.completions_url())
            .timeout(self.config.timeout())
            .json(request)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::bad_response(format!("invalid response format: {e}")))?;

        let raw_text = parsed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.clone())
            .ok_or_else(|| ProviderError::bad_response("response carried no choices"))?;

        let text = if self.config.reasoning_suppression {
            strip_reasoning_blocks(&raw_text).trim().to_string()
        } else {
            raw_text
        };

        Ok(LlmResult {
            text,
            usage: parsed.usage.unwrap_or_default(),
            model: parsed.model.unwrap_or_else(|| request.model.clone()),
        })
    }
}

#[async_trait]
impl LlmProvider for LocalChatProvider {
    async fn ping(&self) -> ProviderStatus {
        let url = format!("{}/models", self.config.base_url);
        match self.client.get(&url).timeout(PING_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => {
                let models = response
                    .json::<ModelListResponse>()
                    .await
                    .ok()
                    .map(|m| m.data.into_iter().map(|e| e.id).collect::<Vec<_>>())
                    .filter(|m| !m.is_empty());
                ProviderStatus {
                    available: true,
                    base_url: self.config.base_url.clone(),
                    models,
                    error: None,
                }
            }
            Ok(response) => ProviderStatus {
                available: false,
                base_url: self.config.base_url.clone(),
                models: None,
                error: Some(format!("HTTP {}", response.status())),
            },
            Err(e) => {
                warn!("local provider ping failed: {e}");
                ProviderStatus {
                    available: false,
                    base_url: self.config.base_url.clone(),
                    models: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerateParams,
    ) -> Result<LlmResult, ProviderError> {
        let request = ChatCompletionRequest::build(
            &self.config.model,
            messages,
            params,
            false,
            self.config.reasoning_suppression,
        );

        let mut attempt = 0u32;
        loop {
            match self.generate_once(&request).await {
                Ok(result) => {
                    debug!(
                        model = %result.model,
                        tokens = ?result.usage.total_tokens,
                        "generate succeeded"
                    );
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.config.max_retries.max(1) => {
                    let delay = self.config.backoff_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = self.config.max_retries,
                        error = %e,
                        "generate attempt failed, retrying in {:?}",
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerateParams,
    ) -> Result<TokenStream, ProviderError> {
        let request = ChatCompletionRequest::build(
            &self.config.model,
            messages,
            params,
            true,
            self.config.reasoning_suppression,
        );

        let response = self
            .client
            .post(self.completions_url())
            .timeout(self.config.timeout())
            .json(&request)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let deadline = Instant::now() + self.config.timeout();
        Ok(spawn_token_relay(
            response,
            deadline,
            self.config.reasoning_suppression,
        ))
    }
}
