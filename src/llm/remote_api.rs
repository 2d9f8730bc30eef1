//! Remote API Provider
//!
//! OpenAI-compatible hosted backend behind bearer auth. Disabled unless the
//! configuration explicitly enables it; every call then fails fast with the
//! `Disabled` error kind so runs degrade predictably.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::llm::provider::{LlmProvider, TokenStream};
use crate::llm::streaming::spawn_token_relay;
use crate::llm::types::{
    ChatMessage, GenerateParams, LlmResult, ProviderError, ProviderStatus,
};
use crate::llm::wire::{
    classify_send_error, classify_status, ChatCompletionRequest, ChatCompletionResponse,
};
use crate::sanitize::strip_reasoning_blocks;

pub struct RemoteApiProvider {
    client: Client,
    config: ProviderConfig,
    enabled: bool,
}

impl RemoteApiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let enabled = config.remote_enabled && config.api_key.is_some();
        if config.remote_enabled && config.api_key.is_none() {
            warn!("remote provider enabled but no API key configured; treating as disabled");
        }

        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        if let Some(referer) = &config.referer {
            if let Ok(value) = HeaderValue::from_str(referer) {
                headers.insert("HTTP-Referer", value);
            }
        }
        if let Some(title) = &config.title {
            if let Ok(value) = HeaderValue::from_str(title) {
                headers.insert("X-Title", value);
            }
        }

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .expect("Failed to create HTTP client");

        info!(
            enabled,
            base_url = %config.base_url,
            "remote API provider initialized"
        );
        Self {
            client,
            config,
            enabled,
        }
    }

    fn check_enabled(&self) -> Result<(), ProviderError> {
        if self.enabled {
            Ok(())
        } else {
            Err(ProviderError::Disabled)
        }
    }

    async fn generate_once(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<LlmResult, ProviderError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
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
impl LlmProvider for RemoteApiProvider {
    async fn ping(&self) -> ProviderStatus {
        if !self.enabled {
            return ProviderStatus {
                available: false,
                base_url: self.config.base_url.clone(),
                models: None,
                error: Some("disabled by configuration".to_string()),
            };
        }

        // A cheap authenticated request is the only reliable health probe.
        let url = format!("{}/models", self.config.base_url);
        match self.client.get(&url).timeout(self.config.timeout()).send().await {
            Ok(response) => ProviderStatus {
                available: response.status().is_success(),
                base_url: self.config.base_url.clone(),
                models: None,
                error: (!response.status().is_success())
                    .then(|| format!("HTTP {}", response.status())),
            },
            Err(e) => ProviderStatus {
                available: false,
                base_url: self.config.base_url.clone(),
                models: None,
                error: Some(e.to_string()),
            },
        }
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &GenerateParams,
    ) -> Result<LlmResult, ProviderError> {
        self.check_enabled()?;

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
                    debug!(model = %result.model, "remote generate succeeded");
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.config.max_retries.max(1) => {
                    let delay = self.config.backoff_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        error = %e,
                        "remote generate failed, retrying in {:?}",
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
        self.check_enabled()?;

        let request = ChatCompletionRequest::build(
            &self.config.model,
            messages,
            params,
            true,
            self.config.reasoning_suppression,
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
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
