//! Provider Types
//!
//! Shared contracts for LLM backends: chat messages, generation parameters,
//! results, health status, and the closed provider error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message role in an OpenAI-style chat payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of a chat prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Generation parameters for a single call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateParams {
    /// Sampling temperature in `[0, 2]`.
    pub temperature: f64,
    pub max_tokens: u32,
    pub stop: Option<Vec<String>>,
    /// Per-call model override; `None` uses the provider default.
    pub model: Option<String>,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 256,
            stop: None,
            model: None,
        }
    }
}

/// Token usage reported by the backend, when available.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

/// Complete generation result.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResult {
    pub text: String,
    pub usage: Usage,
    pub model: String,
}

/// Individual token from a streaming response. The final chunk carries an
/// empty token and `is_end = true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenChunk {
    pub token: String,
    pub index: u32,
    pub is_end: bool,
}

impl TokenChunk {
    pub fn end(index: u32) -> Self {
        Self {
            token: String::new(),
            index,
            is_end: true,
        }
    }
}

/// Streaming handle: a finite sequence of token chunks ending with an
/// `is_end` marker. Errors mid-stream terminate the sequence.
pub type TokenStream = tokio::sync::mpsc::Receiver<Result<TokenChunk, ProviderError>>;

/// Health snapshot from `ping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub available: bool,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Provider failure kinds. Only timeouts, connection failures, and transient
/// server errors are retried; everything else surfaces immediately.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,

    #[error("provider is not reachable: {0}")]
    Unavailable(String),

    #[error("provider is disabled by configuration")]
    Disabled,

    /// Server-side failure or malformed payload. `status` is set for HTTP
    /// 5xx (retryable) and absent for schema errors (not retryable).
    #[error("bad response from provider: {detail}")]
    BadResponse {
        status: Option<u16>,
        detail: String,
    },

    /// Client-side rejection (HTTP 4xx). Never retried.
    #[error("provider rejected request ({status}): {detail}")]
    BadRequest { status: u16, detail: String },
}

impl ProviderError {
    pub fn bad_response(detail: impl Into<String>) -> Self {
        ProviderError::BadResponse {
            status: None,
            detail: detail.into(),
        }
    }

    pub fn server_error(status: u16, detail: impl Into<String>) -> Self {
        ProviderError::BadResponse {
            status: Some(status),
            detail: detail.into(),
        }
    }

    /// Whether the retry loop should attempt this call again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Unavailable(_) => true,
            ProviderError::BadResponse { status, .. } => {
                matches!(status, Some(s) if *s >= 500)
            }
            ProviderError::Disabled | ProviderError::BadRequest { .. } => false,
        }
    }
}
