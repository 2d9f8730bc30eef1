//! Chat-Completion Wire Format
//!
//! Request/response types for OpenAI-style `/chat/completions` endpoints and
//! the error classification shared by both provider backends.

use serde::{Deserialize, Serialize};

use crate::llm::types::{ChatMessage, ChatRole, GenerateParams, ProviderError, Usage};

/// Marker appended to the system message to disable model reasoning.
pub const NO_THINK_DIRECTIVE: &str = "/no_think";

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Soft switch honored by some local backends; harmless elsewhere.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_thinking: Option<bool>,
}

impl ChatCompletionRequest {
    pub fn build(
        default_model: &str,
        messages: &[ChatMessage],
        params: &GenerateParams,
        stream: bool,
        reasoning_suppression: bool,
    ) -> Self {
        let messages = if reasoning_suppression {
            inject_no_think(messages)
        } else {
            messages.to_vec()
        };
        Self {
            model: params
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream,
            stop: params.stop.clone(),
            enable_thinking: reasoning_suppression.then_some(false),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: Option<ChatMessageOut>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessageOut {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelListResponse {
    #[serde(default)]
    pub data: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    pub id: String,
}

/// Add the no-reasoning directive: appended to the system message when one
/// exists, otherwise to the first user message.
pub fn inject_no_think(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut out = messages.to_vec();

    if let Some(msg) = out.iter_mut().find(|m| m.role == ChatRole::System) {
        if !msg.content.contains(NO_THINK_DIRECTIVE) {
            msg.content = format!("{}\n\n{}", msg.content, NO_THINK_DIRECTIVE);
        }
        return out;
    }
    if let Some(msg) = out.iter_mut().find(|m| m.role == ChatRole::User) {
        if !msg.content.contains(NO_THINK_DIRECTIVE) {
            msg.content = format!("{} {}", msg.content, NO_THINK_DIRECTIVE);
        }
    }
    out
}

/// Classify a transport-level reqwest failure.
pub fn classify_send_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Unavailable(err.to_string())
    }
}

/// Classify a non-success HTTP status. 5xx is retryable, 4xx is not.
pub fn classify_status(status: reqwest::StatusCode, body: &str) -> ProviderError {
    let snippet: String = body.chars().take(800).collect();
    if status.is_server_error() {
        ProviderError::server_error(status.as_u16(), snippet)
    } else {
        ProviderError::BadRequest {
            status: status.as_u16(),
            detail: snippet,
        }
    }
}
