//! Runtime Configuration
//!
//! Environment-driven settings for negotiation runs and LLM providers.
//! Everything has a working default so `hagglebot` starts against a local
//! chat-completion server with no `.env` at all. Validation is synchronous
//! and happens before any run is spawned.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised at configuration / run construction time, before any event
/// is emitted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("invalid buyer constraints: {0}")]
    InvalidConstraints(String),

    #[error("invalid inventory for seller {seller_id}: {reason}")]
    InvalidInventory { seller_id: String, reason: String },

    #[error("duplicate seller id: {0}")]
    DuplicateSeller(String),

    #[error("no sellers available for item {item_name}")]
    NoSellersAvailable { item_name: String },
}

/// Which provider backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    LocalChat,
    RemoteApi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &str {
        match self {
            ProviderKind::LocalChat => "local_chat",
            ProviderKind::RemoteApi => "remote_api",
        }
    }
}

/// Provider connection settings shared by both backends.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    /// Total deadline for a single generate/stream call.
    pub timeout_ms: u64,
    pub max_retries: u32,
    /// Base for exponential backoff: attempt k sleeps `base_delay * 2^k`.
    pub base_delay_ms: u64,
    /// Remote backend only: hard off-switch, checked before any request.
    pub remote_enabled: bool,
    pub api_key: Option<String>,
    pub referer: Option<String>,
    pub title: Option<String>,
    /// Inject the no-reasoning directive and strip `<think>` blocks from
    /// completions.
    pub reasoning_suppression: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::LocalChat,
            base_url: "http://localhost:1234/v1".to_string(),
            model: "qwen3-1.7b".to_string(),
            timeout_ms: 30_000,
            max_retries: 3,
            base_delay_ms: 2_000,
            remote_enabled: false,
            api_key: None,
            referer: None,
            title: None,
            reasoning_suppression: true,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(1u64 << attempt.min(16)))
    }

    /// Cache key for the process-wide provider registry.
    pub fn cache_key(&self) -> String {
        format!("{}|{}|{}", self.kind.as_str(), self.base_url, self.model)
    }
}

/// Negotiation-level settings.
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// Hard upper bound on full rounds.
    pub max_negotiation_rounds: u32,
    /// DecisionEngine declines to decide before this many full rounds.
    pub min_negotiation_rounds: u32,
    /// Upper bound on in-flight seller responses; 1 = strict sequential.
    pub parallel_seller_limit: usize,
    /// RNG seed; `None` means nondeterministic ids.
    pub seed: Option<u64>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Degraded mode: swallow provider errors into a fixed fallback message
    /// instead of surfacing typed agent failures.
    pub agent_fallback_on_provider_error: bool,
    /// Conversation window passed to prompt rendering.
    pub history_max_messages: usize,
    pub history_max_chars: usize,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_negotiation_rounds: 10,
            min_negotiation_rounds: 0,
            parallel_seller_limit: 1,
            seed: None,
            temperature: 0.0,
            max_tokens: 256,
            agent_fallback_on_provider_error: false,
            history_max_messages: 10,
            history_max_chars: 4_000,
        }
    }
}

impl NegotiationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_negotiation_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_negotiation_rounds",
                reason: "must be positive".to_string(),
            });
        }
        if self.min_negotiation_rounds > self.max_negotiation_rounds {
            return Err(ConfigError::InvalidValue {
                key: "min_negotiation_rounds",
                reason: format!(
                    "{} exceeds max_negotiation_rounds {}",
                    self.min_negotiation_rounds, self.max_negotiation_rounds
                ),
            });
        }
        if self.parallel_seller_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "parallel_seller_limit",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "temperature",
                reason: format!("{} outside [0, 2]", self.temperature),
            });
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_tokens",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub negotiation: NegotiationConfig,
    pub provider: ProviderConfig,
}

impl Config {
    /// Load from environment (with `.env` support), falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let provider_kind = match env_str("LLM_PROVIDER", "local_chat").as_str() {
            "local_chat" => ProviderKind::LocalChat,
            "remote_api" => ProviderKind::RemoteApi,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "LLM_PROVIDER",
                    reason: format!("unknown provider '{other}'"),
                })
            }
        };

        let provider = ProviderConfig {
            kind: provider_kind,
            base_url: env_str(
                "LLM_BASE_URL",
                match provider_kind {
                    ProviderKind::LocalChat => "http://localhost:1234/v1",
                    ProviderKind::RemoteApi => "https://openrouter.ai/api/v1",
                },
            ),
            model: env_str("LLM_MODEL", "qwen3-1.7b"),
            timeout_ms: env_parse("PROVIDER_TIMEOUT_MS", 30_000),
            max_retries: env_parse("PROVIDER_MAX_RETRIES", 3),
            base_delay_ms: env_parse("PROVIDER_BASE_DELAY_MS", 2_000),
            remote_enabled: env_flag("REMOTE_API_ENABLED", false),
            api_key: env::var("REMOTE_API_KEY").ok().filter(|s| !s.trim().is_empty()),
            referer: env::var("REMOTE_API_REFERER").ok().filter(|s| !s.trim().is_empty()),
            title: env::var("REMOTE_API_TITLE").ok().filter(|s| !s.trim().is_empty()),
            reasoning_suppression: env_flag("REASONING_SUPPRESSION", true),
        };

        let negotiation = NegotiationConfig {
            max_negotiation_rounds: env_parse("MAX_NEGOTIATION_ROUNDS", 10),
            min_negotiation_rounds: env_parse("MIN_NEGOTIATION_ROUNDS", 0),
            parallel_seller_limit: env_parse("PARALLEL_SELLER_LIMIT", 1),
            seed: env::var("NEGOTIATION_SEED")
                .ok()
                .and_then(|v| v.parse::<u64>().ok()),
            temperature: env_parse("LLM_TEMPERATURE", 0.0),
            max_tokens: env_parse("LLM_MAX_TOKENS", 256),
            agent_fallback_on_provider_error: env_flag("AGENT_FALLBACK_ON_PROVIDER_ERROR", false),
            history_max_messages: env_parse("HISTORY_MAX_MESSAGES", 10),
            history_max_chars: env_parse("HISTORY_MAX_CHARS", 4_000),
        };
        negotiation.validate()?;

        Ok(Self {
            negotiation,
            provider,
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}
