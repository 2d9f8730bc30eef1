//! HaggleBot Backend Library
//!
//! LLM-driven, bounded-round commercial negotiations: one buyer agent
//! haggling with multiple seller agents over a deterministic, event-emitting
//! orchestrator. The HTTP surface and persistence live in wrapping services;
//! this crate is the negotiation core plus the provider plumbing it needs.

pub mod agents;
pub mod config;
pub mod llm;
pub mod mentions;
pub mod models;
pub mod negotiation;
pub mod offers;
pub mod prompts;
pub mod sanitize;
pub mod selection;

pub use config::{Config, ConfigError, NegotiationConfig, ProviderConfig, ProviderKind};
pub use negotiation::{
    build_run_state, NegotiationEvent, NegotiationOrchestrator, RunHandle, RunSpec, RunStatus,
};
