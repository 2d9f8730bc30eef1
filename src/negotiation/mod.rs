//! Negotiation Core
//!
//! Deterministic, event-emitting orchestration of bounded-round
//! buyer/seller negotiations.
//!
//! ```text
//! RunSpec ──▶ build_run_state ──▶ NegotiationOrchestrator::start
//!                                        │
//!                  per (round, seller):  │ buyer_message
//!                                        │ seller_response (+ offer)
//!                                        │ heartbeat
//!                  per round:            │ DecisionEngine
//!                                        ▼
//!                               negotiation_complete | error
//! ```
//!
//! The event stream of a run is a total order and always ends with exactly
//! one terminal event.

pub mod bus;
pub mod decision;
pub mod events;
pub mod orchestrator;
pub mod state;

use thiserror::Error;

pub use bus::EventBus;
pub use decision::{DecisionEngine, NegotiationOutcome, OfferAnalysis};
pub use events::{AgentKind, NegotiationEvent, OfferPayload};
pub use orchestrator::{build_run_state, NegotiationOrchestrator, RunHandle, RunSpec};
pub use state::{Message, Offer, OfferStatus, RunState, RunStatus, SenderType};

/// Failures internal to the negotiation core. Invariant violations indicate
/// programmer error and are always fatal to their run.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}
