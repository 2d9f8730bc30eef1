//! Agent Contract Layer
//!
//! The two polymorphic capabilities the orchestrator depends on, their typed
//! failure modes, and the fixed fallback lines used when a model produces
//! nothing usable. Agents receive `&RunState` and never mutate it.

pub mod buyer;
pub mod seller;

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::types::ProviderError;
use crate::models::BuyerConstraints;
use crate::negotiation::state::RunState;

pub use buyer::LlmBuyerAgent;
pub use seller::LlmSellerAgent;

/// Fixed buyer line for degraded turns.
pub const BUYER_FALLBACK_MESSAGE: &str =
    "I'm considering the offers. Please give me a moment.";

/// Fixed seller line for degraded turns.
pub const SELLER_FALLBACK_MESSAGE: &str =
    "I'm reviewing your request. Let me get back to you.";

/// Typed agent failures. Provider errors that exhausted their retries
/// surface here tagged with the originating role; the orchestrator's
/// failure policy decides whether the run dies (buyer) or degrades
/// (seller).
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("buyer agent failed: {0}")]
    Buyer(#[source] ProviderError),

    #[error("seller agent {seller_id} failed: {source}")]
    Seller {
        seller_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("no agent registered for seller {0}")]
    MissingSeller(String),
}

/// Result of one buyer turn.
#[derive(Debug, Clone, PartialEq)]
pub struct BuyerTurnOutput {
    pub message: String,
    /// Active sellers mentioned in the message, in order of first mention.
    pub mentioned_sellers: Vec<String>,
}

/// A seller's clamped offer as produced by a turn, before it becomes part of
/// the run's offer history.
#[derive(Debug, Clone, PartialEq)]
pub struct SellerOfferDraft {
    pub price: f64,
    pub quantity: u32,
    pub item_id: String,
    /// Clamp adjustments applied to the extracted values.
    pub violations: Vec<String>,
}

/// Result of one seller turn.
#[derive(Debug, Clone, PartialEq)]
pub struct SellerTurnOutput {
    pub message: String,
    pub offer: Option<SellerOfferDraft>,
}

/// Buyer capability: one turn addressing the run's current seller.
#[async_trait]
pub trait BuyerTurn: Send + Sync {
    async fn take_turn(&self, state: &RunState) -> Result<BuyerTurnOutput, AgentError>;
}

/// Seller capability: one reply to the buyer, optionally carrying an offer.
#[async_trait]
pub trait SellerRespond: Send + Sync {
    async fn respond(
        &self,
        state: &RunState,
        buyer_name: &str,
        constraints: &BuyerConstraints,
    ) -> Result<SellerTurnOutput, AgentError>;
}
