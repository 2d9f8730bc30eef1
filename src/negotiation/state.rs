//! Run State
//!
//! Append-only negotiation state owned by a single orchestrator task.
//! Messages and offers are only created through the append methods here so
//! turn indexing, visibility scopes, exchange counters, and id generation
//! stay consistent. Ids come from a ChaCha8 generator seeded with the run
//! seed, which makes seeded runs byte-for-byte reproducible.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{BuyerConstraints, Seller};
use crate::negotiation::NegotiationError;

/// Current timestamp in the wire format used by all events.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Buyer,
    Seller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
}

/// One message in the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub round_number: u32,
    /// Position in the run history; equals the history length at append time.
    pub turn_index: usize,
    pub sender_type: SenderType,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub mentioned_sellers: Vec<String>,
    /// Scope tokens: `all`, `buyer:<id>`, `seller:<id>`.
    pub visibility: Vec<String>,
    /// Buyer messages carry the seller the turn addresses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_seller: Option<String>,
    pub timestamp: String,
}

/// A seller's structured offer, attached to the message created in the same
/// turn. Never mutated except for the single pending -> accepted flip at run
/// termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: String,
    pub seller_id: String,
    pub price: f64,
    pub quantity: u32,
    pub item_id: String,
    pub status: OfferStatus,
    pub created_at_round: u32,
}

/// Id generator: seeded ChaCha8 when a seed is present, OS randomness
/// otherwise. UUIDs are built from the generator so seeded runs reproduce.
struct IdGen {
    rng: Option<ChaCha8Rng>,
}

impl std::fmt::Debug for IdGen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGen")
            .field("seeded", &self.rng.is_some())
            .finish()
    }
}

impl IdGen {
    fn new(seed: Option<u64>) -> Self {
        Self {
            rng: seed.map(ChaCha8Rng::seed_from_u64),
        }
    }

    fn next(&mut self, prefix: &str) -> String {
        let uuid = match &mut self.rng {
            Some(rng) => {
                let mut bytes = [0u8; 16];
                rng.fill_bytes(&mut bytes);
                uuid::Builder::from_random_bytes(bytes).into_uuid()
            }
            None => Uuid::new_v4(),
        };
        format!("{prefix}_{}", uuid.simple())
    }
}

/// Mutable state for a single negotiation run. Owned exclusively by the
/// orchestrator task; agents only ever see `&RunState`.
#[derive(Debug)]
pub struct RunState {
    pub run_id: String,
    pub status: RunStatus,
    pub current_round: u32,
    pub current_seller_index: usize,
    pub exchanges_completed: BTreeMap<String, u32>,
    pub message_history: Vec<Message>,
    pub offer_history: Vec<Offer>,
    /// Participant ids in fixed visitation order.
    pub active_sellers: Vec<String>,
    pub buyer_id: String,
    pub buyer_name: String,
    pub buyer_constraints: BuyerConstraints,
    /// Static configuration of the admitted sellers.
    pub sellers: Vec<Seller>,
    pub seed: Option<u64>,
    pub max_rounds: u32,
    pub created_at: String,
    first_offer_rounds: BTreeMap<String, u32>,
    id_gen: IdGen,
}

impl RunState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: impl Into<String>,
        buyer_id: impl Into<String>,
        buyer_name: impl Into<String>,
        buyer_constraints: BuyerConstraints,
        sellers: Vec<Seller>,
        seed: Option<u64>,
        max_rounds: u32,
    ) -> Self {
        let active_sellers: Vec<String> =
            sellers.iter().map(|s| s.seller_id.clone()).collect();
        let exchanges_completed = active_sellers
            .iter()
            .map(|id| (id.clone(), 0u32))
            .collect();

        Self {
            run_id: run_id.into(),
            status: RunStatus::Pending,
            current_round: 0,
            current_seller_index: 0,
            exchanges_completed,
            message_history: Vec::new(),
            offer_history: Vec::new(),
            active_sellers,
            buyer_id: buyer_id.into(),
            buyer_name: buyer_name.into(),
            buyer_constraints,
            sellers,
            seed,
            max_rounds,
            created_at: now_timestamp(),
            first_offer_rounds: BTreeMap::new(),
            id_gen: IdGen::new(seed),
        }
    }

    pub fn seller(&self, seller_id: &str) -> Option<&Seller> {
        self.sellers.iter().find(|s| s.seller_id == seller_id)
    }

    pub fn seller_name<'a>(&'a self, seller_id: &'a str) -> &'a str {
        self.seller(seller_id).map(|s| s.name.as_str()).unwrap_or(seller_id)
    }

    /// Enforce the run status lifecycle: `pending -> in_progress ->
    /// {completed, failed}`, terminal states write-once.
    pub fn transition(&mut self, to: RunStatus) -> Result<(), NegotiationError> {
        let ok = matches!(
            (self.status, to),
            (RunStatus::Pending, RunStatus::InProgress)
                | (RunStatus::InProgress, RunStatus::Completed)
                | (RunStatus::InProgress, RunStatus::Failed)
        );
        if !ok {
            return Err(NegotiationError::InvalidTransition {
                from: self.status.as_str(),
                to: to.as_str(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Append the buyer's message for the current `(round, seller)` slot.
    pub fn append_buyer_message(
        &mut self,
        content: String,
        mentioned_sellers: Vec<String>,
        target_seller: &str,
    ) -> &Message {
        let message = Message {
            message_id: self.id_gen.next("msg"),
            round_number: self.current_round,
            turn_index: self.message_history.len(),
            sender_type: SenderType::Buyer,
            sender_id: self.buyer_id.clone(),
            sender_name: self.buyer_name.clone(),
            content,
            mentioned_sellers,
            visibility: vec!["all".to_string()],
            target_seller: Some(target_seller.to_string()),
            timestamp: now_timestamp(),
        };
        self.message_history.push(message);
        self.message_history.last().expect("just pushed")
    }

    /// Append a seller's reply for the current slot.
    pub fn append_seller_message(&mut self, seller_id: &str, content: String) -> &Message {
        let message = Message {
            message_id: self.id_gen.next("msg"),
            round_number: self.current_round,
            turn_index: self.message_history.len(),
            sender_type: SenderType::Seller,
            sender_id: seller_id.to_string(),
            sender_name: self.seller_name(seller_id).to_string(),
            content,
            mentioned_sellers: Vec::new(),
            visibility: vec!["all".to_string(), format!("seller:{seller_id}")],
            target_seller: None,
            timestamp: now_timestamp(),
        };
        self.message_history.push(message);
        self.message_history.last().expect("just pushed")
    }

    /// Record a pending offer for the current round.
    pub fn append_offer(
        &mut self,
        seller_id: &str,
        price: f64,
        quantity: u32,
        item_id: String,
    ) -> &Offer {
        let round = self.current_round;
        self.first_offer_rounds
            .entry(seller_id.to_string())
            .or_insert(round + 1);

        let offer = Offer {
            offer_id: self.id_gen.next("off"),
            seller_id: seller_id.to_string(),
            price,
            quantity,
            item_id,
            status: OfferStatus::Pending,
            created_at_round: round,
        };
        self.offer_history.push(offer);
        self.offer_history.last().expect("just pushed")
    }

    /// Round (1-based) in which the seller produced its first offer.
    pub fn first_offer_round(&self, seller_id: &str) -> Option<u32> {
        self.first_offer_rounds.get(seller_id).copied()
    }

    /// Flip an offer to accepted. Exactly one accepted offer may ever exist.
    pub fn accept_offer(&mut self, offer_id: &str) -> Result<&Offer, NegotiationError> {
        if self
            .offer_history
            .iter()
            .any(|o| o.status == OfferStatus::Accepted)
        {
            return Err(NegotiationError::InvariantViolation(
                "an offer was already accepted".to_string(),
            ));
        }
        let offer = self
            .offer_history
            .iter_mut()
            .find(|o| o.offer_id == offer_id)
            .ok_or_else(|| {
                NegotiationError::InvariantViolation(format!("unknown offer {offer_id}"))
            })?;
        if offer.status != OfferStatus::Pending {
            return Err(NegotiationError::InvariantViolation(format!(
                "offer {offer_id} is not pending"
            )));
        }
        offer.status = OfferStatus::Accepted;
        Ok(offer)
    }

    pub fn record_exchange(&mut self, seller_id: &str) {
        *self
            .exchanges_completed
            .entry(seller_id.to_string())
            .or_insert(0) += 1;
    }

    pub fn exchanges_for(&self, seller_id: &str) -> u32 {
        self.exchanges_completed.get(seller_id).copied().unwrap_or(0)
    }

    /// Full history, as seen by the buyer.
    pub fn history_for_buyer(&self) -> Vec<&Message> {
        self.message_history.iter().collect()
    }

    /// Messages a seller may see: scoped to it, public, or its own output.
    /// Information asymmetry between sellers lives here.
    pub fn history_for_seller(&self, seller_id: &str) -> Vec<&Message> {
        let scope = format!("seller:{seller_id}");
        self.message_history
            .iter()
            .filter(|m| {
                m.sender_id == seller_id
                    || m.visibility.iter().any(|v| v == "all" || *v == scope)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, SellerProfile, SpeakingStyle};

    fn state() -> RunState {
        let profile = SellerProfile {
            priority: Priority::MaximizeProfit,
            speaking_style: SpeakingStyle::Neutral,
        };
        RunState::new(
            "run-1",
            "buyer-1",
            "Dana",
            BuyerConstraints::new("item-1", "Widget", 10, 5.0, 10.0),
            vec![
                Seller::new("s1", "Alice", profile),
                Seller::new("s2", "Bob", profile),
            ],
            Some(42),
            5,
        )
    }

    #[test]
    fn test_turn_index_tracks_history_length() {
        let mut st = state();
        let first = st.append_buyer_message("hi".to_string(), vec![], "s1");
        assert_eq!(first.turn_index, 0);
        let second = st.append_seller_message("s1", "hello".to_string());
        assert_eq!(second.turn_index, 1);
        assert_eq!(st.message_history.len(), 2);
    }

    #[test]
    fn test_visibility_scopes() {
        let mut st = state();
        st.append_buyer_message("hi all".to_string(), vec![], "s1");
        st.append_seller_message("s1", "from s1".to_string());
        st.append_seller_message("s2", "from s2".to_string());

        let buyer_view = st.history_for_buyer();
        assert_eq!(buyer_view.len(), 3);

        let s1_view = st.history_for_seller("s1");
        assert_eq!(s1_view.len(), 3); // seller messages are scoped "all" too

        let msg = &st.message_history[1];
        assert_eq!(msg.visibility, vec!["all".to_string(), "seller:s1".to_string()]);
    }

    #[test]
    fn test_status_lifecycle() {
        let mut st = state();
        assert!(st.transition(RunStatus::Completed).is_err());
        st.transition(RunStatus::InProgress).unwrap();
        st.transition(RunStatus::Completed).unwrap();
        // Terminal status is write-once.
        assert!(st.transition(RunStatus::Failed).is_err());
    }

    #[test]
    fn test_single_accepted_offer() {
        let mut st = state();
        let first_id = st.append_offer("s1", 8.0, 20, "item-1".to_string()).offer_id.clone();
        let second_id = st.append_offer("s2", 9.0, 20, "item-1".to_string()).offer_id.clone();

        st.accept_offer(&first_id).unwrap();
        assert!(st.accept_offer(&second_id).is_err());
        assert!(st.accept_offer(&first_id).is_err());
    }

    #[test]
    fn test_first_offer_round_is_one_based_and_sticky() {
        let mut st = state();
        st.current_round = 1;
        st.append_offer("s1", 8.0, 20, "item-1".to_string());
        st.current_round = 3;
        st.append_offer("s1", 7.5, 20, "item-1".to_string());
        assert_eq!(st.first_offer_round("s1"), Some(2));
        assert_eq!(st.first_offer_round("s2"), None);
    }

    #[test]
    fn test_seeded_ids_reproduce() {
        let mut a = state();
        let mut b = state();
        let id_a = a.append_buyer_message("x".to_string(), vec![], "s1").message_id.clone();
        let id_b = b.append_buyer_message("x".to_string(), vec![], "s1").message_id.clone();
        assert_eq!(id_a, id_b);
        assert!(id_a.starts_with("msg_"));
    }
}
