//! Negotiation Events
//!
//! The closed set of events a run emits, with typed payloads per variant.
//! Wire names are stable: `type` is the discriminant, timestamps are
//! RFC-3339 with milliseconds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::negotiation::state::Offer;

/// Where an error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Buyer,
    Seller,
    Graph,
}

/// Offer fields carried on events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferPayload {
    pub offer_id: String,
    pub seller_id: String,
    pub price: f64,
    pub quantity: u32,
    pub item_id: String,
}

impl From<&Offer> for OfferPayload {
    fn from(offer: &Offer) -> Self {
        Self {
            offer_id: offer.offer_id.clone(),
            seller_id: offer.seller_id.clone(),
            price: offer.price,
            quantity: offer.quantity,
            item_id: offer.item_id.clone(),
        }
    }
}

/// Event stream variants. Every event carries the run id and a timestamp;
/// exactly one terminal event (`negotiation_complete` or a non-recoverable
/// `error`) ends each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NegotiationEvent {
    BuyerMessage {
        run_id: String,
        timestamp: String,
        round: u32,
        seller_id: String,
        seller_index: usize,
        message_id: String,
        content: String,
    },
    SellerResponse {
        run_id: String,
        timestamp: String,
        round: u32,
        seller_id: String,
        /// Per-seller exchange counter after this response.
        exchange_number: u32,
        message_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        offer: Option<OfferPayload>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        violations: Vec<String>,
    },
    Heartbeat {
        run_id: String,
        timestamp: String,
        round: u32,
        current_seller: String,
        seller_index: usize,
        exchanges_completed: BTreeMap<String, u32>,
        offers_count: usize,
        messages_count: usize,
    },
    Error {
        run_id: String,
        timestamp: String,
        round: u32,
        agent: AgentKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        seller_id: Option<String>,
        error: String,
        recoverable: bool,
    },
    NegotiationComplete {
        run_id: String,
        timestamp: String,
        total_rounds: u32,
        exchanges_completed: BTreeMap<String, u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        winner_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        winning_offer: Option<OfferPayload>,
        reason: String,
    },
}

impl NegotiationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            NegotiationEvent::BuyerMessage { .. } => "buyer_message",
            NegotiationEvent::SellerResponse { .. } => "seller_response",
            NegotiationEvent::Heartbeat { .. } => "heartbeat",
            NegotiationEvent::Error { .. } => "error",
            NegotiationEvent::NegotiationComplete { .. } => "negotiation_complete",
        }
    }

    pub fn run_id(&self) -> &str {
        match self {
            NegotiationEvent::BuyerMessage { run_id, .. }
            | NegotiationEvent::SellerResponse { run_id, .. }
            | NegotiationEvent::Heartbeat { run_id, .. }
            | NegotiationEvent::Error { run_id, .. }
            | NegotiationEvent::NegotiationComplete { run_id, .. } => run_id,
        }
    }

    /// Whether this event ends its run's stream.
    pub fn is_terminal(&self) -> bool {
        match self {
            NegotiationEvent::NegotiationComplete { .. } => true,
            NegotiationEvent::Error { recoverable, .. } => !recoverable,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_serialization() {
        let event = NegotiationEvent::Heartbeat {
            run_id: "run-1".to_string(),
            timestamp: "2025-01-01T00:00:00.000Z".to_string(),
            round: 0,
            current_seller: "s1".to_string(),
            seller_index: 0,
            exchanges_completed: BTreeMap::from([("s1".to_string(), 1)]),
            offers_count: 0,
            messages_count: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "heartbeat");
        assert_eq!(json["current_seller"], "s1");
    }

    #[test]
    fn test_offer_omitted_when_absent() {
        let event = NegotiationEvent::SellerResponse {
            run_id: "run-1".to_string(),
            timestamp: "t".to_string(),
            round: 0,
            seller_id: "s1".to_string(),
            exchange_number: 1,
            message_id: "msg_1".to_string(),
            content: "no deal yet".to_string(),
            offer: None,
            violations: Vec::new(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("\"offer\""));
        assert!(!json.contains("violations"));
    }

    #[test]
    fn test_terminality() {
        let complete = NegotiationEvent::NegotiationComplete {
            run_id: "r".to_string(),
            timestamp: "t".to_string(),
            total_rounds: 1,
            exchanges_completed: BTreeMap::new(),
            winner_id: None,
            winning_offer: None,
            reason: "Max rounds reached".to_string(),
        };
        assert!(complete.is_terminal());

        let recoverable = NegotiationEvent::Error {
            run_id: "r".to_string(),
            timestamp: "t".to_string(),
            round: 0,
            agent: AgentKind::Seller,
            seller_id: Some("s1".to_string()),
            error: "provider timeout".to_string(),
            recoverable: true,
        };
        assert!(!recoverable.is_terminal());

        let fatal = NegotiationEvent::Error {
            run_id: "r".to_string(),
            timestamp: "t".to_string(),
            round: 0,
            agent: AgentKind::Buyer,
            seller_id: None,
            error: "provider down".to_string(),
            recoverable: false,
        };
        assert!(fatal.is_terminal());
    }

    #[test]
    fn test_round_trip() {
        let event = NegotiationEvent::BuyerMessage {
            run_id: "r".to_string(),
            timestamp: "t".to_string(),
            round: 2,
            seller_id: "s1".to_string(),
            seller_index: 0,
            message_id: "msg_a".to_string(),
            content: "hello".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: NegotiationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
