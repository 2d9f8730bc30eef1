//! Decision Engine
//!
//! Multi-factor scoring over pending offers, invoked after every completed
//! round. An offer is admissible when it sits inside the buyer's window
//! (with a fixed 10% flexibility margin above the ceiling), covers the
//! needed quantity, and respects the optional total budget.
//!
//! Score (0-100):
//! - Price (40): cheaper within the buyer's window scores higher
//! - Responsiveness (30): earlier decision rounds score higher
//! - Rounds (20): sellers whose first offer came early score higher
//! - Profile (10): customer-retention sellers get the bonus
//!
//! Ties break deterministically on (score desc, price asc, seller id asc).

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::Priority;
use crate::negotiation::state::{now_timestamp, OfferStatus, RunState};

/// Buyer flexibility above `max_price_per_unit`.
const PRICE_FLEX_FACTOR: f64 = 1.10;

const PRICE_WEIGHT: f64 = 40.0;
const RESPONSIVENESS_WEIGHT: f64 = 30.0;
const ROUNDS_WEIGHT: f64 = 20.0;
const PROFILE_WEIGHT: f64 = 10.0;

/// Score gap at or under which the runner-up is logged as a close call.
const CLOSE_DECISION_MARGIN: f64 = 5.0;

/// Scored view of one admissible offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferAnalysis {
    pub offer_id: String,
    pub seller_id: String,
    pub seller_name: String,
    pub price: f64,
    pub quantity: u32,
    pub price_score: f64,
    pub responsiveness_score: f64,
    pub rounds_score: f64,
    pub profile_score: f64,
    pub total_score: f64,
    /// 1-based round of this seller's first offer.
    pub first_offer_round: u32,
    pub seller_priority: Priority,
}

/// Terminal result produced by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_offer_id: Option<String>,
    pub total_rounds: u32,
    pub reason: String,
    pub decided_at: String,
}

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    /// Full rounds that must complete before any decision.
    min_rounds: u32,
}

impl DecisionEngine {
    pub fn new(min_rounds: u32) -> Self {
        Self { min_rounds }
    }

    /// Evaluate the run after `rounds_completed` full rounds. Returns `None`
    /// while no admissible offer exists (or the round gate is not met), in
    /// which case the orchestrator keeps going.
    pub fn evaluate(&self, state: &RunState, rounds_completed: u32) -> Option<NegotiationOutcome> {
        if rounds_completed < self.min_rounds {
            debug!(
                rounds_completed,
                min_rounds = self.min_rounds,
                "decision deferred below round gate"
            );
            return None;
        }

        let analyses = self.analyze_offers(state, rounds_completed);
        let best = self.select_best_offer(&analyses)?;

        let reason = decision_reason(best);
        info!(
            winner = %best.seller_id,
            score = best.total_score,
            "decision reached: {reason}"
        );

        Some(NegotiationOutcome {
            winner_id: Some(best.seller_id.clone()),
            winning_offer_id: Some(best.offer_id.clone()),
            total_rounds: rounds_completed,
            reason,
            decided_at: now_timestamp(),
        })
    }

    /// Score every admissible pending offer, best first.
    pub fn analyze_offers(&self, state: &RunState, rounds_completed: u32) -> Vec<OfferAnalysis> {
        let constraints = &state.buyer_constraints;
        let max_price_flexible = constraints.max_price_per_unit * PRICE_FLEX_FACTOR;
        let max_rounds = state.max_rounds.max(1) as f64;

        let mut analyses: Vec<OfferAnalysis> = Vec::new();

        for offer in &state.offer_history {
            if offer.status != OfferStatus::Pending {
                continue;
            }
            if offer.price < constraints.min_price_per_unit {
                debug!(seller = %offer.seller_id, price = offer.price, "offer below buyer minimum");
                continue;
            }
            if offer.price > max_price_flexible {
                debug!(
                    seller = %offer.seller_id,
                    price = offer.price,
                    limit = max_price_flexible,
                    "offer above flexible price limit"
                );
                continue;
            }
            if offer.price > constraints.max_price_per_unit {
                info!(
                    seller = %offer.seller_id,
                    price = offer.price,
                    over_pct = (offer.price / constraints.max_price_per_unit - 1.0) * 100.0,
                    "admitting offer under flexible pricing"
                );
            }
            if offer.quantity < constraints.quantity_needed {
                debug!(seller = %offer.seller_id, quantity = offer.quantity, "offer quantity insufficient");
                continue;
            }
            if let Some(budget) = constraints.budget_per_item {
                let total = offer.price * f64::from(offer.quantity);
                if total > budget {
                    debug!(seller = %offer.seller_id, total, budget, "offer exceeds budget");
                    continue;
                }
            }

            let Some(seller) = state.seller(&offer.seller_id) else {
                continue;
            };

            // Price factor: a zero-width window awards the full cap.
            let price_range = constraints.max_price_per_unit - constraints.min_price_per_unit;
            let price_score = if price_range > 0.0 {
                PRICE_WEIGHT * (constraints.max_price_per_unit - offer.price) / price_range
            } else {
                PRICE_WEIGHT
            };

            let responsiveness_score = RESPONSIVENESS_WEIGHT
                * (1.0 - (f64::from(rounds_completed) - 1.0) / max_rounds);

            let first_offer_round = state
                .first_offer_round(&offer.seller_id)
                .unwrap_or(offer.created_at_round + 1);
            let rounds_score =
                ROUNDS_WEIGHT * (1.0 - (f64::from(first_offer_round) - 1.0) / max_rounds);

            let profile_score = if seller.profile.priority == Priority::CustomerRetention {
                PROFILE_WEIGHT
            } else {
                0.0
            };

            let total_score = price_score + responsiveness_score + rounds_score + profile_score;

            info!(
                seller = %seller.name,
                price = offer.price,
                price_score,
                responsiveness_score,
                rounds_score,
                profile_score,
                total_score,
                "analyzed offer"
            );

            analyses.push(OfferAnalysis {
                offer_id: offer.offer_id.clone(),
                seller_id: offer.seller_id.clone(),
                seller_name: seller.name.clone(),
                price: offer.price,
                quantity: offer.quantity,
                price_score,
                responsiveness_score,
                rounds_score,
                profile_score,
                total_score,
                first_offer_round,
                seller_priority: seller.profile.priority,
            });
        }

        analyses.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.price
                        .partial_cmp(&b.price)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.seller_id.cmp(&b.seller_id))
        });

        analyses
    }

    /// Pick the winner from pre-sorted analyses, logging close calls.
    pub fn select_best_offer<'a>(
        &self,
        analyses: &'a [OfferAnalysis],
    ) -> Option<&'a OfferAnalysis> {
        let best = analyses.first()?;

        if let Some(second) = analyses.get(1) {
            let gap = best.total_score - second.total_score;
            if gap <= CLOSE_DECISION_MARGIN {
                warn!(
                    best = %best.seller_name,
                    best_score = best.total_score,
                    runner_up = %second.seller_name,
                    runner_up_score = second.total_score,
                    gap,
                    "close decision"
                );
            }
        }

        Some(best)
    }
}

/// Human-readable explanation for the selected offer.
fn decision_reason(analysis: &OfferAnalysis) -> String {
    let total = analysis.price * f64::from(analysis.quantity);
    let mut parts = vec![
        format!("Selected {}", analysis.seller_name),
        format!(
            "${:.2}/unit for {} units (total: ${:.2})",
            analysis.price, analysis.quantity, total
        ),
        format!("Score: {:.1}/100", analysis.total_score),
    ];

    let mut breakdown = Vec::new();
    if analysis.price_score > 35.0 {
        breakdown.push(format!("competitive price ({:.0}/40)", analysis.price_score));
    }
    if analysis.responsiveness_score > 25.0 {
        breakdown.push(format!(
            "quick response ({:.0}/30)",
            analysis.responsiveness_score
        ));
    }
    if analysis.first_offer_round <= 2 {
        breakdown.push(format!("early offer (round {})", analysis.first_offer_round));
    }
    if analysis.profile_score > 0.0 {
        breakdown.push(format!(
            "{} seller (+{:.0})",
            analysis.seller_priority.as_str(),
            analysis.profile_score
        ));
    }
    if !breakdown.is_empty() {
        parts.push(format!("[{}]", breakdown.join(", ")));
    }

    parts.join(" - ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BuyerConstraints, Priority, Seller, SellerProfile, SpeakingStyle};
    use crate::negotiation::state::RunState;

    fn profile(priority: Priority) -> SellerProfile {
        SellerProfile {
            priority,
            speaking_style: SpeakingStyle::Neutral,
        }
    }

    fn state_with_sellers() -> RunState {
        RunState::new(
            "run-1",
            "buyer-1",
            "Dana",
            BuyerConstraints::new("item-1", "Widget", 100, 5.0, 10.0),
            vec![
                Seller::new("s1", "Alice", profile(Priority::MaximizeProfit)),
                Seller::new("s2", "Bob", profile(Priority::CustomerRetention)),
                Seller::new("s3", "Carol", profile(Priority::MaximizeProfit)),
            ],
            Some(1),
            5,
        )
    }

    #[test]
    fn test_out_of_window_offers_excluded() {
        let engine = DecisionEngine::new(0);
        let mut state = state_with_sellers();
        state.append_offer("s1", 11.5, 120, "item-1".to_string()); // above 10 * 1.10
        state.append_offer("s2", 4.0, 120, "item-1".to_string()); // below min
        state.append_offer("s3", 9.0, 50, "item-1".to_string()); // quantity short

        assert!(engine.analyze_offers(&state, 1).is_empty());
        assert!(engine.evaluate(&state, 1).is_none());
    }

    #[test]
    fn test_flexible_margin_admits_slightly_over() {
        let engine = DecisionEngine::new(0);
        let mut state = state_with_sellers();
        state.append_offer("s1", 10.9, 120, "item-1".to_string()); // within 10%
        let analyses = engine.analyze_offers(&state, 1);
        assert_eq!(analyses.len(), 1);
        // Over-ceiling price earns a negative price factor, ranking it below
        // any in-window offer.
        assert!(analyses[0].price_score < 0.0);
    }

    #[test]
    fn test_budget_gate() {
        let engine = DecisionEngine::new(0);
        let mut state = state_with_sellers();
        state.buyer_constraints.budget_per_item = Some(800.0);
        state.append_offer("s1", 9.0, 100, "item-1".to_string()); // 900 > 800
        assert!(engine.evaluate(&state, 1).is_none());

        state.append_offer("s2", 7.5, 100, "item-1".to_string()); // 750 <= 800
        let outcome = engine.evaluate(&state, 1).unwrap();
        assert_eq!(outcome.winner_id.as_deref(), Some("s2"));
    }

    #[test]
    fn test_profile_bonus_breaks_price_proximity() {
        let engine = DecisionEngine::new(0);
        let mut state = state_with_sellers();
        // Same price: the customer-retention seller wins on the +10 bonus.
        state.append_offer("s1", 8.0, 120, "item-1".to_string());
        state.append_offer("s2", 8.0, 120, "item-1".to_string());

        let outcome = engine.evaluate(&state, 1).unwrap();
        assert_eq!(outcome.winner_id.as_deref(), Some("s2"));
    }

    #[test]
    fn test_deterministic_tiebreak_on_seller_id() {
        let engine = DecisionEngine::new(0);
        let mut state = state_with_sellers();
        // Identical offers, identical profiles (s1, s3): seller id decides.
        state.append_offer("s3", 8.0, 120, "item-1".to_string());
        state.append_offer("s1", 8.0, 120, "item-1".to_string());

        let analyses = engine.analyze_offers(&state, 1);
        assert_eq!(analyses[0].seller_id, "s1");
    }

    #[test]
    fn test_min_round_gate_defers() {
        let engine = DecisionEngine::new(2);
        let mut state = state_with_sellers();
        state.append_offer("s1", 8.0, 120, "item-1".to_string());

        assert!(engine.evaluate(&state, 1).is_none());
        assert!(engine.evaluate(&state, 2).is_some());
    }

    #[test]
    fn test_reason_contains_key_facts() {
        let engine = DecisionEngine::new(0);
        let mut state = state_with_sellers();
        state.append_offer("s2", 7.5, 120, "item-1".to_string());

        let outcome = engine.evaluate(&state, 1).unwrap();
        let reason = &outcome.reason;
        assert!(reason.contains("Selected Bob"), "{reason}");
        assert!(reason.contains("$7.50/unit"), "{reason}");
        assert!(reason.contains("120 units"), "{reason}");
        assert!(reason.contains("Score:"), "{reason}");
        assert!(reason.contains("customer_retention"), "{reason}");
    }

    #[test]
    fn test_accepted_offers_not_rescanned() {
        let engine = DecisionEngine::new(0);
        let mut state = state_with_sellers();
        let offer_id = state
            .append_offer("s1", 8.0, 120, "item-1".to_string())
            .offer_id
            .clone();
        state.accept_offer(&offer_id).unwrap();

        assert!(engine.evaluate(&state, 1).is_none());
    }
}
