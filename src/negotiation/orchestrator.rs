//! Negotiation Orchestrator
//!
//! Round-robin state machine driving buyer/seller exchanges. Each run
//! executes on its own task and publishes a totally ordered event stream
//! through an [`EventBus`]; every stream ends with exactly one terminal
//! event. Turns within a run are strictly sequential; a semaphore bounds
//! seller responses should a parallel mode ever be enabled.
//!
//! Failure policy: buyer failures kill the run, seller failures skip that
//! seller for the round, anything unexpected is fatal. Cancellation is
//! cooperative and checked at every turn boundary as well as during
//! in-flight provider calls.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agents::{AgentError, BuyerTurn, SellerRespond};
use crate::config::{ConfigError, NegotiationConfig};
use crate::models::{BuyerConstraints, Seller};
use crate::negotiation::bus::EventBus;
use crate::negotiation::decision::DecisionEngine;
use crate::negotiation::events::{AgentKind, NegotiationEvent, OfferPayload};
use crate::negotiation::state::{now_timestamp, RunState, RunStatus};
use crate::selection::{select_sellers, SkippedSeller};

/// Everything needed to start a run. Agents are bound separately on the
/// orchestrator; the `RunSpec` carries the static configuration.
#[derive(Debug, Clone)]
pub struct RunSpec {
    /// Explicit run id; generated when absent.
    pub run_id: Option<String>,
    pub buyer_id: String,
    pub buyer_name: String,
    pub constraints: BuyerConstraints,
    /// Candidate sellers; admission is decided by the selection filter.
    pub sellers: Vec<Seller>,
    pub config: NegotiationConfig,
}

/// Validate a spec and materialize the run state. All `ConfigError`s are
/// raised here, synchronously, before any event exists.
pub fn build_run_state(spec: &RunSpec) -> Result<(RunState, Vec<SkippedSeller>), ConfigError> {
    spec.config.validate()?;
    spec.constraints.validate()?;

    let mut seen = std::collections::HashSet::new();
    for seller in &spec.sellers {
        seller.validate()?;
        if !seen.insert(seller.seller_id.as_str()) {
            return Err(ConfigError::DuplicateSeller(seller.seller_id.clone()));
        }
    }

    let (admitted, skipped) = select_sellers(&spec.constraints, &spec.sellers);
    if admitted.is_empty() {
        return Err(ConfigError::NoSellersAvailable {
            item_name: spec.constraints.item_name.clone(),
        });
    }

    let run_id = spec
        .run_id
        .clone()
        .unwrap_or_else(|| format!("run_{}", Uuid::new_v4().simple()));

    let state = RunState::new(
        run_id,
        spec.buyer_id.clone(),
        spec.buyer_name.clone(),
        spec.constraints.clone(),
        admitted.into_iter().cloned().collect(),
        spec.config.seed,
        spec.config.max_negotiation_rounds,
    );
    Ok((state, skipped))
}

/// Handle to a running negotiation: cancel it, subscribe late, await it.
pub struct RunHandle {
    cancel_tx: watch::Sender<bool>,
    join: JoinHandle<RunStatus>,
    bus: Arc<EventBus>,
}

impl RunHandle {
    /// Request cooperative cancellation. The run finishes the event it is
    /// emitting, publishes a terminal cancellation error, and stops.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Attach another consumer to the run's event stream.
    pub fn subscribe(&self) -> mpsc::Receiver<NegotiationEvent> {
        self.bus.subscribe()
    }

    /// Wait for the run to finish and return its terminal status.
    pub async fn join(self) -> RunStatus {
        self.join.await.unwrap_or(RunStatus::Failed)
    }
}

pub struct NegotiationOrchestrator {
    buyer: Arc<dyn BuyerTurn>,
    sellers: HashMap<String, Arc<dyn SellerRespond>>,
    config: NegotiationConfig,
    decision: DecisionEngine,
}

impl NegotiationOrchestrator {
    pub fn new(
        buyer: Arc<dyn BuyerTurn>,
        sellers: HashMap<String, Arc<dyn SellerRespond>>,
        config: NegotiationConfig,
    ) -> Self {
        info!(
            sellers = sellers.len(),
            parallel_limit = config.parallel_seller_limit,
            max_rounds = config.max_negotiation_rounds,
            "orchestrator initialized"
        );
        let decision = DecisionEngine::new(config.min_negotiation_rounds);
        Self {
            buyer,
            sellers,
            config,
            decision,
        }
    }

    /// Spawn the run task. Returns the handle and the primary event
    /// subscription; the stream ends after the terminal event.
    pub fn start(self, state: RunState) -> (RunHandle, mpsc::Receiver<NegotiationEvent>) {
        let bus = Arc::new(EventBus::new());
        let events = bus.subscribe();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let bus_for_task = Arc::clone(&bus);
        let join = tokio::spawn(async move { self.run_loop(state, bus_for_task, cancel_rx).await });

        (
            RunHandle {
                cancel_tx,
                join,
                bus,
            },
            events,
        )
    }

    async fn run_loop(
        self,
        mut state: RunState,
        bus: Arc<EventBus>,
        mut cancel_rx: watch::Receiver<bool>,
    ) -> RunStatus {
        let run_id = state.run_id.clone();
        if let Err(e) = state.transition(RunStatus::InProgress) {
            error!(%run_id, error = %e, "run could not start");
            return self.fail(&mut state, &bus, AgentKind::Graph, None, e.to_string());
        }

        info!(
            %run_id,
            sellers = state.active_sellers.len(),
            max_rounds = state.max_rounds,
            seed = ?state.seed,
            "negotiation started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.parallel_seller_limit));
        let active = state.active_sellers.clone();

        for round in 0..state.max_rounds {
            state.current_round = round;
            debug!(%run_id, round = round + 1, "round start");

            for (seller_index, seller_id) in active.iter().enumerate() {
                state.current_seller_index = seller_index;

                if *cancel_rx.borrow() {
                    return self.cancelled(&mut state, &bus);
                }

                // === buyer turn, addressing this seller ===
                let buyer_result = tokio::select! {
                    biased;
                    _ = cancel_rx.changed() => return self.cancelled(&mut state, &bus),
                    result = self.buyer.take_turn(&state) => result,
                };
                let buyer_output = match buyer_result {
                    Ok(output) => output,
                    Err(e) => {
                        error!(%run_id, round, error = %e, "buyer agent failed");
                        return self.fail(&mut state, &bus, AgentKind::Buyer, None, e.to_string());
                    }
                };

                let (message_id, content) = {
                    let message = state.append_buyer_message(
                        buyer_output.message,
                        buyer_output.mentioned_sellers,
                        seller_id,
                    );
                    (message.message_id.clone(), message.content.clone())
                };
                bus.publish(&NegotiationEvent::BuyerMessage {
                    run_id: run_id.clone(),
                    timestamp: now_timestamp(),
                    round,
                    seller_id: seller_id.clone(),
                    seller_index,
                    message_id,
                    content,
                });

                // === seller response, this seller only ===
                match self
                    .seller_response(&state, seller_id, &semaphore, &mut cancel_rx)
                    .await
                {
                    SellerStep::Cancelled => return self.cancelled(&mut state, &bus),
                    SellerStep::Failed(e) => {
                        warn!(%run_id, round, %seller_id, error = %e, "seller failed, skipping for this round");
                        bus.publish(&NegotiationEvent::Error {
                            run_id: run_id.clone(),
                            timestamp: now_timestamp(),
                            round,
                            agent: AgentKind::Seller,
                            seller_id: Some(seller_id.clone()),
                            error: e.to_string(),
                            recoverable: true,
                        });
                        continue;
                    }
                    SellerStep::Responded(output) => {
                        let (message_id, content) = {
                            let message =
                                state.append_seller_message(seller_id, output.message);
                            (message.message_id.clone(), message.content.clone())
                        };

                        let (offer_payload, violations) = match output.offer {
                            Some(draft) => {
                                let offer = state.append_offer(
                                    seller_id,
                                    draft.price,
                                    draft.quantity,
                                    draft.item_id,
                                );
                                (Some(OfferPayload::from(offer)), draft.violations)
                            }
                            None => (None, Vec::new()),
                        };

                        state.record_exchange(seller_id);
                        bus.publish(&NegotiationEvent::SellerResponse {
                            run_id: run_id.clone(),
                            timestamp: now_timestamp(),
                            round,
                            seller_id: seller_id.clone(),
                            exchange_number: state.exchanges_for(seller_id),
                            message_id,
                            content,
                            offer: offer_payload,
                            violations,
                        });
                    }
                }

                bus.publish(&NegotiationEvent::Heartbeat {
                    run_id: run_id.clone(),
                    timestamp: now_timestamp(),
                    round,
                    current_seller: seller_id.clone(),
                    seller_index,
                    exchanges_completed: state.exchanges_completed.clone(),
                    offers_count: state.offer_history.len(),
                    messages_count: state.message_history.len(),
                });
            }

            // === decision, after the full round ===
            if let Some(outcome) = self.decision.evaluate(&state, round + 1) {
                let winning_offer = match outcome.winning_offer_id.as_deref() {
                    Some(offer_id) => match state.accept_offer(offer_id) {
                        Ok(offer) => Some(OfferPayload::from(offer)),
                        Err(e) => {
                            error!(%run_id, error = %e, "failed to accept winning offer");
                            return self.fail(
                                &mut state,
                                &bus,
                                AgentKind::Graph,
                                None,
                                e.to_string(),
                            );
                        }
                    },
                    None => None,
                };

                if let Err(e) = state.transition(RunStatus::Completed) {
                    error!(%run_id, error = %e, "invalid completion transition");
                    return self.fail(&mut state, &bus, AgentKind::Graph, None, e.to_string());
                }

                info!(%run_id, reason = %outcome.reason, "negotiation completed");
                bus.publish(&NegotiationEvent::NegotiationComplete {
                    run_id: run_id.clone(),
                    timestamp: now_timestamp(),
                    total_rounds: outcome.total_rounds,
                    exchanges_completed: state.exchanges_completed.clone(),
                    winner_id: outcome.winner_id,
                    winning_offer,
                    reason: outcome.reason,
                });
                bus.close();
                return RunStatus::Completed;
            }
        }

        // Max rounds exhausted without a decision.
        if let Err(e) = state.transition(RunStatus::Completed) {
            error!(%run_id, error = %e, "invalid completion transition");
            return self.fail(&mut state, &bus, AgentKind::Graph, None, e.to_string());
        }
        let reason = format!(
            "Max rounds reached ({} rounds with all sellers), no acceptable offer",
            state.max_rounds
        );
        info!(%run_id, "negotiation completed without winner");
        bus.publish(&NegotiationEvent::NegotiationComplete {
            run_id: run_id.clone(),
            timestamp: now_timestamp(),
            total_rounds: state.max_rounds,
            exchanges_completed: state.exchanges_completed.clone(),
            winner_id: None,
            winning_offer: None,
            reason,
        });
        bus.close();
        RunStatus::Completed
    }

    async fn seller_response(
        &self,
        state: &RunState,
        seller_id: &str,
        semaphore: &Arc<Semaphore>,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> SellerStep {
        let Some(agent) = self.sellers.get(seller_id) else {
            return SellerStep::Failed(AgentError::MissingSeller(seller_id.to_string()));
        };

        // In sequential mode this permit is always free; with a parallel
        // limit it bounds in-flight responses.
        let _permit = semaphore.acquire().await;

        tokio::select! {
            biased;
            _ = cancel_rx.changed() => SellerStep::Cancelled,
            result = agent.respond(state, &state.buyer_name, &state.buyer_constraints) => {
                match result {
                    Ok(output) => SellerStep::Responded(output),
                    Err(e) => SellerStep::Failed(e),
                }
            }
        }
    }

    /// Terminal cancellation: one error event, failed status, closed stream.
    fn cancelled(&self, state: &mut RunState, bus: &EventBus) -> RunStatus {
        info!(run_id = %state.run_id, "run cancelled");
        bus.publish(&NegotiationEvent::Error {
            run_id: state.run_id.clone(),
            timestamp: now_timestamp(),
            round: state.current_round,
            agent: AgentKind::Graph,
            seller_id: None,
            error: "cancelled".to_string(),
            recoverable: false,
        });
        if state.transition(RunStatus::Failed).is_err() {
            warn!(run_id = %state.run_id, "cancellation after terminal status");
        }
        bus.close();
        RunStatus::Failed
    }

    /// Terminal failure: one non-recoverable error event, no completion.
    fn fail(
        &self,
        state: &mut RunState,
        bus: &EventBus,
        agent: AgentKind,
        seller_id: Option<String>,
        message: String,
    ) -> RunStatus {
        bus.publish(&NegotiationEvent::Error {
            run_id: state.run_id.clone(),
            timestamp: now_timestamp(),
            round: state.current_round,
            agent,
            seller_id,
            error: message,
            recoverable: false,
        });
        if state.transition(RunStatus::Failed).is_err() && state.status != RunStatus::Failed {
            warn!(run_id = %state.run_id, status = state.status.as_str(), "failure after terminal status");
        }
        bus.close();
        RunStatus::Failed
    }
}

enum SellerStep {
    Responded(crate::agents::SellerTurnOutput),
    Failed(AgentError),
    Cancelled,
}
