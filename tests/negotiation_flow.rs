//! End-to-End Negotiation Scenarios
//!
//! Full runs over a scripted provider: the real agents, codec, decision
//! engine, and orchestrator, with only the LLM canned. Covers the happy
//! path, partial and fatal failures, clamping, exhaustion, cancellation,
//! stream-ordering guarantees, and seeded determinism.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use hagglebot_backend::agents::{BuyerTurn, LlmBuyerAgent, LlmSellerAgent, SellerRespond};
use hagglebot_backend::config::NegotiationConfig;
use hagglebot_backend::llm::types::{
    ChatMessage, ChatRole, GenerateParams, LlmResult, ProviderError, ProviderStatus, TokenStream,
    Usage,
};
use hagglebot_backend::llm::LlmProvider;
use hagglebot_backend::models::{
    BuyerConstraints, InventoryItem, Priority, Seller, SellerProfile, SpeakingStyle,
};
use hagglebot_backend::negotiation::{
    build_run_state, AgentKind, NegotiationEvent, NegotiationOrchestrator, RunSpec, RunStatus,
};
use hagglebot_backend::prompts::DefaultPromptBuilder;

/// Provider whose replies are keyed by the persona named in the system
/// prompt. Scripts are consumed in order and the last line repeats; personas
/// in `failures` always error.
struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<String>>>,
    failures: HashSet<String>,
    /// Personas that hang until cancelled.
    stalls: HashSet<String>,
}

impl ScriptedProvider {
    fn new(scripts: &[(&str, &[&str])]) -> Self {
        Self {
            scripts: Mutex::new(
                scripts
                    .iter()
                    .map(|(name, lines)| {
                        (
                            name.to_string(),
                            lines.iter().map(|l| l.to_string()).collect(),
                        )
                    })
                    .collect(),
            ),
            failures: HashSet::new(),
            stalls: HashSet::new(),
        }
    }

    fn failing(mut self, persona: &str) -> Self {
        self.failures.insert(persona.to_string());
        self
    }

    fn stalling(mut self, persona: &str) -> Self {
        self.stalls.insert(persona.to_string());
        self
    }

    fn persona_of(messages: &[ChatMessage]) -> Option<String> {
        let system = messages
            .iter()
            .find(|m| m.role == ChatRole::System)?
            .content
            .as_str();
        let rest = system.strip_prefix("You are ")?;
        let end = rest.find(',')?;
        Some(rest[..end].to_string())
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn ping(&self) -> ProviderStatus {
        ProviderStatus {
            available: true,
            base_url: "scripted://test".to_string(),
            models: None,
            error: None,
        }
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        _params: &GenerateParams,
    ) -> Result<LlmResult, ProviderError> {
        let persona = Self::persona_of(messages).unwrap_or_default();
        if self.stalls.contains(&persona) {
            std::future::pending::<()>().await;
        }
        if self.failures.contains(&persona) {
            return Err(ProviderError::Unavailable("scripted outage".to_string()));
        }

        let mut scripts = self.scripts.lock();
        let text = match scripts.get_mut(&persona) {
            Some(lines) if lines.len() > 1 => lines.pop_front().unwrap_or_default(),
            Some(lines) => lines.front().cloned().unwrap_or_default(),
            None => format!("Nothing scripted for {persona}."),
        };
        Ok(LlmResult {
            text,
            usage: Usage::default(),
            model: "scripted".to_string(),
        })
    }

    async fn stream(
        &self,
        _messages: &[ChatMessage],
        _params: &GenerateParams,
    ) -> Result<TokenStream, ProviderError> {
        Err(ProviderError::bad_response("streaming not scripted"))
    }
}

fn profile(priority: Priority) -> SellerProfile {
    SellerProfile {
        priority,
        speaking_style: SpeakingStyle::Neutral,
    }
}

fn seller(id: &str, name: &str, least: f64, selling: f64, available: u32) -> Seller {
    Seller::new(id, name, profile(Priority::MaximizeProfit)).with_item(InventoryItem {
        item_id: "widget-1".to_string(),
        item_name: "Widget".to_string(),
        cost_price: least - 1.0,
        selling_price: selling,
        least_price: least,
        quantity_available: available,
    })
}

struct Harness {
    spec: RunSpec,
    provider: Arc<ScriptedProvider>,
}

impl Harness {
    fn new(
        constraints: BuyerConstraints,
        sellers: Vec<Seller>,
        provider: ScriptedProvider,
        config: NegotiationConfig,
    ) -> Self {
        Self {
            spec: RunSpec {
                run_id: Some("run-test".to_string()),
                buyer_id: "buyer-1".to_string(),
                buyer_name: "Dana".to_string(),
                constraints,
                sellers,
                config,
            },
            provider: Arc::new(provider),
        }
    }

    fn start(
        &self,
    ) -> (
        hagglebot_backend::negotiation::RunHandle,
        tokio::sync::mpsc::Receiver<NegotiationEvent>,
    ) {
        let provider: Arc<dyn LlmProvider> = self.provider.clone();
        let prompts = Arc::new(DefaultPromptBuilder::default());

        let (state, _skipped) = build_run_state(&self.spec).expect("valid spec");

        let buyer: Arc<dyn BuyerTurn> = Arc::new(LlmBuyerAgent::new(
            provider.clone(),
            prompts.clone(),
            self.spec.constraints.clone(),
            &self.spec.config,
        ));
        let sellers: HashMap<String, Arc<dyn SellerRespond>> = state
            .sellers
            .iter()
            .map(|s| {
                let item = s
                    .find_item(&self.spec.constraints.item_name)
                    .expect("admitted sellers stock the item")
                    .clone();
                let agent: Arc<dyn SellerRespond> = Arc::new(LlmSellerAgent::new(
                    provider.clone(),
                    prompts.clone(),
                    s.clone(),
                    item,
                    &self.spec.config,
                ));
                (s.seller_id.clone(), agent)
            })
            .collect();

        NegotiationOrchestrator::new(buyer, sellers, self.spec.config.clone()).start(state)
    }

    async fn run_to_end(&self) -> (Vec<NegotiationEvent>, RunStatus) {
        let (handle, mut events) = self.start();
        let mut collected = Vec::new();
        while let Some(event) = events.recv().await {
            collected.push(event);
        }
        let status = handle.join().await;
        (collected, status)
    }
}

fn config(max_rounds: u32, seed: u64) -> NegotiationConfig {
    NegotiationConfig {
        max_negotiation_rounds: max_rounds,
        seed: Some(seed),
        ..Default::default()
    }
}

fn winner_of(events: &[NegotiationEvent]) -> Option<String> {
    events.iter().find_map(|e| match e {
        NegotiationEvent::NegotiationComplete { winner_id, .. } => winner_id.clone(),
        _ => None,
    })
}

fn seller_responses<'a>(events: &'a [NegotiationEvent], id: &str) -> Vec<&'a NegotiationEvent> {
    events
        .iter()
        .filter(|e| matches!(e, NegotiationEvent::SellerResponse { seller_id, .. } if seller_id == id))
        .collect()
}

// === S1: happy path, single winner ===
#[tokio::test]
async fn scenario_happy_path_single_winner() {
    let buyer_script: &[&str] = &["@Alpha @Bravo @Charlie I need 100 widgets, budget $5-$10."];
    let provider = ScriptedProvider::new(&[
        ("Dana", buyer_script),
        ("Alpha", &[r#"Can do. {"offer": {"price": 11.0, "quantity": 120}}"#]),
        ("Bravo", &[r#"Deal! {"offer": {"price": 9.5, "quantity": 120}}"#]),
        ("Charlie", &[r#"Take it. {"offer": {"price": 10.0, "quantity": 100}}"#]),
    ]);

    let harness = Harness::new(
        BuyerConstraints::new("widget-1", "Widget", 100, 5.0, 10.0),
        vec![
            seller("s1", "Alpha", 7.0, 12.0, 200),
            seller("s2", "Bravo", 7.0, 12.0, 200),
            seller("s3", "Charlie", 7.0, 12.0, 200),
        ],
        provider,
        config(5, 11),
    );

    let (events, status) = harness.run_to_end().await;
    assert_eq!(status, RunStatus::Completed);
    assert_eq!(winner_of(&events).as_deref(), Some("s2"));

    let NegotiationEvent::NegotiationComplete {
        total_rounds,
        exchanges_completed,
        winning_offer,
        ..
    } = events.last().unwrap()
    else {
        panic!("last event must be negotiation_complete");
    };
    assert_eq!(*total_rounds, 1);
    assert_eq!(winning_offer.as_ref().unwrap().price, 9.5);
    for id in ["s1", "s2", "s3"] {
        assert_eq!(exchanges_completed.get(id), Some(&1));
    }
}

// === S2: partial seller failure does not stop the run ===
#[tokio::test]
async fn scenario_seller_failure_is_recoverable() {
    let provider = ScriptedProvider::new(&[
        ("Dana", &["@Alpha @Bravo best price for 50 widgets?"]),
        ("Alpha", &["unused"]),
        ("Bravo", &[r#"Sure. {"offer": {"price": 8.0, "quantity": 60}}"#]),
    ])
    .failing("Alpha");

    let harness = Harness::new(
        BuyerConstraints::new("widget-1", "Widget", 50, 5.0, 10.0),
        vec![
            seller("s1", "Alpha", 6.0, 12.0, 100),
            seller("s2", "Bravo", 6.0, 12.0, 100),
        ],
        provider,
        config(5, 22),
    );

    let (events, status) = harness.run_to_end().await;
    assert_eq!(status, RunStatus::Completed);
    assert_eq!(winner_of(&events).as_deref(), Some("s2"));

    let recoverable_errors: Vec<_> = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                NegotiationEvent::Error {
                    agent: AgentKind::Seller,
                    seller_id: Some(id),
                    recoverable: true,
                    ..
                } if id == "s1"
            )
        })
        .collect();
    assert!(!recoverable_errors.is_empty());
    assert!(seller_responses(&events, "s1").is_empty());
    assert_eq!(seller_responses(&events, "s2").len(), 1);

    // The failed seller completed no exchanges.
    let NegotiationEvent::NegotiationComplete {
        exchanges_completed,
        ..
    } = events.last().unwrap()
    else {
        panic!("expected terminal completion");
    };
    assert_eq!(exchanges_completed.get("s1"), Some(&0));
    assert_eq!(exchanges_completed.get("s2"), Some(&1));
}

// === S3: no acceptable offers, max rounds exhausted ===
#[tokio::test]
async fn scenario_max_rounds_without_winner() {
    let provider = ScriptedProvider::new(&[
        ("Dana", &["@Alpha @Bravo I can pay at most $7."]),
        ("Alpha", &[r#"Firm at nine. {"offer": {"price": 9.0, "quantity": 100}}"#]),
        ("Bravo", &[r#"Nine, final. {"offer": {"price": 9.0, "quantity": 100}}"#]),
    ]);

    let harness = Harness::new(
        BuyerConstraints::new("widget-1", "Widget", 50, 5.0, 7.0),
        vec![
            seller("s1", "Alpha", 6.5, 12.0, 100),
            seller("s2", "Bravo", 6.5, 12.0, 100),
        ],
        provider,
        config(3, 33),
    );

    let (events, status) = harness.run_to_end().await;
    assert_eq!(status, RunStatus::Completed);

    let NegotiationEvent::NegotiationComplete {
        winner_id,
        winning_offer,
        total_rounds,
        reason,
        ..
    } = events.last().unwrap()
    else {
        panic!("expected terminal completion");
    };
    assert!(winner_id.is_none());
    assert!(winning_offer.is_none());
    assert_eq!(*total_rounds, 3);
    assert!(reason.contains("Max rounds"), "{reason}");

    // Three full rounds of (buyer, seller, heartbeat) per seller.
    assert_eq!(seller_responses(&events, "s1").len(), 3);
    assert_eq!(seller_responses(&events, "s2").len(), 3);
}

// === S4: buyer failure terminates the run ===
#[tokio::test]
async fn scenario_buyer_failure_is_fatal() {
    let provider = ScriptedProvider::new(&[
        ("Alpha", &[r#"Hello? {"offer": {"price": 8.0, "quantity": 100}}"#]),
    ])
    .failing("Dana");

    let harness = Harness::new(
        BuyerConstraints::new("widget-1", "Widget", 50, 5.0, 10.0),
        vec![seller("s1", "Alpha", 6.0, 12.0, 100)],
        provider,
        config(5, 44),
    );

    let (events, status) = harness.run_to_end().await;
    assert_eq!(status, RunStatus::Failed);
    assert_eq!(events.len(), 1);

    let NegotiationEvent::Error {
        agent, recoverable, ..
    } = &events[0]
    else {
        panic!("expected a single error event, got {:?}", events[0]);
    };
    assert_eq!(*agent, AgentKind::Buyer);
    assert!(!*recoverable);
    assert!(!events
        .iter()
        .any(|e| matches!(e, NegotiationEvent::NegotiationComplete { .. })));
}

// === S5: out-of-bounds offers are clamped to inventory limits ===
#[tokio::test]
async fn scenario_offer_clamping() {
    let provider = ScriptedProvider::new(&[
        ("Dana", &["@Alpha give me your best on 5 widgets."]),
        ("Alpha", &[r#"Everything! {"offer": {"price": 999, "quantity": 100}}"#]),
    ]);

    let harness = Harness::new(
        BuyerConstraints::new("widget-1", "Widget", 5, 5.0, 20.0),
        vec![seller("s1", "Alpha", 12.0, 18.0, 10)],
        provider,
        config(2, 55),
    );

    let (events, _status) = harness.run_to_end().await;

    let mut clamped_offers = 0;
    for event in &events {
        if let NegotiationEvent::SellerResponse {
            offer: Some(offer),
            violations,
            ..
        } = event
        {
            clamped_offers += 1;
            assert!(offer.price >= 12.0 && offer.price <= 18.0, "price {}", offer.price);
            assert!(offer.quantity >= 1 && offer.quantity <= 10);
            assert!(violations.contains(&"price_clamped".to_string()));
            assert!(violations.contains(&"quantity_clamped".to_string()));
        }
    }
    assert!(clamped_offers >= 1, "expected at least one clamped offer");
}

// === S6: mention parsing against the active roster ===
#[tokio::test]
async fn scenario_mention_parsing() {
    let provider = ScriptedProvider::new(&[("Dana", &["Hi @Alice and @bobco and @eve, prices?"])]);

    let constraints = BuyerConstraints::new("widget-1", "Widget", 10, 5.0, 10.0);
    let sellers = vec![
        seller("s1", "Alice", 6.0, 12.0, 100),
        seller("s2", "Bob Co.", 6.0, 12.0, 100),
    ];
    let config = NegotiationConfig::default();

    let (state, _) = build_run_state(&RunSpec {
        run_id: Some("run-mentions".to_string()),
        buyer_id: "buyer-1".to_string(),
        buyer_name: "Dana".to_string(),
        constraints: constraints.clone(),
        sellers,
        config: config.clone(),
    })
    .unwrap();

    let buyer = LlmBuyerAgent::new(
        Arc::new(provider),
        Arc::new(DefaultPromptBuilder::default()),
        constraints,
        &config,
    );
    let output = buyer.take_turn(&state).await.unwrap();
    assert_eq!(
        output.mentioned_sellers,
        vec!["s1".to_string(), "s2".to_string()]
    );
}

// === P1 + ordering: one terminal event, last; buyer -> seller -> heartbeat ===
#[tokio::test]
async fn property_stream_order_and_single_terminal() {
    let provider = ScriptedProvider::new(&[
        ("Dana", &["@Alpha @Bravo talk to me."]),
        ("Alpha", &["Thinking about it."]),
        ("Bravo", &[r#"Done. {"offer": {"price": 9.0, "quantity": 50}}"#]),
    ]);

    let harness = Harness::new(
        BuyerConstraints::new("widget-1", "Widget", 50, 5.0, 10.0),
        vec![
            seller("s1", "Alpha", 6.0, 12.0, 100),
            seller("s2", "Bravo", 6.0, 12.0, 100),
        ],
        provider,
        config(4, 66),
    );

    let (events, _status) = harness.run_to_end().await;

    let terminal_count = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminal_count, 1);
    assert!(events.last().unwrap().is_terminal());

    // Within each visit: buyer_message, then seller_response (or recoverable
    // error), then heartbeat.
    let mut expecting_buyer = true;
    for event in &events {
        match event {
            NegotiationEvent::BuyerMessage { .. } => {
                assert!(expecting_buyer, "buyer message out of order");
                expecting_buyer = false;
            }
            NegotiationEvent::Heartbeat { .. } => {
                expecting_buyer = true;
            }
            _ => {}
        }
    }
}

// === P4: exchange counters equal emitted seller responses ===
#[tokio::test]
async fn property_exchange_counters_match_responses() {
    let provider = ScriptedProvider::new(&[
        ("Dana", &["@Alpha @Bravo, offers please."]),
        ("Alpha", &["No offer from me."]),
        ("Bravo", &["None here either."]),
    ]);

    let harness = Harness::new(
        BuyerConstraints::new("widget-1", "Widget", 50, 5.0, 10.0),
        vec![
            seller("s1", "Alpha", 6.0, 12.0, 100),
            seller("s2", "Bravo", 6.0, 12.0, 100),
        ],
        provider,
        config(2, 77),
    );

    let (events, _status) = harness.run_to_end().await;
    let NegotiationEvent::NegotiationComplete {
        exchanges_completed,
        ..
    } = events.last().unwrap()
    else {
        panic!("expected terminal completion");
    };

    for id in ["s1", "s2"] {
        assert_eq!(
            *exchanges_completed.get(id).unwrap() as usize,
            seller_responses(&events, id).len()
        );
    }
}

// === P5: seeded runs emit identical sequences modulo timestamps ===
#[tokio::test]
async fn property_seeded_runs_are_deterministic() {
    let make_harness = || {
        Harness::new(
            BuyerConstraints::new("widget-1", "Widget", 100, 5.0, 10.0),
            vec![
                seller("s1", "Alpha", 7.0, 12.0, 200),
                seller("s2", "Bravo", 7.0, 12.0, 200),
            ],
            ScriptedProvider::new(&[
                ("Dana", &["@Alpha @Bravo 100 widgets, who bites?"]),
                ("Alpha", &[r#"Me. {"offer": {"price": 9.0, "quantity": 150}}"#]),
                ("Bravo", &[r#"Me too. {"offer": {"price": 8.5, "quantity": 150}}"#]),
            ]),
            config(5, 99),
        )
    };

    let (events_a, _) = make_harness().run_to_end().await;
    let (events_b, _) = make_harness().run_to_end().await;

    let strip_timestamps = |events: &[NegotiationEvent]| -> Vec<serde_json::Value> {
        events
            .iter()
            .map(|e| {
                let mut value = serde_json::to_value(e).unwrap();
                value.as_object_mut().unwrap().remove("timestamp");
                value
            })
            .collect()
    };

    assert_eq!(strip_timestamps(&events_a), strip_timestamps(&events_b));
}

// === cancellation: terminal error, failed status, nothing after ===
#[tokio::test]
async fn cancellation_emits_single_terminal_error() {
    let provider = ScriptedProvider::new(&[
        ("Dana", &["@Alpha are you there?"]),
        ("Alpha", &["..."]),
    ])
    .stalling("Alpha");

    let harness = Harness::new(
        BuyerConstraints::new("widget-1", "Widget", 10, 5.0, 10.0),
        vec![seller("s1", "Alpha", 6.0, 12.0, 100)],
        provider,
        config(5, 13),
    );

    let (handle, mut events) = harness.start();

    // First event: the buyer message. The seller then stalls forever.
    let first = events.recv().await.unwrap();
    assert!(matches!(first, NegotiationEvent::BuyerMessage { .. }));

    handle.cancel();

    let mut rest = Vec::new();
    while let Some(event) = events.recv().await {
        rest.push(event);
    }
    assert_eq!(rest.len(), 1, "only the cancellation error follows: {rest:?}");
    let NegotiationEvent::Error {
        error, recoverable, ..
    } = &rest[0]
    else {
        panic!("expected cancellation error, got {:?}", rest[0]);
    };
    assert_eq!(error, "cancelled");
    assert!(!*recoverable);

    assert_eq!(handle.join().await, RunStatus::Failed);
}
