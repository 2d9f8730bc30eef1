//! HaggleBot - LLM Buyer/Seller Negotiation Engine
//!
//! Demo driver: runs one negotiation end-to-end and prints the event stream
//! as JSON lines, the same consumer surface a wrapping HTTP layer would
//! subscribe to. The default mode uses a scripted provider so it works with
//! no inference server running; `--live` talks to the configured backend.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use parking_lot::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hagglebot_backend::agents::{BuyerTurn, LlmBuyerAgent, LlmSellerAgent, SellerRespond};
use hagglebot_backend::config::Config;
use hagglebot_backend::llm::types::{
    ChatMessage, ChatRole, GenerateParams, LlmResult, ProviderError, ProviderStatus, TokenChunk,
    TokenStream, Usage,
};
use hagglebot_backend::llm::{get_provider, LlmProvider};
use hagglebot_backend::models::{
    BuyerConstraints, InventoryItem, Priority, Seller, SellerProfile, SpeakingStyle,
};
use hagglebot_backend::negotiation::{build_run_state, NegotiationOrchestrator, RunSpec};
use hagglebot_backend::prompts::DefaultPromptBuilder;

#[derive(Parser, Debug)]
#[command(name = "hagglebot", about = "Run a demo buyer/seller negotiation")]
struct Args {
    /// Talk to the configured LLM backend instead of the scripted provider.
    #[arg(long)]
    live: bool,

    /// Override MAX_NEGOTIATION_ROUNDS.
    #[arg(long)]
    rounds: Option<u32>,

    /// Override NEGOTIATION_SEED for reproducible ids.
    #[arg(long)]
    seed: Option<u64>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Canned provider for offline demos: replies are keyed by the persona name
/// in the system prompt and consumed in order, repeating the last line.
struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<String>>>,
}

impl ScriptedProvider {
    fn demo() -> Self {
        let mut scripts: HashMap<String, VecDeque<String>> = HashMap::new();
        scripts.insert(
            "Dana".to_string(),
            VecDeque::from([
                "Hi @GadgetHub and @CompuWorld, I need 100 widgets. What can you offer?"
                    .to_string(),
                "Those are interesting numbers. Can anyone do better on price?".to_string(),
            ]),
        );
        scripts.insert(
            "GadgetHub".to_string(),
            VecDeque::from([
                r#"Happy to help! {"offer": {"price": 9.5, "quantity": 120}}"#.to_string(),
                r#"Final answer. {"offer": {"price": 9.25, "quantity": 120}}"#.to_string(),
            ]),
        );
        scripts.insert(
            "CompuWorld".to_string(),
            VecDeque::from([
                r#"Premium stock only. {"offer": {"price": 10.0, "quantity": 100}}"#.to_string(),
            ]),
        );
        Self {
            scripts: Mutex::new(scripts),
        }
    }

    fn reply_for(&self, messages: &[ChatMessage]) -> String {
        let system = messages
            .iter()
            .find(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let mut scripts = self.scripts.lock();
        for (name, lines) in scripts.iter_mut() {
            if system.starts_with(&format!("You are {name},")) {
                if lines.len() > 1 {
                    return lines.pop_front().unwrap_or_default();
                }
                return lines.front().cloned().unwrap_or_default();
            }
        }
        warn!("no script matched; returning neutral line");
        "Let me get back to you on that.".to_string()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn ping(&self) -> ProviderStatus {
        ProviderStatus {
            available: true,
            base_url: "scripted://demo".to_string(),
            models: None,
            error: None,
        }
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        _params: &GenerateParams,
    ) -> Result<LlmResult, ProviderError> {
        Ok(LlmResult {
            text: self.reply_for(messages),
            usage: Usage::default(),
            model: "scripted".to_string(),
        })
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        _params: &GenerateParams,
    ) -> Result<TokenStream, ProviderError> {
        let text = self.reply_for(messages);
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tokio::spawn(async move {
            let _ = tx
                .send(Ok(TokenChunk {
                    token: text,
                    index: 0,
                    is_end: false,
                }))
                .await;
            let _ = tx.send(Ok(TokenChunk::end(1))).await;
        });
        Ok(rx)
    }
}

fn demo_sellers() -> Vec<Seller> {
    vec![
        Seller::new(
            "gadgethub",
            "GadgetHub",
            SellerProfile {
                priority: Priority::CustomerRetention,
                speaking_style: SpeakingStyle::VerySweet,
            },
        )
        .with_item(InventoryItem {
            item_id: "widget-1".to_string(),
            item_name: "Widget".to_string(),
            cost_price: 5.0,
            selling_price: 12.0,
            least_price: 7.0,
            quantity_available: 200,
        }),
        Seller::new(
            "compuworld",
            "CompuWorld",
            SellerProfile {
                priority: Priority::MaximizeProfit,
                speaking_style: SpeakingStyle::Rude,
            },
        )
        .with_item(InventoryItem {
            item_id: "widget-1".to_string(),
            item_name: "Widget".to_string(),
            cost_price: 6.0,
            selling_price: 14.0,
            least_price: 8.0,
            quantity_available: 150,
        }),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(rounds) = args.rounds {
        config.negotiation.max_negotiation_rounds = rounds;
    }
    if let Some(seed) = args.seed {
        config.negotiation.seed = Some(seed);
    }

    info!("HaggleBot negotiation engine starting");

    let provider: Arc<dyn LlmProvider> = if args.live {
        let provider = get_provider(&config.provider);
        let status = provider.ping().await;
        if !status.available {
            warn!(
                base_url = %status.base_url,
                error = ?status.error,
                "provider is not reachable; the run will rely on retries"
            );
        }
        provider
    } else {
        Arc::new(ScriptedProvider::demo())
    };

    let prompts = Arc::new(DefaultPromptBuilder::new(
        config.negotiation.history_max_messages,
        config.negotiation.history_max_chars,
    ));

    let constraints = BuyerConstraints::new("widget-1", "Widget", 100, 5.0, 10.0);
    let sellers = demo_sellers();

    let spec = RunSpec {
        run_id: None,
        buyer_id: "buyer-dana".to_string(),
        buyer_name: "Dana".to_string(),
        constraints: constraints.clone(),
        sellers: sellers.clone(),
        config: config.negotiation.clone(),
    };
    let (state, skipped) = build_run_state(&spec).context("Run construction failed")?;
    for skip in &skipped {
        warn!(
            seller = %skip.seller_name,
            reason = skip.reason.as_str(),
            "seller not participating"
        );
    }

    let buyer: Arc<dyn BuyerTurn> = Arc::new(LlmBuyerAgent::new(
        Arc::clone(&provider),
        prompts.clone(),
        constraints.clone(),
        &config.negotiation,
    ));
    let seller_agents: HashMap<String, Arc<dyn SellerRespond>> = state
        .sellers
        .iter()
        .map(|seller| {
            let item = seller
                .find_item(&constraints.item_name)
                .expect("admitted sellers stock the item")
                .clone();
            let agent: Arc<dyn SellerRespond> = Arc::new(LlmSellerAgent::new(
                Arc::clone(&provider),
                prompts.clone(),
                seller.clone(),
                item,
                &config.negotiation,
            ));
            (seller.seller_id.clone(), agent)
        })
        .collect();

    let orchestrator =
        NegotiationOrchestrator::new(buyer, seller_agents, config.negotiation.clone());
    let (handle, mut events) = orchestrator.start(state);

    while let Some(event) = events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
    }

    let status = handle.join().await;
    info!(status = status.as_str(), "run finished");
    Ok(())
}
