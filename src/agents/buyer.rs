//! Buyer Agent
//!
//! One turn: render the prompt, call the provider, sanitize, extract
//! mentions against the active roster. Deterministic defaults (temperature
//! 0) unless the run configuration overrides them.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::agents::{AgentError, BuyerTurn, BuyerTurnOutput, BUYER_FALLBACK_MESSAGE};
use crate::config::NegotiationConfig;
use crate::llm::provider::LlmProvider;
use crate::llm::types::GenerateParams;
use crate::mentions::parse_mentions;
use crate::models::BuyerConstraints;
use crate::negotiation::state::RunState;
use crate::prompts::{BuyerPromptContext, PromptBuilder};
use crate::sanitize::{sanitize, Role};

pub struct LlmBuyerAgent {
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<dyn PromptBuilder>,
    constraints: BuyerConstraints,
    params: GenerateParams,
    fallback_on_provider_error: bool,
}

impl LlmBuyerAgent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptBuilder>,
        constraints: BuyerConstraints,
        config: &NegotiationConfig,
    ) -> Self {
        Self {
            provider,
            prompts,
            constraints,
            params: GenerateParams {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                stop: None,
                model: None,
            },
            fallback_on_provider_error: config.agent_fallback_on_provider_error,
        }
    }
}

#[async_trait]
impl BuyerTurn for LlmBuyerAgent {
    async fn take_turn(&self, state: &RunState) -> Result<BuyerTurnOutput, AgentError> {
        let history = state.history_for_buyer();
        let messages = self.prompts.buyer_prompt(&BuyerPromptContext {
            buyer_name: &state.buyer_name,
            constraints: &self.constraints,
            history: &history,
            sellers: &state.sellers,
        });

        let raw = match self.provider.generate(&messages, &self.params).await {
            Ok(result) => result.text,
            Err(e) if self.fallback_on_provider_error => {
                warn!(error = %e, "buyer provider call failed; using fallback message");
                return Ok(BuyerTurnOutput {
                    message: BUYER_FALLBACK_MESSAGE.to_string(),
                    mentioned_sellers: Vec::new(),
                });
            }
            Err(e) => return Err(AgentError::Buyer(e)),
        };

        let mut message = sanitize(&raw, Role::Buyer);
        if message.is_empty() {
            message = BUYER_FALLBACK_MESSAGE.to_string();
        }

        let mentioned_sellers = parse_mentions(&message, &state.sellers);
        info!(
            buyer = %state.buyer_name,
            mentions = mentioned_sellers.len(),
            "buyer turn complete"
        );

        Ok(BuyerTurnOutput {
            message,
            mentioned_sellers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{
        ChatMessage, LlmResult, ProviderError, ProviderStatus, TokenStream, Usage,
    };
    use crate::models::{Priority, Seller, SellerProfile, SpeakingStyle};
    use crate::prompts::DefaultPromptBuilder;

    struct ScriptedProvider {
        reply: Result<String, ProviderError>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn ping(&self) -> ProviderStatus {
            ProviderStatus {
                available: true,
                base_url: "scripted".to_string(),
                models: None,
                error: None,
            }
        }

        async fn generate(
            &self,
            _messages: &[ChatMessage],
            _params: &GenerateParams,
        ) -> Result<LlmResult, ProviderError> {
            self.reply.clone().map(|text| LlmResult {
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
            Err(ProviderError::bad_response("not scripted"))
        }
    }

    fn run_state() -> RunState {
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
                Seller::new("s2", "Bob Co.", profile),
            ],
            Some(7),
            5,
        )
    }

    fn agent(reply: Result<String, ProviderError>, fallback: bool) -> LlmBuyerAgent {
        let mut config = NegotiationConfig::default();
        config.agent_fallback_on_provider_error = fallback;
        LlmBuyerAgent::new(
            Arc::new(ScriptedProvider { reply }),
            Arc::new(DefaultPromptBuilder::default()),
            BuyerConstraints::new("item-1", "Widget", 10, 5.0, 10.0),
            &config,
        )
    }

    #[tokio::test]
    async fn test_turn_sanitizes_and_extracts_mentions() {
        let reply = "<think>plan</think>Hi @Alice and @bobco, what are your prices?";
        let out = agent(Ok(reply.to_string()), false)
            .take_turn(&run_state())
            .await
            .unwrap();
        assert_eq!(out.message, "Hi @Alice and @bobco, what are your prices?");
        assert_eq!(out.mentioned_sellers, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[tokio::test]
    async fn test_provider_error_surfaces_by_default() {
        let err = agent(Err(ProviderError::Timeout), false)
            .take_turn(&run_state())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Buyer(ProviderError::Timeout)));
    }

    #[tokio::test]
    async fn test_provider_error_degrades_when_configured() {
        let out = agent(Err(ProviderError::Timeout), true)
            .take_turn(&run_state())
            .await
            .unwrap();
        assert_eq!(out.message, BUYER_FALLBACK_MESSAGE);
        assert!(out.mentioned_sellers.is_empty());
    }

    #[tokio::test]
    async fn test_empty_output_falls_back() {
        let out = agent(Ok("<think>all thoughts</think>".to_string()), false)
            .take_turn(&run_state())
            .await
            .unwrap();
        assert_eq!(out.message, BUYER_FALLBACK_MESSAGE);
    }
}
