//! Seller Agent
//!
//! One reply per visit: render the prompt over the seller's filtered view of
//! the conversation, call the provider, pull the offer out of the RAW text
//! (sanitization would strip it), clamp it to inventory bounds, then
//! sanitize the prose.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::agents::{
    AgentError, SellerOfferDraft, SellerRespond, SellerTurnOutput, SELLER_FALLBACK_MESSAGE,
};
use crate::config::NegotiationConfig;
use crate::llm::provider::LlmProvider;
use crate::llm::types::GenerateParams;
use crate::models::{BuyerConstraints, InventoryItem, Seller};
use crate::negotiation::state::RunState;
use crate::offers::{clamp_offer, extract_offer};
use crate::prompts::{PromptBuilder, SellerPromptContext};
use crate::sanitize::{sanitize, Role};

pub struct LlmSellerAgent {
    provider: Arc<dyn LlmProvider>,
    prompts: Arc<dyn PromptBuilder>,
    seller: Seller,
    inventory_item: InventoryItem,
    params: GenerateParams,
    fallback_on_provider_error: bool,
}

impl LlmSellerAgent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptBuilder>,
        seller: Seller,
        inventory_item: InventoryItem,
        config: &NegotiationConfig,
    ) -> Self {
        Self {
            provider,
            prompts,
            seller,
            inventory_item,
            params: GenerateParams {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                stop: None,
                model: None,
            },
            fallback_on_provider_error: config.agent_fallback_on_provider_error,
        }
    }

    pub fn seller_id(&self) -> &str {
        &self.seller.seller_id
    }
}

#[async_trait]
impl SellerRespond for LlmSellerAgent {
    async fn respond(
        &self,
        state: &RunState,
        buyer_name: &str,
        constraints: &BuyerConstraints,
    ) -> Result<SellerTurnOutput, AgentError> {
        let history = state.history_for_seller(&self.seller.seller_id);
        let messages = self.prompts.seller_prompt(&SellerPromptContext {
            seller: &self.seller,
            inventory_item: &self.inventory_item,
            constraints,
            history: &history,
            buyer_name,
        });

        let raw = match self.provider.generate(&messages, &self.params).await {
            Ok(result) => result.text,
            Err(e) if self.fallback_on_provider_error => {
                warn!(
                    seller = %self.seller.name,
                    error = %e,
                    "seller provider call failed; using fallback message"
                );
                return Ok(SellerTurnOutput {
                    message: SELLER_FALLBACK_MESSAGE.to_string(),
                    offer: None,
                });
            }
            Err(e) => {
                return Err(AgentError::Seller {
                    seller_id: self.seller.seller_id.clone(),
                    source: e,
                })
            }
        };

        // Offer extraction must see the raw text.
        let offer = extract_offer(&raw)
            .and_then(|extracted| clamp_offer(&extracted, &self.inventory_item))
            .map(|clamped| SellerOfferDraft {
                price: clamped.price,
                quantity: clamped.quantity,
                item_id: self.inventory_item.item_id.clone(),
                violations: clamped.violations,
            });

        let mut message = sanitize(&raw, Role::Seller);
        if message.is_empty() {
            message = SELLER_FALLBACK_MESSAGE.to_string();
        }

        info!(
            seller = %self.seller.name,
            has_offer = offer.is_some(),
            "seller turn complete"
        );

        Ok(SellerTurnOutput { message, offer })
    }
}
