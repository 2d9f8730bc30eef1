//! Prompt Building
//!
//! Agents are pure with respect to prompt wording: they hand a context to a
//! [`PromptBuilder`] and send whatever message sequence comes back. The
//! default builder renders the buyer/seller personas used by the demo; a
//! wrapping service can swap in its own without touching the agents.

use crate::llm::types::ChatMessage;
use crate::models::{BuyerConstraints, InventoryItem, Priority, Seller, SpeakingStyle};
use crate::negotiation::state::Message;

/// Context handed to the builder for a buyer turn.
pub struct BuyerPromptContext<'a> {
    pub buyer_name: &'a str,
    pub constraints: &'a BuyerConstraints,
    pub history: &'a [&'a Message],
    pub sellers: &'a [Seller],
}

/// Context handed to the builder for a seller turn. `history` is already
/// filtered to what this seller may see.
pub struct SellerPromptContext<'a> {
    pub seller: &'a Seller,
    pub inventory_item: &'a InventoryItem,
    pub constraints: &'a BuyerConstraints,
    pub history: &'a [&'a Message],
    pub buyer_name: &'a str,
}

/// Renders opaque message sequences for agent turns.
pub trait PromptBuilder: Send + Sync {
    fn buyer_prompt(&self, ctx: &BuyerPromptContext<'_>) -> Vec<ChatMessage>;
    fn seller_prompt(&self, ctx: &SellerPromptContext<'_>) -> Vec<ChatMessage>;
}

/// Keep the most recent messages within a message count and a character
/// budget. The newest message always survives, even oversized.
pub fn window_history<'a>(
    history: &[&'a Message],
    max_messages: usize,
    max_chars: usize,
) -> Vec<&'a Message> {
    if history.is_empty() {
        return Vec::new();
    }

    let start = history.len().saturating_sub(max_messages.max(1));
    let mut window: Vec<&Message> = history[start..].to_vec();

    let mut total_chars: usize = window.iter().map(|m| m.content.len()).sum();
    while total_chars > max_chars && window.len() > 1 {
        let removed = window.remove(0);
        total_chars -= removed.content.len();
    }

    window
}

/// Default persona renderer.
pub struct DefaultPromptBuilder {
    max_messages: usize,
    max_chars: usize,
}

impl DefaultPromptBuilder {
    pub fn new(max_messages: usize, max_chars: usize) -> Self {
        Self {
            max_messages,
            max_chars,
        }
    }

    fn render_history(&self, history: &[&Message]) -> String {
        let window = window_history(history, self.max_messages, self.max_chars);
        if window.is_empty() {
            return String::new();
        }
        let mut out = String::from("\n\nConversation so far:\n");
        for msg in window {
            out.push_str(&format!("{}: {}\n", msg.sender_name, msg.content));
        }
        out
    }
}

impl Default for DefaultPromptBuilder {
    fn default() -> Self {
        Self::new(10, 4_000)
    }
}

impl PromptBuilder for DefaultPromptBuilder {
    fn buyer_prompt(&self, ctx: &BuyerPromptContext<'_>) -> Vec<ChatMessage> {
        let mentions = ctx
            .sellers
            .iter()
            .map(|s| format!("@{}", s.name))
            .collect::<Vec<_>>()
            .join(", ");
        let names = ctx
            .sellers
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let system = format!(
            "You are {buyer}, a buyer negotiating for items.\n\n\
             Your shopping list:\n\
             - Item: {item}\n\
             - Quantity needed: {qty}\n\
             - Price range: ${min:.2} - ${max:.2} per unit\n\n\
             Negotiate for the best price within budget. Address sellers with \
             @SellerName mentions (e.g. {mentions}). Be polite, concise, and \
             direct, and compare offers across sellers.\n\n\
             Available sellers: {names}\n\n\
             You only see public messages; sellers' private costs and floors \
             are hidden from you.",
            buyer = ctx.buyer_name,
            item = ctx.constraints.item_name,
            qty = ctx.constraints.quantity_needed,
            min = ctx.constraints.min_price_per_unit,
            max = ctx.constraints.max_price_per_unit,
            mentions = mentions,
            names = names,
        );

        let user = format!(
            "You are negotiating for {item}.{history}\n\n\
             Write ONLY the message you want to send, as if speaking to the \
             sellers right now. Do not narrate your thinking and do not open \
             with fillers like \"Okay\" or \"I need to\". Under 100 words.",
            item = ctx.constraints.item_name,
            history = self.render_history(ctx.history),
        );

        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }

    fn seller_prompt(&self, ctx: &SellerPromptContext<'_>) -> Vec<ChatMessage> {
        let priority_line = match ctx.seller.profile.priority {
            Priority::CustomerRetention => {
                "Your priority is long-term customer relationships; offer \
                 competitive prices to keep the buyer happy."
            }
            Priority::MaximizeProfit => {
                "Your priority is profit; push for the highest price that \
                 still closes the sale."
            }
        };
        let style_line = match ctx.seller.profile.speaking_style {
            SpeakingStyle::Rude => "Be blunt and a little impatient; keep replies short.",
            SpeakingStyle::VerySweet => {
                "Be warm and enthusiastic; show genuine interest in helping."
            }
            SpeakingStyle::Neutral => "Keep a plain, businesslike tone.",
        };

        let item = ctx.inventory_item;
        let system = format!(
            "You are {name}, a seller negotiating with {buyer}.\n\n\
             Your inventory (private):\n\
             - Item: {item_name}\n\
             - Cost price: ${cost:.2} per unit\n\
             - List price: ${selling:.2} per unit\n\
             - Minimum acceptable price: ${least:.2} per unit\n\
             - Quantity available: {available}\n\n\
             Pricing rules: never offer below ${least:.2}, above ${selling:.2}, \
             or more than {available} units.\n\n\
             {priority_line}\n{style_line}\n\
             Keep replies under 80 words. You only see the buyer's messages \
             and your own; other sellers and their offers are invisible to \
             you.\n\n\
             To make a concrete offer, end with a JSON block:\n\
             {{\"offer\": {{\"price\": <price_per_unit>, \"quantity\": <quantity>}}}}",
            name = ctx.seller.name,
            buyer = ctx.buyer_name,
            item_name = item.item_name,
            cost = item.cost_price,
            selling = item.selling_price,
            least = item.least_price,
            available = item.quantity_available,
            priority_line = priority_line,
            style_line = style_line,
        );

        let user = format!(
            "The buyer {buyer} is negotiating for {item}.{history}\n\n\
             Write ONLY your reply to the buyer, speaking to them directly. \
             No narration, no openers like \"Okay, let's see\". Under 80 words.",
            buyer = ctx.buyer_name,
            item = ctx.constraints.item_name,
            history = self.render_history(ctx.history),
        );

        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }
}
