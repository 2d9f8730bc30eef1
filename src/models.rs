//! Marketplace Domain Models
//!
//! Buyer constraints, seller profiles, and per-seller private inventory.
//! These are immutable for the lifetime of a negotiation run; validation
//! happens once, at run construction.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Seller negotiation priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    CustomerRetention,
    MaximizeProfit,
}

impl Priority {
    pub fn as_str(&self) -> &str {
        match self {
            Priority::CustomerRetention => "customer_retention",
            Priority::MaximizeProfit => "maximize_profit",
        }
    }
}

/// Seller speaking style used by the prompt builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakingStyle {
    Rude,
    VerySweet,
    Neutral,
}

impl SpeakingStyle {
    pub fn as_str(&self) -> &str {
        match self {
            SpeakingStyle::Rude => "rude",
            SpeakingStyle::VerySweet => "very_sweet",
            SpeakingStyle::Neutral => "neutral",
        }
    }
}

/// Behavioral profile attached to each seller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerProfile {
    pub priority: Priority,
    pub speaking_style: SpeakingStyle,
}

/// A seller's inventory entry for one item, private to that seller.
///
/// Pricing invariant: `cost_price < least_price < selling_price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub item_id: String,
    pub item_name: String,
    pub cost_price: f64,
    pub selling_price: f64,
    /// Floor the seller will never go below.
    pub least_price: f64,
    pub quantity_available: u32,
}

impl InventoryItem {
    pub fn validate(&self, seller_id: &str) -> Result<(), ConfigError> {
        let fail = |reason: String| ConfigError::InvalidInventory {
            seller_id: seller_id.to_string(),
            reason,
        };

        if self.item_name.trim().is_empty() {
            return Err(fail("item_name is empty".to_string()));
        }
        if !self.cost_price.is_finite() || self.cost_price < 0.0 {
            return Err(fail(format!("cost_price {} is not valid", self.cost_price)));
        }
        if !self.selling_price.is_finite() || self.selling_price <= self.cost_price {
            return Err(fail(format!(
                "selling_price {} must exceed cost_price {}",
                self.selling_price, self.cost_price
            )));
        }
        if !self.least_price.is_finite()
            || self.least_price <= self.cost_price
            || self.least_price >= self.selling_price
        {
            return Err(fail(format!(
                "least_price {} must lie strictly between cost {} and selling {}",
                self.least_price, self.cost_price, self.selling_price
            )));
        }
        Ok(())
    }
}

/// Complete seller configuration for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seller {
    pub seller_id: String,
    pub name: String,
    pub profile: SellerProfile,
    pub inventory: Vec<InventoryItem>,
}

impl Seller {
    pub fn new(
        seller_id: impl Into<String>,
        name: impl Into<String>,
        profile: SellerProfile,
    ) -> Self {
        Self {
            seller_id: seller_id.into(),
            name: name.into(),
            profile,
            inventory: Vec::new(),
        }
    }

    pub fn with_item(mut self, item: InventoryItem) -> Self {
        self.inventory.push(item);
        self
    }

    /// Locate the inventory entry for an item name, case-insensitively and
    /// ignoring surrounding whitespace.
    pub fn find_item(&self, item_name: &str) -> Option<&InventoryItem> {
        let wanted = item_name.trim().to_lowercase();
        self.inventory
            .iter()
            .find(|inv| inv.item_name.trim().to_lowercase() == wanted)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seller_id.trim().is_empty() {
            return Err(ConfigError::InvalidInventory {
                seller_id: self.seller_id.clone(),
                reason: "seller_id is empty".to_string(),
            });
        }
        for item in &self.inventory {
            item.validate(&self.seller_id)?;
        }
        Ok(())
    }
}

/// The buyer's requirements for a single item, fixed for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyerConstraints {
    pub item_id: String,
    pub item_name: String,
    pub quantity_needed: u32,
    pub min_price_per_unit: f64,
    pub max_price_per_unit: f64,
    /// Optional cap on `price * quantity` for the whole purchase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_per_item: Option<f64>,
}

impl BuyerConstraints {
    pub fn new(
        item_id: impl Into<String>,
        item_name: impl Into<String>,
        quantity_needed: u32,
        min_price_per_unit: f64,
        max_price_per_unit: f64,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            item_name: item_name.into(),
            quantity_needed,
            min_price_per_unit,
            max_price_per_unit,
            budget_per_item: None,
        }
    }

    pub fn with_budget(mut self, budget: f64) -> Self {
        self.budget_per_item = Some(budget);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.item_name.trim().is_empty() {
            return Err(ConfigError::InvalidConstraints(
                "item_name is empty".to_string(),
            ));
        }
        if self.quantity_needed == 0 {
            return Err(ConfigError::InvalidConstraints(
                "quantity_needed must be positive".to_string(),
            ));
        }
        if !self.min_price_per_unit.is_finite() || self.min_price_per_unit < 0.0 {
            return Err(ConfigError::InvalidConstraints(format!(
                "min_price_per_unit {} is not valid",
                self.min_price_per_unit
            )));
        }
        if !self.max_price_per_unit.is_finite()
            || self.max_price_per_unit <= self.min_price_per_unit
        {
            return Err(ConfigError::InvalidConstraints(format!(
                "max_price_per_unit {} must exceed min_price_per_unit {}",
                self.max_price_per_unit, self.min_price_per_unit
            )));
        }
        if let Some(budget) = self.budget_per_item {
            if !budget.is_finite() || budget < 0.0 {
                return Err(ConfigError::InvalidConstraints(format!(
                    "budget_per_item {} is not valid",
                    budget
                )));
            }
        }
        Ok(())
    }
}
