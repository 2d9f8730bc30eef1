//! Seller Selection
//!
//! Admission filter deciding which sellers participate in a run: a seller is
//! in iff it stocks the item, can cover the requested quantity, and its
//! price window overlaps the buyer's. Every skipped seller gets exactly one
//! reason.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{BuyerConstraints, Seller};

/// Why a seller was left out of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoInventory,
    InsufficientQuantity,
    PriceMismatch,
}

impl SkipReason {
    pub fn as_str(&self) -> &str {
        match self {
            SkipReason::NoInventory => "no_inventory",
            SkipReason::InsufficientQuantity => "insufficient_quantity",
            SkipReason::PriceMismatch => "price_mismatch",
        }
    }
}

/// Record of a seller excluded from the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSeller {
    pub seller_id: String,
    pub seller_name: String,
    pub reason: SkipReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Partition `sellers` into admitted participants and skipped sellers for
/// the buyer's item. Order of the admitted list follows the input order and
/// becomes the run's fixed visitation order.
pub fn select_sellers<'a>(
    constraints: &BuyerConstraints,
    sellers: &'a [Seller],
) -> (Vec<&'a Seller>, Vec<SkippedSeller>) {
    let mut admitted = Vec::new();
    let mut skipped = Vec::new();

    for seller in sellers {
        let Some(item) = seller.find_item(&constraints.item_name) else {
            skipped.push(SkippedSeller {
                seller_id: seller.seller_id.clone(),
                seller_name: seller.name.clone(),
                reason: SkipReason::NoInventory,
                details: None,
            });
            continue;
        };

        if item.quantity_available < constraints.quantity_needed {
            skipped.push(SkippedSeller {
                seller_id: seller.seller_id.clone(),
                seller_name: seller.name.clone(),
                reason: SkipReason::InsufficientQuantity,
                details: Some(format!(
                    "available: {}, needed: {}",
                    item.quantity_available, constraints.quantity_needed
                )),
            });
            continue;
        }

        // Overlap: seller can go low enough and the buyer's floor does not
        // exceed the seller's ceiling.
        let price_overlap = item.least_price <= constraints.max_price_per_unit
            && item.selling_price >= constraints.min_price_per_unit;
        if !price_overlap {
            skipped.push(SkippedSeller {
                seller_id: seller.seller_id.clone(),
                seller_name: seller.name.clone(),
                reason: SkipReason::PriceMismatch,
                details: Some(format!(
                    "seller range: ${:.2}-${:.2}, buyer range: ${:.2}-${:.2}",
                    item.least_price,
                    item.selling_price,
                    constraints.min_price_per_unit,
                    constraints.max_price_per_unit
                )),
            });
            continue;
        }

        admitted.push(seller);
    }

    info!(
        item = %constraints.item_name,
        admitted = admitted.len(),
        skipped = skipped.len(),
        "seller selection complete"
    );

    (admitted, skipped)
}
