//! Offer Codec
//!
//! Extraction of structured offers from raw seller output, and clamping to
//! the seller's private inventory bounds. Extraction runs on the RAW text,
//! before sanitization strips the JSON from the prose.
//!
//! Accepted shapes, tried in text order (first valid wins):
//! - an inline object with an `offer` key: `{"offer": {"price": 9.5, "quantity": 100}}`
//! - a fenced block: ```` ```offer {"price": 9.5, "quantity": 100} ``` ````
//! - a prefixed object: `Offer: {"price": 9.5, "quantity": 100}`

use serde_json::Value;
use tracing::{debug, warn};

use crate::models::InventoryItem;
use crate::sanitize::balanced_object_end;

/// Offer fields as extracted from model output, unclamped.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedOffer {
    pub price: f64,
    pub quantity: i64,
    pub item_id: Option<String>,
}

/// Offer fields after clamping, plus notes on what was adjusted.
#[derive(Debug, Clone, PartialEq)]
pub struct ClampedOffer {
    pub price: f64,
    pub quantity: u32,
    pub violations: Vec<String>,
}

/// Scan `text` for the first parseable, structurally valid offer.
pub fn extract_offer(text: &str) -> Option<ExtractedOffer> {
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        let Some(end) = balanced_object_end(text, i) else {
            i += 1;
            continue;
        };
        let region = &text[i..end];

        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(region) {
            // Wrapped form: {"offer": {...}}
            if let Some(Value::Object(inner)) = map.get("offer") {
                if let Some(offer) = offer_from_fields(inner) {
                    debug!("parsed offer from inline object");
                    return Some(offer);
                }
            }
            // Bare form, only honored behind an explicit offer marker.
            if map.contains_key("price")
                && map.contains_key("quantity")
                && has_offer_marker_before(text, i)
            {
                if let Some(offer) = offer_from_fields(&map) {
                    debug!("parsed offer from marked block");
                    return Some(offer);
                }
            }
        }

        // Invalid or offer-free region; keep scanning after its opening brace
        // so nested objects still get a look.
        i += 1;
    }

    None
}

/// True when the region at `at` is directly preceded by a ```` ```offer ````
/// fence or an `Offer:` prefix (whitespace tolerated).
fn has_offer_marker_before(text: &str, at: usize) -> bool {
    let before = text[..at].trim_end();
    for marker in ["```offer", "offer:"] {
        if before.len() >= marker.len() {
            let tail_start = before.len() - marker.len();
            if before.as_bytes()[tail_start..].eq_ignore_ascii_case(marker.as_bytes()) {
                return true;
            }
        }
    }
    false
}

fn offer_from_fields(fields: &serde_json::Map<String, Value>) -> Option<ExtractedOffer> {
    let price = fields.get("price").and_then(number_as_f64)?;
    let quantity = fields.get("quantity").and_then(number_as_integer)?;
    if !price.is_finite() || price <= 0.0 || quantity <= 0 {
        return None;
    }
    let item_id = fields
        .get("item_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(ExtractedOffer {
        price,
        quantity,
        item_id,
    })
}

fn number_as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

/// Integer quantities only; a fractional JSON number is not an offer.
fn number_as_integer(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    v.as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| f as i64)
}

/// Clamp an extracted offer to the seller's inventory bounds. Returns `None`
/// when no valid offer can exist (e.g. nothing in stock), in which case the
/// seller turn degrades to a message-only response.
pub fn clamp_offer(offer: &ExtractedOffer, item: &InventoryItem) -> Option<ClampedOffer> {
    if item.quantity_available == 0 {
        warn!(
            item = %item.item_name,
            "offer discarded: no stock available"
        );
        return None;
    }
    if !offer.price.is_finite() || offer.price <= 0.0 || offer.quantity <= 0 {
        return None;
    }

    let mut violations = Vec::new();

    let price = offer.price.clamp(item.least_price, item.selling_price);
    if price != offer.price {
        violations.push("price_clamped".to_string());
    }

    let quantity = offer
        .quantity
        .clamp(1, i64::from(item.quantity_available)) as u32;
    if i64::from(quantity) != offer.quantity {
        violations.push("quantity_clamped".to_string());
    }

    // Clamp output must always sit inside the invariant window.
    debug_assert!(price >= item.least_price && price <= item.selling_price);
    debug_assert!(quantity >= 1 && quantity <= item.quantity_available);

    Some(ClampedOffer {
        price,
        quantity,
        violations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(least: f64, selling: f64, available: u32) -> InventoryItem {
        InventoryItem {
            item_id: "item-1".to_string(),
            item_name: "Widget".to_string(),
            cost_price: least - 1.0,
            selling_price: selling,
            least_price: least,
            quantity_available: available,
        }
    }

    #[test]
    fn test_extracts_wrapped_offer() {
        let text = r#"I can do better. {"offer": {"price": 9.5, "quantity": 100}}"#;
        let offer = extract_offer(text).unwrap();
        assert_eq!(offer.price, 9.5);
        assert_eq!(offer.quantity, 100);
    }

    #[test]
    fn test_extracts_fenced_offer() {
        let text = "Take it:\n```offer\n{\"price\": 12.0, \"quantity\": 40, \"item_id\": \"w1\"}\n```";
        let offer = extract_offer(text).unwrap();
        assert_eq!(offer.price, 12.0);
        assert_eq!(offer.quantity, 40);
        assert_eq!(offer.item_id.as_deref(), Some("w1"));
    }

    #[test]
    fn test_extracts_prefixed_offer() {
        let text = r#"Offer: {"price": 8.25, "quantity": 60}"#;
        let offer = extract_offer(text).unwrap();
        assert_eq!(offer.price, 8.25);
        assert_eq!(offer.quantity, 60);
    }

    #[test]
    fn test_bare_object_without_marker_ignored() {
        let text = r#"The spec sheet says {"price": 8.0, "quantity": 60} somewhere"#;
        assert!(extract_offer(text).is_none());
    }

    #[test]
    fn test_first_valid_candidate_wins() {
        let text = concat!(
            r#"{"offer": {"price": "not a number", "quantity": 5}} "#,
            r#"{"offer": {"price": 7.5, "quantity": 50}}"#,
        );
        let offer = extract_offer(text).unwrap();
        assert_eq!(offer.price, 7.5);
    }

    #[test]
    fn test_rejects_non_positive_and_fractional() {
        assert!(extract_offer(r#"{"offer": {"price": 0, "quantity": 10}}"#).is_none());
        assert!(extract_offer(r#"{"offer": {"price": 5.0, "quantity": -2}}"#).is_none());
        assert!(extract_offer(r#"{"offer": {"price": 5.0, "quantity": 2.5}}"#).is_none());
    }

    #[test]
    fn test_no_offer_in_plain_text() {
        assert!(extract_offer("I'll think about it.").is_none());
        assert!(extract_offer("").is_none());
    }

    #[test]
    fn test_clamps_both_fields() {
        let offer = ExtractedOffer {
            price: 999.0,
            quantity: 100,
            item_id: None,
        };
        let clamped = clamp_offer(&offer, &item(12.0, 18.0, 10)).unwrap();
        assert_eq!(clamped.price, 18.0);
        assert_eq!(clamped.quantity, 10);
        assert_eq!(
            clamped.violations,
            vec!["price_clamped".to_string(), "quantity_clamped".to_string()]
        );
    }

    #[test]
    fn test_in_range_offer_untouched() {
        let offer = ExtractedOffer {
            price: 15.0,
            quantity: 5,
            item_id: None,
        };
        let clamped = clamp_offer(&offer, &item(12.0, 18.0, 10)).unwrap();
        assert_eq!(clamped.price, 15.0);
        assert_eq!(clamped.quantity, 5);
        assert!(clamped.violations.is_empty());
    }

    #[test]
    fn test_zero_stock_rejects() {
        let offer = ExtractedOffer {
            price: 15.0,
            quantity: 5,
            item_id: None,
        };
        assert!(clamp_offer(&offer, &item(12.0, 18.0, 0)).is_none());
    }
}
