//! Mention Routing
//!
//! `@handle` parsing and resolution against the active seller roster.
//! Handles match on the normalized form of a seller's display name (the
//! seller id is accepted as a fallback alias), so `@bobco` reaches
//! "Bob Co.".

use std::collections::HashMap;

use tracing::debug;

use crate::models::Seller;

/// Normalize a display name or handle for matching: lowercase, drop
/// whitespace and punctuation other than underscores, collapse underscore
/// runs, trim underscores.
pub fn normalize_handle(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;
    for ch in name.chars() {
        let keep = match ch {
            'A'..='Z' => Some(ch.to_ascii_lowercase()),
            'a'..='z' | '0'..='9' => Some(ch),
            '_' => Some('_'),
            _ => None,
        };
        if let Some(c) = keep {
            if c == '_' {
                if prev_underscore {
                    continue;
                }
                prev_underscore = true;
            } else {
                prev_underscore = false;
            }
            out.push(c);
        }
    }
    out.trim_matches('_').to_string()
}

/// Extract `@mentions` from `text` and resolve them to seller ids, in order
/// of first mention, without duplicates. Unknown handles are dropped.
pub fn parse_mentions(text: &str, sellers: &[Seller]) -> Vec<String> {
    if text.is_empty() || sellers.is_empty() {
        return Vec::new();
    }

    // Display-name mappings take precedence over id aliases.
    let mut name_map: HashMap<String, &str> = HashMap::new();
    for seller in sellers {
        name_map.insert(normalize_handle(&seller.name), seller.seller_id.as_str());
    }
    for seller in sellers {
        name_map
            .entry(normalize_handle(&seller.seller_id))
            .or_insert(seller.seller_id.as_str());
    }

    let mut mentioned: Vec<String> = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'@' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len()
            && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
        {
            end += 1;
        }
        if end > start {
            let handle = &text[start..end];
            match name_map.get(&normalize_handle(handle)) {
                Some(&seller_id) if !mentioned.iter().any(|m| m.as_str() == seller_id) => {
                    debug!(handle, seller_id, "matched mention");
                    mentioned.push(seller_id.to_string());
                }
                Some(_) => {}
                None => debug!(handle, "unknown mention"),
            }
        }
        i = end.max(i + 1);
    }

    mentioned
}

/// Pick the sellers a buyer message targets: mentioned-and-active sellers,
/// or every active seller when nothing (relevant) was mentioned and
/// `fallback_to_all` is set.
pub fn select_targets(
    mentioned: &[String],
    active_sellers: &[String],
    fallback_to_all: bool,
) -> Vec<String> {
    if !mentioned.is_empty() {
        let targets: Vec<String> = mentioned
            .iter()
            .filter(|id| active_sellers.contains(id))
            .cloned()
            .collect();
        if !targets.is_empty() {
            return targets;
        }
        debug!(?mentioned, "mentioned sellers not active");
    }

    if fallback_to_all {
        return active_sellers.to_vec();
    }
    Vec::new()
}
