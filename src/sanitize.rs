//! Output Sanitizer
//!
//! Single pure cleanup pass applied to every agent output before it enters
//! the conversation. Order of operations:
//!
//! 1. Strip reasoning blocks (`<think>`, `<thinking>`, case-insensitive,
//!    spanning newlines) plus any stray tags.
//! 2. Strip leading continuation markers (`...`, `. `, `, `, and the
//!    connectors `and` / `but` / `or` / `so`).
//! 3. Strip role-specific meta-narration prefixes (canonical lists below).
//! 4. Strip fenced code markers, including language tags.
//! 5. Remove inline JSON objects carrying an `offer` key (offers travel
//!    through the offer codec, not prose).
//! 6. Collapse whitespace runs and trim.
//! 7. Enforce the per-role character ceiling, truncating with an ellipsis.
//!
//! `sanitize` is idempotent: applying it twice equals applying it once.
//! Steps 2 and 3 loop to a fixpoint to keep that guarantee when one strip
//! exposes another marker.

/// Which agent produced the text. Controls the meta-narration list and the
/// length ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Buyer,
    Seller,
}

const BUYER_MAX_CHARS: usize = 500;
const SELLER_MAX_CHARS: usize = 400;

/// Meta-narration openers stripped from buyer output. Longer entries first
/// so specific phrases win over their prefixes.
const BUYER_META_PREFIXES: &[&str] = &[
    "since there are no offers",
    "first, i need to",
    "they have already",
    "they've already",
    "okay, let's see",
    "okay, lets see",
    "okay let's see",
    "okay lets see",
    "the user wants",
    "now, i will",
    "so i should",
    "i need to",
    "now, i'll",
    "wait, the",
    "let's see",
    "lets see",
    "the user",
];

/// Meta-narration openers stripped from seller output.
const SELLER_META_PREFIXES: &[&str] = &[
    "okay, let's see",
    "okay, lets see",
    "okay let's see",
    "okay lets see",
    "let me think",
    "let's see",
    "lets see",
    "i should",
];

/// Sanitize raw agent output for the given role.
pub fn sanitize(raw: &str, role: Role) -> String {
    let mut text = strip_reasoning_blocks(raw);

    // Leading-marker and meta-prefix strips interleave until stable so that
    // removing one opener never leaves another behind.
    loop {
        let (next, changed_markers) = strip_leading_markers(&text);
        let (next, changed_meta) = strip_meta_prefixes(&next, role);
        text = next;
        if !changed_markers && !changed_meta {
            break;
        }
    }

    let text = strip_code_fences(&text);
    let text = remove_offer_objects(&text);
    let text = collapse_whitespace(&text);

    let cap = match role {
        Role::Buyer => BUYER_MAX_CHARS,
        Role::Seller => SELLER_MAX_CHARS,
    };
    truncate_chars(&text, cap)
}

/// Remove `<think>…</think>` / `<thinking>…</thinking>` blocks and any stray
/// tags. Shared with the provider layer, which applies it to raw completions.
pub fn strip_reasoning_blocks(text: &str) -> String {
    let mut out = text.to_string();
    for (open, close) in [("<thinking>", "</thinking>"), ("<think>", "</think>")] {
        loop {
            let Some(start) = find_ci(&out, open, 0) else {
                break;
            };
            match find_ci(&out, close, start + open.len()) {
                Some(end) => {
                    out.replace_range(start..end + close.len(), "");
                }
                None => break, // unmatched open handled by the stray-tag pass
            }
        }
    }
    for tag in ["<thinking>", "</thinking>", "<think>", "</think>"] {
        while let Some(at) = find_ci(&out, tag, 0) {
            out.replace_range(at..at + tag.len(), "");
        }
    }
    out
}

/// Strip leading ellipses, stray punctuation, and coordinating connectors.
fn strip_leading_markers(text: &str) -> (String, bool) {
    let mut t = text.trim_start();
    let mut changed = t.len() != text.len();

    loop {
        if t.starts_with("...") {
            t = t.trim_start_matches('.').trim_start();
            changed = true;
            continue;
        }
        if let Some(rest) = t.strip_prefix('.') {
            if rest.starts_with(char::is_whitespace) {
                t = rest.trim_start();
                changed = true;
                continue;
            }
        }
        if let Some(rest) = t.strip_prefix(',') {
            if rest.starts_with(char::is_whitespace) {
                t = rest.trim_start();
                changed = true;
                continue;
            }
        }

        let mut stripped_connector = false;
        for connector in ["and", "but", "or", "so"] {
            if t.len() > connector.len()
                && t.as_bytes()[..connector.len()].eq_ignore_ascii_case(connector.as_bytes())
                && t[connector.len()..].starts_with(char::is_whitespace)
            {
                t = t[connector.len()..].trim_start();
                changed = true;
                stripped_connector = true;
                break;
            }
        }
        if !stripped_connector {
            break;
        }
    }

    (t.to_string(), changed)
}

/// Strip role-specific self-referential openers.
fn strip_meta_prefixes(text: &str, role: Role) -> (String, bool) {
    let prefixes = match role {
        Role::Buyer => BUYER_META_PREFIXES,
        Role::Seller => SELLER_META_PREFIXES,
    };

    let mut t = text.trim_start().to_string();
    let mut changed = t.len() != text.len();

    'outer: loop {
        for prefix in prefixes {
            let boundary_ok = t.len() >= prefix.len()
                && t.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
                // Prefix must end on a word boundary ("i should" is not a
                // match for "I shouldn't").
                && !t[prefix.len()..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphanumeric());
            if boundary_ok {
                let mut rest = t[prefix.len()..].trim_start();
                rest = rest.trim_start_matches(['.', ',']).trim_start();
                t = rest.to_string();
                changed = true;
                continue 'outer;
            }
        }
        break;
    }

    (t, changed)
}

/// Remove fence markers (with optional language tag), keeping fence contents.
fn strip_code_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find("```") {
        out.push_str(&rest[..at]);
        let mut after = &rest[at + 3..];
        let tag_len = after
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric())
            .count();
        after = &after[tag_len..];
        if let Some(stripped) = after.strip_prefix('\n') {
            after = stripped;
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

/// Remove balanced JSON object regions that carry an `"offer"` key.
fn remove_offer_objects(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = balanced_object_end(text, i) {
                let region = &text[i..end];
                if find_ci(region, "\"offer\"", 0).is_some() {
                    i = end;
                    continue;
                }
                // No offer key anywhere inside, so no nested object has one
                // either; copy the region through wholesale.
                out.push_str(region);
                i = end;
                continue;
            }
        }
        let ch_len = utf8_len(bytes[i]);
        out.push_str(&text[i..i + ch_len]);
        i += ch_len;
    }
    out
}

/// Find the exclusive end of the balanced `{...}` region starting at `start`,
/// honoring JSON string syntax.
pub(crate) fn balanced_object_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut i = start;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else {
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
        i += utf8_len(b);
    }
    None
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let mut out: String = text.chars().take(cap.saturating_sub(3)).collect();
    out = out.trim_end().to_string();
    out.push_str("...");
    out
}

/// Case-insensitive substring search over ASCII needles. Byte offsets are
/// valid slice boundaries because every needle starts and ends with ASCII.
pub(crate) fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || from + n.len() > h.len() {
        return None;
    }
    (from..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}
