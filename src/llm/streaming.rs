//! Streaming Support
//!
//! SSE line assembly for chat-completion streams, the reasoning-block
//! filter that keeps `<think>` content out of the visible token flow, and
//! the relay task both providers use to turn an HTTP response body into a
//! token channel.

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::info;

use crate::llm::types::{ProviderError, TokenChunk, TokenStream};

/// Assembles complete SSE lines out of arbitrary byte chunks.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every complete line received so far.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
        let mut lines = Vec::new();
        while let Some(at) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=at).collect();
            let line = line.trim_end_matches(['\n', '\r']).to_string();
            lines.push(line);
        }
        lines
    }
}

/// Payload of one SSE data line.
#[derive(Debug, PartialEq)]
pub enum SseData {
    /// JSON payload to parse.
    Chunk(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Interpret one SSE line; non-data lines (comments, empties) yield `None`.
pub fn parse_sse_line(line: &str) -> Option<SseData> {
    let line = line.trim();
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseData::Done);
    }
    Some(SseData::Chunk(data.to_string()))
}

/// One streamed delta from an OpenAI-style chat-completion chunk.
#[derive(Debug, Deserialize)]
pub struct StreamChunk {
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: StreamDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub content: Option<String>,
    /// Structured reasoning stream some backends attach; never surfaced.
    #[serde(default)]
    pub reasoning: Option<String>,
}

const TAGS: [&str; 4] = ["<thinking>", "</thinking>", "<think>", "</think>"];

/// Suppresses reasoning blocks in a token stream. Tokens are buffered just
/// long enough to recognize tags that arrive split across chunks.
#[derive(Debug, Default)]
pub struct ThinkFilter {
    in_block: bool,
    held: String,
}

impl ThinkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw token; returns the visible text to emit, if any.
    pub fn push(&mut self, token: &str) -> Option<String> {
        self.held.push_str(token);
        let mut visible = String::new();

        loop {
            if self.in_block {
                // Look for a closing tag; everything before it is discarded.
                match first_tag(&self.held, true) {
                    Some((at, tag)) => {
                        self.held.drain(..at + tag.len());
                        self.in_block = false;
                    }
                    None => {
                        // Keep only a possible tag prefix at the tail.
                        let keep_from = self.held.len() - partial_tag_suffix(&self.held);
                        self.held.drain(..keep_from);
                        break;
                    }
                }
            } else {
                match first_tag(&self.held, false) {
                    Some((at, tag)) => {
                        visible.push_str(&self.held[..at]);
                        self.held.drain(..at + tag.len());
                        self.in_block = true;
                    }
                    None => {
                        let hold = partial_tag_suffix(&self.held);
                        let emit_to = self.held.len() - hold;
                        visible.push_str(&self.held[..emit_to]);
                        self.held.drain(..emit_to);
                        break;
                    }
                }
            }
        }

        (!visible.is_empty()).then_some(visible)
    }

    /// Flush any held text at end of stream. Held text inside an unclosed
    /// reasoning block stays suppressed.
    pub fn finish(&mut self) -> Option<String> {
        if self.in_block {
            self.held.clear();
            return None;
        }
        let rest = std::mem::take(&mut self.held);
        (!rest.is_empty()).then_some(rest)
    }
}

/// Earliest occurrence of a reasoning tag. `closing` selects `</...>` tags.
fn first_tag(text: &str, closing: bool) -> Option<(usize, &'static str)> {
    let mut best: Option<(usize, &'static str)> = None;
    for tag in TAGS {
        if closing != tag.starts_with("</") {
            continue;
        }
        if let Some(at) = crate::sanitize::find_ci(text, tag, 0) {
            if best.map_or(true, |(b, _)| at < b) {
                best = Some((at, tag));
            }
        }
    }
    best
}

/// Length of the longest suffix of `text` that could still grow into a
/// reasoning tag (e.g. `"<thi"`).
fn partial_tag_suffix(text: &str) -> usize {
    let bytes = text.as_bytes();
    let max_check = bytes.len().min("</thinking>".len().saturating_sub(1));
    for take in (1..=max_check).rev() {
        let suffix = &bytes[bytes.len() - take..];
        if TAGS.iter().any(|tag| {
            tag.len() > take && tag.as_bytes()[..take].eq_ignore_ascii_case(suffix)
        }) {
            return take;
        }
    }
    0
}

const STREAM_CHANNEL_CAPACITY: usize = 256;

/// Spawn the task that reads an SSE chat-completion body and relays visible
/// tokens. The returned channel always terminates: with an `is_end` chunk on
/// success, or a single error on failure.
pub fn spawn_token_relay(
    response: reqwest::Response,
    deadline: Instant,
    suppress_reasoning: bool,
) -> TokenStream {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut lines = SseLineBuffer::new();
        let mut filter = ThinkFilter::new();
        let mut index = 0u32;

        loop {
            let chunk = match tokio::time::timeout_at(deadline, body.next()).await {
                Err(_) => {
                    let _ = tx.send(Err(ProviderError::Timeout)).await;
                    return;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    let _ = tx
                        .send(Err(ProviderError::bad_response(format!(
                            "stream transport error: {e}"
                        ))))
                        .await;
                    return;
                }
                Ok(Some(Ok(bytes))) => bytes,
            };

            for line in lines.push(&chunk) {
                let Some(data) = parse_sse_line(&line) else {
                    continue;
                };
                let payload = match data {
                    SseData::Done => {
                        let _ = tx.send(Ok(TokenChunk::end(index))).await;
                        return;
                    }
                    SseData::Chunk(payload) => payload,
                };

                let parsed: StreamChunk = match serde_json::from_str(&payload) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::bad_response(format!(
                                "invalid streaming chunk: {e}"
                            ))))
                            .await;
                        return;
                    }
                };
                let Some(choice) = parsed.choices.first() else {
                    continue;
                };

                // Structured reasoning deltas never reach the consumer.
                if choice.delta.reasoning.is_some() && choice.delta.content.is_none() {
                    continue;
                }

                if let Some(content) = &choice.delta.content {
                    let visible = if suppress_reasoning {
                        filter.push(content)
                    } else {
                        (!content.is_empty()).then(|| content.clone())
                    };
                    if let Some(token) = visible {
                        if tx
                            .send(Ok(TokenChunk {
                                token,
                                index,
                                is_end: false,
                            }))
                            .await
                            .is_err()
                        {
                            return; // consumer hung up
                        }
                        index += 1;
                    }
                }

                if choice.finish_reason.is_some() {
                    if suppress_reasoning {
                        if let Some(tail) = filter.finish() {
                            let _ = tx
                                .send(Ok(TokenChunk {
                                    token: tail,
                                    index,
                                    is_end: false,
                                }))
                                .await;
                            index += 1;
                        }
                    }
                    let _ = tx.send(Ok(TokenChunk::end(index))).await;
                    return;
                }
            }
        }

        // Upstream closed without [DONE]; still terminate the sequence.
        info!("stream ended without done marker");
        let _ = tx.send(Ok(TokenChunk::end(index))).await;
    });

    rx
}
