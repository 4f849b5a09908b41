// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Stateless conversation analysis
//!
//! The simulator keeps no session. Where a scripted conversation currently
//! stands is recomputed from the transcript on every request: the newest user
//! message carrying an instruction chain is the anchor, and every assistant
//! message after it consumed one chain position.

use serde_json::Value as JsonValue;

use crate::instruction::{Plan, parse_chain_in};

/// Result of locating the active chain in a transcript
#[derive(Debug, Clone, PartialEq)]
pub struct ChainPosition {
    /// Plan at the cursor, `None` once the chain is exhausted
    pub plan: Option<Plan>,
    /// Assistant turns since the anchor message
    pub cursor: usize,
    /// Number of plans in the anchored chain
    pub chain_len: usize,
    /// Index of the anchor message in the transcript
    pub anchor_index: usize,
}

impl ChainPosition {
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.chain_len
    }
}

/// Locate the most recent instruction chain and the plan due now.
///
/// Returns `None` when no user message carries a chain.
pub fn analyze(messages: &[JsonValue]) -> Option<ChainPosition> {
    let (anchor_index, chain) = messages.iter().enumerate().rev().find_map(|(index, message)| {
        if !has_role(message, "user") {
            return None;
        }
        let chain = parse_chain_in(message_text(message)?, &id_scope(index))?;
        Some((index, chain))
    })?;

    let cursor = messages[anchor_index + 1..]
        .iter()
        .filter(|message| has_role(message, "assistant"))
        .count();
    let chain_len = chain.len();

    Some(ChainPosition {
        plan: chain.into_iter().nth(cursor),
        cursor,
        chain_len,
        anchor_index,
    })
}

/// Text of the newest user message, if any
pub fn latest_user_text(messages: &[JsonValue]) -> Option<&str> {
    latest_user_message(messages).map(|(_, text)| text)
}

/// Transcript index and text of the newest user message
pub fn latest_user_message(messages: &[JsonValue]) -> Option<(usize, &str)> {
    let (index, message) = messages
        .iter()
        .enumerate()
        .rev()
        .find(|(_, message)| has_role(message, "user"))?;
    Some((index, message_text(message)?))
}

/// Seed for ids generated from the script in message `index`
pub fn id_scope(index: usize) -> String {
    format!("message-{}", index)
}

/// Role comparison ignoring case
pub fn has_role(message: &JsonValue, role: &str) -> bool {
    message
        .get("role")
        .and_then(JsonValue::as_str)
        .is_some_and(|actual| actual.eq_ignore_ascii_case(role))
}

/// Textual content of a message: a plain string, or the first text block
pub fn message_text(message: &JsonValue) -> Option<&str> {
    match message.get("content")? {
        JsonValue::String(text) => Some(text),
        JsonValue::Array(blocks) => blocks.iter().find_map(|block| {
            let is_text = block
                .get("type")
                .and_then(JsonValue::as_str)
                .map_or(true, |kind| kind == "text" || kind == "input_text");
            if !is_text {
                return None;
            }
            block.get("text").and_then(JsonValue::as_str)
        }),
        _ => None,
    }
}
