// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use llm_api_sim::emitter::{SseFrame, parse_frames};
use llm_api_sim::instruction::{INSTRUCTIONS_END, INSTRUCTIONS_START};
use llm_api_sim::{DispatcherChain, InboundRequest, SimConfig, SimResponse};
use serde_json::Value;

/// Wrap an instruction document in sentinels inside some ordinary prose
pub fn scripted(document: &str) -> String {
    format!(
        "Run the scripted scenario.\n{}\n{}\n{}",
        INSTRUCTIONS_START, document, INSTRUCTIONS_END
    )
}

pub const TWO_STEP_CHAIN: &str = r#"{"instruction_chain":[{"messages":[{"text_message":{"length":5}}]},{"messages":[{"text_message":{"length":3}}]}]}"#;

pub fn chain() -> DispatcherChain {
    DispatcherChain::standard(Arc::new(SimConfig::default()))
}

pub fn chain_with(config: SimConfig) -> DispatcherChain {
    DispatcherChain::standard(Arc::new(config))
}

pub fn dispatch(chain: &DispatcherChain, path: &str, body: &Value) -> SimResponse {
    let request = InboundRequest::post_json(path, body).unwrap();
    chain.dispatch(&request)
}

/// Non-streaming response body as JSON
pub async fn json_body(response: SimResponse) -> Value {
    let text = response.into_text().await.unwrap();
    serde_json::from_str(&text).unwrap()
}

/// Streaming response body as frames
pub async fn frames(response: SimResponse) -> Vec<SseFrame> {
    assert!(response.is_stream(), "expected a streaming response");
    let text = response.into_text().await.unwrap();
    parse_frames(&text)
}

/// Concatenated `choices[0].delta.content` of OpenAI-style chunks
pub fn openai_content(frames: &[SseFrame]) -> String {
    frames
        .iter()
        .filter(|frame| !frame.is_done())
        .filter_map(|frame| {
            let chunk = frame.json().unwrap();
            chunk["choices"][0]["delta"]["content"].as_str().map(str::to_string)
        })
        .collect()
}

/// Concatenated `text_delta` fragments of Anthropic-style events
pub fn anthropic_text(frames: &[SseFrame]) -> String {
    frames
        .iter()
        .filter_map(|frame| {
            let event = frame.json().unwrap();
            (event["delta"]["type"] == "text_delta")
                .then(|| event["delta"]["text"].as_str().unwrap().to_string())
        })
        .collect()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}
