// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Anthropic-style message rendering
//!
//! A streamed message is `message_start`, then for every content block a
//! `content_block_start`, zero or more `content_block_delta` events and a
//! `content_block_stop`, then `message_delta` and `message_stop`. Block
//! indices start at 0 and increase by one per block.

use serde_json::{Value as JsonValue, json};

use super::{FrameWriter, ResponseMeta, SseFrame};
use crate::config::EmitterConfig;
use crate::error::Result;
use crate::generator::{chunk_chars, chunk_words, filler_text, thinking_signature};
use crate::instruction::{
    Citation, CitedBody, Plan, ServerToolOutcome, ServerToolResult, Step,
};

/// Content block derived from a plan
#[derive(Debug)]
enum Block<'a> {
    Thinking {
        text: String,
    },
    Text {
        text: String,
        citations: Option<&'a [Citation]>,
    },
    ToolUse {
        id: String,
        name: &'a str,
        arguments: &'a str,
    },
    ServerToolUse {
        id: &'a str,
        name: &'a str,
        input: &'a JsonValue,
    },
    ServerToolResult(&'a ServerToolResult),
}

fn blocks(plan: &Plan) -> Vec<Block<'_>> {
    let mut blocks = Vec::new();

    if let Some(words) = plan.reasoning_length.filter(|words| *words > 0) {
        blocks.push(Block::Thinking {
            text: filler_text(words),
        });
    }

    for step in &plan.steps {
        match step {
            Step::Text { length } => {
                if *length > 0 {
                    blocks.push(Block::Text {
                        text: filler_text(*length),
                        citations: None,
                    });
                }
            }
            Step::ExplicitText(value) => {
                let text = value.as_text();
                if !text.is_empty() {
                    blocks.push(Block::Text {
                        text: text.into_owned(),
                        citations: None,
                    });
                }
            }
            Step::ToolCalls(calls) => {
                blocks.extend(calls.iter().map(|call| Block::ToolUse {
                    id: tool_use_id(&call.id),
                    name: &call.name,
                    arguments: &call.arguments,
                }));
            }
            Step::ServerToolUse(tool_use) => blocks.push(Block::ServerToolUse {
                id: &tool_use.id,
                name: &tool_use.name,
                input: &tool_use.input,
            }),
            Step::ServerToolResult(result) => blocks.push(Block::ServerToolResult(result)),
            Step::TextWithCitations(cited) => {
                let text = match &cited.body {
                    CitedBody::Literal(text) => text.clone(),
                    CitedBody::Generated { length } => filler_text(*length),
                };
                // Nothing to cite into; the citations go with the body
                if !text.is_empty() {
                    blocks.push(Block::Text {
                        text,
                        citations: Some(&cited.citations),
                    });
                }
            }
        }
    }
    blocks
}

/// Tool-use ids carry the `toolu_` prefix in this protocol
fn tool_use_id(call_id: &str) -> String {
    match call_id.strip_prefix("call_") {
        Some(hash) => format!("toolu_{}", hash),
        None => call_id.to_string(),
    }
}

fn tool_input(arguments: &str) -> JsonValue {
    serde_json::from_str(arguments).unwrap_or_else(|_| JsonValue::String(arguments.to_string()))
}

fn result_content(result: &ServerToolResult) -> JsonValue {
    match &result.outcome {
        ServerToolOutcome::Result(value) => value.clone(),
        ServerToolOutcome::Error { code } => json!({
            "type": format!("{}_error", result.block_type()),
            "error_code": code,
        }),
    }
}

pub fn stop_reason(plan: &Plan) -> &'static str {
    if plan.has_tool_calls() { "tool_use" } else { "end_turn" }
}

/// Number of `web_search` invocations scripted in `plan`
pub fn web_search_requests(plan: &Plan) -> usize {
    plan.steps
        .iter()
        .filter(|step| {
            matches!(step, Step::ServerToolUse(tool_use) if tool_use.name == "web_search")
        })
        .count()
}

fn usage_json(plan: &Plan, meta: &ResponseMeta) -> JsonValue {
    let mut usage = json!({
        "input_tokens": meta.usage.input_tokens,
        "output_tokens": meta.usage.output_tokens,
        "cache_creation_input_tokens": meta.usage.cache_creation_input_tokens,
        "cache_read_input_tokens": meta.usage.cache_read_input_tokens,
    });
    let searches = web_search_requests(plan);
    if searches > 0 {
        usage["server_tool_use"] = json!({"web_search_requests": searches});
    }
    usage
}

impl Block<'_> {
    /// Block as it appears in `content_block_start`, before any delta
    fn start_payload(&self) -> JsonValue {
        match self {
            Block::Thinking { .. } => json!({"type": "thinking", "thinking": "", "signature": ""}),
            Block::Text { citations, .. } => {
                let mut block = json!({"type": "text", "text": ""});
                if let Some(citations) = citations {
                    block["citations"] = json!(citations);
                }
                block
            }
            Block::ToolUse { id, name, .. } => {
                json!({"type": "tool_use", "id": id, "name": name, "input": {}})
            }
            Block::ServerToolUse { id, name, .. } => {
                json!({"type": "server_tool_use", "id": id, "name": name, "input": {}})
            }
            Block::ServerToolResult(result) => json!({
                "type": result.block_type(),
                "tool_use_id": result.tool_use_id,
                "content": result_content(result),
            }),
        }
    }

    /// Block as it appears in a non-streaming message
    fn complete_payload(&self) -> JsonValue {
        match self {
            Block::Thinking { text } => json!({
                "type": "thinking",
                "thinking": text,
                "signature": thinking_signature(text),
            }),
            Block::Text { text, citations } => {
                let mut block = json!({"type": "text", "text": text});
                if let Some(citations) = citations {
                    block["citations"] = json!(citations);
                }
                block
            }
            Block::ToolUse { id, name, arguments } => json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": tool_input(arguments),
            }),
            Block::ServerToolUse { id, name, input } => json!({
                "type": "server_tool_use",
                "id": id,
                "name": name,
                "input": input,
            }),
            Block::ServerToolResult(_) => self.start_payload(),
        }
    }

    /// Delta payloads following `content_block_start`
    fn deltas(&self, config: &EmitterConfig) -> Vec<JsonValue> {
        match self {
            Block::Thinking { text } => {
                let mut deltas: Vec<JsonValue> = chunk_words(text, config.words_per_chunk)
                    .into_iter()
                    .map(|fragment| json!({"type": "thinking_delta", "thinking": fragment}))
                    .collect();
                deltas.push(json!({
                    "type": "signature_delta",
                    "signature": thinking_signature(text),
                }));
                deltas
            }
            Block::Text { text, .. } => chunk_words(text, config.words_per_chunk)
                .into_iter()
                .map(|fragment| json!({"type": "text_delta", "text": fragment}))
                .collect(),
            Block::ToolUse { arguments, .. } => json_deltas(arguments, config),
            Block::ServerToolUse { input, .. } => json_deltas(&input.to_string(), config),
            Block::ServerToolResult(_) => Vec::new(),
        }
    }
}

/// `input_json_delta` fragments, at least one even for empty input
fn json_deltas(serialized: &str, config: &EmitterConfig) -> Vec<JsonValue> {
    let slices = chunk_chars(serialized, config.argument_chunk_chars());
    if slices.is_empty() {
        return vec![json!({"type": "input_json_delta", "partial_json": ""})];
    }
    slices
        .into_iter()
        .map(|slice| json!({"type": "input_json_delta", "partial_json": slice}))
        .collect()
}

async fn write_event<W>(writer: &mut W, payload: JsonValue) -> Result<()>
where
    W: FrameWriter + ?Sized,
{
    let name = payload["type"].as_str().unwrap_or("message").to_string();
    writer.write_frame(SseFrame::event(name, &payload)?).await
}

/// Stream `plan` as typed message events
pub async fn stream<W>(
    plan: &Plan,
    meta: &ResponseMeta,
    config: &EmitterConfig,
    writer: &mut W,
) -> Result<()>
where
    W: FrameWriter + ?Sized,
{
    write_event(
        writer,
        json!({
            "type": "message_start",
            "message": {
                "id": meta.id,
                "type": "message",
                "role": "assistant",
                "model": meta.model,
                "content": [],
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {
                    "input_tokens": meta.usage.input_tokens,
                    "output_tokens": 1,
                    "cache_creation_input_tokens": meta.usage.cache_creation_input_tokens,
                    "cache_read_input_tokens": meta.usage.cache_read_input_tokens,
                },
            },
        }),
    )
    .await?;

    for (index, block) in blocks(plan).iter().enumerate() {
        write_event(
            writer,
            json!({
                "type": "content_block_start",
                "index": index,
                "content_block": block.start_payload(),
            }),
        )
        .await?;

        for delta in block.deltas(config) {
            write_event(
                writer,
                json!({"type": "content_block_delta", "index": index, "delta": delta}),
            )
            .await?;
        }

        write_event(writer, json!({"type": "content_block_stop", "index": index})).await?;
    }

    let mut usage = json!({"output_tokens": meta.usage.output_tokens});
    let searches = web_search_requests(plan);
    if searches > 0 {
        usage["server_tool_use"] = json!({"web_search_requests": searches});
    }
    write_event(
        writer,
        json!({
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason(plan), "stop_sequence": null},
            "usage": usage,
        }),
    )
    .await?;

    write_event(writer, json!({"type": "message_stop"})).await
}

/// Render `plan` as one message object
pub fn document(plan: &Plan, meta: &ResponseMeta) -> JsonValue {
    let content: Vec<JsonValue> = blocks(plan).iter().map(Block::complete_payload).collect();

    json!({
        "id": meta.id,
        "type": "message",
        "role": "assistant",
        "model": meta.model,
        "content": content,
        "stop_reason": stop_reason(plan),
        "stop_sequence": null,
        "usage": usage_json(plan, meta),
    })
}
