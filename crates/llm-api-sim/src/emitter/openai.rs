// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! OpenAI-style chat completion rendering
//!
//! Streaming output is a sequence of `chat.completion.chunk` objects sharing
//! one id, each carrying a partial `delta`, followed by `data: [DONE]`.
//! Provider-executed tools have no equivalent in this protocol and degrade to
//! plain content; citations become `url_citation` annotations.

use serde_json::{Value as JsonValue, json};

use super::{FrameWriter, ResponseMeta, SseFrame};
use crate::config::EmitterConfig;
use crate::error::Result;
use crate::generator::{chunk_chars, chunk_words, encrypted_reasoning, filler_text};
use crate::instruction::{CitedBody, Plan, ServerToolOutcome, Step, ToolCall};

/// Separator placed between consecutive content-bearing steps
const CONTENT_SEPARATOR: &str = "\n\n";

/// Plan flattened into what the OpenAI protocol can express
#[derive(Debug, Default)]
struct Rendering<'a> {
    reasoning: Option<String>,
    segments: Vec<Segment<'a>>,
    content_chars: usize,
}

#[derive(Debug)]
enum Segment<'a> {
    Content {
        text: String,
        annotations: Vec<JsonValue>,
    },
    ToolCall(&'a ToolCall),
}

impl<'a> Rendering<'a> {
    fn build(plan: &'a Plan) -> Self {
        let mut rendering = Rendering {
            reasoning: plan
                .reasoning_length
                .filter(|words| *words > 0)
                .map(filler_text),
            ..Default::default()
        };

        for step in &plan.steps {
            match step {
                Step::Text { length } => rendering.push_content(filler_text(*length), None),
                Step::ExplicitText(value) => {
                    rendering.push_content(value.as_text().into_owned(), None)
                }
                Step::ToolCalls(calls) => {
                    rendering.segments.extend(calls.iter().map(Segment::ToolCall));
                }
                Step::ServerToolUse(tool_use) => rendering.push_content(
                    format!("[{}: {}]", tool_use.name, tool_use.input),
                    None,
                ),
                Step::ServerToolResult(result) => {
                    let text = match &result.outcome {
                        ServerToolOutcome::Result(value) => {
                            format!("[{}: {}]", result.block_type(), value)
                        }
                        ServerToolOutcome::Error { code } => {
                            format!("[{} error: {}]", result.block_type(), code)
                        }
                    };
                    rendering.push_content(text, None);
                }
                Step::TextWithCitations(cited) => {
                    let body = match &cited.body {
                        CitedBody::Literal(text) => text.clone(),
                        CitedBody::Generated { length } => filler_text(*length),
                    };
                    rendering.push_content(body, Some(&cited.citations));
                }
            }
        }
        rendering
    }

    fn push_content(&mut self, body: String, citations: Option<&[crate::instruction::Citation]>) {
        if body.is_empty() {
            return;
        }

        let mut text = String::new();
        if self.content_chars > 0 {
            text.push_str(CONTENT_SEPARATOR);
        }
        let body_start = self.content_chars + text.chars().count();
        text.push_str(&body);

        let annotations = citations
            .unwrap_or_default()
            .iter()
            .map(|citation| {
                let (start, end) = citation_span(&body, &citation.cited_text);
                json!({
                    "type": "url_citation",
                    "url_citation": {
                        "url": citation.url,
                        "title": citation.title,
                        "start_index": body_start + start,
                        "end_index": body_start + end,
                    }
                })
            })
            .collect();

        self.content_chars += text.chars().count();
        self.segments.push(Segment::Content { text, annotations });
    }

    fn content(&self) -> String {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Content { text, .. } => Some(text.as_str()),
                Segment::ToolCall(_) => None,
            })
            .collect()
    }

    fn annotations(&self) -> Vec<JsonValue> {
        self.segments
            .iter()
            .flat_map(|segment| match segment {
                Segment::Content { annotations, .. } => annotations.clone(),
                Segment::ToolCall(_) => Vec::new(),
            })
            .collect()
    }

    fn tool_calls(&self) -> impl Iterator<Item = &'a ToolCall> + '_ {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::ToolCall(call) => Some(*call),
            Segment::Content { .. } => None,
        })
    }
}

/// Character span of `quoted` inside `body`, or the whole body
fn citation_span(body: &str, quoted: &str) -> (usize, usize) {
    if !quoted.is_empty() {
        if let Some(byte_start) = body.find(quoted) {
            let start = body[..byte_start].chars().count();
            return (start, start + quoted.chars().count());
        }
    }
    (0, body.chars().count())
}

pub fn finish_reason(plan: &Plan) -> &'static str {
    if plan.has_tool_calls() { "tool_calls" } else { "stop" }
}

fn usage_json(meta: &ResponseMeta) -> JsonValue {
    json!({
        "prompt_tokens": meta.usage.input_tokens,
        "completion_tokens": meta.usage.output_tokens,
        "total_tokens": meta.usage.total_tokens(),
    })
}

fn chunk(meta: &ResponseMeta, delta: JsonValue, finish_reason: Option<&str>) -> JsonValue {
    json!({
        "id": meta.id,
        "object": "chat.completion.chunk",
        "created": meta.created,
        "model": meta.model,
        "system_fingerprint": null,
        "choices": [{
            "index": 0,
            "delta": delta,
            "logprobs": null,
            "finish_reason": finish_reason,
        }],
    })
}

async fn write_delta<W>(writer: &mut W, meta: &ResponseMeta, delta: JsonValue) -> Result<()>
where
    W: FrameWriter + ?Sized,
{
    writer.write_frame(SseFrame::data(&chunk(meta, delta, None))?).await
}

/// Stream `plan` as chat completion chunks
pub async fn stream<W>(
    plan: &Plan,
    meta: &ResponseMeta,
    config: &EmitterConfig,
    writer: &mut W,
) -> Result<()>
where
    W: FrameWriter + ?Sized,
{
    let rendering = Rendering::build(plan);

    write_delta(writer, meta, json!({"role": "assistant", "content": ""})).await?;

    if let Some(reasoning) = &rendering.reasoning {
        for fragment in chunk_words(reasoning, config.words_per_chunk) {
            write_delta(writer, meta, json!({"reasoning": fragment})).await?;
        }
        write_delta(
            writer,
            meta,
            json!({"reasoning_details": [reasoning_detail(reasoning)]}),
        )
        .await?;
    }

    let mut tool_index = 0;
    for segment in &rendering.segments {
        match segment {
            Segment::Content { text, annotations } => {
                for fragment in chunk_words(text, config.words_per_chunk) {
                    write_delta(writer, meta, json!({"content": fragment})).await?;
                }
                if !annotations.is_empty() {
                    write_delta(writer, meta, json!({"annotations": annotations})).await?;
                }
            }
            Segment::ToolCall(call) => {
                write_delta(
                    writer,
                    meta,
                    json!({"tool_calls": [{
                        "index": tool_index,
                        "id": call.id,
                        "type": "function",
                        "function": {"name": call.name, "arguments": ""},
                    }]}),
                )
                .await?;
                for slice in chunk_chars(&call.arguments, config.argument_chunk_chars()) {
                    write_delta(
                        writer,
                        meta,
                        json!({"tool_calls": [{
                            "index": tool_index,
                            "function": {"arguments": slice},
                        }]}),
                    )
                    .await?;
                }
                tool_index += 1;
            }
        }
    }

    writer
        .write_frame(SseFrame::data(&chunk(meta, json!({}), Some(finish_reason(plan))))?)
        .await?;

    if meta.include_usage {
        let usage_chunk = json!({
            "id": meta.id,
            "object": "chat.completion.chunk",
            "created": meta.created,
            "model": meta.model,
            "system_fingerprint": null,
            "choices": [],
            "usage": usage_json(meta),
        });
        writer.write_frame(SseFrame::data(&usage_chunk)?).await?;
    }

    writer.write_frame(SseFrame::done()).await
}

/// Render `plan` as one `chat.completion` object
pub fn document(plan: &Plan, meta: &ResponseMeta) -> JsonValue {
    let rendering = Rendering::build(plan);
    let content = rendering.content();
    let tool_calls: Vec<JsonValue> = rendering
        .tool_calls()
        .map(|call| {
            json!({
                "id": call.id,
                "type": "function",
                "function": {"name": call.name, "arguments": call.arguments},
            })
        })
        .collect();

    let mut message = json!({
        "role": "assistant",
        "content": if content.is_empty() && !tool_calls.is_empty() {
            JsonValue::Null
        } else {
            JsonValue::String(content)
        },
        "refusal": null,
    });
    if !tool_calls.is_empty() {
        message["tool_calls"] = JsonValue::Array(tool_calls);
    }
    let annotations = rendering.annotations();
    if !annotations.is_empty() {
        message["annotations"] = JsonValue::Array(annotations);
    }
    if let Some(reasoning) = &rendering.reasoning {
        message["reasoning"] = JsonValue::String(reasoning.clone());
        message["reasoning_details"] = json!([reasoning_detail(reasoning)]);
    }

    json!({
        "id": meta.id,
        "object": "chat.completion",
        "created": meta.created,
        "model": meta.model,
        "system_fingerprint": null,
        "choices": [{
            "index": 0,
            "message": message,
            "logprobs": null,
            "finish_reason": finish_reason(plan),
        }],
        "usage": usage_json(meta),
    })
}

fn reasoning_detail(reasoning: &str) -> JsonValue {
    json!({
        "type": "reasoning.encrypted",
        "data": encrypted_reasoning(reasoning),
        "index": 0,
    })
}
