// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Parser for the embedded instruction DSL
//!
//! The DSL is a JSON document placed between [`INSTRUCTIONS_START`] and
//! [`INSTRUCTIONS_END`] inside ordinary message text:
//!
//! ```text
//! <mock-llm-instructions>
//! {"instruction_chain": [
//!   {"id": "first", "reasoning": {"length": 10}, "messages": [{"text_message": {"length": 5}}]},
//!   {"messages": [{"tool_call": [{"name": "bash", "args": {"cmd": "ls"}}]}]}
//! ]}
//! </mock-llm-instructions>
//! ```
//!
//! A bare instruction object (without `instruction_chain`) is accepted and
//! treated as a one-element chain. Parsing is lenient: unknown or malformed
//! step entries are skipped, and instructions that end up empty are dropped.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::{
    Citation, CitedBody, CitedText, Placeholder, Plan, ServerToolOutcome, ServerToolResult,
    ServerToolUse, Step, TextValue, ToolCall,
};
use crate::generator::stable_id;

/// Opening sentinel of an embedded instruction block
pub const INSTRUCTIONS_START: &str = "<mock-llm-instructions>";
/// Closing sentinel of an embedded instruction block
pub const INSTRUCTIONS_END: &str = "</mock-llm-instructions>";

/// Upper bound applied to every scripted word count
pub const MAX_SCRIPTED_WORDS: usize = 10_000;

/// Parse the instruction chain embedded in `text`.
///
/// Returns `None` when `text` carries no sentinel pair, when the enclosed JSON
/// does not parse, or when no instruction survives filtering.
pub fn parse_chain(text: &str) -> Option<Vec<Plan>> {
    parse_chain_in(text, "")
}

/// [`parse_chain`] with generated tool ids seeded by `scope`.
///
/// Generated ids are unique per (scope, chain position, step, call). Callers
/// pass the transcript position of the message carrying the chain so that
/// the same script anchored twice in one conversation yields distinct ids.
pub fn parse_chain_in(text: &str, scope: &str) -> Option<Vec<Plan>> {
    let body = extract_block(text)?;
    let document: JsonValue = match serde_json::from_str(body) {
        Ok(document) => document,
        Err(err) => {
            tracing::debug!("Ignoring unparsable instruction block: {}", err);
            return None;
        }
    };
    parse_document(&document, scope)
}

/// Legacy single-instruction parsing of one message.
///
/// Accepts a sentinel-delimited block (first plan wins) or a message whose
/// whole text is a bare instruction object.
pub fn parse_legacy(text: &str) -> Option<Plan> {
    parse_legacy_in(text, "")
}

/// [`parse_legacy`] with generated tool ids seeded by `scope`
pub fn parse_legacy_in(text: &str, scope: &str) -> Option<Plan> {
    if let Some(chain) = parse_chain_in(text, scope) {
        return chain.into_iter().next();
    }

    let trimmed = text.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let document: JsonValue = serde_json::from_str(trimmed).ok()?;
    parse_document(&document, scope)?.into_iter().next()
}

fn extract_block(text: &str) -> Option<&str> {
    let start = text.find(INSTRUCTIONS_START)? + INSTRUCTIONS_START.len();
    let end = start + text[start..].find(INSTRUCTIONS_END)?;
    let body = text[start..end].trim();

    // Authors frequently wrap the JSON in a markdown fence
    let body = body
        .strip_prefix("```json")
        .or_else(|| body.strip_prefix("```"))
        .map(|inner| inner.trim_end().trim_end_matches("```"))
        .unwrap_or(body);
    Some(body.trim())
}

fn parse_document(document: &JsonValue, scope: &str) -> Option<Vec<Plan>> {
    let object = document.as_object()?;

    let raw_instructions: Vec<&JsonValue> = match object.get("instruction_chain") {
        Some(JsonValue::Array(entries)) => entries.iter().collect(),
        Some(_) => return None,
        None => vec![document],
    };

    let plans: Vec<Plan> = raw_instructions
        .into_iter()
        .enumerate()
        .filter_map(|(index, raw)| {
            let raw: RawInstruction = serde_json::from_value(raw.clone()).ok()?;
            raw.into_plan(index, scope)
        })
        .collect();

    if plans.is_empty() { None } else { Some(plans) }
}

#[derive(Debug, Deserialize)]
struct RawInstruction {
    #[serde(default)]
    id: Option<JsonValue>,
    #[serde(default)]
    id_message: Option<String>,
    #[serde(default)]
    reasoning: Option<RawReasoning>,
    #[serde(default)]
    messages: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct RawReasoning {
    #[serde(default)]
    length: JsonValue,
}

/// One entry of an instruction's `messages` array
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawStep {
    TextMessage { length: JsonValue },
    Text(String),
    ToolCall(OneOrMany<RawToolCall>),
    SystemPromptEcho(JsonValue),
    ToolsList(JsonValue),
    RequestUrlEcho(JsonValue),
    RequestHeadersEcho(JsonValue),
    RequestParamsEcho(RawParamsEcho),
    ServerToolUse(RawServerToolUse),
    ServerToolResult(RawServerToolResult),
    TextWithCitations(RawCitedText),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawToolCall {
    name: String,
    #[serde(default)]
    args: Option<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
struct RawParamsEcho {
    #[serde(default)]
    fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawServerToolUse {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    input: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct RawServerToolResult {
    #[serde(default)]
    tool_use_id: Option<String>,
    name: String,
    #[serde(default)]
    result: Option<JsonValue>,
    #[serde(default)]
    error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCitedText {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    length: Option<JsonValue>,
    #[serde(default)]
    citations: Vec<Citation>,
}

impl RawInstruction {
    fn into_plan(self, index: usize, scope: &str) -> Option<Plan> {
        let label = self
            .id_message
            .filter(|label| !label.is_empty())
            .or_else(|| self.id.as_ref().and_then(id_label))
            .unwrap_or_else(|| format!("instruction-{}", index));

        let reasoning_length = self.reasoning.and_then(|reasoning| word_count(&reasoning.length));

        // Labels may repeat within a chain; the position never does
        let seed = format!("{}/{}/{}", scope, index, label);
        let mut plan = Plan::new(label);
        plan.reasoning_length = reasoning_length;

        let mut last_server_tool: Option<String> = None;
        for (step_index, entry) in self.messages.into_iter().enumerate() {
            let raw: RawStep = match serde_json::from_value(entry) {
                Ok(raw) => raw,
                Err(err) => {
                    tracing::debug!(
                        plan = %plan.label,
                        step_index,
                        "Skipping unrecognized instruction step: {}",
                        err
                    );
                    continue;
                }
            };
            if let Some(step) = raw.into_step(&seed, step_index, &mut last_server_tool) {
                plan.steps.push(step);
            }
        }

        if plan.steps.is_empty() && plan.reasoning_length.unwrap_or(0) == 0 {
            return None;
        }
        Some(plan)
    }
}

impl RawStep {
    fn into_step(
        self,
        seed: &str,
        step_index: usize,
        last_server_tool: &mut Option<String>,
    ) -> Option<Step> {
        let position = step_index.to_string();
        let step = match self {
            RawStep::TextMessage { length } => Step::Text {
                length: word_count(&length)?,
            },
            RawStep::Text(text) => Step::ExplicitText(TextValue::Literal(text)),
            RawStep::ToolCall(calls) => {
                let calls: Vec<ToolCall> = calls
                    .into_vec()
                    .into_iter()
                    .enumerate()
                    .filter(|(_, call)| !call.name.is_empty())
                    .map(|(call_index, call)| ToolCall {
                        id: stable_id(
                            "call_",
                            &[seed, &position, &call_index.to_string(), &call.name],
                        ),
                        arguments: serialize_arguments(call.args),
                        name: call.name,
                    })
                    .collect();
                if calls.is_empty() {
                    return None;
                }
                Step::ToolCalls(calls)
            }
            RawStep::SystemPromptEcho(_) => {
                Step::ExplicitText(TextValue::Placeholder(Placeholder::SystemPrompt))
            }
            RawStep::ToolsList(_) => {
                Step::ExplicitText(TextValue::Placeholder(Placeholder::ToolsList))
            }
            RawStep::RequestUrlEcho(_) => {
                Step::ExplicitText(TextValue::Placeholder(Placeholder::RequestUrl))
            }
            RawStep::RequestHeadersEcho(_) => {
                Step::ExplicitText(TextValue::Placeholder(Placeholder::RequestHeaders))
            }
            RawStep::RequestParamsEcho(echo) => Step::ExplicitText(TextValue::Placeholder(
                Placeholder::RequestParams {
                    fields: echo.fields,
                },
            )),
            RawStep::ServerToolUse(raw) => {
                let id = raw
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| stable_id("srvtoolu_", &[seed, &position, &raw.name]));
                *last_server_tool = Some(id.clone());
                Step::ServerToolUse(ServerToolUse {
                    id,
                    name: raw.name,
                    input: raw.input.unwrap_or_else(|| JsonValue::Object(Default::default())),
                })
            }
            RawStep::ServerToolResult(raw) => {
                let tool_use_id = raw
                    .tool_use_id
                    .filter(|id| !id.is_empty())
                    .or_else(|| last_server_tool.clone())
                    .unwrap_or_else(|| stable_id("srvtoolu_", &[seed, "unpaired", &raw.name]));
                let outcome = match (raw.error_code, raw.result) {
                    (Some(code), _) => ServerToolOutcome::Error { code },
                    (None, result) => ServerToolOutcome::Result(
                        result.unwrap_or_else(|| JsonValue::Array(Vec::new())),
                    ),
                };
                Step::ServerToolResult(ServerToolResult {
                    tool_use_id,
                    name: raw.name,
                    outcome,
                })
            }
            RawStep::TextWithCitations(raw) => {
                let body = match (raw.text, raw.length) {
                    (Some(text), _) => CitedBody::Literal(text),
                    (None, Some(length)) => CitedBody::Generated {
                        length: word_count(&length)?,
                    },
                    (None, None) => return None,
                };
                Step::TextWithCitations(CitedText {
                    body,
                    citations: raw.citations,
                })
            }
        };
        Some(step)
    }
}

fn id_label(id: &JsonValue) -> Option<String> {
    match id {
        JsonValue::String(label) if !label.is_empty() => Some(label.clone()),
        JsonValue::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Non-negative word count, clamped to [`MAX_SCRIPTED_WORDS`]
fn word_count(value: &JsonValue) -> Option<usize> {
    let count = match value {
        JsonValue::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))?,
        JsonValue::String(text) => text.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    Some(count.clamp(0, MAX_SCRIPTED_WORDS as i64) as usize)
}

fn serialize_arguments(args: Option<JsonValue>) -> String {
    match args {
        None | Some(JsonValue::Null) => "{}".to_string(),
        Some(JsonValue::String(text)) => text,
        Some(value) => value.to_string(),
    }
}
