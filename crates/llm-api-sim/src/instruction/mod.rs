// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Instruction model for scripted assistant behaviour
//!
//! Test authors embed an instruction chain inside ordinary message text (see
//! [`parser`]). Every request re-parses the chain from the transcript, so the
//! types here are plain values created per request and never persisted.
//!
//! A [`Plan`] is one scripted assistant turn: optional reasoning followed by an
//! ordered list of [`Step`]s. Both protocol emitters match [`Step`]
//! exhaustively, so a new step kind must be handled everywhere it is rendered.

pub mod parser;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub use parser::{
    INSTRUCTIONS_END, INSTRUCTIONS_START, parse_chain, parse_chain_in, parse_legacy,
    parse_legacy_in,
};

/// One scripted assistant turn
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Human-readable label, used for logs only
    pub label: String,
    /// Words of reasoning to emit before any step
    pub reasoning_length: Option<usize>,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            reasoning_length: None,
            steps: Vec::new(),
        }
    }

    /// Plan emitted once a chain has been fully consumed
    pub fn completion(words: usize) -> Self {
        Self {
            label: "completion".to_string(),
            reasoning_length: None,
            steps: vec![Step::Text { length: words }],
        }
    }

    /// Plan emitted when no script drives the response at all
    pub fn filler(words: usize, reasoning_length: Option<usize>) -> Self {
        Self {
            label: "filler".to_string(),
            reasoning_length,
            steps: vec![Step::Text { length: words }],
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_reasoning(mut self, words: usize) -> Self {
        self.reasoning_length = Some(words);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        self.steps.iter().any(|step| matches!(step, Step::ToolCalls(calls) if !calls.is_empty()))
    }

    /// Replace every placeholder with its rendering from `resolve`
    pub fn resolve_placeholders<F>(mut self, mut resolve: F) -> Self
    where
        F: FnMut(&Placeholder) -> String,
    {
        for step in &mut self.steps {
            if let Step::ExplicitText(TextValue::Placeholder(placeholder)) = step {
                let text = resolve(placeholder);
                *step = Step::ExplicitText(TextValue::Literal(text));
            }
        }
        self
    }
}

/// A single unit of scripted output
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Generated filler text of `length` words
    Text { length: usize },
    /// A literal string or a value resolved from the request
    ExplicitText(TextValue),
    /// One or more client-executed function calls
    ToolCalls(Vec<ToolCall>),
    /// A provider-executed tool invocation
    ServerToolUse(ServerToolUse),
    /// The outcome of a prior [`Step::ServerToolUse`]
    ServerToolResult(ServerToolResult),
    /// Text annotated with citations
    TextWithCitations(CitedText),
}

/// Text content of an explicit text step
#[derive(Debug, Clone, PartialEq)]
pub enum TextValue {
    Literal(String),
    Placeholder(Placeholder),
}

impl TextValue {
    /// Text as emitted; unresolved placeholders render as their marker
    pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
        match self {
            TextValue::Literal(text) => std::borrow::Cow::Borrowed(text),
            TextValue::Placeholder(placeholder) => {
                std::borrow::Cow::Owned(format!("[{}]", placeholder.marker()))
            }
        }
    }
}

/// Request-derived values an explicit text step can echo
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    SystemPrompt,
    ToolsList,
    RequestUrl,
    RequestHeaders,
    RequestParams { fields: Vec<String> },
}

impl Placeholder {
    /// DSL key that introduces this placeholder
    pub fn marker(&self) -> &'static str {
        match self {
            Placeholder::SystemPrompt => "system_prompt_echo",
            Placeholder::ToolsList => "tools_list",
            Placeholder::RequestUrl => "request_url_echo",
            Placeholder::RequestHeaders => "request_headers_echo",
            Placeholder::RequestParams { .. } => "request_params_echo",
        }
    }
}

/// Client-executed function call with pre-serialized arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Compact JSON text, emitted byte-for-byte
    pub arguments: String,
}

/// Provider-executed tool invocation (e.g. web search)
#[derive(Debug, Clone, PartialEq)]
pub struct ServerToolUse {
    pub id: String,
    pub name: String,
    pub input: JsonValue,
}

/// Result of a server tool, or the error code it failed with
#[derive(Debug, Clone, PartialEq)]
pub struct ServerToolResult {
    pub tool_use_id: String,
    pub name: String,
    pub outcome: ServerToolOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerToolOutcome {
    Result(JsonValue),
    Error { code: String },
}

impl ServerToolResult {
    /// Anthropic block type carrying this result, e.g. `web_search_tool_result`
    pub fn block_type(&self) -> String {
        format!("{}_tool_result", self.name)
    }
}

/// Body of a citation-bearing text step
#[derive(Debug, Clone, PartialEq)]
pub struct CitedText {
    pub body: CitedBody,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CitedBody {
    Literal(String),
    Generated { length: usize },
}

/// Citation record attached to a [`CitedText`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(rename = "type", default = "default_citation_type")]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cited_text: String,
}

fn default_citation_type() -> String {
    "web_search_result_location".to_string()
}
