// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Request dispatchers
//!
//! A [`Dispatcher`] either answers a request or declines it with
//! [`Error::UnrecognizedEndpoint`], which lets several simulated providers sit
//! behind one client through a [`DispatcherChain`].

pub mod anthropic;
pub mod context;
pub mod openai;

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value as JsonValue;

use crate::config::SimConfig;
use crate::conversation::{analyze, id_scope, latest_user_message};
use crate::emitter::FrameStream;
use crate::error::{Error, Result};
use crate::generator::stable_length;
use crate::instruction::{Plan, parse_legacy_in};

pub use anthropic::AnthropicDispatcher;
pub use context::RequestContext;
pub use openai::OpenAiDispatcher;

/// HTTP request as seen by dispatchers
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Set when the body could not be read, e.g. it exceeded the size limit
    pub body_error: Option<String>,
}

impl InboundRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            uri,
            headers,
            body: body.into(),
            body_error: None,
        }
    }

    /// Convenience constructor for a JSON POST
    pub fn post_json(path: &str, body: &JsonValue) -> Result<Self> {
        let uri: Uri = path
            .parse()
            .map_err(|_| Error::malformed(format!("invalid request path: {}", path)))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self::new(Method::POST, uri, headers, serde_json::to_vec(body)?))
    }

    pub fn with_body_error(mut self, message: impl Into<String>) -> Self {
        self.body = Bytes::new();
        self.body_error = Some(message.into());
        self
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Absolute request URL, reconstructed from the `Host` header when the
    /// URI is origin-form
    pub fn url(&self) -> String {
        if self.uri.scheme().is_some() {
            return self.uri.to_string();
        }
        let host = self
            .headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost");
        let path_and_query = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("http://{}{}", host, path_and_query)
    }

    pub(crate) fn decline(&self) -> Error {
        Error::UnrecognizedEndpoint {
            method: self.method.to_string(),
            path: self.path().to_string(),
        }
    }
}

/// Fields every chat-style request carries
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// The whole body, kept for placeholder resolution
    pub body: JsonValue,
    pub model: Option<String>,
    pub stream: bool,
    pub messages: Vec<JsonValue>,
    pub tools: Vec<JsonValue>,
}

impl ChatRequest {
    /// Parse and shape-check a request body
    pub fn parse(request: &InboundRequest) -> Result<Self> {
        if let Some(message) = &request.body_error {
            return Err(Error::malformed(message.clone()));
        }
        if request.body.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::malformed("request body is empty"));
        }

        let body: JsonValue = serde_json::from_slice(&request.body)
            .map_err(|err| Error::malformed(format!("request body is not valid JSON: {}", err)))?;
        let object = body
            .as_object()
            .ok_or_else(|| Error::malformed("request body must be a JSON object"))?;

        let messages = match object.get("messages") {
            Some(JsonValue::Array(messages)) => messages.clone(),
            None | Some(JsonValue::Null) => Vec::new(),
            Some(_) => return Err(Error::malformed("`messages` must be an array")),
        };
        let tools = match object.get("tools") {
            Some(JsonValue::Array(tools)) => tools.clone(),
            _ => Vec::new(),
        };

        Ok(Self {
            model: object
                .get("model")
                .and_then(JsonValue::as_str)
                .filter(|model| !model.is_empty())
                .map(str::to_string),
            stream: object.get("stream").and_then(JsonValue::as_bool).unwrap_or(false),
            messages,
            tools,
            body,
        })
    }

    /// OpenAI `stream_options.include_usage`
    pub fn include_usage(&self) -> bool {
        self.body
            .pointer("/stream_options/include_usage")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
    }
}

/// Where the plan driving a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    /// Position `cursor` of an embedded chain
    Chain,
    /// The anchored chain is exhausted
    Completion,
    /// Single instruction in the latest user message
    Legacy,
    /// No script at all
    Filler,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub plan: Plan,
    pub source: PlanSource,
    pub cursor: Option<usize>,
}

/// Choose the plan for a transcript: chain position, completion, legacy
/// instruction, then stable filler.
pub fn select_plan(messages: &[JsonValue], config: &SimConfig) -> Selection {
    if let Some(position) = analyze(messages) {
        let cursor = Some(position.cursor);
        return match position.plan {
            Some(plan) => Selection {
                plan,
                source: PlanSource::Chain,
                cursor,
            },
            None => {
                tracing::debug!(
                    cursor = position.cursor,
                    chain_len = position.chain_len,
                    "Instruction chain exhausted, synthesizing completion"
                );
                Selection {
                    plan: Plan::completion(config.fallback.completion_words),
                    source: PlanSource::Completion,
                    cursor,
                }
            }
        };
    }

    let (latest_index, latest) = latest_user_message(messages).unwrap_or((0, ""));
    if let Some(plan) = parse_legacy_in(latest, &id_scope(latest_index)) {
        tracing::debug!(plan = %plan.label, "Using legacy single instruction");
        return Selection {
            plan,
            source: PlanSource::Legacy,
            cursor: None,
        };
    }

    let fallback = &config.fallback;
    let words = stable_length(latest, fallback.min_words, fallback.max_words);
    let reasoning = fallback
        .reasoning_trigger
        .as_deref()
        .filter(|trigger| !trigger.is_empty() && latest.contains(trigger))
        .map(|_| fallback.reasoning_words);
    tracing::debug!(words, reasoning = ?reasoning, "No script found, using filler response");

    Selection {
        plan: Plan::filler(words, reasoning),
        source: PlanSource::Filler,
        cursor: None,
    }
}

/// Parsed request with the placeholder-resolved plan answering it
#[derive(Debug)]
pub(crate) struct Prepared {
    pub chat: ChatRequest,
    pub plan: Plan,
    pub source: PlanSource,
    pub cursor: Option<usize>,
}

pub(crate) fn prepare(request: &InboundRequest, config: &SimConfig) -> Result<Prepared> {
    let chat = ChatRequest::parse(request)?;
    let selection = select_plan(&chat.messages, config);
    let context = RequestContext::new(request, &chat);
    let plan = selection
        .plan
        .resolve_placeholders(|placeholder| context.resolve(placeholder));
    Ok(Prepared {
        chat,
        plan,
        source: selection.source,
        cursor: selection.cursor,
    })
}

/// Body of a simulated response
pub enum ResponseBody {
    Json(JsonValue),
    Stream(FrameStream),
    Text(String),
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Json(value) => f.debug_tuple("Json").field(value).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream(..)"),
            ResponseBody::Text(text) => f.debug_tuple("Text").field(text).finish(),
        }
    }
}

/// Response produced by a dispatcher
#[derive(Debug)]
pub struct SimResponse {
    pub status: StatusCode,
    pub body: ResponseBody,
}

impl SimResponse {
    pub fn json(body: JsonValue) -> Self {
        Self {
            status: StatusCode::OK,
            body: ResponseBody::Json(body),
        }
    }

    pub fn stream(stream: FrameStream) -> Self {
        Self {
            status: StatusCode::OK,
            body: ResponseBody::Stream(stream),
        }
    }

    pub fn error(status: StatusCode, body: JsonValue) -> Self {
        Self {
            status,
            body: ResponseBody::Json(body),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ResponseBody::Text(message.into()),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    /// Drain the body into text, surfacing a terminal stream fault as `Err`
    pub async fn into_text(self) -> Result<String> {
        match self.body {
            ResponseBody::Json(value) => Ok(value.to_string()),
            ResponseBody::Text(text) => Ok(text),
            ResponseBody::Stream(mut stream) => {
                let mut text = String::new();
                while let Some(item) = stream.next().await {
                    text.push_str(&String::from_utf8_lossy(&item?));
                }
                Ok(text)
            }
        }
    }
}

impl IntoResponse for SimResponse {
    fn into_response(self) -> Response {
        let status = self.status;
        match self.body {
            ResponseBody::Json(value) => (
                status,
                [(CONTENT_TYPE, "application/json"), (CACHE_CONTROL, "no-cache")],
                value.to_string(),
            )
                .into_response(),
            ResponseBody::Stream(stream) => (
                status,
                [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
                Body::from_stream(stream),
            )
                .into_response(),
            ResponseBody::Text(text) => (
                status,
                [(CONTENT_TYPE, "text/plain; charset=utf-8"), (CACHE_CONTROL, "no-cache")],
                text,
            )
                .into_response(),
        }
    }
}

/// A simulated provider endpoint
pub trait Dispatcher: Send + Sync {
    /// Short protocol name for logs
    fn name(&self) -> &'static str;

    /// Answer `request`, or decline with [`Error::UnrecognizedEndpoint`]
    fn dispatch(&self, request: &InboundRequest) -> Result<SimResponse>;

    /// Protocol-shaped response for a failed request
    fn error_response(&self, error: &Error) -> SimResponse;
}

/// Tries dispatchers in order, skipping those that decline
#[derive(Default)]
pub struct DispatcherChain {
    dispatchers: Vec<Box<dyn Dispatcher>>,
}

impl DispatcherChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// OpenAI-style then Anthropic-style endpoints sharing `config`
    pub fn standard(config: std::sync::Arc<SimConfig>) -> Self {
        Self::new()
            .with(OpenAiDispatcher::new(config.clone()))
            .with(AnthropicDispatcher::new(config))
    }

    pub fn with(mut self, dispatcher: impl Dispatcher + 'static) -> Self {
        self.dispatchers.push(Box::new(dispatcher));
        self
    }

    pub fn len(&self) -> usize {
        self.dispatchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatchers.is_empty()
    }

    pub fn dispatch(&self, request: &InboundRequest) -> SimResponse {
        for dispatcher in &self.dispatchers {
            match dispatcher.dispatch(request) {
                Ok(response) => return response,
                Err(err) if err.is_declined() => continue,
                Err(err) => {
                    tracing::warn!(
                        protocol = dispatcher.name(),
                        path = request.path(),
                        "Rejecting request: {}",
                        err
                    );
                    return dispatcher.error_response(&err);
                }
            }
        }

        tracing::warn!(
            method = %request.method,
            path = request.path(),
            "No simulated endpoint matched"
        );
        SimResponse::not_found(request.decline().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Step;
    use serde_json::json;

    #[test]
    fn parse_rejects_empty_and_invalid_bodies() {
        let empty = InboundRequest::new(
            Method::POST,
            Uri::from_static("/v1/chat/completions"),
            HeaderMap::new(),
            "  ",
        );
        assert!(matches!(ChatRequest::parse(&empty), Err(Error::MalformedRequest { .. })));

        let invalid = InboundRequest::new(
            Method::POST,
            Uri::from_static("/v1/messages"),
            HeaderMap::new(),
            "{nope",
        );
        let err = ChatRequest::parse(&invalid).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));

        let array = InboundRequest::new(
            Method::POST,
            Uri::from_static("/v1/messages"),
            HeaderMap::new(),
            "[]",
        );
        assert!(ChatRequest::parse(&array).is_err());

        let oversized = empty.with_body_error("body exceeds 10 bytes");
        assert!(ChatRequest::parse(&oversized).unwrap_err().to_string().contains("exceeds"));
    }

    #[test]
    fn parse_extracts_fields() {
        let request = InboundRequest::post_json(
            "/v1/chat/completions",
            &json!({
                "model": "gpt-x",
                "stream": true,
                "stream_options": {"include_usage": true},
                "messages": [{"role": "user", "content": "hi"}],
                "tools": [{"type": "function", "function": {"name": "bash"}}]
            }),
        )
        .unwrap();
        let chat = ChatRequest::parse(&request).unwrap();
        assert_eq!(chat.model.as_deref(), Some("gpt-x"));
        assert!(chat.stream);
        assert!(chat.include_usage());
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.tools.len(), 1);
    }

    #[test]
    fn url_uses_host_header() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, "127.0.0.1:9000".parse().unwrap());
        let request = InboundRequest::new(
            Method::POST,
            Uri::from_static("/v1/messages?beta=true"),
            headers,
            "",
        );
        assert_eq!(request.url(), "http://127.0.0.1:9000/v1/messages?beta=true");
    }

    #[test]
    fn filler_selection_is_stable_and_honours_trigger() {
        let mut config = SimConfig::default();
        let messages = vec![json!({"role": "user", "content": "please think carefully"})];

        let first = select_plan(&messages, &config);
        let second = select_plan(&messages, &config);
        assert_eq!(first, second);
        assert_eq!(first.source, PlanSource::Filler);
        assert_eq!(first.plan.reasoning_length, None);
        let Step::Text { length } = first.plan.steps[0] else {
            panic!("filler should be text");
        };
        assert!((config.fallback.min_words..=config.fallback.max_words).contains(&length));

        config.fallback.reasoning_trigger = Some("think".to_string());
        let triggered = select_plan(&messages, &config);
        assert_eq!(triggered.plan.reasoning_length, Some(config.fallback.reasoning_words));
    }

    #[test]
    fn empty_chain_declines_to_not_found() {
        let chain = DispatcherChain::new();
        let request = InboundRequest::post_json("/v1/other", &json!({})).unwrap();
        let response = chain.dispatch(&request);
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }
}
