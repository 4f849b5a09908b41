// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Placeholder resolution against the inbound request

use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue};

use super::{ChatRequest, InboundRequest};
use crate::conversation::has_role;
use crate::instruction::Placeholder;

pub const NO_SYSTEM_PROMPT: &str = "(no system prompt)";
pub const NO_TOOLS: &str = "(no tools)";

/// Request-derived values that echo steps can render
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    request: &'a InboundRequest,
    chat: &'a ChatRequest,
}

impl<'a> RequestContext<'a> {
    pub fn new(request: &'a InboundRequest, chat: &'a ChatRequest) -> Self {
        Self { request, chat }
    }

    pub fn resolve(&self, placeholder: &Placeholder) -> String {
        match placeholder {
            Placeholder::SystemPrompt => self
                .system_prompt()
                .unwrap_or_else(|| NO_SYSTEM_PROMPT.to_string()),
            Placeholder::ToolsList => {
                let names = self.tool_names();
                if names.is_empty() {
                    NO_TOOLS.to_string()
                } else {
                    names.join(", ")
                }
            }
            Placeholder::RequestUrl => self.request.url(),
            Placeholder::RequestHeaders => self.headers_json(),
            Placeholder::RequestParams { fields } => self.params_json(fields),
        }
    }

    /// Top-level `system` field, else the first system-role message
    pub fn system_prompt(&self) -> Option<String> {
        if let Some(system) = self.chat.body.get("system") {
            if let Some(text) = content_text(system) {
                return Some(text);
            }
        }

        self.chat
            .messages
            .iter()
            .find(|message| has_role(message, "system") || has_role(message, "developer"))
            .and_then(|message| message.get("content"))
            .and_then(content_text)
    }

    /// Names of declared tools; built-in tools without a name report their type
    pub fn tool_names(&self) -> Vec<String> {
        self.chat
            .tools
            .iter()
            .filter_map(|tool| {
                tool.pointer("/function/name")
                    .or_else(|| tool.get("name"))
                    .or_else(|| tool.get("type"))
                    .and_then(JsonValue::as_str)
                    .map(str::to_string)
            })
            .collect()
    }

    /// Compact JSON object of lowercase header names, sorted
    pub fn headers_json(&self) -> String {
        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in &self.request.headers {
            headers
                .entry(name.as_str().to_ascii_lowercase())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        let object: Map<String, JsonValue> = headers
            .into_iter()
            .map(|(name, values)| (name, JsonValue::String(values.join(", "))))
            .collect();
        JsonValue::Object(object).to_string()
    }

    /// Compact JSON of selected top-level body fields, or every field but
    /// `messages` when `fields` is empty
    pub fn params_json(&self, fields: &[String]) -> String {
        let body = self.chat.body.as_object();
        let object: Map<String, JsonValue> = if fields.is_empty() {
            body.into_iter()
                .flatten()
                .filter(|(key, _)| key.as_str() != "messages")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        } else {
            fields
                .iter()
                .map(|field| {
                    let value = body
                        .and_then(|body| body.get(field))
                        .cloned()
                        .unwrap_or(JsonValue::Null);
                    (field.clone(), value)
                })
                .collect()
        };
        JsonValue::Object(object).to_string()
    }
}

/// Plain string content, or the text blocks of block content joined by newlines
fn content_text(content: &JsonValue) -> Option<String> {
    match content {
        JsonValue::String(text) => Some(text.clone()),
        JsonValue::Array(blocks) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter(|block| {
                    block.get("type").and_then(JsonValue::as_str).unwrap_or("text") == "text"
                })
                .filter_map(|block| block.get("text").and_then(JsonValue::as_str))
                .collect();
            if texts.is_empty() { None } else { Some(texts.join("\n")) }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn request_with(body: JsonValue) -> (InboundRequest, ChatRequest) {
        let mut request = InboundRequest::post_json("/v1/messages", &body).unwrap();
        request.headers.insert("x-trace", HeaderValue::from_static("abc"));
        request.headers.insert("host", HeaderValue::from_static("sim.local"));
        let chat = ChatRequest::parse(&request).unwrap();
        (request, chat)
    }

    #[test]
    fn system_prompt_from_top_level_blocks() {
        let (request, chat) = request_with(json!({
            "system": [{"type": "text", "text": "You are"}, {"type": "text", "text": "terse."}],
            "messages": []
        }));
        let context = RequestContext::new(&request, &chat);
        assert_eq!(context.resolve(&Placeholder::SystemPrompt), "You are\nterse.");
    }

    #[test]
    fn system_prompt_from_system_message_or_missing() {
        let (request, chat) = request_with(json!({
            "messages": [{"role": "System", "content": "sys"}, {"role": "user", "content": "u"}]
        }));
        assert_eq!(RequestContext::new(&request, &chat).system_prompt().as_deref(), Some("sys"));

        let (request, chat) = request_with(json!({"messages": []}));
        assert_eq!(
            RequestContext::new(&request, &chat).resolve(&Placeholder::SystemPrompt),
            NO_SYSTEM_PROMPT
        );
    }

    #[test]
    fn tool_names_cover_function_named_and_builtin_tools() {
        let (request, chat) = request_with(json!({
            "messages": [],
            "tools": [
                {"type": "function", "function": {"name": "bash"}},
                {"name": "read_file", "input_schema": {}},
                {"type": "web_search_20250305"}
            ]
        }));
        let context = RequestContext::new(&request, &chat);
        assert_eq!(
            context.resolve(&Placeholder::ToolsList),
            "bash, read_file, web_search_20250305"
        );
    }

    #[test]
    fn headers_and_url_echo() {
        let (request, chat) = request_with(json!({"messages": []}));
        let context = RequestContext::new(&request, &chat);
        assert_eq!(
            context.resolve(&Placeholder::RequestHeaders),
            r#"{"content-type":"application/json","host":"sim.local","x-trace":"abc"}"#
        );
        assert_eq!(context.resolve(&Placeholder::RequestUrl), "http://sim.local/v1/messages");
    }

    #[test]
    fn params_echo_selected_and_default_fields() {
        let (request, chat) = request_with(json!({
            "model": "m",
            "temperature": 0.5,
            "messages": [{"role": "user", "content": "x"}]
        }));
        let context = RequestContext::new(&request, &chat);
        assert_eq!(
            context.resolve(&Placeholder::RequestParams {
                fields: vec!["temperature".into(), "top_p".into()]
            }),
            r#"{"temperature":0.5,"top_p":null}"#
        );
        assert_eq!(
            context.resolve(&Placeholder::RequestParams { fields: Vec::new() }),
            r#"{"model":"m","temperature":0.5}"#
        );
    }
}
