// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Anthropic-compatible `/messages` endpoint

use std::sync::Arc;

use axum::http::Method;
use serde_json::json;

use super::{Dispatcher, InboundRequest, SimResponse, prepare};
use crate::config::SimConfig;
use crate::emitter::{self, ResponseMeta, spawn_stream};
use crate::error::{Error, Result};

const ENDPOINT_SUFFIX: &str = "/messages";

/// Serves `POST …/messages`
#[derive(Debug, Clone)]
pub struct AnthropicDispatcher {
    config: Arc<SimConfig>,
}

impl AnthropicDispatcher {
    pub fn new(config: Arc<SimConfig>) -> Self {
        Self { config }
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        method == Method::POST && path.ends_with(ENDPOINT_SUFFIX)
    }
}

impl Dispatcher for AnthropicDispatcher {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn dispatch(&self, request: &InboundRequest) -> Result<SimResponse> {
        if !self.matches(&request.method, request.path()) {
            return Err(request.decline());
        }

        let prepared = prepare(request, &self.config)?;
        let model = prepared
            .chat
            .model
            .clone()
            .unwrap_or_else(|| self.config.anthropic.default_model.clone());

        tracing::info!(
            protocol = "anthropic",
            model = %model,
            stream = prepared.chat.stream,
            plan = %prepared.plan.label,
            source = ?prepared.source,
            cursor = ?prepared.cursor,
            "Simulating message"
        );

        let meta = ResponseMeta::new("msg_", model, self.config.usage.clone());

        if !prepared.chat.stream {
            return Ok(SimResponse::json(emitter::anthropic::document(
                &prepared.plan,
                &meta,
            )));
        }

        let plan = prepared.plan;
        let emitter_config = self.config.emitter.clone();
        let stream = spawn_stream(&self.config.emitter, move |mut writer| async move {
            emitter::anthropic::stream(&plan, &meta, &emitter_config, &mut writer).await
        });
        Ok(SimResponse::stream(stream))
    }

    fn error_response(&self, error: &Error) -> SimResponse {
        SimResponse::error(
            error.status_code(),
            json!({
                "type": "error",
                "error": {
                    "type": "invalid_request_error",
                    "message": error.to_string(),
                }
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_any_messages_suffix() {
        let dispatcher = AnthropicDispatcher::new(Arc::new(SimConfig::default()));
        assert!(dispatcher.matches(&Method::POST, "/v1/messages"));
        assert!(dispatcher.matches(&Method::POST, "/anthropic/v1/messages"));
        assert!(!dispatcher.matches(&Method::POST, "/v1/messages/count_tokens"));
        assert!(!dispatcher.matches(&Method::PUT, "/v1/messages"));
    }
}
