// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! OpenAI-compatible `/chat/completions` endpoint

use std::sync::Arc;

use axum::http::Method;
use serde_json::json;

use super::{Dispatcher, InboundRequest, SimResponse, prepare};
use crate::config::SimConfig;
use crate::emitter::{self, ResponseMeta, spawn_stream};
use crate::error::{Error, Result};

const ENDPOINT_SUFFIX: &str = "/chat/completions";

/// Serves `POST …/chat/completions`
#[derive(Debug, Clone)]
pub struct OpenAiDispatcher {
    config: Arc<SimConfig>,
}

impl OpenAiDispatcher {
    pub fn new(config: Arc<SimConfig>) -> Self {
        Self { config }
    }

    /// Exact `{base_path}/chat/completions` when a base path is configured,
    /// otherwise any path with that suffix
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        if method != Method::POST {
            return false;
        }
        match &self.config.openai.base_path {
            Some(base) => path == format!("{}{}", base.trim_end_matches('/'), ENDPOINT_SUFFIX),
            None => path.ends_with(ENDPOINT_SUFFIX),
        }
    }
}

impl Dispatcher for OpenAiDispatcher {
    fn name(&self) -> &'static str {
        "openai"
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
            .unwrap_or_else(|| self.config.openai.default_model.clone());

        tracing::info!(
            protocol = "openai",
            model = %model,
            stream = prepared.chat.stream,
            plan = %prepared.plan.label,
            source = ?prepared.source,
            cursor = ?prepared.cursor,
            "Simulating chat completion"
        );

        let meta = ResponseMeta::new("chatcmpl-", model, self.config.usage.clone())
            .with_include_usage(prepared.chat.include_usage());

        if !prepared.chat.stream {
            return Ok(SimResponse::json(emitter::openai::document(&prepared.plan, &meta)));
        }

        let plan = prepared.plan;
        let emitter_config = self.config.emitter.clone();
        let stream = spawn_stream(&self.config.emitter, move |mut writer| async move {
            emitter::openai::stream(&plan, &meta, &emitter_config, &mut writer).await
        });
        Ok(SimResponse::stream(stream))
    }

    fn error_response(&self, error: &Error) -> SimResponse {
        SimResponse::error(
            error.status_code(),
            json!({
                "error": {
                    "message": error.to_string(),
                    "type": "invalid_request_error",
                    "param": null,
                    "code": null,
                }
            }),
        )
    }
}
