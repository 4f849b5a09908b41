// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Deterministic, instruction-driven simulator of OpenAI-compatible and
//! Anthropic-compatible LLM HTTP APIs.
//!
//! Test authors script assistant behaviour by embedding an instruction chain
//! between `<mock-llm-instructions>` tags in a user message. Each request is
//! answered from the transcript alone: the [`conversation`] analyzer finds the
//! plan due now, a [`dispatch`]er resolves placeholders against the request,
//! and an [`emitter`] renders the plan in the provider's wire format.

pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod emitter;
pub mod error;
pub mod generator;
pub mod instruction;
pub mod logging;
pub mod server;

pub use config::SimConfig;
pub use dispatch::{
    AnthropicDispatcher, Dispatcher, DispatcherChain, InboundRequest, OpenAiDispatcher,
    SimResponse,
};
pub use error::{Error, Result};
pub use instruction::{Plan, Step};
pub use server::{RunningServer, SimServer, spawn};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
