// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Protocol emitters and the streaming pipeline
//!
//! Each emitter renders a resolved [`Plan`](crate::instruction::Plan) either
//! as a sequence of SSE frames written to a [`FrameWriter`], or as a single
//! JSON document. Streaming responses run the emitter in a background task
//! that feeds a bounded channel; the HTTP body drains the other end.

pub mod anthropic;
pub mod openai;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::{EmitterConfig, UsageConfig};
use crate::error::{Error, Result};

/// One Server-Sent-Events frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name, emitted as an `event:` line when present
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// Unnamed `data:` frame carrying compact JSON
    pub fn data(payload: &JsonValue) -> Result<Self> {
        Ok(Self {
            event: None,
            data: serde_json::to_string(payload)?,
        })
    }

    /// Named frame carrying compact JSON
    pub fn event(name: impl Into<String>, payload: &JsonValue) -> Result<Self> {
        Ok(Self {
            event: Some(name.into()),
            data: serde_json::to_string(payload)?,
        })
    }

    /// OpenAI-style stream terminator
    pub fn done() -> Self {
        Self {
            event: None,
            data: "[DONE]".to_string(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.event.is_none() && self.data == "[DONE]"
    }

    /// Wire encoding, including the blank line terminating the frame
    pub fn encode(&self) -> String {
        match &self.event {
            Some(event) => format!("event: {}\ndata: {}\n\n", event, self.data),
            None => format!("data: {}\n\n", self.data),
        }
    }

    /// Parse the `data` payload back into JSON
    pub fn json(&self) -> Result<JsonValue> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

/// Split an SSE body back into frames; blocks without `data:` are skipped
pub fn parse_frames(body: &str) -> Vec<SseFrame> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = Vec::new();
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    event = Some(name.trim().to_string());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data.push(value.strip_prefix(' ').unwrap_or(value));
                }
            }
            if data.is_empty() {
                None
            } else {
                Some(SseFrame {
                    event,
                    data: data.join("\n"),
                })
            }
        })
        .collect()
}

/// Sink for emitted frames
#[async_trait]
pub trait FrameWriter: Send {
    async fn write_frame(&mut self, frame: SseFrame) -> Result<()>;
}

/// Collects frames in memory
#[async_trait]
impl FrameWriter for Vec<SseFrame> {
    async fn write_frame(&mut self, frame: SseFrame) -> Result<()> {
        self.push(frame);
        Ok(())
    }
}

/// Writes encoded frames into the bounded handoff channel of a streaming
/// response, pausing between frames.
///
/// Fails with [`Error::Cancelled`] as soon as the receiving side is gone,
/// including while it is waiting out the inter-frame delay.
pub struct ChannelWriter {
    tx: mpsc::Sender<Result<Bytes>>,
    delay: Duration,
    frames_written: usize,
}

impl ChannelWriter {
    pub fn new(tx: mpsc::Sender<Result<Bytes>>, delay: Duration) -> Self {
        Self {
            tx,
            delay,
            frames_written: 0,
        }
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }
}

#[async_trait]
impl FrameWriter for ChannelWriter {
    async fn write_frame(&mut self, frame: SseFrame) -> Result<()> {
        if self.frames_written > 0 && !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = self.tx.closed() => return Err(Error::Cancelled),
            }
        }

        self.tx
            .send(Ok(Bytes::from(frame.encode())))
            .await
            .map_err(|_| Error::Cancelled)?;
        self.frames_written += 1;
        Ok(())
    }
}

/// Body stream of a streaming response
pub type FrameStream = ReceiverStream<Result<Bytes>>;

/// Run `produce` as a background generation task feeding a bounded channel.
///
/// - Consumer disconnect ends the task quietly.
/// - An elapsed `stream_timeout_ms` ends the task and closes the stream.
/// - Any other error is delivered as the final item of the stream, after
///   every frame already written.
pub fn spawn_stream<F, Fut>(config: &EmitterConfig, produce: F) -> FrameStream
where
    F: FnOnce(ChannelWriter) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let generation = produce(ChannelWriter::new(tx.clone(), config.chunk_delay()));
    let deadline = config.stream_timeout();

    tokio::spawn(async move {
        let outcome = match deadline {
            Some(limit) => match tokio::time::timeout(limit, generation).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = limit.as_millis() as u64,
                        "Stream deadline elapsed, ending response early"
                    );
                    Ok(())
                }
            },
            None => generation.await,
        };

        match outcome {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                tracing::debug!("Stream consumer disconnected, generation stopped");
            }
            Err(err) => {
                tracing::error!("Stream generation failed: {}", err);
                let _ = tx.send(Err(err)).await;
            }
        }
    });

    ReceiverStream::new(rx)
}

/// Per-response values shared by both protocols
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    /// Completion or message id
    pub id: String,
    /// Model echoed back to the client
    pub model: String,
    /// Unix timestamp of the response
    pub created: i64,
    pub usage: UsageConfig,
    /// OpenAI `stream_options.include_usage`
    pub include_usage: bool,
}

impl ResponseMeta {
    pub fn new(id_prefix: &str, model: impl Into<String>, usage: UsageConfig) -> Self {
        Self {
            id: format!("{}{}", id_prefix, uuid::Uuid::new_v4().simple()),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
            usage,
            include_usage: false,
        }
    }

    pub fn with_include_usage(mut self, include_usage: bool) -> Self {
        self.include_usage = include_usage;
        self
    }
}
