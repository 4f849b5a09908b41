// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration management for the LLM API simulator
//!
//! Configuration is supplied by the embedding test harness, never by the wire
//! protocol. Harnesses usually build a [`SimConfig`] in code; the binary layers
//! built-in defaults, an optional file and `LLM_API_SIM_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable prefix for layered configuration
pub const ENV_PREFIX: &str = "LLM_API_SIM";

/// Main configuration structure for the simulator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Streaming emitter configuration
    pub emitter: EmitterConfig,

    /// OpenAI-style endpoint configuration
    pub openai: OpenAiConfig,

    /// Anthropic-style endpoint configuration
    pub anthropic: AnthropicConfig,

    /// Placeholder token usage reported in every response
    pub usage: UsageConfig,

    /// Behaviour when no instruction chain drives the response
    pub fallback: FallbackConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host
    pub host: String,

    /// Server port (0 picks an ephemeral port)
    pub port: u16,

    /// Maximum request body size in bytes
    pub max_body_size: usize,

    /// Enable CORS
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18081,
            max_body_size: 10 * 1024 * 1024, // 10MB
            cors_enabled: true,
        }
    }
}

/// Emitter configuration shared read-only by every response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    /// Words carried by each streamed text fragment
    pub words_per_chunk: usize,

    /// Pause between consecutive frames in milliseconds
    pub chunk_delay_ms: u64,

    /// Frames buffered between the generation task and the response body
    pub channel_capacity: usize,

    /// Optional deadline for generating one streaming response
    pub stream_timeout_ms: Option<u64>,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            words_per_chunk: 3,
            chunk_delay_ms: 0,
            channel_capacity: 16,
            stream_timeout_ms: None,
        }
    }
}

impl EmitterConfig {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn stream_timeout(&self) -> Option<Duration> {
        self.stream_timeout_ms.map(Duration::from_millis)
    }

    /// Characters per tool-argument fragment
    pub fn argument_chunk_chars(&self) -> usize {
        self.words_per_chunk.max(1) * ARGUMENT_CHARS_PER_WORD
    }
}

/// Serialized argument JSON is sliced at this many characters per configured word
pub const ARGUMENT_CHARS_PER_WORD: usize = 4;

/// OpenAI-style endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// When set, only `{base_path}/chat/completions` matches; otherwise any
    /// path ending in `/chat/completions` does
    pub base_path: Option<String>,

    /// Model echoed when the request names none
    pub default_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_path: None,
            default_model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Anthropic-style endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig {
    /// Model echoed when the request names none
    pub default_model: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            default_model: "claude-3-5-sonnet-20241022".to_string(),
        }
    }
}

/// Placeholder usage counters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            input_tokens: 100,
            output_tokens: 50,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        }
    }
}

impl UsageConfig {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Fallback behaviour when the transcript carries no usable script
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Lower bound of the stable filler length
    pub min_words: usize,

    /// Upper bound of the stable filler length
    pub max_words: usize,

    /// Length of the completion emitted once a chain is exhausted
    pub completion_words: usize,

    /// Compatibility trigger: when the latest user text contains this
    /// substring, the filler response is preceded by reasoning
    pub reasoning_trigger: Option<String>,

    /// Reasoning length used when the trigger fires
    pub reasoning_words: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            min_words: 8,
            max_words: 40,
            completion_words: 4,
            reasoning_trigger: None,
            reasoning_words: 12,
        }
    }
}

impl SimConfig {
    /// Load configuration from defaults, an optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_layered(path, None)
    }

    /// Same as [`SimConfig::load`] with an explicit environment snapshot
    /// (`None` reads the process environment)
    pub fn load_layered(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&SimConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: SimConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: SimConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let contents = serde_yaml::to_string(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.emitter.words_per_chunk == 0 {
            return Err(Error::config("emitter.words_per_chunk must be at least 1"));
        }

        if self.emitter.channel_capacity == 0 {
            return Err(Error::config("emitter.channel_capacity must be at least 1"));
        }

        let fallback = &self.fallback;
        if fallback.min_words == 0 || fallback.min_words > fallback.max_words {
            return Err(Error::config(format!(
                "fallback word range {}..={} is invalid",
                fallback.min_words, fallback.max_words
            )));
        }

        if fallback.completion_words == 0 {
            return Err(Error::config("fallback.completion_words must be at least 1"));
        }

        if self.openai.default_model.trim().is_empty()
            || self.anthropic.default_model.trim().is_empty()
        {
            return Err(Error::config("default models cannot be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.emitter.words_per_chunk, 3);
        assert_eq!(config.emitter.argument_chunk_chars(), 12);
    }

    #[test]
    fn rejects_zero_words_per_chunk() {
        let mut config = SimConfig::default();
        config.emitter.words_per_chunk = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("words_per_chunk"));
    }

    #[test]
    fn rejects_inverted_fallback_range() {
        let mut config = SimConfig::default();
        config.fallback.min_words = 50;
        config.fallback.max_words = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn layered_load_merges_file_and_env() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "emitter:\n  words_per_chunk: 7\nopenai:\n  default_model: gpt-test"
        )
        .unwrap();

        let mut env = config::Map::new();
        env.insert("LLM_API_SIM_EMITTER__CHUNK_DELAY_MS".to_string(), "25".to_string());

        let config = SimConfig::load_layered(Some(file.path()), Some(env)).unwrap();
        assert_eq!(config.emitter.words_per_chunk, 7);
        assert_eq!(config.emitter.chunk_delay_ms, 25);
        assert_eq!(config.openai.default_model, "gpt-test");
        assert_eq!(config.anthropic.default_model, "claude-3-5-sonnet-20241022");
    }

    #[test]
    fn yaml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.yaml");
        let mut config = SimConfig::default();
        config.fallback.reasoning_trigger = Some("think hard".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = SimConfig::from_file(&path).unwrap();
        assert_eq!(loaded.fallback.reasoning_trigger.as_deref(), Some("think hard"));
    }
}
