// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the LLM API simulator

use axum::http::StatusCode;

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the LLM API simulator
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Malformed request: {message}")]
    MalformedRequest { message: String },

    #[error("No simulated endpoint for {method} {path}")]
    UnrecognizedEndpoint { method: String, path: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Stream generation failed: {message}")]
    StreamGeneration { message: String },

    /// The consumer of a streaming response went away.
    #[error("Stream consumer disconnected")]
    Cancelled,

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("YAML serialization error: {source}")]
    YamlSerialization {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("Configuration source error: {source}")]
    ConfigSource {
        #[from]
        source: config::ConfigError,
    },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedRequest {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// HTTP status a dispatcher reports for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MalformedRequest { .. } | Error::Serialization { .. } => StatusCode::BAD_REQUEST,
            Error::UnrecognizedEndpoint { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True when a dispatcher declined the request rather than failing it
    pub fn is_declined(&self) -> bool {
        matches!(self, Error::UnrecognizedEndpoint { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(Error::malformed("empty body").status_code(), StatusCode::BAD_REQUEST);
        let declined = Error::UnrecognizedEndpoint {
            method: "GET".into(),
            path: "/v1/models".into(),
        };
        assert_eq!(declined.status_code(), StatusCode::NOT_FOUND);
        assert!(declined.is_declined());
        assert!(!Error::Cancelled.is_declined());
    }
}
