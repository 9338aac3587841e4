//! Error types for multisearch operations
//!
//! This module defines the error types used throughout the coordinator, providing
//! clear error messages and classification helpers. Per-shard failures are modelled
//! here too, but the coordinator absorbs them into diagnostics instead of returning
//! them to the caller.

use crate::identifiers::ShardId;
use thiserror::Error;

/// Main error type for all multisearch operations
#[derive(Debug, Error)]
pub enum MultiSearchError {
    /// IO operations failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The query descriptor was rejected before fan-out
    #[error("Invalid query: {field} - {reason}. {suggestion}")]
    InvalidQuery {
        field: String,
        reason: String,
        suggestion: String,
    },

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Connecting to or talking with a shard failed
    #[error("Transport error on shard {shard}: {reason} (after {attempts} attempt(s))")]
    Transport {
        shard: ShardId,
        reason: String,
        attempts: u32,
    },

    /// The shard answered but refused the query
    #[error("Shard {shard} rejected the query: {reason}")]
    ShardRejected { shard: ShardId, reason: String },

    /// No terminal result arrived before the deadline
    #[error("Shard {shard} timed out after {timeout_ms} ms")]
    Timeout { shard: ShardId, timeout_ms: u64 },

    /// A surviving shard returned a result that cannot be merged
    #[error("Malformed result from shard {shard}: {reason}")]
    MalformedResult { shard: ShardId, reason: String },

    /// The shard call was abandoned by the coordinator
    #[error("Shard {shard} call was cancelled")]
    Cancelled { shard: ShardId },

    /// The worker pool no longer accepts work
    #[error("Worker pool '{pool}' is stopped")]
    PoolStopped { pool: String },

    /// A batch task ended abnormally (panic or lost join)
    #[error("Task for shard {shard} failed: {reason}")]
    TaskFailed { shard: ShardId, reason: String },
}

/// Errors surfaced by a [`crate::shard_client::ShardTransport`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection could not be established or broke mid-call
    #[error("connection failure: {0}")]
    Connection(String),

    /// The remote shard processed the call and reported an error
    #[error("remote rejection: {0}")]
    Rejected(String),

    /// The call was dropped because the caller lost interest
    #[error("call cancelled")]
    Cancelled,
}

impl TransportError {
    /// Only connection level failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl MultiSearchError {
    /// Create an invalid query error
    pub fn invalid_query(field: impl Into<String>, reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidQuery {
            field: field.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a detailed config error
    pub fn config_error(field: impl Into<String>, reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Config(format!("{} - {}: {}", field.into(), reason.into(), suggestion.into()))
    }

    /// Create a malformed result error
    pub fn malformed_result(shard: ShardId, reason: impl Into<String>) -> Self {
        Self::MalformedResult {
            shard,
            reason: reason.into(),
        }
    }

    /// Convert a transport failure into a shard scoped error
    pub fn from_transport(shard: ShardId, error: TransportError, attempts: u32) -> Self {
        match error {
            TransportError::Connection(reason) => Self::Transport {
                shard,
                reason,
                attempts,
            },
            TransportError::Rejected(reason) => Self::ShardRejected { shard, reason },
            TransportError::Cancelled => Self::Cancelled { shard },
        }
    }

    /// Check if this error belongs to a single shard and must not fail the whole query
    pub fn is_shard_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::ShardRejected { .. }
                | Self::Timeout { .. }
                | Self::MalformedResult { .. }
                | Self::Cancelled { .. }
                | Self::TaskFailed { .. }
        )
    }

    /// Add operation context to an error, preserving the original error information
    pub fn with_operation_context(self, operation: &str, additional_context: &str) -> Self {
        let context = format!("{}: {}", operation, additional_context);

        match self {
            Self::Io(ref err) => Self::Io(std::io::Error::new(err.kind(), format!("{}: {}", context, err))),
            Self::Config(ref msg) => Self::Config(format!("{}: {}", context, msg)),
            Self::InvalidQuery {
                field,
                reason,
                suggestion,
            } => Self::InvalidQuery {
                field,
                reason: format!("{}: {}", context, reason),
                suggestion,
            },
            _ => self,
        }
    }

    /// Create a file operation error with context
    pub fn file_operation_failed(
        file_path: impl AsRef<std::path::Path>,
        operation: &str,
        source: std::io::Error,
    ) -> Self {
        let context = format!("{} (file: {})", operation, file_path.as_ref().display());
        Self::Io(std::io::Error::new(source.kind(), format!("{}: {}", context, source)))
    }
}
