//! Shard clients and their connection retry policy
//!
//! A [`ShardTransport`] is whatever actually reaches a shard: an RPC stub, an HTTP
//! client, or the in-process [`crate::memory_shard::MemoryShard`]. The
//! [`ShardClient`] wraps one transport, retries connection failures with
//! exponential backoff, and gives up promptly when the coordinator cancels the
//! call.
//!
//! Only connection failures are retried. A shard that processed the query and
//! rejected it answers the same way the second time, so rejections surface
//! immediately.

use crate::config::ShardEndpoint;
use crate::constants::defaults;
use crate::error::{MultiSearchError, TransportError};
use crate::identifiers::ShardId;
use crate::query::QueryDescriptor;
use crate::results::ShardResult;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Transport used to reach a single shard
#[async_trait]
pub trait ShardTransport: Send + Sync {
    /// Execute the query on the shard
    async fn call(&self, query: &QueryDescriptor) -> std::result::Result<ShardResult, TransportError>;
}

/// Exponential backoff policy for connection failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per call, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay, in milliseconds
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            initial_backoff_ms: defaults::RETRY_INITIAL_BACKOFF_MS,
            max_backoff_ms: defaults::RETRY_MAX_BACKOFF_MS,
            multiplier: defaults::RETRY_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let delay = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Validate the retry policy
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(MultiSearchError::config_error(
                "retry.max_attempts",
                "must be greater than 0",
                "Use max_attempts = 1 to disable retries",
            ));
        }

        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(MultiSearchError::config_error(
                "retry.multiplier",
                format!("value {} must be a finite number of at least 1.0", self.multiplier),
                "Use 2.0 for classic exponential backoff",
            ));
        }

        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(MultiSearchError::config_error(
                "retry",
                format!(
                    "initial_backoff_ms ({}) cannot be greater than max_backoff_ms ({})",
                    self.initial_backoff_ms, self.max_backoff_ms
                ),
                "Ensure initial_backoff_ms <= max_backoff_ms",
            ));
        }

        Ok(())
    }
}

/// Client for one shard
#[derive(Clone)]
pub struct ShardClient {
    id: ShardId,
    endpoint: ShardEndpoint,
    transport: Arc<dyn ShardTransport>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ShardClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardClient")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ShardClient {
    pub fn new(id: ShardId, endpoint: ShardEndpoint, transport: Arc<dyn ShardTransport>, retry: RetryPolicy) -> Self {
        Self {
            id,
            endpoint,
            transport,
            retry,
        }
    }

    pub fn id(&self) -> ShardId {
        self.id
    }

    pub fn endpoint(&self) -> &ShardEndpoint {
        &self.endpoint
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Execute the query on the shard
    ///
    /// Connection failures are retried according to the policy. Every attempt and
    /// every backoff sleep race against `cancel`; once it fires the in-flight
    /// transport future is dropped and [`MultiSearchError::Cancelled`] is returned.
    pub async fn execute(&self, query: &QueryDescriptor, cancel: &CancellationToken) -> Result<ShardResult> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                outcome = self.transport.call(query) => outcome,
            };

            let error = match outcome {
                Ok(result) => {
                    if attempt > 1 {
                        debug!("Shard {} ({}) answered on attempt {}", self.id, self.endpoint, attempt);
                    }
                    return Ok(result);
                }
                Err(error) => error,
            };

            if !error.is_retryable() || attempt >= self.retry.max_attempts {
                if error != TransportError::Cancelled {
                    warn!(
                        "Shard {} ({}) failed after {} attempt(s): {}",
                        self.id, self.endpoint, attempt, error
                    );
                }
                return Err(MultiSearchError::from_transport(self.id, error, attempt));
            }

            let backoff = self.retry.backoff_for(attempt);
            debug!(
                "Shard {} ({}) connection attempt {} failed: {}; retrying in {:?}",
                self.id, self.endpoint, attempt, error, backoff
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(MultiSearchError::from_transport(self.id, TransportError::Cancelled, attempt));
                }
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}
