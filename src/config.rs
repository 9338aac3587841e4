//! Configuration structures for the search coordinator
//!
//! This module provides the configuration system for multisearch: the shard
//! endpoint list, the per-query timeout, the shared worker pool size and the
//! connection retry policy. Configurations are read once at start-up, either
//! from a TOML file or through the builder methods, and validated before use.

use crate::constants::defaults;
use crate::error::MultiSearchError;
use crate::shard_client::RetryPolicy;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Network location of one shard
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShardEndpoint {
    pub host: String,
    pub port: u16,
}

impl ShardEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for ShardEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ShardEndpoint {
    type Err = MultiSearchError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(|| {
            MultiSearchError::config_error(
                "shards",
                format!("endpoint '{}' has no port", s),
                "Write endpoints as host:port, for example 10.0.0.1:9000",
            )
        })?;

        if host.is_empty() {
            return Err(MultiSearchError::config_error(
                "shards",
                format!("endpoint '{}' has an empty host", s),
                "Write endpoints as host:port, for example 10.0.0.1:9000",
            ));
        }

        let port = port.parse::<u16>().map_err(|e| {
            MultiSearchError::config_error(
                "shards",
                format!("endpoint '{}' has an invalid port: {}", s, e),
                "Ports must be numbers between 0 and 65535",
            )
        })?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for ShardEndpoint {
    type Error = MultiSearchError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ShardEndpoint> for String {
    fn from(endpoint: ShardEndpoint) -> Self {
        endpoint.to_string()
    }
}

/// Configuration for a search coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Shards to fan out to, in diagnostic order
    pub shards: Vec<ShardEndpoint>,
    /// Maximum time to wait for shard answers, in milliseconds
    pub timeout_ms: u64,
    /// Number of shard calls that may run at once across all queries
    pub worker_threads: usize,
    /// Name of the shared worker pool, used in logs
    pub pool_name: String,
    /// Largest `first_result + count` a query may request
    pub max_window: usize,
    /// Connection retry policy applied by every shard client
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            shards: Vec::new(),
            timeout_ms: defaults::TIMEOUT_MS,
            worker_threads: defaults::WORKER_THREADS,
            pool_name: defaults::POOL_NAME.to_string(),
            max_window: defaults::MAX_WINDOW,
            retry: RetryPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a shard endpoint
    pub fn shard(mut self, endpoint: ShardEndpoint) -> Self {
        self.shards.push(endpoint);
        self
    }

    /// Replace the shard endpoint list
    pub fn shards(mut self, endpoints: Vec<ShardEndpoint>) -> Self {
        self.shards = endpoints;
        self
    }

    /// Set the per-query timeout in milliseconds
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Set the worker pool size
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the worker pool name
    pub fn pool_name(mut self, name: impl Into<String>) -> Self {
        self.pool_name = name.into();
        self
    }

    /// Set the largest accepted result window
    pub fn max_window(mut self, window: usize) -> Self {
        self.max_window = window;
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Per-query timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.shards.is_empty() {
            return Err(MultiSearchError::config_error(
                "shards",
                "must list at least one shard",
                "Add the host:port of every searcher the coordinator should query",
            ));
        }

        if self.timeout_ms == 0 {
            return Err(MultiSearchError::config_error(
                "timeout_ms",
                "must be greater than 0",
                "Set timeout_ms to the longest acceptable fan-out wait (recommended: 200-2000ms)",
            ));
        }

        if self.worker_threads == 0 {
            return Err(MultiSearchError::config_error(
                "worker_threads",
                "must be greater than 0",
                "Set worker_threads to at least the number of shards",
            ));
        }

        if self.pool_name.trim().is_empty() {
            return Err(MultiSearchError::config_error(
                "pool_name",
                "cannot be empty",
                "Give the worker pool a name so its log lines can be told apart",
            ));
        }

        if self.max_window == 0 {
            return Err(MultiSearchError::config_error(
                "max_window",
                "must be greater than 0",
                format!("Use the default of {} unless deep paging is required", defaults::MAX_WINDOW),
            ));
        }

        self.retry.validate()
    }

    /// Build the configuration after validation
    pub fn build(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.build()
    }

    /// Load and validate a TOML configuration file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| MultiSearchError::file_operation_failed(path, "read configuration", e))?;

        Self::from_toml_str(&contents)
            .map_err(|e| e.with_operation_context("load configuration", &path.display().to_string()))
    }
}
