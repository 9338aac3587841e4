//! Central constants for multisearch defaults and limits
//!
//! This module provides a single source of truth for the default values shared by
//! configuration, query validation and statistics naming.

/// Default values used when a configuration omits a setting
pub mod defaults {
    /// Per-query fan-out timeout in milliseconds
    pub const TIMEOUT_MS: u64 = 1_000;

    /// Number of concurrent shard calls allowed across all queries
    pub const WORKER_THREADS: usize = 16;

    /// Name given to the shared worker pool
    pub const POOL_NAME: &str = "multiSearcher";

    /// Largest `first_result + count` window a query may ask for
    pub const MAX_WINDOW: usize = 10_000;

    /// Connection attempts per shard call, including the first one
    pub const RETRY_MAX_ATTEMPTS: u32 = 3;

    /// Delay before the first connection retry in milliseconds
    pub const RETRY_INITIAL_BACKOFF_MS: u64 = 50;

    /// Upper bound for a single backoff delay in milliseconds
    pub const RETRY_MAX_BACKOFF_MS: u64 = 2_000;

    /// Growth factor between consecutive backoff delays
    pub const RETRY_MULTIPLIER: f64 = 2.0;

    /// Queries estimating fewer groups than this look for a better suggestion
    pub const SUGGEST_GROUPS_THRESHOLD: u64 = 10;

    /// Suggestions probed per query, at most
    pub const SUGGEST_MAX_TRIES: usize = 3;

    /// A suggestion must estimate more than this many times the original groups
    pub const SUGGEST_BETTER_BY_FACTOR: f64 = 2.0;
}

/// Metric names reported to the statistics sink
pub mod metrics {
    /// Prefix for per-shard response times, suffixed with the endpoint
    pub const SHARD_TIME_PREFIX: &str = "shard_time.";

    /// Wall time of a whole fan-out, as seen by the coordinator
    pub const FAN_OUT_TIME: &str = "fan_out_time";

    /// Response time recorded by the statistics decorator
    pub const RESPONSE_TIME: &str = "response_time";

    /// Fraction of worker pool permits in use when a query is submitted
    pub const POOL_SATURATION: &str = "pool_saturation";

    /// Number of shards that did not answer in time
    pub const SHARD_TIMEOUTS: &str = "shard_timeouts";

    /// Time spent trying query suggestions, in seconds
    pub const SUGGEST_QUERY: &str = "suggest_query";

    /// Build the per-shard response time metric name for an endpoint
    pub fn shard_time(endpoint: &str) -> String {
        format!("{}{}", SHARD_TIME_PREFIX, endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        assert!(defaults::TIMEOUT_MS > 0);
        assert!(defaults::WORKER_THREADS > 0);
        assert!(defaults::RETRY_MAX_ATTEMPTS >= 1);
        assert!(defaults::RETRY_INITIAL_BACKOFF_MS <= defaults::RETRY_MAX_BACKOFF_MS);
        assert!(defaults::RETRY_MULTIPLIER >= 1.0);
        assert!(defaults::SUGGEST_BETTER_BY_FACTOR > 0.0);
    }

    #[test]
    fn test_shard_time_metric_name() {
        assert_eq!(metrics::shard_time("10.0.0.1:9000"), "shard_time.10.0.0.1:9000");
    }

    #[test]
    fn test_metric_names_are_unique() {
        let names = [
            metrics::FAN_OUT_TIME,
            metrics::RESPONSE_TIME,
            metrics::POOL_SATURATION,
            metrics::SHARD_TIMEOUTS,
            metrics::SUGGEST_QUERY,
        ];

        for (i, name) in names.iter().enumerate() {
            for other in names.iter().skip(i + 1) {
                assert_ne!(name, other, "Metric names must be unique");
            }
        }
    }
}
