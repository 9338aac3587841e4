//! Fan-out search coordination
//!
//! [`SearchCoordinator`] runs one logical query end to end:
//!
//! 1. Validate the descriptor and widen it so every shard returns the whole window
//! 2. Submit one task per shard client into a fresh [`TaskBatch`] on the shared pool
//! 3. Wait up to the configured timeout, then snapshot whatever finished
//! 4. Cancel the stragglers and build one diagnostic per shard
//! 5. Merge the successful results into the requested page
//!
//! # Key Features
//!
//! - **Bounded latency**: the caller waits at most the configured timeout plus the
//!   snapshot, however slow the shards are
//! - **Partial failure**: shard errors, timeouts and malformed results become
//!   diagnostics and statistics events, never a failed query
//! - **Prompt abandonment**: shard calls still running after the snapshot are
//!   cancelled so they release their pool slots
//!
//! Only a malformed descriptor or a stopped pool fail a search.

use crate::config::{CoordinatorConfig, ShardEndpoint};
use crate::constants::metrics;
use crate::error::MultiSearchError;
use crate::identifiers::{QueryId, ShardId};
use crate::merger::ResultAggregator;
use crate::query::QueryDescriptor;
use crate::results::{AggregatedResult, ShardDiagnostic, ShardResult};
use crate::searcher::Searcher;
use crate::shard_client::{ShardClient, ShardTransport};
use crate::statistics::StatisticsSink;
use crate::task_batch::{TaskBatch, TaskOutcome};
use crate::worker_pool::{PoolStats, WorkerPool};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Coordinator fanning queries out to a fixed set of shards
pub struct SearchCoordinator {
    config: CoordinatorConfig,
    clients: Vec<ShardClient>,
    pool: Arc<WorkerPool>,
    stats: Arc<dyn StatisticsSink>,
    aggregator: ResultAggregator,
}

impl SearchCoordinator {
    /// Create a coordinator with one transport per configured endpoint, in order
    pub fn new(
        config: CoordinatorConfig,
        transports: Vec<Arc<dyn ShardTransport>>,
        pool: Arc<WorkerPool>,
        stats: Arc<dyn StatisticsSink>,
    ) -> Result<Self> {
        config.validate()?;

        if transports.len() != config.shards.len() {
            return Err(MultiSearchError::config_error(
                "shards",
                format!(
                    "{} endpoint(s) configured but {} transport(s) supplied",
                    config.shards.len(),
                    transports.len()
                ),
                "Supply exactly one transport per configured shard endpoint",
            ));
        }

        let clients = config
            .shards
            .iter()
            .zip(transports)
            .enumerate()
            .map(|(index, (endpoint, transport))| {
                ShardClient::new(
                    ShardId::new(index as u32),
                    endpoint.clone(),
                    transport,
                    config.retry.clone(),
                )
            })
            .collect();

        Ok(Self::from_parts(config, clients, pool, stats))
    }

    /// Create a coordinator and its worker pool, building transports per endpoint
    pub fn connect<F>(config: CoordinatorConfig, stats: Arc<dyn StatisticsSink>, mut factory: F) -> Result<Self>
    where
        F: FnMut(&ShardEndpoint) -> Result<Arc<dyn ShardTransport>>,
    {
        config.validate()?;
        let pool = Arc::new(WorkerPool::from_config(&config)?);
        let transports = config.shards.iter().map(&mut factory).collect::<Result<Vec<_>>>()?;
        Self::new(config, transports, pool, stats)
    }

    fn from_parts(
        config: CoordinatorConfig,
        clients: Vec<ShardClient>,
        pool: Arc<WorkerPool>,
        stats: Arc<dyn StatisticsSink>,
    ) -> Self {
        info!(
            "Search coordinator ready: {} shard(s), timeout {} ms, pool '{}'",
            clients.len(),
            config.timeout_ms,
            pool.name()
        );

        Self {
            config,
            clients,
            pool,
            stats,
            aggregator: ResultAggregator::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn shard_count(&self) -> usize {
        self.clients.len()
    }

    pub fn clients(&self) -> &[ShardClient] {
        &self.clients
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Run one query across every shard
    ///
    /// Fails only for a descriptor outside the accepted window or a stopped pool;
    /// every shard level problem is reported through the diagnostics.
    pub async fn search(&self, query: &QueryDescriptor) -> Result<AggregatedResult> {
        query.validate(self.config.max_window)?;

        if !self.pool.is_accepting() {
            return Err(MultiSearchError::PoolStopped {
                pool: self.pool.name().to_string(),
            });
        }

        let query_id = QueryId::new();
        let started = Instant::now();
        let widened = Arc::new(query.widened_for_shards());

        self.stats
            .record_value(metrics::POOL_SATURATION, self.pool.stats().saturation());

        debug!(
            "Query {} fanning out to {} shard(s) with window {}",
            query_id,
            self.clients.len(),
            widened.count()
        );

        let batch: TaskBatch<ShardResult> = TaskBatch::new();
        batch.submit_all(
            &self.pool,
            self.clients.iter().map(|client| {
                let client = client.clone();
                let widened = Arc::clone(&widened);
                (client.id(), move |cancel: CancellationToken| async move {
                    let call_started = Instant::now();
                    let outcome: Result<ShardResult> = client.execute(&widened, &cancel).await;
                    outcome.map(|mut result| {
                        // shards that do not time themselves get the round trip
                        if result.response_time_ms == 0 {
                            result.response_time_ms = elapsed_ms(call_started);
                        }
                        result
                    })
                })
            }),
        );

        let complete = batch.wait_for(self.config.timeout()).await;
        let snapshot = batch.snapshot();
        batch.abandon();

        let mut diagnostics = Vec::with_capacity(self.clients.len());
        let mut survivors = Vec::with_capacity(self.clients.len());
        let mut timeouts = 0usize;

        for (client, report) in self.clients.iter().zip(snapshot.reports) {
            let endpoint = client.endpoint().to_string();
            let metric = metrics::shard_time(&endpoint);

            match report.outcome {
                TaskOutcome::Succeeded(mut result) => match result.validate(client.id()) {
                    Ok(()) => {
                        if result.reconcile_estimate() {
                            debug!(
                                "Query {}: shard {} estimate raised to its {} returned group(s)",
                                query_id, endpoint, result.estimated_total_groups
                            );
                        }
                        self.stats.record_value(&metric, result.response_time_ms as f64);
                        diagnostics.push(ShardDiagnostic::succeeded(client.id(), endpoint, &result));
                        survivors.push(result);
                    }
                    Err(e) => {
                        warn!("Query {}: discarding result of shard {}: {}", query_id, endpoint, e);
                        self.stats.record_error(&metric);
                        diagnostics.push(ShardDiagnostic::failed(client.id(), endpoint, e.to_string()));
                    }
                },
                TaskOutcome::Failed(e) => {
                    if e.is_shard_failure() {
                        warn!("Query {}: shard {} failed: {}", query_id, endpoint, e);
                    } else {
                        warn!("Query {}: shard {} was not queried: {}", query_id, endpoint, e);
                    }
                    self.stats.record_error(&metric);
                    diagnostics.push(ShardDiagnostic::failed(client.id(), endpoint, e.to_string()));
                }
                TaskOutcome::Unfinished => {
                    let timeout = MultiSearchError::Timeout {
                        shard: client.id(),
                        timeout_ms: self.config.timeout_ms,
                    };
                    debug!("Query {}: {} ({})", query_id, timeout, endpoint);
                    timeouts += 1;
                    self.stats.record_error(&metric);
                    diagnostics.push(ShardDiagnostic::timed_out(client.id(), endpoint));
                }
            }
        }

        if !complete {
            warn!(
                "Query {}: {} shard(s) did not answer within {} ms",
                query_id, timeouts, self.config.timeout_ms
            );
        }
        self.stats.record_value(metrics::SHARD_TIMEOUTS, timeouts as f64);
        self.stats
            .record_value(metrics::FAN_OUT_TIME, elapsed_ms(started) as f64);

        if survivors.is_empty() {
            warn!("Query {}: no shard produced a usable result", query_id);
            return Ok(AggregatedResult::empty(query_id, diagnostics));
        }

        let merged = self.aggregator.merge(query, survivors);
        debug!(
            "Query {} merged {} group(s) from {}/{} shard(s)",
            query_id,
            merged.groups.len(),
            diagnostics.iter().filter(|d| d.is_success()).count(),
            diagnostics.len()
        );

        Ok(AggregatedResult {
            query_id,
            groups: merged.groups,
            estimated_total_groups: merged.estimated_total_groups,
            suggested_query: None,
            shard_count: self.clients.len(),
            diagnostics,
            response_time_ms: None,
        })
    }

    /// Stop the shared pool from accepting new shard calls
    pub fn request_stop(&self) {
        self.pool.request_stop();
    }

    /// Whether the shared pool is stopped and idle
    pub fn is_stopped(&self) -> bool {
        self.pool.is_stopped()
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl Searcher for SearchCoordinator {
    async fn search(&self, query: &QueryDescriptor) -> Result<AggregatedResult> {
        SearchCoordinator::search(self, query).await
    }

    fn request_stop(&self) {
        SearchCoordinator::request_stop(self)
    }

    fn is_stopped(&self) -> bool {
        SearchCoordinator::is_stopped(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::memory_shard::MemoryShard;
    use crate::query::Query;
    use crate::results::ShardStatus;
    use crate::shard_client::RetryPolicy;
    use crate::statistics::{InMemoryStatistics, NoopStatistics};
    use std::time::Duration;

    fn config(shards: usize) -> CoordinatorConfig {
        CoordinatorConfig::new()
            .shards(
                (0..shards)
                    .map(|i| ShardEndpoint::new(format!("shard-{}", i), 9000))
                    .collect(),
            )
            .timeout_ms(500)
            .worker_threads(4)
            .retry(RetryPolicy::no_retry())
    }

    fn shard(prefix: &str, scores: &[f32]) -> Arc<MemoryShard> {
        Arc::new(MemoryShard::with_documents(
            prefix,
            scores
                .iter()
                .enumerate()
                .map(|(i, score)| Document::new(format!("{}{}", prefix, i), *score))
                .collect(),
        ))
    }

    fn coordinator(shards: Vec<Arc<MemoryShard>>, stats: Arc<dyn StatisticsSink>) -> SearchCoordinator {
        let pool = Arc::new(WorkerPool::new("coordinator-test", 4).unwrap());
        let transports = shards
            .into_iter()
            .map(|s| s as Arc<dyn ShardTransport>)
            .collect::<Vec<_>>();
        SearchCoordinator::new(config(transports.len()), transports, pool, stats).unwrap()
    }

    fn query(first_result: usize, count: usize) -> QueryDescriptor {
        QueryDescriptor::builder(Query::MatchAll)
            .first_result(first_result)
            .count(count)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_transport_count_must_match_endpoints() {
        let pool = Arc::new(WorkerPool::new("mismatch", 1).unwrap());
        let transports: Vec<Arc<dyn ShardTransport>> = vec![shard("a", &[1.0])];
        let result = SearchCoordinator::new(config(2), transports, pool, Arc::new(NoopStatistics));
        assert!(matches!(result, Err(MultiSearchError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_shards_merge() {
        let coordinator = coordinator(
            vec![shard("a", &[0.9, 0.3]), shard("b", &[0.8, 0.1])],
            Arc::new(NoopStatistics),
        );

        let result = coordinator.search(&query(0, 10)).await.unwrap();
        let ids: Vec<_> = result.groups.iter().map(|g| g.documents[0].id.as_str()).collect();
        assert_eq!(ids, vec!["a0", "b0", "a1", "b1"]);
        assert_eq!(result.estimated_total_groups, 4);
        assert_eq!(result.shard_count, 2);
        assert!(!result.is_partial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shards_receive_widened_window() {
        let a = shard("a", &[0.9, 0.8, 0.7, 0.6]);
        let b = shard("b", &[0.95, 0.85]);
        let coordinator = coordinator(vec![a, b], Arc::new(NoopStatistics));

        let result = coordinator.search(&query(2, 2)).await.unwrap();
        let ids: Vec<_> = result.groups.iter().map(|g| g.documents[0].id.as_str()).collect();
        assert_eq!(ids, vec!["b1", "a1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_above_limit_fails_fast() {
        let a = shard("a", &[0.9]);
        let coordinator = coordinator(vec![a.clone()], Arc::new(NoopStatistics));

        let error = coordinator.search(&query(9_999, 10)).await.unwrap_err();
        assert!(matches!(error, MultiSearchError::InvalidQuery { .. }));
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_and_failing_shards_become_diagnostics() {
        let a = shard("a", &[0.9]);
        let b = shard("b", &[0.8]);
        let c = shard("c", &[0.7]);
        b.set_available(false);
        c.set_latency(Duration::from_millis(600));

        let stats = Arc::new(InMemoryStatistics::new());
        let coordinator = coordinator(vec![a, b, c], stats.clone());

        let result = coordinator.search(&query(0, 10)).await.unwrap();
        let statuses: Vec<_> = result.diagnostics.iter().map(|d| d.status).collect();
        assert_eq!(
            statuses,
            vec![ShardStatus::Succeeded, ShardStatus::Failed, ShardStatus::TimedOut]
        );
        assert_eq!(result.groups.len(), 1);
        assert_eq!(result.estimated_total_groups, 1);
        assert!(result.is_partial());

        assert_eq!(stats.summary(&metrics::shard_time("shard-0:9000")).unwrap().count, 1);
        assert_eq!(stats.summary(&metrics::shard_time("shard-1:9000")).unwrap().errors, 1);
        assert_eq!(stats.summary(metrics::SHARD_TIMEOUTS).unwrap().max, 1.0);
        assert!(stats.summary(metrics::FAN_OUT_TIME).is_some());
        assert!(stats.summary(metrics::POOL_SATURATION).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_pool_rejects_queries() {
        let coordinator = coordinator(vec![shard("a", &[0.5])], Arc::new(NoopStatistics));
        coordinator.request_stop();

        assert!(coordinator.is_stopped());
        let error = coordinator.search(&query(0, 10)).await.unwrap_err();
        assert!(matches!(error, MultiSearchError::PoolStopped { .. }));
    }

    #[tokio::test]
    async fn test_connect_builds_pool_and_transports() {
        let coordinator = SearchCoordinator::connect(config(3), Arc::new(NoopStatistics), |endpoint| {
            Ok(Arc::new(MemoryShard::new(endpoint.to_string())) as Arc<dyn ShardTransport>)
        })
        .unwrap();

        assert_eq!(coordinator.shard_count(), 3);
        assert_eq!(coordinator.pool_stats().size, 4);
        assert_eq!(coordinator.clients()[2].id(), ShardId::new(2));
    }
}
