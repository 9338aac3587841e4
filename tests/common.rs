//! Common test utilities for integration tests
//!
//! Scripted transports with fixed latency and outcome, plus helpers that build
//! coordinators over them. Integration tests pull this in with `mod common;`.

use async_trait::async_trait;
use multisearch::{
    CoordinatorConfig, Document, Group, NoopStatistics, QueryDescriptor, RetryPolicy, SearchCoordinator,
    ShardEndpoint, ShardResult, ShardTransport, StatisticsSink, TransportError, WorkerPool,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Test constants for consistent coordinator setup across integration tests
pub mod test_constants {
    pub const TIMEOUT_MS: u64 = 500;
    pub const POOL_SIZE: usize = 8;
}

/// Outcome a scripted transport answers with
#[derive(Debug, Clone)]
pub enum Script {
    Answer(ShardResult),
    Fail(TransportError),
}

/// Transport that sleeps for a fixed latency, then answers from its script
pub struct ScriptedTransport {
    latency: Duration,
    script: Script,
    calls: AtomicUsize,
    received: Mutex<Vec<QueryDescriptor>>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn answering(latency_ms: u64, result: ShardResult) -> Arc<Self> {
        Arc::new(Self {
            latency: Duration::from_millis(latency_ms),
            script: Script::Answer(result),
            calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(latency_ms: u64, error: TransportError) -> Arc<Self> {
        Arc::new(Self {
            latency: Duration::from_millis(latency_ms),
            script: Script::Fail(error),
            calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Descriptors this transport was called with
    pub fn received(&self) -> Vec<QueryDescriptor> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl ShardTransport for ScriptedTransport {
    async fn call(&self, query: &QueryDescriptor) -> Result<ShardResult, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().push(query.clone());
        tokio::time::sleep(self.latency).await;

        match &self.script {
            Script::Answer(result) => Ok(result.clone()),
            Script::Fail(error) => Err(error.clone()),
        }
    }
}

/// Groups of singleton documents with the given ids and scores, best first
#[allow(dead_code)]
pub fn singleton_groups(docs: &[(&str, f32)]) -> Vec<Group> {
    docs.iter()
        .map(|(id, score)| Group::singleton(Document::new(*id, *score)))
        .collect()
}

/// Shard result whose estimate equals its group count unless given
#[allow(dead_code)]
pub fn shard_result(groups: Vec<Group>, estimate: u64) -> ShardResult {
    let documents = groups.iter().map(Group::len).sum::<usize>() as u64;
    ShardResult::new(groups, estimate, documents)
}

/// Configuration with one endpoint per transport and test timings
pub fn test_config(shards: usize) -> CoordinatorConfig {
    CoordinatorConfig::new()
        .shards(
            (0..shards)
                .map(|i| ShardEndpoint::new(format!("searcher-{}", i), 1099))
                .collect(),
        )
        .timeout_ms(test_constants::TIMEOUT_MS)
        .worker_threads(test_constants::POOL_SIZE)
        .retry(RetryPolicy::no_retry())
}

/// Coordinator over the given transports, in order
#[allow(dead_code)]
pub fn coordinator_over(transports: Vec<Arc<dyn ShardTransport>>) -> SearchCoordinator {
    coordinator_with_stats(transports, Arc::new(NoopStatistics))
}

/// Coordinator over the given transports reporting to `stats`
pub fn coordinator_with_stats(
    transports: Vec<Arc<dyn ShardTransport>>,
    stats: Arc<dyn StatisticsSink>,
) -> SearchCoordinator {
    let pool = Arc::new(
        WorkerPool::new("integration", test_constants::POOL_SIZE).expect("Failed to create worker pool"),
    );
    SearchCoordinator::new(test_config(transports.len()), transports, pool, stats)
        .expect("Failed to create coordinator")
}
