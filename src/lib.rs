//! Multisearch - a fan-out search coordinator
//!
//! Multisearch sends one logical query to many independent search shards, waits a
//! bounded time for their answers, tolerates shards that fail or stay silent, and
//! merges the surviving grouped results into one globally ordered, paginated page
//! with a diagnostic entry for every shard.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use multisearch::{
//!     CoordinatorConfig, Document, MemoryShard, NoopStatistics, Query, QueryDescriptor,
//!     SearchCoordinator, ShardEndpoint, ShardTransport,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoordinatorConfig::new()
//!     .shard(ShardEndpoint::new("10.0.0.1", 9000))
//!     .shard(ShardEndpoint::new("10.0.0.2", 9000))
//!     .timeout_ms(500);
//!
//! let coordinator = SearchCoordinator::connect(config, Arc::new(NoopStatistics), |endpoint| {
//!     let shard = MemoryShard::with_documents(
//!         endpoint.to_string(),
//!         vec![Document::new(format!("{}-doc", endpoint), 1.0)],
//!     );
//!     Ok(Arc::new(shard) as Arc<dyn ShardTransport>)
//! })?;
//!
//! let query = QueryDescriptor::builder(Query::MatchAll).count(10).build()?;
//! let result = coordinator.search(&query).await?;
//!
//! println!(
//!     "{} group(s) of about {}, {}/{} shard(s) answered",
//!     result.groups.len(),
//!     result.estimated_total_groups,
//!     result.successful_shards(),
//!     result.shard_count
//! );
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod identifiers;
pub mod memory_shard;
pub mod merger;
pub mod query;
pub mod results;
pub mod searcher;
pub mod shard_client;
pub mod sort;
pub mod statistics;
pub mod task_batch;
pub mod worker_pool;

pub use config::{CoordinatorConfig, ShardEndpoint};
pub use coordinator::SearchCoordinator;
pub use document::{Document, FieldValue};
pub use error::{MultiSearchError, TransportError};
pub use identifiers::{QueryId, ShardId};
pub use memory_shard::MemoryShard;
pub use merger::{MergedPage, ResultAggregator};
pub use query::{Filter, GroupSpec, Query, QueryDescriptor, QueryDescriptorBuilder};
pub use results::{AggregatedResult, Group, ShardDiagnostic, ShardResult, ShardStatus};
pub use searcher::{
    QuerySuggestor, RelaxingSuggestor, Searcher, StatisticSearcher, SuggestingSearcher, SuggestionConfig,
};
pub use shard_client::{RetryPolicy, ShardClient, ShardTransport};
pub use sort::{Sort, SortCriterion, SortKey, SortOrder};
pub use statistics::{InMemoryStatistics, MetricSummary, NoopStatistics, StatisticsSink};
pub use task_batch::{BatchSnapshot, TaskBatch, TaskOutcome, TaskReport, TaskState};
pub use worker_pool::{PoolStats, WorkerPool};

/// Type alias for Results using MultiSearchError
pub type Result<T> = std::result::Result<T, MultiSearchError>;
