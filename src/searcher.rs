//! Searcher abstraction and decorators
//!
//! [`Searcher`] is the seam callers program against. The
//! [`crate::coordinator::SearchCoordinator`] implements it directly; the
//! decorators here wrap any searcher to add behaviour around the fan-out:
//!
//! - [`StatisticSearcher`]: records end-to-end response time and stamps it on the result
//! - [`SuggestingSearcher`]: when a query estimates few groups, probes alternative
//!   queries from a [`QuerySuggestor`] and attaches the best one
//!
//! Decorators forward `request_stop` and `is_stopped` to the searcher they wrap.

use crate::constants::{defaults, metrics};
use crate::error::MultiSearchError;
use crate::query::{Query, QueryDescriptor};
use crate::results::AggregatedResult;
use crate::statistics::StatisticsSink;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Anything that answers grouped, paginated queries
#[async_trait]
pub trait Searcher: Send + Sync {
    /// Run one query and return the merged page
    async fn search(&self, query: &QueryDescriptor) -> Result<AggregatedResult>;

    /// Stop accepting new queries
    fn request_stop(&self);

    /// Whether stop was requested and no work is in flight
    fn is_stopped(&self) -> bool;
}

#[async_trait]
impl<S: Searcher + ?Sized> Searcher for Arc<S> {
    async fn search(&self, query: &QueryDescriptor) -> Result<AggregatedResult> {
        (**self).search(query).await
    }

    fn request_stop(&self) {
        (**self).request_stop()
    }

    fn is_stopped(&self) -> bool {
        (**self).is_stopped()
    }
}

/// Decorator recording end-to-end response times
pub struct StatisticSearcher<S> {
    inner: S,
    stats: Arc<dyn StatisticsSink>,
}

impl<S: Searcher> StatisticSearcher<S> {
    pub fn new(inner: S, stats: Arc<dyn StatisticsSink>) -> Self {
        Self { inner, stats }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: Searcher> Searcher for StatisticSearcher<S> {
    async fn search(&self, query: &QueryDescriptor) -> Result<AggregatedResult> {
        let started = Instant::now();

        match self.inner.search(query).await {
            Ok(mut result) => {
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                self.stats.record_value(metrics::RESPONSE_TIME, elapsed_ms as f64);
                result.response_time_ms = Some(elapsed_ms);
                Ok(result)
            }
            Err(e) => {
                self.stats.record_error(metrics::RESPONSE_TIME);
                Err(e)
            }
        }
    }

    fn request_stop(&self) {
        self.inner.request_stop()
    }

    fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }
}

/// Source of alternative queries
pub trait QuerySuggestor: Send + Sync {
    /// Candidate replacements for the query, most promising first
    fn suggest(&self, query: &Query) -> Vec<Query>;
}

/// Suggests relaxed variants of conjunctions
///
/// For `a AND b AND c` it proposes each conjunction with one clause dropped, then
/// the disjunction of all clauses. Other queries get no suggestions.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelaxingSuggestor;

impl QuerySuggestor for RelaxingSuggestor {
    fn suggest(&self, query: &Query) -> Vec<Query> {
        let Query::And(clauses) = query else {
            return Vec::new();
        };
        if clauses.len() < 2 {
            return Vec::new();
        }

        let mut suggestions: Vec<Query> = (0..clauses.len())
            .map(|skip| {
                let mut rest: Vec<Query> = clauses
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != skip)
                    .map(|(_, clause)| clause.clone())
                    .collect();
                if rest.len() == 1 {
                    rest.remove(0)
                } else {
                    Query::And(rest)
                }
            })
            .collect();
        suggestions.push(Query::Or(clauses.clone()));
        suggestions
    }
}

/// Settings of the suggestion decorator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
    /// Results estimating fewer groups than this trigger suggestions
    pub groups_threshold: u64,
    /// Suggestions probed per query, at most
    pub max_suggestions_to_try: usize,
    /// A suggestion must estimate more than `factor * original` groups
    pub better_by_factor: f64,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            groups_threshold: defaults::SUGGEST_GROUPS_THRESHOLD,
            max_suggestions_to_try: defaults::SUGGEST_MAX_TRIES,
            better_by_factor: defaults::SUGGEST_BETTER_BY_FACTOR,
        }
    }
}

impl SuggestionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn groups_threshold(mut self, threshold: u64) -> Self {
        self.groups_threshold = threshold;
        self
    }

    pub fn max_suggestions_to_try(mut self, max: usize) -> Self {
        self.max_suggestions_to_try = max;
        self
    }

    pub fn better_by_factor(mut self, factor: f64) -> Self {
        self.better_by_factor = factor;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.better_by_factor.is_finite() || self.better_by_factor < 0.0 {
            return Err(MultiSearchError::config_error(
                "better_by_factor",
                format!("value {} must be a finite, non-negative number", self.better_by_factor),
                "Use a factor such as 2.0 to only suggest queries with twice the groups",
            ));
        }
        Ok(())
    }

    pub fn build(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

/// Decorator attaching a better query suggestion to thin results
pub struct SuggestingSearcher<S> {
    inner: S,
    suggestor: Arc<dyn QuerySuggestor>,
    config: SuggestionConfig,
    stats: Arc<dyn StatisticsSink>,
}

impl<S: Searcher> SuggestingSearcher<S> {
    pub fn new(
        inner: S,
        suggestor: Arc<dyn QuerySuggestor>,
        config: SuggestionConfig,
        stats: Arc<dyn StatisticsSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner,
            suggestor,
            config,
            stats,
        })
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Probe suggestions and return the one estimating the most groups
    async fn best_suggestion(&self, query: &QueryDescriptor, original_estimate: u64) -> Option<Query> {
        let mut best: Option<Query> = None;
        let mut min_estimate = original_estimate as f64 * self.config.better_by_factor;

        let suggestions = self.suggestor.suggest(query.query());
        for suggestion in suggestions.into_iter().take(self.config.max_suggestions_to_try) {
            // Only the estimate matters, so probe a single group without sorting
            let probe = query.probe(suggestion.clone(), 1);

            match self.inner.search(&probe).await {
                Ok(result) => {
                    let estimate = result.estimated_total_groups as f64;
                    if estimate > min_estimate {
                        min_estimate = estimate;
                        best = Some(suggestion);
                    }
                }
                Err(e) => debug!("Suggestion probe for query {} failed: {}", query_label(&probe), e),
            }
        }

        best
    }
}

fn query_label(query: &QueryDescriptor) -> String {
    serde_json::to_string(query.query()).unwrap_or_else(|_| format!("{:?}", query.query()))
}

#[async_trait]
impl<S: Searcher> Searcher for SuggestingSearcher<S> {
    async fn search(&self, query: &QueryDescriptor) -> Result<AggregatedResult> {
        let mut result = self.inner.search(query).await?;

        if result.estimated_total_groups < self.config.groups_threshold {
            debug!(
                "Query {} estimated only {} group(s), trying suggestions",
                result.query_id, result.estimated_total_groups
            );
            let started = Instant::now();
            result.suggested_query = self.best_suggestion(query, result.estimated_total_groups).await;
            self.stats
                .record_value(metrics::SUGGEST_QUERY, started.elapsed().as_secs_f64());
        }

        Ok(result)
    }

    fn request_stop(&self) {
        self.inner.request_stop()
    }

    fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }
}
