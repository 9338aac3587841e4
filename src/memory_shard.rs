//! In-process shard over a vector of documents
//!
//! [`MemoryShard`] answers queries the way a remote searcher would: it filters,
//! sorts, groups, truncates and paginates locally, then reports how many groups
//! matched as its estimate. It backs integration tests and benchmarks, and lets
//! the coordinator be embedded without a network hop.
//!
//! A shard can be marked unavailable or given an artificial latency to exercise
//! the coordinator's failure and timeout handling.

use crate::document::Document;
use crate::error::TransportError;
use crate::query::{GroupSpec, QueryDescriptor};
use crate::results::{Group, ShardResult};
use crate::shard_client::ShardTransport;
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Shard that keeps its documents in memory
#[derive(Debug)]
pub struct MemoryShard {
    name: String,
    documents: RwLock<Vec<Document>>,
    latency: RwLock<Duration>,
    available: AtomicBool,
    calls: AtomicU64,
}

impl MemoryShard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: RwLock::new(Vec::new()),
            latency: RwLock::new(Duration::ZERO),
            available: AtomicBool::new(true),
            calls: AtomicU64::new(0),
        }
    }

    /// Create a shard holding the given documents
    pub fn with_documents(name: impl Into<String>, documents: Vec<Document>) -> Self {
        let shard = Self::new(name);
        *shard.documents.write() = documents;
        shard
    }

    /// Delay every answer by `latency`, builder style
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.write() = latency;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_document(&self, document: Document) {
        self.documents.write().push(document);
    }

    pub fn document_count(&self) -> usize {
        self.documents.read().len()
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    /// Simulate the shard going down or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of calls received, including failed ones
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Evaluate the query against the stored documents
    pub fn evaluate(&self, query: &QueryDescriptor) -> ShardResult {
        let mut matched: Vec<Document> = self
            .documents
            .read()
            .iter()
            .filter(|doc| query.query().matches(doc))
            .filter(|doc| query.filter().is_none_or(|filter| filter.matches(doc)))
            .cloned()
            .collect();

        let sort = query.sort();
        matched.sort_by(|a, b| sort.compare_documents(a, b));
        let document_count = matched.len() as u64;

        let mut groups = group_documents(matched, query.group_spec());
        let estimated_total_groups = groups.len() as u64;

        for group in &mut groups {
            group.documents.truncate(query.group_size());
        }

        let page: Vec<Group> = groups
            .into_iter()
            .skip(query.first_result())
            .take(query.count())
            .collect();

        trace!(
            "Shard {} matched {} document(s) in {} group(s), returning {}",
            self.name,
            document_count,
            estimated_total_groups,
            page.len()
        );

        ShardResult::new(page, estimated_total_groups, document_count)
    }
}

/// Group sorted documents, keeping groups in order of their best member
fn group_documents(documents: Vec<Document>, spec: &GroupSpec) -> Vec<Group> {
    if !spec.is_grouping() {
        return documents.into_iter().map(Group::singleton).collect();
    }

    let mut positions: FxHashMap<String, usize> = FxHashMap::default();
    let mut groups: Vec<Group> = Vec::new();

    for document in documents {
        let key = spec.key_for(&document).unwrap_or_default();
        match positions.get(&key) {
            Some(&index) => groups[index].documents.push(document),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push(Group::new(Some(key), vec![document]));
            }
        }
    }

    groups
}

#[async_trait]
impl ShardTransport for MemoryShard {
    async fn call(&self, query: &QueryDescriptor) -> Result<ShardResult, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(TransportError::Connection(format!("shard {} is unavailable", self.name)));
        }

        let result = self.evaluate(query);
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(result.with_response_time_ms(elapsed_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Filter, Query};
    use crate::sort::{Sort, SortOrder};

    fn corpus() -> MemoryShard {
        MemoryShard::with_documents(
            "local",
            vec![
                Document::new("1", 0.9).with_field("site", "a.com").with_field("body", "rust search"),
                Document::new("2", 0.7).with_field("site", "b.com").with_field("body", "rust merge"),
                Document::new("3", 0.8).with_field("site", "a.com").with_field("body", "rust shards"),
                Document::new("4", 0.2).with_field("site", "c.com").with_field("body", "java search"),
            ],
        )
    }

    fn ids(result: &ShardResult) -> Vec<&str> {
        result
            .groups
            .iter()
            .flat_map(|g| g.documents.iter().map(|d| d.id.as_str()))
            .collect()
    }

    #[test]
    fn test_term_query_sorted_by_relevance() {
        let query = QueryDescriptor::builder(Query::term("body", "rust")).build().unwrap();
        let result = corpus().evaluate(&query);

        assert_eq!(ids(&result), vec!["1", "3", "2"]);
        assert_eq!(result.estimated_total_groups, 3);
        assert_eq!(result.document_count, 3);
    }

    #[test]
    fn test_grouping_and_group_size() {
        let query = QueryDescriptor::builder(Query::MatchAll)
            .group_by(GroupSpec::Field("site".into()))
            .group_size(1)
            .build()
            .unwrap();
        let result = corpus().evaluate(&query);

        let keys: Vec<_> = result.groups.iter().map(|g| g.key.clone().unwrap_or_default()).collect();
        assert_eq!(keys, vec!["a.com", "b.com", "c.com"]);
        assert_eq!(ids(&result), vec!["1", "2", "4"]);
        assert_eq!(result.estimated_total_groups, 3);
        assert_eq!(result.document_count, 4);
    }

    #[test]
    fn test_pagination_and_filter() {
        let query = QueryDescriptor::builder(Query::MatchAll)
            .filter(Filter::Equals {
                field: "site".into(),
                value: "a.com".into(),
            })
            .first_result(1)
            .count(5)
            .build()
            .unwrap();
        let result = corpus().evaluate(&query);

        assert_eq!(ids(&result), vec!["3"]);
        assert_eq!(result.estimated_total_groups, 2);
        assert!(result.validate(crate::identifiers::ShardId::new(0)).is_ok());
    }

    #[test]
    fn test_field_sort() {
        let query = QueryDescriptor::builder(Query::MatchAll)
            .sort(Sort::by_field("site", SortOrder::Descending).then_by_score(SortOrder::Descending))
            .build()
            .unwrap();
        let result = corpus().evaluate(&query);
        assert_eq!(ids(&result), vec!["4", "2", "1", "3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_latency_and_availability() {
        let shard = corpus().with_latency(Duration::from_millis(30));
        let query = QueryDescriptor::builder(Query::MatchAll).build().unwrap();

        let result = shard.call(&query).await.unwrap();
        assert!(result.response_time_ms >= 30);

        shard.set_available(false);
        let error = shard.call(&query).await.unwrap_err();
        assert!(error.is_retryable());
        assert_eq!(shard.calls(), 2);
    }
}
