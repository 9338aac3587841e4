//! Result structures produced by shards and by the coordinator
//!
//! - [`Group`]: documents sharing a group key, best document first
//! - [`ShardResult`]: what one shard returns for a widened query
//! - [`ShardDiagnostic`]: per-shard outcome record for monitoring surfaces
//! - [`AggregatedResult`]: the merged page handed to renderers
//!
//! All of these are plain values: once built they are only read.

use crate::document::Document;
use crate::error::MultiSearchError;
use crate::identifiers::{QueryId, ShardId};
use crate::query::Query;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Documents sharing one group key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Group key; `None` when the query does not group
    pub key: Option<String>,
    /// Members, head first
    pub documents: Vec<Document>,
}

impl Group {
    pub fn new(key: Option<String>, documents: Vec<Document>) -> Self {
        Self { key, documents }
    }

    /// Ungrouped single-document group
    pub fn singleton(document: Document) -> Self {
        Self {
            key: None,
            documents: vec![document],
        }
    }

    /// Best document of the group
    pub fn head(&self) -> Option<&Document> {
        self.documents.first()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Grouped result of one shard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardResult {
    /// Groups in the shard's local sort order
    pub groups: Vec<Group>,
    /// Shard-local estimate of how many groups match in total
    pub estimated_total_groups: u64,
    /// Number of documents that matched on the shard
    pub document_count: u64,
    /// Time the shard spent answering, in milliseconds
    pub response_time_ms: u64,
}

impl ShardResult {
    pub fn new(groups: Vec<Group>, estimated_total_groups: u64, document_count: u64) -> Self {
        Self {
            groups,
            estimated_total_groups,
            document_count,
            response_time_ms: 0,
        }
    }

    /// Set the reported response time, builder style
    pub fn with_response_time_ms(mut self, response_time_ms: u64) -> Self {
        self.response_time_ms = response_time_ms;
        self
    }

    /// Number of documents carried in the groups
    pub fn returned_documents(&self) -> usize {
        self.groups.iter().map(Group::len).sum()
    }

    /// Check that the result can take part in a merge
    pub fn validate(&self, shard: ShardId) -> Result<()> {
        if let Some(position) = self.groups.iter().position(Group::is_empty) {
            return Err(MultiSearchError::malformed_result(
                shard,
                format!("group at position {} has no documents", position),
            ));
        }

        Ok(())
    }

    /// Raise the estimate to at least the number of groups returned
    ///
    /// Returns whether the shard's own estimate was too low.
    pub fn reconcile_estimate(&mut self) -> bool {
        let returned = self.groups.len() as u64;
        if self.estimated_total_groups < returned {
            self.estimated_total_groups = returned;
            true
        } else {
            false
        }
    }
}

/// Outcome class of one shard call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Succeeded,
    Failed,
    TimedOut,
}

/// Per-shard record attached to every aggregated result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardDiagnostic {
    pub shard_id: ShardId,
    pub endpoint: String,
    pub status: ShardStatus,
    /// Shard reported response time; absent unless the shard succeeded
    pub response_time_ms: Option<u64>,
    /// Groups returned by the shard; absent unless the shard succeeded
    pub group_count: Option<usize>,
    pub error: Option<String>,
}

impl ShardDiagnostic {
    pub fn succeeded(shard_id: ShardId, endpoint: impl Into<String>, result: &ShardResult) -> Self {
        Self {
            shard_id,
            endpoint: endpoint.into(),
            status: ShardStatus::Succeeded,
            response_time_ms: Some(result.response_time_ms),
            group_count: Some(result.groups.len()),
            error: None,
        }
    }

    pub fn failed(shard_id: ShardId, endpoint: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            shard_id,
            endpoint: endpoint.into(),
            status: ShardStatus::Failed,
            response_time_ms: None,
            group_count: None,
            error: Some(error.into()),
        }
    }

    pub fn timed_out(shard_id: ShardId, endpoint: impl Into<String>) -> Self {
        Self {
            shard_id,
            endpoint: endpoint.into(),
            status: ShardStatus::TimedOut,
            response_time_ms: None,
            group_count: None,
            error: Some("timeout".to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ShardStatus::Succeeded
    }

    /// Response time with `-1` standing for a failed or timed out shard
    pub fn response_time_or_sentinel(&self) -> i64 {
        self.response_time_ms
            .and_then(|ms| i64::try_from(ms).ok())
            .unwrap_or(-1)
    }

    /// Group count with `-1` standing for a failed or timed out shard
    pub fn group_count_or_sentinel(&self) -> i64 {
        self.group_count
            .and_then(|count| i64::try_from(count).ok())
            .unwrap_or(-1)
    }
}

/// Merged page returned to the rendering layer
///
/// `estimated_total_groups` is a lower-bound estimate and `diagnostics` are meant
/// for monitoring surfaces only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub query_id: QueryId,
    pub groups: Vec<Group>,
    pub estimated_total_groups: u64,
    pub suggested_query: Option<Query>,
    pub shard_count: usize,
    pub diagnostics: Vec<ShardDiagnostic>,
    /// End-to-end time stamped by the statistics decorator
    pub response_time_ms: Option<u64>,
}

impl AggregatedResult {
    /// Empty, well-formed result used when no shard survived
    pub fn empty(query_id: QueryId, diagnostics: Vec<ShardDiagnostic>) -> Self {
        Self {
            query_id,
            groups: Vec::new(),
            estimated_total_groups: 0,
            suggested_query: None,
            shard_count: diagnostics.len(),
            diagnostics,
            response_time_ms: None,
        }
    }

    /// Number of shards that answered successfully
    pub fn successful_shards(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_success()).count()
    }

    /// Whether some shards are missing from the merge
    pub fn is_partial(&self) -> bool {
        self.successful_shards() < self.shard_count
    }

    /// Number of documents on this page
    pub fn total_documents(&self) -> usize {
        self.groups.iter().map(Group::len).sum()
    }
}
