//! Sort chains used by shards and by the cross-shard merge
//!
//! A [`Sort`] is a priority ordered list of criteria. Two documents are compared
//! by the first criterion; ties fall through to the next one. When every
//! criterion ties the documents are considered equal and callers decide the
//! final, deterministic tie-break (the merge uses shard and position order).

use crate::document::Document;
use crate::results::Group;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// What a sort criterion looks at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// The relevance score assigned by the shard
    Score,
    /// A stored document field
    Field(String),
}

/// Direction of a sort criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One link of a sort chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCriterion {
    pub key: SortKey,
    pub order: SortOrder,
}

impl SortCriterion {
    /// Compare two documents under this criterion only
    ///
    /// Documents missing the field order after documents that have it,
    /// regardless of direction.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let ordering = match &self.key {
            SortKey::Score => a.score.total_cmp(&b.score),
            SortKey::Field(name) => match (a.get(name), b.get(name)) {
                (Some(x), Some(y)) => x.compare(y),
                (Some(_), None) => return Ordering::Less,
                (None, Some(_)) => return Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };

        match self.order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    }
}

/// Priority ordered chain of sort criteria
///
/// An empty chain sorts by relevance, best score first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sort {
    criteria: Vec<SortCriterion>,
}

impl Sort {
    /// Relevance ordering (score descending)
    pub fn relevance() -> Self {
        Self::default()
    }

    /// Start a chain with a field criterion
    pub fn by_field(name: impl Into<String>, order: SortOrder) -> Self {
        Self::default().then_by_field(name, order)
    }

    /// Append a field criterion with lower priority than the existing ones
    pub fn then_by_field(mut self, name: impl Into<String>, order: SortOrder) -> Self {
        self.criteria.push(SortCriterion {
            key: SortKey::Field(name.into()),
            order,
        });
        self
    }

    /// Append a score criterion with lower priority than the existing ones
    pub fn then_by_score(mut self, order: SortOrder) -> Self {
        self.criteria.push(SortCriterion {
            key: SortKey::Score,
            order,
        });
        self
    }

    /// Criteria in priority order
    pub fn criteria(&self) -> &[SortCriterion] {
        &self.criteria
    }

    /// Compare two documents under the whole chain
    pub fn compare_documents(&self, a: &Document, b: &Document) -> Ordering {
        if self.criteria.is_empty() {
            return b.score.total_cmp(&a.score);
        }

        self.criteria
            .iter()
            .map(|criterion| criterion.compare(a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// Compare two groups by their head documents
    ///
    /// Empty groups order last; they are rejected before merging anyway.
    pub fn compare_groups(&self, a: &Group, b: &Group) -> Ordering {
        match (a.head(), b.head()) {
            (Some(x), Some(y)) => self.compare_documents(x, y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}
