//! Query descriptors shipped to every shard
//!
//! A [`QueryDescriptor`] bundles everything a shard needs to answer one logical
//! query: the query tree, the page window, the grouping spec, an optional filter
//! and the sort chain. Descriptors are immutable once built; the coordinator
//! derives a widened copy for the shards with [`QueryDescriptor::widened_for_shards`].

use crate::document::{Document, FieldValue};
use crate::error::MultiSearchError;
use crate::sort::Sort;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Query tree
///
/// The coordinator treats it as opaque; only shards evaluate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    /// Matches every document
    MatchAll,
    /// Field contains the term (text fields match on whitespace separated tokens)
    Term { field: String, value: String },
    /// All sub-queries match
    And(Vec<Query>),
    /// At least one sub-query matches
    Or(Vec<Query>),
    /// The sub-query does not match
    Not(Box<Query>),
}

impl Query {
    /// Term query helper
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Evaluate the query against a document
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Self::MatchAll => true,
            Self::Term { field, value } => match document.get(field) {
                Some(FieldValue::Text(text)) => text
                    .split_whitespace()
                    .any(|token| token.eq_ignore_ascii_case(value)),
                Some(other) => other.to_string() == *value,
                None => false,
            },
            Self::And(queries) => queries.iter().all(|query| query.matches(document)),
            Self::Or(queries) => queries.iter().any(|query| query.matches(document)),
            Self::Not(query) => !query.matches(document),
        }
    }
}

/// Restriction applied after query matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Field equals the value exactly
    Equals { field: String, value: FieldValue },
    /// Field lies inside the inclusive range; a missing bound is open
    Range {
        field: String,
        min: Option<FieldValue>,
        max: Option<FieldValue>,
    },
    /// Every sub-filter holds
    All(Vec<Filter>),
}

impl Filter {
    /// Evaluate the filter against a document
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Self::Equals { field, value } => document
                .get(field)
                .is_some_and(|actual| actual.compare(value) == Ordering::Equal),
            Self::Range { field, min, max } => match document.get(field) {
                Some(actual) => {
                    min.as_ref().map_or(true, |min| actual.compare(min) != Ordering::Less)
                        && max.as_ref().map_or(true, |max| actual.compare(max) != Ordering::Greater)
                }
                None => false,
            },
            Self::All(filters) => filters.iter().all(|filter| filter.matches(document)),
        }
    }
}

/// How documents are grouped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupSpec {
    /// Every document forms its own group
    #[default]
    None,
    /// Documents sharing the value of this field form one group
    Field(String),
}

impl GroupSpec {
    /// Group key of a document under this spec
    ///
    /// Documents lacking the grouping field share the empty key.
    pub fn key_for(&self, document: &Document) -> Option<String> {
        match self {
            Self::None => None,
            Self::Field(name) => Some(document.key_of(name).unwrap_or_default()),
        }
    }

    /// Whether this spec groups at all
    pub fn is_grouping(&self) -> bool {
        matches!(self, Self::Field(_))
    }
}

/// Immutable description of one logical query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    query: Query,
    first_result: usize,
    count: usize,
    group_spec: GroupSpec,
    group_size: usize,
    filter: Option<Filter>,
    sort: Sort,
}

impl QueryDescriptor {
    /// Start building a descriptor for the given query
    pub fn builder(query: Query) -> QueryDescriptorBuilder {
        QueryDescriptorBuilder::new(query)
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn first_result(&self) -> usize {
        self.first_result
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn group_spec(&self) -> &GroupSpec {
        &self.group_spec
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    /// Number of merged groups needed to serve this page
    pub fn window(&self) -> usize {
        self.first_result.saturating_add(self.count)
    }

    /// Copy of this descriptor as sent to every shard
    ///
    /// Each shard must return enough candidates for the merged page to be
    /// globally correct, so shards are asked for the whole window from the top.
    pub fn widened_for_shards(&self) -> Self {
        Self {
            first_result: 0,
            count: self.window(),
            ..self.clone()
        }
    }

    /// Same query with a different page and sort, used for suggestion probes
    pub fn probe(&self, query: Query, count: usize) -> Self {
        Self {
            query,
            first_result: 0,
            count,
            sort: Sort::relevance(),
            ..self.clone()
        }
    }

    /// Validate the descriptor against the largest accepted window
    pub fn validate(&self, max_window: usize) -> Result<()> {
        if self.group_size == 0 {
            return Err(MultiSearchError::invalid_query(
                "group_size",
                "must be greater than 0",
                "Use group_size = 1 to return only the best document of each group",
            ));
        }

        let window = self.first_result.checked_add(self.count).ok_or_else(|| {
            MultiSearchError::invalid_query(
                "first_result + count",
                "overflows the addressable range",
                "Request a smaller page",
            )
        })?;

        if window > max_window {
            return Err(MultiSearchError::invalid_query(
                "first_result + count",
                format!("window {} exceeds the maximum of {}", window, max_window),
                format!("Keep first_result + count at or below {}", max_window),
            ));
        }

        Ok(())
    }
}

/// Builder for [`QueryDescriptor`]
#[derive(Debug, Clone)]
pub struct QueryDescriptorBuilder {
    descriptor: QueryDescriptor,
}

impl QueryDescriptorBuilder {
    /// Create a builder with the first ten ungrouped results by relevance
    pub fn new(query: Query) -> Self {
        Self {
            descriptor: QueryDescriptor {
                query,
                first_result: 0,
                count: 10,
                group_spec: GroupSpec::None,
                group_size: 1,
                filter: None,
                sort: Sort::relevance(),
            },
        }
    }

    /// Set the number of leading groups to skip
    pub fn first_result(mut self, first_result: usize) -> Self {
        self.descriptor.first_result = first_result;
        self
    }

    /// Set the page size in groups
    pub fn count(mut self, count: usize) -> Self {
        self.descriptor.count = count;
        self
    }

    /// Set the grouping spec
    pub fn group_by(mut self, group_spec: GroupSpec) -> Self {
        self.descriptor.group_spec = group_spec;
        self
    }

    /// Set the maximum number of documents kept per group
    pub fn group_size(mut self, group_size: usize) -> Self {
        self.descriptor.group_size = group_size;
        self
    }

    /// Set the filter
    pub fn filter(mut self, filter: Filter) -> Self {
        self.descriptor.filter = Some(filter);
        self
    }

    /// Set the sort chain
    pub fn sort(mut self, sort: Sort) -> Self {
        self.descriptor.sort = sort;
        self
    }

    /// Build the descriptor after structural validation
    pub fn build(self) -> Result<QueryDescriptor> {
        self.descriptor.validate(usize::MAX)?;
        Ok(self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::SortOrder;

    fn page() -> Document {
        Document::new("p1", 1.0)
            .with_field("title", "Distributed Search Engines")
            .with_field("site", "flaptor.com")
            .with_field("year", 2008_i64)
    }

    #[test]
    fn test_term_matching_is_token_based() {
        let doc = page();
        assert!(Query::term("title", "search").matches(&doc));
        assert!(!Query::term("title", "sea").matches(&doc));
        assert!(Query::term("year", "2008").matches(&doc));
        assert!(!Query::term("missing", "x").matches(&doc));
    }

    #[test]
    fn test_boolean_queries() {
        let doc = page();
        let both = Query::And(vec![Query::term("title", "search"), Query::term("site", "flaptor.com")]);
        let either = Query::Or(vec![Query::term("title", "nothing"), Query::MatchAll]);
        let negated = Query::Not(Box::new(Query::term("title", "engines")));

        assert!(both.matches(&doc));
        assert!(either.matches(&doc));
        assert!(!negated.matches(&doc));
    }

    #[test]
    fn test_filters() {
        let doc = page();
        let equals = Filter::Equals {
            field: "site".into(),
            value: "flaptor.com".into(),
        };
        let range = Filter::Range {
            field: "year".into(),
            min: Some(FieldValue::Integer(2000)),
            max: None,
        };
        let outside = Filter::Range {
            field: "year".into(),
            min: None,
            max: Some(FieldValue::Integer(2007)),
        };

        assert!(equals.matches(&doc));
        assert!(range.matches(&doc));
        assert!(!outside.matches(&doc));
        assert!(!Filter::All(vec![equals, outside]).matches(&doc));
    }

    #[test]
    fn test_group_keys() {
        let doc = page();
        assert_eq!(GroupSpec::None.key_for(&doc), None);
        assert_eq!(GroupSpec::Field("site".into()).key_for(&doc), Some("flaptor.com".into()));
        assert_eq!(GroupSpec::Field("absent".into()).key_for(&doc), Some(String::new()));
    }

    #[test]
    fn test_builder_defaults() {
        let descriptor = QueryDescriptor::builder(Query::MatchAll).build().unwrap();
        assert_eq!(descriptor.first_result(), 0);
        assert_eq!(descriptor.count(), 10);
        assert_eq!(descriptor.group_size(), 1);
        assert_eq!(descriptor.group_spec(), &GroupSpec::None);
        assert!(descriptor.filter().is_none());
        assert_eq!(descriptor.sort(), &Sort::relevance());
    }

    #[test]
    fn test_zero_group_size_fails_fast() {
        let result = QueryDescriptor::builder(Query::MatchAll).group_size(0).build();
        assert!(matches!(result, Err(MultiSearchError::InvalidQuery { .. })));
    }

    #[test]
    fn test_overflowing_window_fails_fast() {
        let result = QueryDescriptor::builder(Query::MatchAll)
            .first_result(usize::MAX)
            .count(1)
            .build();
        assert!(matches!(result, Err(MultiSearchError::InvalidQuery { .. })));
    }

    #[test]
    fn test_window_limit() {
        let descriptor = QueryDescriptor::builder(Query::MatchAll)
            .first_result(90)
            .count(20)
            .build()
            .unwrap();

        assert!(descriptor.validate(110).is_ok());
        assert!(descriptor.validate(100).is_err());
    }

    #[test]
    fn test_widening_for_shards() {
        let descriptor = QueryDescriptor::builder(Query::term("title", "search"))
            .first_result(20)
            .count(10)
            .group_by(GroupSpec::Field("site".into()))
            .group_size(3)
            .sort(Sort::by_field("year", SortOrder::Descending))
            .build()
            .unwrap();

        let widened = descriptor.widened_for_shards();
        assert_eq!(widened.first_result(), 0);
        assert_eq!(widened.count(), 30);
        assert_eq!(widened.group_size(), 3);
        assert_eq!(widened.group_spec(), descriptor.group_spec());
        assert_eq!(widened.sort(), descriptor.sort());
        assert_eq!(widened.query(), descriptor.query());
    }

    #[test]
    fn test_probe_drops_sort_and_page() {
        let descriptor = QueryDescriptor::builder(Query::MatchAll)
            .first_result(5)
            .count(10)
            .sort(Sort::by_field("year", SortOrder::Ascending))
            .build()
            .unwrap();

        let probe = descriptor.probe(Query::term("title", "hound"), 1);
        assert_eq!(probe.first_result(), 0);
        assert_eq!(probe.count(), 1);
        assert_eq!(probe.sort(), &Sort::relevance());
        assert_eq!(probe.query(), &Query::term("title", "hound"));
    }
}
