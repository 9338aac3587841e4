//! Cross-shard merge of grouped results
//!
//! [`ResultAggregator`] turns the results of the surviving shards into one page:
//!
//! 1. Normalise every shard list: apply the grouping spec, coalesce groups that
//!    share a key within the shard, and restore the sort order if the shard broke it
//! 2. K-way merge the shard lists with a min-heap over their head groups, stopping
//!    as soon as `first_result + count` groups were produced
//! 3. Truncate every group to `group_size` documents
//! 4. Skip `first_result` groups and keep `count`
//!
//! Ties under the sort chain break by shard index, then by position within the
//! shard list, so the same inputs always produce the same page.
//!
//! Groups with the same key coming from different shards are not reconciled: each
//! shard contributes its own group.

use crate::query::{GroupSpec, QueryDescriptor};
use crate::results::{Group, ShardResult};
use crate::sort::Sort;
use rustc_hash::FxHashMap;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use tracing::debug;

/// Merged groups plus the combined estimate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedPage {
    pub groups: Vec<Group>,
    pub estimated_total_groups: u64,
}

/// Head group of one shard list waiting in the merge heap
struct HeadEntry<'a> {
    sort: &'a Sort,
    group: Group,
    shard: usize,
    position: usize,
}

impl PartialEq for HeadEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeadEntry<'_> {}

impl PartialOrd for HeadEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeadEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort
            .compare_groups(&self.group, &other.group)
            .then(self.shard.cmp(&other.shard))
            .then(self.position.cmp(&other.position))
    }
}

/// Merges shard results into the requested page
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Merge the results of the surviving shards, in shard order
    pub fn merge(&self, query: &QueryDescriptor, shard_results: Vec<ShardResult>) -> MergedPage {
        if shard_results.is_empty() {
            return MergedPage::default();
        }

        let estimated_total_groups = shard_results
            .iter()
            .fold(0u64, |total, r| total.saturating_add(r.estimated_total_groups));

        let sort = query.sort();
        let lists: Vec<Vec<Group>> = shard_results
            .into_iter()
            .map(|result| normalise(result.groups, query.group_spec(), sort))
            .collect();

        let window = query.window();
        let mut merged = k_way_merge(lists, sort, window);

        for group in &mut merged {
            group.documents.truncate(query.group_size());
        }

        let groups: Vec<Group> = merged.into_iter().skip(query.first_result()).take(query.count()).collect();
        debug!(
            "Merged page of {} group(s) from window {} with estimate {}",
            groups.len(),
            window,
            estimated_total_groups
        );

        MergedPage {
            groups,
            estimated_total_groups,
        }
    }
}

/// Bring one shard list into merge shape
fn normalise(groups: Vec<Group>, spec: &GroupSpec, sort: &Sort) -> Vec<Group> {
    let mut groups = match spec {
        GroupSpec::None => groups
            .into_iter()
            .flat_map(|group| group.documents)
            .map(Group::singleton)
            .collect(),
        GroupSpec::Field(_) => coalesce(groups, spec, sort),
    };

    if !groups.is_sorted_by(|a, b| sort.compare_groups(a, b).is_le()) {
        groups.sort_by(|a, b| sort.compare_groups(a, b));
    }

    groups
}

/// Fold groups sharing a key into the first one, keeping its position
fn coalesce(groups: Vec<Group>, spec: &GroupSpec, sort: &Sort) -> Vec<Group> {
    let mut positions: FxHashMap<String, usize> = FxHashMap::default();
    let mut coalesced: Vec<Group> = Vec::with_capacity(groups.len());

    for group in groups {
        let key = group
            .key
            .clone()
            .or_else(|| group.head().and_then(|head| spec.key_for(head)))
            .unwrap_or_default();

        match positions.get(&key) {
            Some(&index) => coalesced[index].documents.extend(group.documents),
            None => {
                positions.insert(key.clone(), coalesced.len());
                coalesced.push(Group::new(Some(key), group.documents));
            }
        }
    }

    for group in &mut coalesced {
        if !group
            .documents
            .is_sorted_by(|a, b| sort.compare_documents(a, b).is_le())
        {
            group.documents.sort_by(|a, b| sort.compare_documents(a, b));
        }
    }

    coalesced
}

/// Merge sorted lists into at most `limit` groups
fn k_way_merge(lists: Vec<Vec<Group>>, sort: &Sort, limit: usize) -> Vec<Group> {
    let total: usize = lists.iter().map(Vec::len).sum();
    let mut merged = Vec::with_capacity(total.min(limit));
    if limit == 0 {
        return merged;
    }

    let mut iters: Vec<_> = lists.into_iter().map(Vec::into_iter).collect();
    let mut heap = BinaryHeap::with_capacity(iters.len());

    for (shard, iter) in iters.iter_mut().enumerate() {
        if let Some(group) = iter.next() {
            heap.push(Reverse(HeadEntry {
                sort,
                group,
                shard,
                position: 0,
            }));
        }
    }

    while let Some(Reverse(entry)) = heap.pop() {
        let HeadEntry {
            group, shard, position, ..
        } = entry;
        merged.push(group);

        if merged.len() >= limit {
            break;
        }

        if let Some(next) = iters[shard].next() {
            heap.push(Reverse(HeadEntry {
                sort,
                group: next,
                shard,
                position: position + 1,
            }));
        }
    }

    merged
}
