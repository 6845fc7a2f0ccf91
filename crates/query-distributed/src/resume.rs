//! Rebuilding producer trees from an ORDER BY continuation token
//!
//! The entry with the smallest `(sort key, range minimum)` marker is the resume target.
//! Ranges entirely left of the target were drained past its key, so they reopen with a
//! strict filter; the target and everything right of it reopen at or after the key.
//! Each reopened range then walks forward from its own entry's marker.

use crate::config::CrossPartitionConfig;
use crate::continuation::OrderByContinuationToken;
use crate::producer::{ItemProducer, RowFormat};
use crate::tree::{ItemProducerTree, ResumePosition};
use query_core::{
    compare_sort_keys, OrderByColumn, PartitionKeyRange, QueryError, RangeFilter, Result,
    RoutingMapProvider, RowId,
};
use std::cmp::Ordering;
use std::sync::Arc;

/// Which side of the resume target a reopened range lies on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterGroup {
    Left,
    Target,
    Right,
}

impl FilterGroup {
    pub fn classify(range: &PartitionKeyRange, target: &PartitionKeyRange) -> Self {
        if range.max_exclusive.as_str() <= target.min_inclusive.as_str() {
            FilterGroup::Left
        } else if range.overlaps(target) {
            FilterGroup::Target
        } else {
            FilterGroup::Right
        }
    }

    pub fn filter(self, columns: &[OrderByColumn], key: &[query_core::Value]) -> RangeFilter {
        match self {
            FilterGroup::Left => RangeFilter::after(columns, key),
            FilterGroup::Target | FilterGroup::Right => RangeFilter::at_or_after(columns, key),
        }
    }
}

/// Index of the entry the query resumes at
pub fn resume_target(
    entries: &[OrderByContinuationToken],
    columns: &[OrderByColumn],
) -> Option<usize> {
    let keys: Vec<_> = entries.iter().map(OrderByContinuationToken::sort_key).collect();
    (0..entries.len()).min_by(|&a, &b| {
        compare_sort_keys(columns, &keys[a], &keys[b])
            .then_with(|| entries[a].range().cmp_by_min(entries[b].range()))
    })
}

/// Producer trees for every current range overlapping an entry, in range order
pub async fn reopen(
    entries: &[OrderByContinuationToken],
    raw_token: &str,
    columns: Arc<[OrderByColumn]>,
    routing: &dyn RoutingMapProvider,
    config: &CrossPartitionConfig,
) -> Result<Vec<ItemProducerTree>> {
    let Some(target_index) = resume_target(entries, &columns) else {
        return Err(QueryError::malformed_continuation(
            "continuation token has no entries",
            raw_token,
        ));
    };
    let target = &entries[target_index];
    let target_key = target.sort_key();

    let mut trees = Vec::new();
    let mut groups = [0usize; 3];
    for entry in entries {
        let rid = RowId::parse(entry.rid()).ok_or_else(|| {
            QueryError::malformed_continuation(
                format!("invalid row id {}", entry.rid()),
                raw_token,
            )
        })?;
        let position = ResumePosition {
            key: entry.sort_key(),
            rid,
            remaining_skip: entry.skip_count(),
            token: raw_token.to_string(),
        };

        for current in routing.overlapping_ranges(entry.range()).await? {
            let Some(child) = entry.range().intersection(&current) else {
                continue;
            };
            let group = FilterGroup::classify(&child, target.range());
            groups[group as usize] += 1;
            let producer = ItemProducer::new(
                child,
                entry.backend_token().map(str::to_string),
                Some(group.filter(&columns, &target_key)),
                RowFormat::OrderBy {
                    columns: columns.len(),
                },
                config.page_size,
            );
            trees.push(
                ItemProducerTree::new(producer, Arc::clone(&columns)).with_resume(position.clone()),
            );
        }
    }

    trees.sort_by(|a, b| match (a.range(), b.range()) {
        (Some(a), Some(b)) => a.cmp_by_min(b),
        _ => Ordering::Equal,
    });
    let overlapping = trees.windows(2).any(|pair| match (pair[0].range(), pair[1].range()) {
        (Some(a), Some(b)) => a.overlaps(b),
        _ => false,
    });
    if overlapping {
        return Err(QueryError::malformed_continuation(
            "continuation token entries overlap",
            raw_token,
        ));
    }

    tracing::info!(
        "resuming at {} with {} left, {} target and {} right ranges",
        target.range(),
        groups[FilterGroup::Left as usize],
        groups[FilterGroup::Target as usize],
        groups[FilterGroup::Right as usize]
    );
    Ok(trees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::CompositeContinuationToken;
    use query_core::Value;

    fn entry(min: &str, max: &str, key: i64) -> OrderByContinuationToken {
        OrderByContinuationToken::new(
            CompositeContinuationToken::new(None, &PartitionKeyRange::new("", min, max)),
            vec![Value::from(key)],
            RowId::new(1, 1, 1).encode(),
            0,
            None,
        )
    }

    #[test]
    fn test_target_is_smallest_key_then_leftmost() {
        let columns = vec![OrderByColumn::asc("c.k")];
        let entries = vec![entry("80", "FF", 4), entry("40", "80", 4), entry("", "40", 7)];
        assert_eq!(resume_target(&entries, &columns), Some(1));

        let columns = vec![OrderByColumn::desc("c.k")];
        assert_eq!(resume_target(&entries, &columns), Some(2));
    }

    #[test]
    fn test_filter_groups() {
        let target = PartitionKeyRange::new("", "40", "80");
        assert_eq!(
            FilterGroup::classify(&PartitionKeyRange::new("", "", "40"), &target),
            FilterGroup::Left
        );
        assert_eq!(
            FilterGroup::classify(&PartitionKeyRange::new("", "60", "80"), &target),
            FilterGroup::Target
        );
        assert_eq!(
            FilterGroup::classify(&PartitionKeyRange::new("", "80", "FF"), &target),
            FilterGroup::Right
        );

        let columns = vec![OrderByColumn::asc("c.k")];
        let key = vec![Value::from(4i64)];
        assert!(!FilterGroup::Left.filter(&columns, &key).is_inclusive());
        assert!(FilterGroup::Right.filter(&columns, &key).is_inclusive());
    }
}
