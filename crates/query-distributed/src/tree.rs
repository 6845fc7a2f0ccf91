//! Item producer trees
//!
//! A tree stands for one partition range of the query. It starts with a single
//! [`ItemProducer`] and grows one producer per child range when the backend reports the
//! range as split, so the merge never notices topology changes.

use crate::producer::{FetchStats, ItemProducer, QueryRow};
use query_core::{
    compare_sort_keys, CancellationToken, DocumentContainer, OrderByColumn, PartitionKeyRange,
    QueryError, Result, RoutingMapProvider, RowId, SortOrder, Value,
};
use std::cmp::Ordering;
use std::sync::Arc;

/// Where a reopened range resumes: the first row at or past this marker that was not
/// already emitted
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePosition {
    pub key: Vec<Value>,
    pub rid: RowId,
    /// Rows equal to the marker still to be skipped
    pub remaining_skip: usize,
    /// Token the position came from, for diagnostics
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeekStep {
    Skip,
    Stop,
}

impl ResumePosition {
    fn step(&mut self, columns: &[OrderByColumn], row: &QueryRow) -> Result<SeekStep> {
        match compare_sort_keys(columns, &self.key, &row.sort_key) {
            Ordering::Less => return Ok(SeekStep::Stop),
            Ordering::Greater => return Ok(SeekStep::Skip),
            Ordering::Equal => {}
        }

        let rid = RowId::parse(&row.rid).ok_or_else(|| {
            QueryError::malformed_continuation(
                format!("row id {} of the resumed range cannot be parsed", row.rid),
                &self.token,
            )
        })?;
        if !self.rid.same_collection(&rid) {
            return Err(QueryError::malformed_continuation(
                format!(
                    "row id {} belongs to a different collection than {}",
                    rid, self.rid
                ),
                &self.token,
            ));
        }

        // row ids tie-break in the direction of the first sort column
        let order = columns
            .first()
            .map(|column| column.order)
            .unwrap_or(SortOrder::Ascending);
        match order.apply(self.rid.document.cmp(&rid.document)) {
            Ordering::Less => Ok(SeekStep::Stop),
            Ordering::Greater => Ok(SeekStep::Skip),
            Ordering::Equal if self.remaining_skip > 0 => {
                self.remaining_skip -= 1;
                Ok(SeekStep::Skip)
            }
            Ordering::Equal => Ok(SeekStep::Stop),
        }
    }
}

/// One or more producers over a (possibly split) partition range
#[derive(Debug, Clone)]
pub struct ItemProducerTree {
    producers: Vec<ItemProducer>,
    columns: Arc<[OrderByColumn]>,
    resume: Option<ResumePosition>,
}

impl ItemProducerTree {
    pub fn new(producer: ItemProducer, columns: Arc<[OrderByColumn]>) -> Self {
        Self {
            producers: vec![producer],
            columns,
            resume: None,
        }
    }

    /// Walk forward to `position` once the first page arrives
    pub fn with_resume(mut self, position: ResumePosition) -> Self {
        self.resume = Some(position);
        self
    }

    pub fn producers(&self) -> &[ItemProducer] {
        &self.producers
    }

    pub fn resume_position(&self) -> Option<&ResumePosition> {
        self.resume.as_ref()
    }

    /// Range of the producer holding the current item, else of the first producer
    pub fn range(&self) -> Option<&PartitionKeyRange> {
        self.current_producer()
            .or_else(|| self.producers.first())
            .map(ItemProducer::range)
    }

    fn current_index(&self) -> Option<usize> {
        let mut best: Option<(usize, &QueryRow)> = None;
        for (index, producer) in self.producers.iter().enumerate() {
            let Some(row) = producer.current() else {
                continue;
            };
            let better = match best {
                None => true,
                Some((best_index, best_row)) => {
                    compare_sort_keys(&self.columns, &row.sort_key, &best_row.sort_key)
                        .then_with(|| {
                            producer
                                .range()
                                .cmp_by_min(self.producers[best_index].range())
                        })
                        == Ordering::Less
                }
            };
            if better {
                best = Some((index, row));
            }
        }
        best.map(|(index, _)| index)
    }

    pub fn current_producer(&self) -> Option<&ItemProducer> {
        self.current_index().map(|index| &self.producers[index])
    }

    /// Smallest head item across the tree's producers
    pub fn current(&self) -> Option<&QueryRow> {
        self.current_producer().and_then(ItemProducer::current)
    }

    /// Some producer must fetch before the tree's current item is known
    pub fn needs_fetch(&self) -> bool {
        self.producers.iter().any(ItemProducer::needs_fetch)
    }

    pub fn is_exhausted(&self) -> bool {
        self.producers.iter().all(ItemProducer::is_exhausted)
    }

    /// Advance past the current item; false when a fetch is needed or nothing is left
    pub fn move_next(&mut self) -> bool {
        if let Some(index) = self.current_index() {
            self.producers[index].move_next_in_page();
        }
        !self.needs_fetch() && self.current().is_some()
    }

    /// Take the rest of the current producer's page in one step
    pub fn take_page_remainder(&mut self) -> Vec<QueryRow> {
        match self.current_index() {
            Some(index) => self.producers[index].take_page_remainder(),
            None => Vec::new(),
        }
    }

    /// Fetch a page for every producer that needs one.
    ///
    /// A producer whose range is gone is replaced by one producer per current range
    /// overlapping it, each resuming from the parent's token. Exhausted producers are
    /// dropped afterwards.
    pub async fn fetch_pending(
        &mut self,
        container: &dyn DocumentContainer,
        routing: &dyn RoutingMapProvider,
        cancellation: &CancellationToken,
    ) -> Result<FetchStats> {
        let mut stats = FetchStats::default();
        let mut index = 0;
        while index < self.producers.len() {
            if !self.producers[index].needs_fetch() {
                index += 1;
                continue;
            }
            match self.producers[index]
                .fetch_next_page(container, cancellation)
                .await
            {
                Ok(fetched) => {
                    stats.merge(fetched);
                    index += 1;
                }
                Err(QueryError::PartitionGone { range_id }) => {
                    let parent = self.producers[index].range().clone();
                    tracing::warn!("range {} is gone, resolving its replacements", parent);
                    let current = routing.overlapping_ranges(&parent).await?;
                    let children = self.producers[index].split(&current)?;
                    if children.len() == 1 && children[0].range() == &parent {
                        return Err(QueryError::ExecutionError(format!(
                            "range {} reported gone but is still current",
                            range_id
                        )));
                    }
                    tracing::info!(
                        "range {} continues as {} ranges",
                        parent,
                        children.len()
                    );
                    self.producers.splice(index..=index, children);
                }
                Err(err) => return Err(err),
            }
        }
        self.producers.retain(|producer| !producer.is_exhausted());
        Ok(stats)
    }

    /// Fetch, then walk every producer forward past the resume position, if any.
    ///
    /// On failure the position is kept so the next call continues the walk.
    pub async fn fetch_and_seek(
        &mut self,
        container: &dyn DocumentContainer,
        routing: &dyn RoutingMapProvider,
        cancellation: &CancellationToken,
    ) -> Result<FetchStats> {
        let Some(mut position) = self.resume.take() else {
            return self.fetch_pending(container, routing, cancellation).await;
        };
        let result = self
            .walk_forward(&mut position, container, routing, cancellation)
            .await;
        if result.is_err() {
            self.resume = Some(position);
        }
        result
    }

    async fn walk_forward(
        &mut self,
        position: &mut ResumePosition,
        container: &dyn DocumentContainer,
        routing: &dyn RoutingMapProvider,
        cancellation: &CancellationToken,
    ) -> Result<FetchStats> {
        let mut stats = FetchStats::default();
        let mut skipped = 0usize;
        loop {
            stats.merge(self.fetch_pending(container, routing, cancellation).await?);
            for producer in &mut self.producers {
                while let Some(row) = producer.current() {
                    match position.step(&self.columns, row)? {
                        SeekStep::Stop => break,
                        SeekStep::Skip => {
                            producer.move_next_in_page();
                            skipped += 1;
                        }
                    }
                }
            }
            if !self.needs_fetch() {
                break;
            }
        }
        self.producers.retain(|producer| !producer.is_exhausted());
        tracing::debug!(
            "resumed tree at {:?} after skipping {} rows",
            self.range().map(ToString::to_string),
            skipped
        );
        Ok(stats)
    }
}

impl PartialEq for ItemProducerTree {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ItemProducerTree {}

impl PartialOrd for ItemProducerTree {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ItemProducerTree {
    /// Priority order for a max-heap: the tree whose current item sorts first (sort key
    /// per column direction, then leftmost range) is the greatest
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.current_producer(), other.current_producer()) {
            (Some(left), Some(right)) => {
                let (Some(left_row), Some(right_row)) = (left.current(), right.current()) else {
                    return Ordering::Equal;
                };
                compare_sort_keys(&self.columns, &left_row.sort_key, &right_row.sort_key)
                    .then_with(|| left.range().cmp_by_min(right.range()))
                    .reverse()
            }
            // trees without a current item drain last
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }
    }
}
