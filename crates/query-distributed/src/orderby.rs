//! Cross-partition ORDER BY stage
//!
//! A k-way merge over one [`ItemProducerTree`] per partition range. Trees with a current
//! item live in a priority queue ordered by that item's sort key, ties going to the
//! leftmost range. Each drain pops the first tree, emits its head, advances it and
//! pushes it back.
//!
//! Trees waiting for a page live in `pending`. Before a drain starts they are fetched
//! concurrently; during a drain a tree that runs out of rows fetches inline, and if
//! that fetch fails the tree is parked in `pending` and the page ends early. A cancelled
//! drain rolls every tree back to where the drain started.

use crate::config::CrossPartitionConfig;
use crate::continuation::{CompositeContinuationToken, OrderByContinuationToken};
use crate::producer::{FetchStats, ItemProducer, RowFormat};
use crate::resume;
use crate::tree::ItemProducerTree;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use query_core::{
    CancellationToken, DocumentContainer, OrderByColumn, PartitionKeyRange, QueryError,
    QueryPage, QueryPipelineStage, Result, RoutingMapProvider,
};
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Merges per-range sorted streams into one globally sorted stream
pub struct OrderByCrossPartitionStage {
    container: Arc<dyn DocumentContainer>,
    routing: Arc<dyn RoutingMapProvider>,
    columns: Arc<[OrderByColumn]>,
    config: CrossPartitionConfig,
    queue: BinaryHeap<ItemProducerTree>,
    pending: Vec<ItemProducerTree>,
    initialized: bool,
    /// Token the stage was created from
    initial_token: Option<String>,
}

impl OrderByCrossPartitionStage {
    /// Create the stage over `ranges`, or resume it from `continuation`
    pub async fn try_create(
        container: Arc<dyn DocumentContainer>,
        routing: Arc<dyn RoutingMapProvider>,
        columns: Vec<OrderByColumn>,
        ranges: Vec<PartitionKeyRange>,
        continuation: Option<&str>,
        config: CrossPartitionConfig,
    ) -> Result<Self> {
        if columns.is_empty() {
            return Err(QueryError::InvalidPlan(
                "ORDER BY stage needs at least one sort column".to_string(),
            ));
        }
        let columns: Arc<[OrderByColumn]> = Arc::from(columns);

        let pending = match continuation {
            None => {
                let mut ranges = ranges;
                ranges.sort_by(|a, b| a.cmp_by_min(b));
                ranges
                    .into_iter()
                    .map(|range| {
                        let producer = ItemProducer::new(
                            range,
                            None,
                            None,
                            RowFormat::OrderBy {
                                columns: columns.len(),
                            },
                            config.page_size,
                        );
                        ItemProducerTree::new(producer, Arc::clone(&columns))
                    })
                    .collect()
            }
            Some(text) => {
                let entries = OrderByContinuationToken::decode(text, &columns)?;
                resume::reopen(&entries, text, Arc::clone(&columns), routing.as_ref(), &config)
                    .await?
            }
        };

        tracing::debug!(
            "ORDER BY stage over {} ranges ({})",
            pending.len(),
            columns
                .iter()
                .map(|column| format!("{} {}", column.expression, column.order))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            container,
            routing,
            columns,
            config,
            queue: BinaryHeap::new(),
            pending,
            initialized: false,
            initial_token: continuation.map(str::to_string),
        })
    }

    pub fn columns(&self) -> &[OrderByColumn] {
        &self.columns
    }

    /// Fetch every pending tree, up to `max_concurrency` at a time.
    ///
    /// Trees that fail stay pending; the first failure is returned.
    async fn fill_pending(&mut self, cancellation: &CancellationToken) -> Result<FetchStats> {
        let mut stats = FetchStats::default();
        if self.pending.is_empty() {
            return Ok(stats);
        }

        let fetches = std::mem::take(&mut self.pending).into_iter().map(|mut tree| {
            let container = Arc::clone(&self.container);
            let routing = Arc::clone(&self.routing);
            let cancellation = cancellation.clone();
            async move {
                let result = tree
                    .fetch_and_seek(container.as_ref(), routing.as_ref(), &cancellation)
                    .await;
                (tree, result)
            }
        });
        let results: Vec<_> = stream::iter(fetches)
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await;

        let mut first_error = None;
        for (tree, result) in results {
            match result {
                Ok(fetched) => {
                    stats.merge(fetched);
                    if !tree.is_exhausted() {
                        self.queue.push(tree);
                    }
                }
                Err(err) => {
                    tracing::warn!("fetch for {:?} failed: {}", tree.range(), err);
                    self.pending.push(tree);
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(stats),
        }
    }

    fn entry_for(
        tree: &ItemProducerTree,
        producer: &ItemProducer,
    ) -> Result<OrderByContinuationToken> {
        let filter = producer.filter().map(ToString::to_string);
        if let Some(row) = producer.current() {
            return Ok(OrderByContinuationToken::new(
                CompositeContinuationToken::new(
                    producer.page_token().map(str::to_string),
                    producer.range(),
                ),
                row.sort_key.clone(),
                row.rid.clone(),
                producer.duplicates_before_current(),
                filter,
            ));
        }

        let composite = CompositeContinuationToken::new(
            producer.next_token().map(str::to_string),
            producer.range(),
        );
        if let Some(position) = tree.resume_position() {
            return Ok(OrderByContinuationToken::new(
                composite,
                position.key.clone(),
                position.rid.encode(),
                position.remaining_skip,
                filter,
            ));
        }
        match producer.last_row() {
            Some((rid, key)) => Ok(OrderByContinuationToken::new(
                composite,
                key.clone(),
                rid.clone(),
                0,
                filter,
            )),
            None => Err(QueryError::ExecutionError(format!(
                "range {} has no position to resume from",
                producer.range()
            ))),
        }
    }
}

#[async_trait]
impl QueryPipelineStage for OrderByCrossPartitionStage {
    async fn drain(
        &mut self,
        max_elements: usize,
        cancellation: &CancellationToken,
    ) -> Result<QueryPage> {
        cancellation.check()?;
        let mut stats = self.fill_pending(cancellation).await?;
        if !self.initialized {
            self.initialized = true;
            tracing::info!("ORDER BY stage initialized with {} ranges", self.queue.len());
        }

        // a cancelled drain leaves every producer where it was
        let snapshot = (self.queue.clone(), self.pending.clone());

        let max_elements = max_elements.max(1);
        let mut documents = Vec::with_capacity(max_elements.min(self.config.max_item_count));
        while documents.len() < max_elements {
            if let Err(err) = cancellation.check() {
                (self.queue, self.pending) = snapshot;
                return Err(err);
            }
            let Some(mut tree) = self.queue.pop() else {
                break;
            };
            let Some(row) = tree.current() else {
                continue;
            };
            documents.push(row.payload.clone());

            if tree.move_next() {
                self.queue.push(tree);
                continue;
            }
            if tree.needs_fetch() {
                match tree
                    .fetch_pending(self.container.as_ref(), self.routing.as_ref(), cancellation)
                    .await
                {
                    Ok(fetched) => stats.merge(fetched),
                    Err(err) if err.is_cancelled() => {
                        (self.queue, self.pending) = snapshot;
                        return Err(err);
                    }
                    Err(err) => {
                        // the failure surfaces on the next drain
                        tracing::warn!(
                            "fetch for {:?} failed, ending page early: {}",
                            tree.range(),
                            err
                        );
                        self.pending.push(tree);
                        break;
                    }
                }
            }
            if !tree.is_exhausted() {
                self.queue.push(tree);
            }
        }

        let continuation = self.continuation_token()?;
        tracing::debug!(
            "ORDER BY drain returned {} documents from {} pages (charge {:.2})",
            documents.len(),
            stats.pages,
            stats.request_charge
        );
        Ok(QueryPage::new(
            documents,
            continuation,
            stats.request_charge,
            stats.activity_id.unwrap_or_default(),
        ))
    }

    fn continuation_token(&self) -> Result<Option<String>> {
        if !self.initialized {
            return Ok(self.initial_token.clone());
        }

        let mut entries = Vec::new();
        for tree in self.queue.iter().chain(self.pending.iter()) {
            for producer in tree.producers() {
                if producer.is_exhausted() {
                    continue;
                }
                entries.push(Self::entry_for(tree, producer)?);
            }
        }
        if entries.is_empty() {
            return Ok(None);
        }
        entries.sort_by(|a, b| a.range().cmp_by_min(b.range()));
        OrderByContinuationToken::encode(&entries).map(Some)
    }

    fn is_done(&self) -> bool {
        self.initialized && self.queue.is_empty() && self.pending.is_empty()
    }
}
