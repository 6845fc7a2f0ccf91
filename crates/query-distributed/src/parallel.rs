//! Cross-partition stage for queries without ORDER BY
//!
//! Ranges are drained left to right, one backend page per drain.

use crate::config::CrossPartitionConfig;
use crate::continuation::{CompositeContinuationToken, ParallelContinuationToken};
use crate::producer::{FetchStats, ItemProducer, RowFormat};
use crate::tree::ItemProducerTree;
use async_trait::async_trait;
use query_core::{
    CancellationToken, DocumentContainer, OrderByColumn, PartitionKeyRange, QueryPage,
    QueryPipelineStage, Result, RoutingMapProvider,
};
use std::collections::VecDeque;
use std::sync::Arc;

/// Returns whole backend pages, leftmost range first
pub struct ParallelCrossPartitionStage {
    container: Arc<dyn DocumentContainer>,
    routing: Arc<dyn RoutingMapProvider>,
    trees: VecDeque<ItemProducerTree>,
}

impl ParallelCrossPartitionStage {
    pub async fn try_create(
        container: Arc<dyn DocumentContainer>,
        routing: Arc<dyn RoutingMapProvider>,
        ranges: Vec<PartitionKeyRange>,
        continuation: Option<&str>,
        config: CrossPartitionConfig,
    ) -> Result<Self> {
        let no_columns: Arc<[OrderByColumn]> = Arc::from(Vec::new());
        let tree = |range: PartitionKeyRange, token: Option<String>| {
            let producer =
                ItemProducer::new(range, token, None, RowFormat::Document, config.page_size);
            ItemProducerTree::new(producer, Arc::clone(&no_columns))
        };

        let mut trees = Vec::new();
        match continuation {
            None => trees.extend(ranges.into_iter().map(|range| tree(range, None))),
            Some(text) => {
                let token = ParallelContinuationToken::decode(text)?;
                for entry in token.ranges() {
                    for current in routing.overlapping_ranges(&entry.range).await? {
                        if let Some(child) = entry.range.intersection(&current) {
                            trees.push(tree(child, entry.token.clone()));
                        }
                    }
                }
            }
        }
        trees.sort_by(|a, b| match (a.range(), b.range()) {
            (Some(a), Some(b)) => a.cmp_by_min(b),
            _ => std::cmp::Ordering::Equal,
        });
        tracing::debug!("parallel stage over {} ranges", trees.len());

        Ok(Self {
            container,
            routing,
            trees: trees.into(),
        })
    }
}

#[async_trait]
impl QueryPipelineStage for ParallelCrossPartitionStage {
    async fn drain(
        &mut self,
        _max_elements: usize,
        cancellation: &CancellationToken,
    ) -> Result<QueryPage> {
        cancellation.check()?;
        let mut stats = FetchStats::default();
        let mut documents = Vec::new();
        while let Some(tree) = self.trees.front_mut() {
            if tree.needs_fetch() {
                stats.merge(
                    tree.fetch_pending(self.container.as_ref(), self.routing.as_ref(), cancellation)
                        .await?,
                );
            }
            if tree.is_exhausted() {
                self.trees.pop_front();
                continue;
            }
            documents = tree
                .take_page_remainder()
                .into_iter()
                .map(|row| row.payload)
                .collect();
            break;
        }

        Ok(QueryPage::new(
            documents,
            self.continuation_token()?,
            stats.request_charge,
            stats.activity_id.unwrap_or_default(),
        ))
    }

    fn continuation_token(&self) -> Result<Option<String>> {
        let ranges: Vec<_> = self
            .trees
            .iter()
            .flat_map(|tree| tree.producers())
            .filter(|producer| !producer.is_exhausted())
            .map(|producer| {
                let token = if producer.has_current() {
                    producer.page_token()
                } else {
                    producer.next_token()
                };
                CompositeContinuationToken::new(token.map(str::to_string), producer.range())
            })
            .collect();
        if ranges.is_empty() {
            return Ok(None);
        }
        ParallelContinuationToken::new(ranges).encode().map(Some)
    }

    fn is_done(&self) -> bool {
        self.trees.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use query_core::Value;
    use query_storage::InMemoryContainer;
    use serde_json::json;

    fn ids(page: &QueryPage) -> Vec<i64> {
        page.documents
            .iter()
            .filter_map(|doc| doc.get("id").and_then(Value::as_i64))
            .collect()
    }

    #[tokio::test]
    async fn test_drains_ranges_left_to_right_and_resumes() {
        let container = Arc::new(InMemoryContainer::with_partitions(2));
        for (epk, id) in [("90", 4), ("10", 1), ("20", 2), ("30", 3), ("A0", 5)] {
            container.insert(epk, Value::from(json!({"id": id})));
        }
        let config = CrossPartitionConfig::new().with_page_size(2);
        let cancel = CancellationToken::new();

        let mut stage = ParallelCrossPartitionStage::try_create(
            container.clone(),
            container.clone(),
            container.ranges(),
            None,
            config.clone(),
        )
        .await
        .unwrap();
        let first = stage.drain(10, &cancel).await.unwrap();
        assert_eq!(ids(&first), vec![1, 2]);
        assert!(first.documents[0].get("_rid").is_some());
        let token = first.continuation.clone().unwrap();

        let mut resumed = ParallelCrossPartitionStage::try_create(
            container.clone(),
            container.clone(),
            container.ranges(),
            Some(&token),
            config,
        )
        .await
        .unwrap();
        let mut rest = Vec::new();
        while !resumed.is_done() {
            rest.extend(ids(&resumed.drain(10, &cancel).await.unwrap()));
        }
        assert_eq!(rest, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_malformed_token() {
        let container = Arc::new(InMemoryContainer::single_partition());
        let err = ParallelCrossPartitionStage::try_create(
            container.clone(),
            container.clone(),
            container.ranges(),
            Some("{\"token\": 1}"),
            CrossPartitionConfig::new(),
        )
        .await
        .err()
        .unwrap();
        assert!(err.is_malformed_continuation());
    }
}
