//! Pipeline assembly
//!
//! [`create_pipeline`] picks the cross-partition source stage from the query plan and
//! stacks a [`DistinctStage`] on top when the plan asks for DISTINCT. Continuation
//! tokens are routed to the layer that produced them.

use crate::config::CrossPartitionConfig;
use crate::orderby::OrderByCrossPartitionStage;
use crate::parallel::ParallelCrossPartitionStage;
use query_core::{
    CancellationToken, DistinctQueryType, DocumentContainer, OrderByColumn, PartitionKeyRange,
    QueryPage, QueryPipelineStage, QueryPlan, Result, RoutingMapProvider,
};
use query_distinct::DistinctStage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for a query execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(pub Uuid);

impl QueryId {
    /// Create a new random query ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query-{}", &self.0.to_string()[..8])
    }
}

async fn create_source(
    container: Arc<dyn DocumentContainer>,
    routing: Arc<dyn RoutingMapProvider>,
    order_by: Vec<OrderByColumn>,
    ranges: Vec<PartitionKeyRange>,
    continuation: Option<String>,
    config: CrossPartitionConfig,
) -> Result<Box<dyn QueryPipelineStage>> {
    if order_by.is_empty() {
        let stage = ParallelCrossPartitionStage::try_create(
            container,
            routing,
            ranges,
            continuation.as_deref(),
            config,
        )
        .await?;
        return Ok(Box::new(stage));
    }
    let stage = OrderByCrossPartitionStage::try_create(
        container,
        routing,
        order_by,
        ranges,
        continuation.as_deref(),
        config,
    )
    .await?;
    Ok(Box::new(stage))
}

/// Build the stage stack for `plan` over `ranges`, resuming from `continuation`
pub async fn create_pipeline(
    container: Arc<dyn DocumentContainer>,
    routing: Arc<dyn RoutingMapProvider>,
    plan: &QueryPlan,
    ranges: Vec<PartitionKeyRange>,
    continuation: Option<&str>,
    config: CrossPartitionConfig,
) -> Result<Box<dyn QueryPipelineStage>> {
    plan.validate()?;
    let order_by = plan.order_by.clone();

    if plan.distinct == DistinctQueryType::None {
        return create_source(
            container,
            routing,
            order_by,
            ranges,
            continuation.map(str::to_string),
            config,
        )
        .await;
    }

    let flavor = config.distinct_flavor;
    let stage = DistinctStage::try_create(plan.distinct, flavor, continuation, move |token| {
        create_source(container, routing, order_by, ranges, token, config)
    })
    .await?;
    Ok(Box::new(stage))
}

/// A running cross-partition query
pub struct CrossPartitionQuery {
    id: QueryId,
    stage: Box<dyn QueryPipelineStage>,
    config: CrossPartitionConfig,
    pages: usize,
    total_charge: f64,
}

impl CrossPartitionQuery {
    /// Start or resume a query
    pub async fn create(
        container: Arc<dyn DocumentContainer>,
        routing: Arc<dyn RoutingMapProvider>,
        plan: &QueryPlan,
        ranges: Vec<PartitionKeyRange>,
        continuation: Option<&str>,
        config: CrossPartitionConfig,
    ) -> Result<Self> {
        let id = QueryId::new();
        let stage = create_pipeline(
            container,
            routing,
            plan,
            ranges,
            continuation,
            config.clone(),
        )
        .await?;
        tracing::info!(
            "Query {} created (order by {} columns, distinct {:?}, resumed: {})",
            id,
            plan.order_by.len(),
            plan.distinct,
            continuation.is_some()
        );
        Ok(Self {
            id,
            stage,
            config,
            pages: 0,
            total_charge: 0.0,
        })
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    /// Drain the next page of at most `max_item_count` documents
    pub async fn next_page(&mut self, cancellation: &CancellationToken) -> Result<QueryPage> {
        let page = self
            .stage
            .drain(self.config.max_item_count, cancellation)
            .await?;
        self.pages += 1;
        self.total_charge += page.request_charge;
        tracing::debug!(
            "Query {} page {}: {} documents (charge {:.2})",
            self.id,
            self.pages,
            page.len(),
            page.request_charge
        );
        if self.stage.is_done() {
            tracing::info!(
                "Query {} completed after {} pages (total charge {:.2})",
                self.id,
                self.pages,
                self.total_charge
            );
        }
        Ok(page)
    }

    pub fn continuation_token(&self) -> Result<Option<String>> {
        self.stage.continuation_token()
    }

    pub fn is_done(&self) -> bool {
        self.stage.is_done()
    }

    pub fn total_charge(&self) -> f64 {
        self.total_charge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use query_core::{QueryError, Value};
    use query_distinct::DistinctFlavor;
    use query_storage::InMemoryContainer;
    use serde_json::json;

    fn container(order_by: Vec<OrderByColumn>) -> Arc<InMemoryContainer> {
        let container = InMemoryContainer::with_partitions(3).with_order_by(order_by);
        for (epk, k) in [("10", 1), ("11", 2), ("60", 2), ("61", 3), ("B0", 1), ("B1", 3)] {
            container.insert(epk, Value::from(json!(k)));
        }
        Arc::new(container)
    }

    async fn start_query(
        container: &Arc<InMemoryContainer>,
        plan: &QueryPlan,
        continuation: Option<&str>,
        config: CrossPartitionConfig,
    ) -> Result<CrossPartitionQuery> {
        CrossPartitionQuery::create(
            container.clone(),
            container.clone(),
            plan,
            container.ranges(),
            continuation,
            config,
        )
        .await
    }

    #[tokio::test]
    async fn test_ordered_distinct_resumes_page_by_page() {
        let order_by = vec![OrderByColumn::asc("c")];
        let container = container(order_by.clone());
        let plan = QueryPlan::order_by(order_by).with_distinct(DistinctQueryType::Ordered);
        let config = CrossPartitionConfig::new().with_page_size(1).with_max_item_count(2);
        let cancel = CancellationToken::new();

        let mut token: Option<String> = None;
        let mut values = Vec::new();
        loop {
            let mut query = start_query(&container, &plan, token.as_deref(), config.clone())
                .await
                .unwrap();
            let page = query.next_page(&cancel).await.unwrap();
            values.extend(page.documents.iter().filter_map(Value::as_i64));
            match page.continuation {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unordered_distinct_over_parallel_source() {
        let container = container(Vec::new());
        let plan = QueryPlan::parallel().with_distinct(DistinctQueryType::Unordered);
        let cancel = CancellationToken::new();

        let mut query = start_query(&container, &plan, None, CrossPartitionConfig::new())
            .await
            .unwrap();
        let mut values = Vec::new();
        while !query.is_done() {
            let page = query.next_page(&cancel).await.unwrap();
            assert!(matches!(
                page.continuation_token(),
                Err(QueryError::ContinuationNotSupported(_))
            ));
            values.extend(page.documents.iter().filter_map(Value::as_i64));
        }
        values.sort();
        assert_eq!(values, vec![1, 2, 3]);
        assert!(query.total_charge() > 0.0);
    }

    #[tokio::test]
    async fn test_compute_flavor_resumes_unordered_distinct() {
        let container = container(Vec::new());
        let plan = QueryPlan::parallel().with_distinct(DistinctQueryType::Unordered);
        let config = CrossPartitionConfig::new().with_distinct_flavor(DistinctFlavor::Compute);
        let cancel = CancellationToken::new();

        let mut first = start_query(&container, &plan, None, config.clone()).await.unwrap();
        let page = first.next_page(&cancel).await.unwrap();
        let mut values: Vec<i64> = page.documents.iter().filter_map(Value::as_i64).collect();
        let token = page.continuation.unwrap();

        let mut resumed = start_query(&container, &plan, Some(&token), config).await.unwrap();
        while !resumed.is_done() {
            let page = resumed.next_page(&cancel).await.unwrap();
            values.extend(page.documents.iter().filter_map(Value::as_i64));
        }
        values.sort();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_ordered_distinct_without_order_by_is_rejected() {
        let container = container(Vec::new());
        let plan = QueryPlan::parallel().with_distinct(DistinctQueryType::Ordered);
        let err = start_query(&container, &plan, None, CrossPartitionConfig::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, QueryError::InvalidPlan(_)));
    }
}
