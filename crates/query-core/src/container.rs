//! Backend collaborator contracts
//!
//! The pipeline never talks to the network itself. Pages come from a
//! [`DocumentContainer`] and partition topology from a [`RoutingMapProvider`].

use crate::error::Result;
use crate::filter::RangeFilter;
use crate::types::{ActivityId, PartitionKeyRange};
use crate::value::Value;
use async_trait::async_trait;

/// Request for one backend page of a partition range
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub range: PartitionKeyRange,
    /// Backend continuation; `None` starts from the beginning
    pub continuation: Option<String>,
    /// Page size hint
    pub page_size: usize,
    /// Resume filter substituted into the query, if any
    pub filter: Option<RangeFilter>,
}

/// One backend page
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub documents: Vec<Value>,
    /// `None` when the range has no more pages
    pub continuation: Option<String>,
    pub request_charge: f64,
    pub activity_id: ActivityId,
}

/// Executes the (already rewritten) query against a single partition range
#[async_trait]
pub trait DocumentContainer: Send + Sync {
    /// Fetch the next page for a range.
    ///
    /// Fails with [`QueryError::PartitionGone`](crate::QueryError::PartitionGone) when
    /// the range no longer exists because it was split.
    async fn fetch_page(&self, request: FetchRequest) -> Result<FetchResponse>;
}

/// Resolves partition topology
#[async_trait]
pub trait RoutingMapProvider: Send + Sync {
    /// Current ranges overlapping a (possibly historical) range, ordered by minimum boundary
    async fn overlapping_ranges(&self, range: &PartitionKeyRange)
        -> Result<Vec<PartitionKeyRange>>;
}
