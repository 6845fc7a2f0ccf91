use crate::error::{QueryError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Direction of an ORDER BY column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    /// Apply this direction to an ascending comparison result
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    }

    pub fn is_descending(self) -> bool {
        self == SortOrder::Descending
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Ascending => write!(f, "ASC"),
            SortOrder::Descending => write!(f, "DESC"),
        }
    }
}

/// One ORDER BY column: the sort expression and its direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderByColumn {
    /// Expression text as it appears in the query, e.g. `c.name`
    pub expression: String,
    pub order: SortOrder,
}

impl OrderByColumn {
    pub fn new(expression: impl Into<String>, order: SortOrder) -> Self {
        Self {
            expression: expression.into(),
            order,
        }
    }

    pub fn asc(expression: impl Into<String>) -> Self {
        Self::new(expression, SortOrder::Ascending)
    }

    pub fn desc(expression: impl Into<String>) -> Self {
        Self::new(expression, SortOrder::Descending)
    }
}

/// Compare two sort-key tuples column by column, stopping at the first unequal column.
pub fn compare_sort_keys(
    columns: &[OrderByColumn],
    left: &[crate::Value],
    right: &[crate::Value],
) -> Ordering {
    for ((column, a), b) in columns.iter().zip(left.iter()).zip(right.iter()) {
        let ordering = column.order.apply(a.total_cmp(b));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// How DISTINCT is evaluated, as decided by the query planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistinctQueryType {
    /// No DISTINCT clause
    None,
    /// Results arrive sorted on the DISTINCT key; only consecutive duplicates occur
    Ordered,
    /// No ordering guarantee; every seen value must be remembered
    Unordered,
}

/// The part of a query plan the cross-partition pipeline consumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub order_by: Vec<OrderByColumn>,
    pub distinct: DistinctQueryType,
}

impl QueryPlan {
    pub fn new(order_by: Vec<OrderByColumn>, distinct: DistinctQueryType) -> Self {
        Self { order_by, distinct }
    }

    /// Plan for an ORDER BY query without DISTINCT
    pub fn order_by(columns: Vec<OrderByColumn>) -> Self {
        Self::new(columns, DistinctQueryType::None)
    }

    /// Plan with neither ORDER BY nor DISTINCT
    pub fn parallel() -> Self {
        Self::new(Vec::new(), DistinctQueryType::None)
    }

    pub fn with_distinct(mut self, distinct: DistinctQueryType) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn has_order_by(&self) -> bool {
        !self.order_by.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.distinct == DistinctQueryType::Ordered && self.order_by.is_empty() {
            return Err(QueryError::InvalidPlan(
                "ordered DISTINCT requires an ORDER BY clause".to_string(),
            ));
        }
        Ok(())
    }
}

/// A contiguous slice of the effective partition key space.
///
/// Boundaries are upper-case hex strings, so byte-wise string comparison gives the
/// key-space order; `""` is the minimum and `"FF"` the maximum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKeyRange {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "min")]
    pub min_inclusive: String,
    #[serde(rename = "max")]
    pub max_exclusive: String,
}

impl PartitionKeyRange {
    pub const MIN: &'static str = "";
    pub const MAX: &'static str = "FF";

    pub fn new(
        id: impl Into<String>,
        min_inclusive: impl Into<String>,
        max_exclusive: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            min_inclusive: min_inclusive.into(),
            max_exclusive: max_exclusive.into(),
        }
    }

    /// Same key-space boundaries, ignoring the id
    pub fn same_bounds(&self, other: &PartitionKeyRange) -> bool {
        self.min_inclusive == other.min_inclusive && self.max_exclusive == other.max_exclusive
    }

    pub fn overlaps(&self, other: &PartitionKeyRange) -> bool {
        self.min_inclusive.as_str() < other.max_exclusive.as_str()
            && other.min_inclusive.as_str() < self.max_exclusive.as_str()
    }

    /// Overlap of two ranges, carrying `other`'s id
    pub fn intersection(&self, other: &PartitionKeyRange) -> Option<PartitionKeyRange> {
        if !self.overlaps(other) {
            return None;
        }
        let min = self.min_inclusive.as_str().max(other.min_inclusive.as_str());
        let max = self.max_exclusive.as_str().min(other.max_exclusive.as_str());
        Some(PartitionKeyRange::new(other.id.clone(), min, max))
    }

    /// True when `self` lies entirely inside `other`
    pub fn is_within(&self, other: &PartitionKeyRange) -> bool {
        other.min_inclusive <= self.min_inclusive && self.max_exclusive <= other.max_exclusive
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.min_inclusive.as_str() <= key && key < self.max_exclusive.as_str()
    }

    /// Tie-break order between ranges: by minimum boundary
    pub fn cmp_by_min(&self, other: &PartitionKeyRange) -> Ordering {
        self.min_inclusive
            .as_bytes()
            .cmp(other.min_inclusive.as_bytes())
    }
}

impl fmt::Display for PartitionKeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}, {})",
            self.id, self.min_inclusive, self.max_exclusive
        )
    }
}

/// Backend-assigned row identifier.
///
/// Encoded as 16 bytes (database, collection, document; little endian) in url-safe
/// base64 without padding. Rows order by their document part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId {
    pub database: u32,
    pub collection: u32,
    pub document: u64,
}

impl RowId {
    pub fn new(database: u32, collection: u32, document: u64) -> Self {
        Self {
            database,
            collection,
            document,
        }
    }

    pub fn parse(text: &str) -> Option<RowId> {
        let bytes = URL_SAFE_NO_PAD.decode(text).ok()?;
        if bytes.len() != 16 {
            return None;
        }
        let database = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let collection = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
        let document = u64::from_le_bytes(bytes[8..16].try_into().ok()?);
        Some(Self::new(database, collection, document))
    }

    pub fn encode(&self) -> String {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&self.database.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.collection.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.document.to_le_bytes());
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// True when both ids belong to the same database and collection
    pub fn same_collection(&self, other: &RowId) -> bool {
        self.database == other.database && self.collection == other.collection
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Identifier of a backend round trip, reported with every page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub Uuid);

impl ActivityId {
    /// Create a new random activity ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActivityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
