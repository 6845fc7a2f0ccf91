//! In-memory partitioned document container
//!
//! Simulates the backend side of a cross-partition query: documents live in physical
//! partitions keyed by effective partition key, each partition executes the rewritten
//! query (sort-key projection, ORDER BY, resume filter) and pages its results.
//!
//! Backend continuation tokens are sort positions rather than offsets, so a token issued
//! by a partition stays valid for the ranges that replace it after a split.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use query_core::{
    compare_sort_keys, ActivityId, DocumentContainer, FetchRequest, FetchResponse,
    OrderByColumn, PartitionKeyRange, QueryError, Result, RoutingMapProvider, RowId, SortOrder,
    Value,
};
use serde_json::json;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};

/// Request charge of a page with no rows
const BASE_REQUEST_CHARGE: f64 = 1.0;
/// Additional charge per returned row
const ROW_REQUEST_CHARGE: f64 = 0.1;

#[derive(Debug, Clone)]
struct StoredDocument {
    epk: String,
    rid: RowId,
    body: Value,
}

#[derive(Debug, Clone)]
struct Partition {
    range: PartitionKeyRange,
    documents: Vec<StoredDocument>,
}

/// A row as the partition orders it
struct SortedRow<'a> {
    sort_key: Vec<Value>,
    document: &'a StoredDocument,
}

/// Position in a partition's sorted result: rows before `(key, rid)` plus `skip` equal rows
#[derive(Debug, Clone, PartialEq)]
struct Position {
    key: Vec<Value>,
    rid: RowId,
    skip: usize,
}

impl Position {
    fn encode(&self) -> String {
        json!({
            "key": self.key,
            "rid": self.rid.encode(),
            "skip": self.skip,
        })
        .to_string()
    }

    fn decode(text: &str) -> Option<Position> {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        let key = value
            .get("key")?
            .as_array()?
            .iter()
            .cloned()
            .map(Value::from)
            .collect();
        let rid = RowId::parse(value.get("rid")?.as_str()?)?;
        let skip = value.get("skip")?.as_u64()? as usize;
        Some(Position { key, rid, skip })
    }
}

/// In-memory document container with splittable partitions and fault injection
#[derive(Debug)]
pub struct InMemoryContainer {
    database: u32,
    collection: u32,
    order_by: Vec<OrderByColumn>,
    partitions: RwLock<Vec<Partition>>,
    faults: Mutex<Vec<(String, QueryError)>>,
    next_document: AtomicU64,
    fetches: AtomicUsize,
}

impl InMemoryContainer {
    /// Create a container with the given physical partitions
    pub fn new(ranges: Vec<PartitionKeyRange>) -> Self {
        let mut partitions: Vec<Partition> = ranges
            .into_iter()
            .map(|range| Partition {
                range,
                documents: Vec::new(),
            })
            .collect();
        partitions.sort_by(|a, b| a.range.cmp_by_min(&b.range));
        Self {
            database: 1,
            collection: 1,
            order_by: Vec::new(),
            partitions: RwLock::new(partitions),
            faults: Mutex::new(Vec::new()),
            next_document: AtomicU64::new(1),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Container with one partition spanning the whole key space
    pub fn single_partition() -> Self {
        Self::new(vec![PartitionKeyRange::new(
            "0",
            PartitionKeyRange::MIN,
            PartitionKeyRange::MAX,
        )])
    }

    /// Container with `count` partitions of equal width, ids `"0"..`
    pub fn with_partitions(count: usize) -> Self {
        let count = count.clamp(1, 255);
        let bounds: Vec<String> = (0..=count)
            .map(|i| match i {
                0 => PartitionKeyRange::MIN.to_string(),
                i if i == count => PartitionKeyRange::MAX.to_string(),
                i => format!("{:02X}", i * 255 / count),
            })
            .collect();
        Self::new(
            bounds
                .windows(2)
                .enumerate()
                .map(|(id, pair)| PartitionKeyRange::new(id.to_string(), &pair[0], &pair[1]))
                .collect(),
        )
    }

    /// Execute ORDER BY queries on `columns`; without this, plain documents are returned
    pub fn with_order_by(mut self, columns: Vec<OrderByColumn>) -> Self {
        self.order_by = columns;
        self
    }

    /// Insert a document, assigning the next row id
    pub fn insert(&self, epk: impl Into<String>, document: Value) -> RowId {
        let document_id = self.next_document.fetch_add(1, AtomicOrdering::SeqCst);
        let rid = RowId::new(self.database, self.collection, document_id);
        self.insert_with_rid(epk, rid, document);
        rid
    }

    /// Insert a row with an explicit row id (JOIN expansion repeats row ids)
    pub fn insert_with_rid(&self, epk: impl Into<String>, rid: RowId, document: Value) {
        let epk = epk.into();
        let mut partitions = self.partitions.write();
        match partitions.iter_mut().find(|p| p.range.contains_key(&epk)) {
            Some(partition) => partition.documents.push(StoredDocument {
                epk,
                rid,
                body: document,
            }),
            None => tracing::warn!("no partition owns key {}, document dropped", epk),
        }
    }

    /// Current physical partitions
    pub fn ranges(&self) -> Vec<PartitionKeyRange> {
        self.partitions.read().iter().map(|p| p.range.clone()).collect()
    }

    /// Number of page requests served, including failed ones
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(AtomicOrdering::SeqCst)
    }

    /// Split a partition at `at` into `{id}-L` and `{id}-R`
    pub fn split(&self, range_id: &str, at: &str) -> Result<(PartitionKeyRange, PartitionKeyRange)> {
        let mut partitions = self.partitions.write();
        let index = partitions
            .iter()
            .position(|p| p.range.id == range_id)
            .ok_or_else(|| QueryError::ExecutionError(format!("unknown range {}", range_id)))?;
        let parent = partitions.remove(index);
        if !(parent.range.min_inclusive.as_str() < at && at < parent.range.max_exclusive.as_str())
        {
            partitions.insert(index, parent);
            return Err(QueryError::ExecutionError(format!(
                "split point {} is outside range {}",
                at, range_id
            )));
        }

        let left = PartitionKeyRange::new(
            format!("{}-L", range_id),
            parent.range.min_inclusive.clone(),
            at,
        );
        let right = PartitionKeyRange::new(
            format!("{}-R", range_id),
            at,
            parent.range.max_exclusive.clone(),
        );
        let (left_docs, right_docs): (Vec<_>, Vec<_>) = parent
            .documents
            .into_iter()
            .partition(|doc| left.contains_key(&doc.epk));

        partitions.insert(
            index,
            Partition {
                range: right.clone(),
                documents: right_docs,
            },
        );
        partitions.insert(
            index,
            Partition {
                range: left.clone(),
                documents: left_docs,
            },
        );
        tracing::debug!("split range {} into {} and {}", range_id, left, right);
        Ok((left, right))
    }

    /// Fail the next fetch against `range_id` with `error`
    pub fn inject_fault(&self, range_id: impl Into<String>, error: QueryError) {
        self.faults.lock().push((range_id.into(), error));
    }

    fn take_fault(&self, range_id: &str) -> Option<QueryError> {
        let mut faults = self.faults.lock();
        let index = faults.iter().position(|(id, _)| id == range_id)?;
        Some(faults.remove(index).1)
    }

    /// Ties on the sort key order by row id in the first column's direction
    fn rid_order(&self) -> SortOrder {
        self.order_by
            .first()
            .map(|column| column.order)
            .unwrap_or(SortOrder::Ascending)
    }

    fn compare(&self, key: &[Value], rid: &RowId, other_key: &[Value], other_rid: &RowId) -> Ordering {
        compare_sort_keys(&self.order_by, key, other_key).then_with(|| {
            self.rid_order()
                .apply(rid.document.cmp(&other_rid.document))
        })
    }

    fn render(&self, row: &SortedRow<'_>) -> Value {
        let rid = Value::from(row.document.rid.encode());
        if self.order_by.is_empty() {
            let mut body = row.document.body.clone();
            if let Value::Object(properties) = &mut body {
                if !properties.iter().any(|(key, _)| key == "_rid") {
                    properties.push(("_rid".to_string(), rid));
                }
            }
            return body;
        }
        let items = row
            .sort_key
            .iter()
            .map(|value| Value::object([("item", value.clone())]))
            .collect();
        Value::object([
            ("_rid", rid),
            ("orderByItems", Value::Array(items)),
            ("payload", row.document.body.clone()),
        ])
    }
}

/// Evaluate a sort expression such as `c.address.city` against a document
fn evaluate(expression: &str, document: &Value) -> Option<Value> {
    let mut segments = expression.split('.');
    // leading segment is the collection alias
    segments.next()?;
    let mut current = document;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

#[async_trait]
impl DocumentContainer for InMemoryContainer {
    async fn fetch_page(&self, request: FetchRequest) -> Result<FetchResponse> {
        self.fetches.fetch_add(1, AtomicOrdering::SeqCst);
        if let Some(error) = self.take_fault(&request.range.id) {
            return Err(error);
        }

        let partitions = self.partitions.read();
        // requests are routed by range id; a split retires the id
        let partition = partitions
            .iter()
            .find(|p| p.range.id == request.range.id && request.range.is_within(&p.range))
            .ok_or_else(|| QueryError::PartitionGone {
                range_id: request.range.id.clone(),
            })?;

        // rows lacking a sort value are not part of an ORDER BY result
        let mut rows: Vec<SortedRow<'_>> = partition
            .documents
            .iter()
            .filter(|doc| request.range.contains_key(&doc.epk))
            .filter_map(|doc| {
                let sort_key = self
                    .order_by
                    .iter()
                    .map(|column| evaluate(&column.expression, &doc.body))
                    .collect::<Option<Vec<_>>>()?;
                Some(SortedRow {
                    sort_key,
                    document: doc,
                })
            })
            .filter(|row| {
                request
                    .filter
                    .as_ref()
                    .map_or(true, |filter| filter.matches(&row.sort_key))
            })
            .collect();
        rows.sort_by(|a, b| self.compare(&a.sort_key, &a.document.rid, &b.sort_key, &b.document.rid));

        let start = match request.continuation.as_deref() {
            None => 0,
            Some(token) => {
                let position = Position::decode(token).ok_or_else(|| QueryError::PartitionFetch {
                    range_id: request.range.id.clone(),
                    status: 400,
                    message: format!("invalid backend continuation {}", token),
                })?;
                let mut seen = 0;
                rows.iter()
                    .position(|row| {
                        match self.compare(&row.sort_key, &row.document.rid, &position.key, &position.rid) {
                            Ordering::Less => false,
                            Ordering::Greater => true,
                            Ordering::Equal if seen == position.skip => true,
                            Ordering::Equal => {
                                seen += 1;
                                false
                            }
                        }
                    })
                    .unwrap_or(rows.len())
            }
        };

        let end = start.saturating_add(request.page_size.max(1)).min(rows.len());
        let continuation = rows.get(end).map(|next| {
            let skip = rows[..end]
                .iter()
                .filter(|row| {
                    self.compare(&row.sort_key, &row.document.rid, &next.sort_key, &next.document.rid)
                        == Ordering::Equal
                })
                .count();
            Position {
                key: next.sort_key.clone(),
                rid: next.document.rid,
                skip,
            }
            .encode()
        });
        let documents: Vec<Value> = rows[start..end].iter().map(|row| self.render(row)).collect();

        Ok(FetchResponse {
            request_charge: BASE_REQUEST_CHARGE + ROW_REQUEST_CHARGE * documents.len() as f64,
            documents,
            continuation,
            activity_id: ActivityId::new(),
        })
    }
}

#[async_trait]
impl RoutingMapProvider for InMemoryContainer {
    async fn overlapping_ranges(
        &self,
        range: &PartitionKeyRange,
    ) -> Result<Vec<PartitionKeyRange>> {
        Ok(self
            .partitions
            .read()
            .iter()
            .filter(|p| p.range.overlaps(range))
            .map(|p| p.range.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use query_core::RangeFilter;

    fn request(range: PartitionKeyRange, continuation: Option<String>, page_size: usize) -> FetchRequest {
        FetchRequest {
            range,
            continuation,
            page_size,
            filter: None,
        }
    }

    fn keys(response: &FetchResponse) -> Vec<i64> {
        response
            .documents
            .iter()
            .filter_map(|row| row.get("payload").and_then(|p| p.get("k")).and_then(Value::as_i64))
            .collect()
    }

    fn sorted_container() -> InMemoryContainer {
        let container = InMemoryContainer::single_partition()
            .with_order_by(vec![OrderByColumn::asc("c.k")]);
        for k in [5i64, 1, 3, 2, 4] {
            container.insert(format!("{:02X}", k * 40), Value::from(json!({"k": k})));
        }
        container
    }

    #[tokio::test]
    async fn test_pages_in_sort_order() {
        let container = sorted_container();
        let range = container.ranges()[0].clone();

        let first = container.fetch_page(request(range.clone(), None, 2)).await.unwrap();
        assert_eq!(keys(&first), vec![1, 2]);
        let second = container
            .fetch_page(request(range.clone(), first.continuation.clone(), 2))
            .await
            .unwrap();
        assert_eq!(keys(&second), vec![3, 4]);
        let third = container
            .fetch_page(request(range, second.continuation.clone(), 2))
            .await
            .unwrap();
        assert_eq!(keys(&third), vec![5]);
        assert!(third.continuation.is_none());
        assert_eq!(container.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_unbounded_page_size() {
        let container = sorted_container();
        let range = container.ranges()[0].clone();

        let first = container.fetch_page(request(range.clone(), None, 2)).await.unwrap();
        let rest = container
            .fetch_page(request(range, first.continuation.clone(), usize::MAX))
            .await
            .unwrap();
        assert_eq!(keys(&rest), vec![3, 4, 5]);
        assert!(rest.continuation.is_none());
    }

    #[tokio::test]
    async fn test_filter_is_applied() {
        let container = sorted_container();
        let columns = vec![OrderByColumn::asc("c.k")];
        let mut req = request(container.ranges()[0].clone(), None, 10);
        req.filter = Some(RangeFilter::after(&columns, &[Value::from(3i64)]));
        let page = container.fetch_page(req).await.unwrap();
        assert_eq!(keys(&page), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_tokens_survive_split() {
        let container = sorted_container();
        let parent = container.ranges()[0].clone();
        let first = container.fetch_page(request(parent.clone(), None, 2)).await.unwrap();

        let (left, right) = container.split("0", "80").unwrap();
        let gone = container
            .fetch_page(request(parent.clone(), first.continuation.clone(), 2))
            .await
            .unwrap_err();
        assert!(gone.is_partition_gone());

        let overlapping = container.overlapping_ranges(&parent).await.unwrap();
        assert_eq!(overlapping, vec![left.clone(), right.clone()]);

        // keys 1, 2, 3 live left of 0x80, keys 4, 5 right of it
        let left_page = container
            .fetch_page(request(left, first.continuation.clone(), 10))
            .await
            .unwrap();
        let right_page = container
            .fetch_page(request(right, first.continuation.clone(), 10))
            .await
            .unwrap();
        assert_eq!(keys(&left_page), vec![3]);
        assert_eq!(keys(&right_page), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_injected_fault_fails_once() {
        let container = sorted_container();
        let range = container.ranges()[0].clone();
        container.inject_fault(
            "0",
            QueryError::PartitionFetch {
                range_id: "0".to_string(),
                status: 503,
                message: "unavailable".to_string(),
            },
        );
        let err = container.fetch_page(request(range.clone(), None, 2)).await.unwrap_err();
        assert_eq!(err.status_code(), 503);
        assert!(container.fetch_page(request(range, None, 2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_plain_documents_carry_rid() {
        let container = InMemoryContainer::with_partitions(2);
        let rid = container.insert("10", Value::from(json!({"id": "a"})));
        let range = container.ranges()[0].clone();
        let page = container.fetch_page(request(range, None, 10)).await.unwrap();
        assert_eq!(page.documents.len(), 1);
        assert_eq!(
            page.documents[0].get("_rid").and_then(Value::as_str),
            Some(rid.encode().as_str())
        );
    }

    #[test]
    fn test_with_partitions_covers_key_space() {
        let ranges = InMemoryContainer::with_partitions(3).ranges();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].min_inclusive, "");
        assert_eq!(ranges[0].max_exclusive, "55");
        assert_eq!(ranges[1].max_exclusive, "AA");
        assert_eq!(ranges[2].max_exclusive, "FF");
    }
}
