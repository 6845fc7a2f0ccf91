//! Item producers
//!
//! An [`ItemProducer`] is the client-side cursor over one partition range: it holds the
//! current backend page, the position inside it and the tokens needed to refetch the
//! current page or fetch the next one.

use query_core::{
    ActivityId, CancellationToken, DocumentContainer, FetchRequest, PartitionKeyRange,
    QueryError, RangeFilter, Result, Value,
};

/// How backend rows are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    /// Rewritten ORDER BY rows: `{"_rid", "orderByItems": [{"item"}], "payload"}`
    OrderBy { columns: usize },
    /// Plain documents
    Document,
}

/// One backend row with its drain bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    /// Row id as sent by the backend
    pub rid: String,
    /// Evaluated sort key, one value per ORDER BY column
    pub sort_key: Vec<Value>,
    /// What the caller receives
    pub payload: Value,
}

impl QueryRow {
    pub fn parse(row: Value, format: RowFormat) -> Result<Self> {
        match format {
            RowFormat::Document => Ok(Self::from_document(row)),
            RowFormat::OrderBy { columns } => Self::from_order_by_row(row, columns),
        }
    }

    pub fn from_document(document: Value) -> Self {
        let rid = document
            .get("_rid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            rid,
            sort_key: Vec::new(),
            payload: document,
        }
    }

    pub fn from_order_by_row(row: Value, columns: usize) -> Result<Self> {
        let mut properties = match row {
            Value::Object(properties) => properties,
            other => {
                return Err(QueryError::MalformedRow(format!(
                    "expected an object, found {}",
                    other.kind()
                )))
            }
        };

        let mut take = |name: &str| {
            properties
                .iter()
                .position(|(key, _)| key == name)
                .map(|index| properties.swap_remove(index).1)
        };

        let rid = match take("_rid") {
            Some(Value::String(rid)) => rid,
            _ => return Err(QueryError::MalformedRow("missing _rid".to_string())),
        };
        let items = match take("orderByItems") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(QueryError::MalformedRow(format!(
                    "row {} has no orderByItems array",
                    rid
                )))
            }
        };
        let payload = take("payload").unwrap_or(Value::Null);

        if items.len() != columns {
            return Err(QueryError::MalformedRow(format!(
                "row {} has {} sort values, expected {}",
                rid,
                items.len(),
                columns
            )));
        }
        let sort_key = items
            .into_iter()
            .map(|item| match item.get("item") {
                Some(value) => Ok(value.clone()),
                None => Err(QueryError::MalformedRow(format!(
                    "row {} has an undefined sort value",
                    rid
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rid,
            sort_key,
            payload,
        })
    }
}

/// Charges and diagnostics of the backend calls made for one operation
#[derive(Debug, Clone, Default)]
pub struct FetchStats {
    pub request_charge: f64,
    pub activity_id: Option<ActivityId>,
    pub pages: usize,
}

impl FetchStats {
    pub fn merge(&mut self, other: FetchStats) {
        self.request_charge += other.request_charge;
        self.pages += other.pages;
        if other.activity_id.is_some() {
            self.activity_id = other.activity_id;
        }
    }
}

/// Cursor over one partition range's result pages
#[derive(Debug, Clone)]
pub struct ItemProducer {
    range: PartitionKeyRange,
    filter: Option<RangeFilter>,
    format: RowFormat,
    page_size: usize,
    /// Token that fetched the current page
    page_token: Option<String>,
    /// Token for the next page
    next_token: Option<String>,
    has_more_pages: bool,
    started: bool,
    page: Vec<QueryRow>,
    position: usize,
    /// `(rid, sort key)` of the last row moved past
    last_row: Option<(String, Vec<Value>)>,
}

impl ItemProducer {
    /// Create a producer that starts at `continuation`
    pub fn new(
        range: PartitionKeyRange,
        continuation: Option<String>,
        filter: Option<RangeFilter>,
        format: RowFormat,
        page_size: usize,
    ) -> Self {
        Self {
            range,
            filter,
            format,
            page_size: page_size.max(1),
            page_token: None,
            next_token: continuation,
            has_more_pages: true,
            started: false,
            page: Vec::new(),
            position: 0,
            last_row: None,
        }
    }

    pub fn range(&self) -> &PartitionKeyRange {
        &self.range
    }

    pub fn filter(&self) -> Option<&RangeFilter> {
        self.filter.as_ref()
    }

    /// Token that fetched the current page
    pub fn page_token(&self) -> Option<&str> {
        self.page_token.as_deref()
    }

    /// Token for the page after the current one
    pub fn next_token(&self) -> Option<&str> {
        self.next_token.as_deref()
    }

    pub fn last_row(&self) -> Option<&(String, Vec<Value>)> {
        self.last_row.as_ref()
    }

    pub fn current(&self) -> Option<&QueryRow> {
        self.page.get(self.position)
    }

    pub fn has_current(&self) -> bool {
        self.position < self.page.len()
    }

    pub fn is_at_beginning_of_page(&self) -> bool {
        self.position == 0
    }

    /// Rows of the current page before the current one with the same row id and sort key.
    ///
    /// These were already emitted, so a resume from this page must skip them.
    pub fn duplicates_before_current(&self) -> usize {
        let Some(current) = self.current() else {
            return 0;
        };
        self.page[..self.position]
            .iter()
            .filter(|row| row.rid == current.rid && row.sort_key == current.sort_key)
            .count()
    }

    /// The current page is consumed and the backend has more
    pub fn needs_fetch(&self) -> bool {
        !self.has_current() && self.has_more_pages
    }

    pub fn is_exhausted(&self) -> bool {
        self.started && !self.has_current() && !self.has_more_pages
    }

    /// Move to the next row of the current page; false at the end of the page
    pub fn move_next_in_page(&mut self) -> bool {
        if let Some(row) = self.page.get(self.position) {
            self.last_row = Some((row.rid.clone(), row.sort_key.clone()));
            self.position += 1;
        }
        self.has_current()
    }

    /// Rows left in the current page, consuming them
    pub fn take_page_remainder(&mut self) -> Vec<QueryRow> {
        if let Some(row) = self.page.last() {
            self.last_row = Some((row.rid.clone(), row.sort_key.clone()));
        }
        let rest = self.page.split_off(self.position.min(self.page.len()));
        self.position = self.page.len();
        rest
    }

    /// Fetch backend pages until one has rows or the range is exhausted.
    ///
    /// Nothing changes when the fetch fails or cancellation fires while it is in
    /// flight.
    pub async fn fetch_next_page(
        &mut self,
        container: &dyn DocumentContainer,
        cancellation: &CancellationToken,
    ) -> Result<FetchStats> {
        let mut stats = FetchStats::default();
        while self.needs_fetch() {
            cancellation.check()?;
            let request = FetchRequest {
                range: self.range.clone(),
                continuation: self.next_token.clone(),
                page_size: self.page_size,
                filter: self.filter.clone(),
            };
            let response = container.fetch_page(request).await?;
            cancellation.check()?;

            let rows = response
                .documents
                .into_iter()
                .map(|row| QueryRow::parse(row, self.format))
                .collect::<Result<Vec<_>>>()?;

            tracing::debug!(
                "range {} returned {} rows (charge {:.2})",
                self.range,
                rows.len(),
                response.request_charge
            );

            stats.merge(FetchStats {
                request_charge: response.request_charge,
                activity_id: Some(response.activity_id),
                pages: 1,
            });
            self.started = true;
            self.page_token = self.next_token.take();
            self.has_more_pages = response.continuation.is_some();
            self.next_token = response.continuation;
            self.page = rows;
            self.position = 0;
        }
        self.started = true;
        Ok(stats)
    }

    /// Producers for the ranges that replaced this one after a split.
    ///
    /// Every child resumes from this producer's next-page token with the same filter.
    pub fn split(&self, current_ranges: &[PartitionKeyRange]) -> Result<Vec<ItemProducer>> {
        let mut children: Vec<PartitionKeyRange> = current_ranges
            .iter()
            .filter_map(|range| self.range.intersection(range))
            .collect();
        children.sort_by(|a, b| a.cmp_by_min(b));

        let covers = children.first().map(|c| c.min_inclusive.as_str())
            == Some(self.range.min_inclusive.as_str())
            && children.last().map(|c| c.max_exclusive.as_str())
                == Some(self.range.max_exclusive.as_str())
            && children
                .windows(2)
                .all(|pair| pair[0].max_exclusive == pair[1].min_inclusive);
        if !covers {
            return Err(QueryError::ExecutionError(format!(
                "replacement ranges for {} do not cover it",
                self.range
            )));
        }

        Ok(children
            .into_iter()
            .map(|range| ItemProducer {
                range,
                filter: self.filter.clone(),
                format: self.format,
                page_size: self.page_size,
                page_token: None,
                next_token: self.next_token.clone(),
                has_more_pages: true,
                started: false,
                page: Vec::new(),
                position: 0,
                last_row: self.last_row.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use query_core::{FetchResponse, RowId};
    use query_storage::InMemoryContainer;
    use serde_json::json;
    use std::sync::Arc;

    fn order_by_row(doc: u64, key: i64) -> Value {
        Value::from(json!({
            "_rid": RowId::new(1, 1, doc).encode(),
            "orderByItems": [{"item": key}],
            "payload": {"id": doc, "k": key},
        }))
    }

    #[test]
    fn test_parse_order_by_row() {
        let row = QueryRow::parse(order_by_row(3, 10), RowFormat::OrderBy { columns: 1 }).unwrap();
        assert_eq!(row.sort_key, vec![Value::from(10i64)]);
        assert_eq!(row.payload.get("id").and_then(Value::as_i64), Some(3));
        assert_eq!(RowId::parse(&row.rid).unwrap().document, 3);
    }

    #[test]
    fn test_parse_rejects_bad_rows() {
        let format = RowFormat::OrderBy { columns: 2 };
        assert!(QueryRow::parse(order_by_row(3, 10), format).is_err());
        assert!(QueryRow::parse(Value::from(json!([1])), format).is_err());
        let undefined = Value::from(json!({"_rid": "x", "orderByItems": [{}, {}], "payload": 1}));
        assert!(matches!(
            QueryRow::parse(undefined, format),
            Err(QueryError::MalformedRow(_))
        ));
    }

    #[tokio::test]
    async fn test_producer_walks_pages() {
        let container = InMemoryContainer::single_partition()
            .with_order_by(vec![query_core::OrderByColumn::asc("c.k")]);
        for k in 1..=3i64 {
            container.insert("10", Value::from(json!({"k": k})));
        }
        let container: Arc<dyn DocumentContainer> = Arc::new(container);
        let cancel = CancellationToken::new();
        let range = PartitionKeyRange::new("0", "", "FF");
        let mut producer =
            ItemProducer::new(range, None, None, RowFormat::OrderBy { columns: 1 }, 2);

        assert!(producer.needs_fetch());
        let stats = producer.fetch_next_page(container.as_ref(), &cancel).await.unwrap();
        assert_eq!(stats.pages, 1);
        assert!(producer.page_token().is_none());
        assert!(producer.next_token().is_some());
        assert!(producer.is_at_beginning_of_page());

        assert!(producer.move_next_in_page());
        assert!(!producer.move_next_in_page());
        assert!(producer.needs_fetch());

        producer.fetch_next_page(container.as_ref(), &cancel).await.unwrap();
        assert!(producer.page_token().is_some());
        assert_eq!(producer.current().unwrap().sort_key, vec![Value::from(3i64)]);
        assert_eq!(producer.last_row().unwrap().1, vec![Value::from(2i64)]);
        assert!(!producer.move_next_in_page());
        assert!(producer.is_exhausted());
    }

    #[tokio::test]
    async fn test_cancelled_fetch_leaves_producer_untouched() {
        struct Never;

        #[async_trait::async_trait]
        impl DocumentContainer for Never {
            async fn fetch_page(&self, _request: FetchRequest) -> Result<FetchResponse> {
                unreachable!("cancelled before fetching")
            }
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut producer = ItemProducer::new(
            PartitionKeyRange::new("0", "", "FF"),
            Some("t".to_string()),
            None,
            RowFormat::Document,
            10,
        );
        let err = producer.fetch_next_page(&Never, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(producer.next_token(), Some("t"));
        assert!(producer.needs_fetch());
    }

    #[test]
    fn test_split_requires_full_cover() {
        let producer = ItemProducer::new(
            PartitionKeyRange::new("0", "", "FF"),
            Some("t".to_string()),
            None,
            RowFormat::Document,
            10,
        );
        let children = producer
            .split(&[
                PartitionKeyRange::new("1", "", "80"),
                PartitionKeyRange::new("2", "80", "FF"),
            ])
            .unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].range().id, "2");
        assert_eq!(children[0].next_token(), Some("t"));

        assert!(producer
            .split(&[PartitionKeyRange::new("1", "", "80")])
            .is_err());
    }
}
