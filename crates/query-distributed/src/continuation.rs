//! Continuation tokens of the cross-partition stages
//!
//! Both stages serialize a JSON array with one entry per partition range that still has
//! rows. Entries are immutable once built; the stages construct them from producer state
//! and decode them when resuming.

use query_core::{OrderByColumn, PartitionKeyRange, QueryError, Result, RowId, Value};
use serde::{Deserialize, Serialize};

/// Backend token of one partition range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeContinuationToken {
    /// Backend continuation; `None` restarts the range from its beginning
    pub token: Option<String>,
    /// Key-space boundaries the token belongs to
    pub range: PartitionKeyRange,
}

impl CompositeContinuationToken {
    pub fn new(token: Option<String>, range: &PartitionKeyRange) -> Self {
        // the id of a range is not stable across splits, only its bounds are
        Self {
            token,
            range: PartitionKeyRange::new("", &range.min_inclusive, &range.max_exclusive),
        }
    }
}

/// One evaluated sort value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByItem {
    pub item: Value,
}

/// Resume state of one partition range of an ORDER BY query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderByContinuationToken {
    composite_token: CompositeContinuationToken,
    order_by_items: Vec<OrderByItem>,
    rid: String,
    skip_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
}

impl OrderByContinuationToken {
    pub fn new(
        composite_token: CompositeContinuationToken,
        sort_key: Vec<Value>,
        rid: impl Into<String>,
        skip_count: usize,
        filter: Option<String>,
    ) -> Self {
        Self {
            composite_token,
            order_by_items: sort_key.into_iter().map(|item| OrderByItem { item }).collect(),
            rid: rid.into(),
            skip_count,
            filter,
        }
    }

    pub fn composite_token(&self) -> &CompositeContinuationToken {
        &self.composite_token
    }

    pub fn backend_token(&self) -> Option<&str> {
        self.composite_token.token.as_deref()
    }

    pub fn range(&self) -> &PartitionKeyRange {
        &self.composite_token.range
    }

    pub fn sort_key(&self) -> Vec<Value> {
        self.order_by_items.iter().map(|item| item.item.clone()).collect()
    }

    pub fn rid(&self) -> &str {
        &self.rid
    }

    pub fn skip_count(&self) -> usize {
        self.skip_count
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// Serialize the entries of a suspended ORDER BY query
    pub fn encode(tokens: &[OrderByContinuationToken]) -> Result<String> {
        Ok(serde_json::to_string(tokens)?)
    }

    /// Parse and validate a token against the query's sort columns.
    ///
    /// Fails with a malformed continuation error unless `text` is a non-empty array
    /// whose entries carry one sort value per column and a parseable row id.
    pub fn decode(text: &str, columns: &[OrderByColumn]) -> Result<Vec<OrderByContinuationToken>> {
        let tokens: Vec<OrderByContinuationToken> = serde_json::from_str(text).map_err(|e| {
            QueryError::malformed_continuation(
                format!("invalid ORDER BY continuation token: {}", e),
                text,
            )
        })?;
        if tokens.is_empty() {
            return Err(QueryError::malformed_continuation(
                "ORDER BY continuation token has no entries",
                text,
            ));
        }

        for token in &tokens {
            if token.order_by_items.len() != columns.len() {
                return Err(QueryError::malformed_continuation(
                    format!(
                        "entry for {} has {} sort values but the query orders by {} columns",
                        token.range(),
                        token.order_by_items.len(),
                        columns.len()
                    ),
                    text,
                ));
            }
            if RowId::parse(&token.rid).is_none() {
                return Err(QueryError::malformed_continuation(
                    format!("entry for {} has an invalid row id {}", token.range(), token.rid),
                    text,
                ));
            }
        }
        Ok(tokens)
    }
}

/// Continuation of a query without ORDER BY: one backend token per remaining range
#[derive(Debug, Clone, PartialEq)]
pub struct ParallelContinuationToken {
    ranges: Vec<CompositeContinuationToken>,
}

impl ParallelContinuationToken {
    pub fn new(ranges: Vec<CompositeContinuationToken>) -> Self {
        Self { ranges }
    }

    pub fn ranges(&self) -> &[CompositeContinuationToken] {
        &self.ranges
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.ranges)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        let ranges: Vec<CompositeContinuationToken> = serde_json::from_str(text).map_err(|e| {
            QueryError::malformed_continuation(format!("invalid continuation token: {}", e), text)
        })?;
        if ranges.is_empty() {
            return Err(QueryError::malformed_continuation(
                "continuation token has no entries",
                text,
            ));
        }
        Ok(Self { ranges })
    }
}
