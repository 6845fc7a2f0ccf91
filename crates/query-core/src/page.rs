use crate::error::{QueryError, Result};
use crate::types::ActivityId;
use crate::value::Value;

/// One page of results returned to the caller
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub documents: Vec<Value>,
    /// Token to resume after this page; `None` with no disallow message means the query is done
    pub continuation: Option<String>,
    /// Total request charge incurred while producing this page
    pub request_charge: f64,
    pub activity_id: ActivityId,
    /// Set when this query shape cannot produce continuation tokens
    pub disallow_continuation_message: Option<String>,
}

impl QueryPage {
    pub fn new(
        documents: Vec<Value>,
        continuation: Option<String>,
        request_charge: f64,
        activity_id: ActivityId,
    ) -> Self {
        Self {
            documents,
            continuation,
            request_charge,
            activity_id,
            disallow_continuation_message: None,
        }
    }

    /// Empty page with no continuation
    pub fn empty(activity_id: ActivityId) -> Self {
        Self::new(Vec::new(), None, 0.0, activity_id)
    }

    /// Replace the continuation with a disallow message
    pub fn disallow_continuation(mut self, message: impl Into<String>) -> Self {
        self.continuation = None;
        self.disallow_continuation_message = Some(message.into());
        self
    }

    /// The token a caller may persist.
    ///
    /// Fails with [`QueryError::ContinuationNotSupported`] when the query shape does not
    /// allow continuation tokens.
    pub fn continuation_token(&self) -> Result<Option<&str>> {
        match &self.disallow_continuation_message {
            Some(message) => Err(QueryError::ContinuationNotSupported(message.clone())),
            None => Ok(self.continuation.as_deref()),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
