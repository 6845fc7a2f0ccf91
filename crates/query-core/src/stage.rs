//! Pipeline stage contract and cooperative cancellation

use crate::error::{QueryError, Result};
use crate::page::QueryPage;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation signal shared between a caller and a running drain
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(QueryError::Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(QueryError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A page-producing stage of the query pipeline.
///
/// A stage is driven by one caller at a time; `&mut self` enforces a single
/// outstanding drain.
#[async_trait]
pub trait QueryPipelineStage: Send {
    /// Produce the next page with at most `max_elements` documents
    async fn drain(
        &mut self,
        max_elements: usize,
        cancellation: &CancellationToken,
    ) -> Result<QueryPage>;

    /// Token describing the current position, `None` when exhausted
    fn continuation_token(&self) -> Result<Option<String>>;

    /// True once every partition is exhausted
    fn is_done(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(observer.check().is_ok());
        token.cancel();
        assert!(observer.is_cancelled());
        assert!(observer.check().unwrap_err().is_cancelled());
    }
}
