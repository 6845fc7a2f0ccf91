//! DISTINCT pipeline stage

use crate::map::DistinctMap;
use async_trait::async_trait;
use query_core::{
    CancellationToken, DistinctQueryType, QueryError, QueryPage, QueryPipelineStage, Result,
};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Returned instead of a token for unordered DISTINCT on the client
pub const UNORDERED_DISTINCT_CONTINUATION_MESSAGE: &str =
    "DISTINCT queries only return continuation tokens when there is a matching ORDER BY clause. \
     Either drain all results in one session or add an ORDER BY on the distinct projection.";

/// Who consumes the pages of a distinct stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistinctFlavor {
    /// SDK callers: unordered DISTINCT never hands out tokens
    #[default]
    Client,
    /// Compute gateway: tokens always carry the full distinct map
    Compute,
}

/// Continuation token of a distinct stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistinctContinuationToken {
    #[serde(rename = "sourceToken")]
    pub source_token: Option<String>,
    #[serde(rename = "distinctMapToken")]
    pub distinct_map_token: Option<String>,
}

impl DistinctContinuationToken {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            QueryError::malformed_continuation(
                format!("invalid distinct continuation token: {}", e),
                text,
            )
        })
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Drops documents that were already returned
pub struct DistinctStage {
    source: Box<dyn QueryPipelineStage>,
    map: DistinctMap,
    flavor: DistinctFlavor,
}

impl DistinctStage {
    /// Build the stage, resuming the distinct map and the source from `continuation`.
    ///
    /// `create_source` receives the source's own token.
    pub async fn try_create<F, Fut>(
        mode: DistinctQueryType,
        flavor: DistinctFlavor,
        continuation: Option<&str>,
        create_source: F,
    ) -> Result<Self>
    where
        F: FnOnce(Option<String>) -> Fut,
        Fut: Future<Output = Result<Box<dyn QueryPipelineStage>>>,
    {
        if continuation.is_some()
            && mode == DistinctQueryType::Unordered
            && flavor == DistinctFlavor::Client
        {
            return Err(QueryError::ContinuationNotSupported(
                UNORDERED_DISTINCT_CONTINUATION_MESSAGE.to_string(),
            ));
        }

        let (source_token, map_token) = match continuation {
            Some(text) => {
                let token = DistinctContinuationToken::parse(text)?;
                (token.source_token, token.distinct_map_token)
            }
            None => (None, None),
        };

        let map = DistinctMap::try_create(mode, map_token.as_deref())?;
        let source = create_source(source_token).await?;
        tracing::debug!(?mode, ?flavor, "distinct stage created");
        Ok(Self::new(source, map, flavor))
    }

    pub fn new(source: Box<dyn QueryPipelineStage>, map: DistinctMap, flavor: DistinctFlavor) -> Self {
        Self {
            source,
            map,
            flavor,
        }
    }

    fn tokens_disallowed(&self) -> bool {
        self.flavor == DistinctFlavor::Client && self.map.mode() == DistinctQueryType::Unordered
    }

    fn compose_token(&self, source_token: Option<String>) -> Result<Option<String>> {
        match source_token {
            // the source is exhausted, so is this stage
            None => Ok(None),
            Some(source_token) => DistinctContinuationToken {
                source_token: Some(source_token),
                distinct_map_token: self.map.continuation_token(),
            }
            .encode()
            .map(Some),
        }
    }
}

#[async_trait]
impl QueryPipelineStage for DistinctStage {
    async fn drain(
        &mut self,
        max_elements: usize,
        cancellation: &CancellationToken,
    ) -> Result<QueryPage> {
        let page = self.source.drain(max_elements, cancellation).await?;
        let received = page.documents.len();

        let QueryPage {
            documents,
            continuation,
            request_charge,
            activity_id,
            ..
        } = page;
        let documents: Vec<_> = documents
            .into_iter()
            .filter(|document| self.map.add(document))
            .collect();

        tracing::debug!(
            "distinct kept {} of {} documents",
            documents.len(),
            received
        );

        if self.tokens_disallowed() {
            return Ok(QueryPage::new(documents, None, request_charge, activity_id)
                .disallow_continuation(UNORDERED_DISTINCT_CONTINUATION_MESSAGE));
        }

        let continuation = self.compose_token(continuation)?;
        Ok(QueryPage::new(documents, continuation, request_charge, activity_id))
    }

    fn continuation_token(&self) -> Result<Option<String>> {
        if self.tokens_disallowed() {
            return Err(QueryError::ContinuationNotSupported(
                UNORDERED_DISTINCT_CONTINUATION_MESSAGE.to_string(),
            ));
        }
        let source_token = self.source.continuation_token()?;
        self.compose_token(source_token)
    }

    fn is_done(&self) -> bool {
        self.source.is_done()
    }
}
