use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    /// A continuation token could not be parsed or does not match the query being resumed.
    #[error("Malformed continuation token: {message}")]
    MalformedContinuationToken { message: String, token: String },

    #[error("Continuation tokens are not supported for this query: {0}")]
    ContinuationNotSupported(String),

    #[error("Query was cancelled")]
    Cancelled,

    #[error("Fetch failed for partition range {range_id} (status {status}): {message}")]
    PartitionFetch {
        range_id: String,
        status: u16,
        message: String,
    },

    /// The partition range was split or merged; its replacement ranges must be resolved.
    #[error("Partition range {range_id} is gone")]
    PartitionGone { range_id: String },

    #[error("Malformed row: {0}")]
    MalformedRow(String),

    #[error("Invalid query plan: {0}")]
    InvalidPlan(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QueryError {
    pub fn malformed_continuation(message: impl Into<String>, token: impl Into<String>) -> Self {
        QueryError::MalformedContinuationToken {
            message: message.into(),
            token: token.into(),
        }
    }

    pub fn is_malformed_continuation(&self) -> bool {
        matches!(self, QueryError::MalformedContinuationToken { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled)
    }

    pub fn is_partition_gone(&self) -> bool {
        matches!(self, QueryError::PartitionGone { .. })
    }

    /// Status code to report with a failed page.
    pub fn status_code(&self) -> u16 {
        match self {
            QueryError::MalformedContinuationToken { .. }
            | QueryError::ContinuationNotSupported(_)
            | QueryError::InvalidPlan(_) => 400,
            QueryError::PartitionGone { .. } => 410,
            QueryError::PartitionFetch { status, .. } => *status,
            QueryError::Cancelled => 499,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
