//! DISTINCT support for cross-partition queries
//!
//! # Features
//!
//! - **Hash engine**: stable, seed-chained 128-bit hashing of structured values
//! - **Ordered distinct map**: constant-space dedup of sorted streams
//! - **Unordered distinct map**: kind-bucketed sets with exact storage for numbers and
//!   short strings
//! - **Distinct stage**: pipeline stage nesting `{sourceToken, distinctMapToken}`
//!
//! # Example
//!
//! ```ignore
//! use query_distinct::{DistinctFlavor, DistinctStage};
//! use query_core::DistinctQueryType;
//!
//! let mut stage = DistinctStage::try_create(
//!     DistinctQueryType::Ordered,
//!     DistinctFlavor::Client,
//!     continuation.as_deref(),
//!     |source_token| async move { build_source(source_token).await },
//! )
//! .await?;
//!
//! let page = stage.drain(100, &cancellation).await?;
//! ```
//!
//! # Modules
//!
//! - [`hash`]: value hashing
//! - [`map`]: distinct map strategies
//! - [`unordered`]: the unordered map and its token format
//! - [`stage`]: the pipeline stage

pub mod hash;
pub mod map;
pub mod stage;
pub mod unordered;

// Re-exports
pub use map::{DistinctMap, OrderedDistinctMap};
pub use stage::{
    DistinctContinuationToken, DistinctFlavor, DistinctStage,
    UNORDERED_DISTINCT_CONTINUATION_MESSAGE,
};
pub use unordered::UnorderedDistinctMap;
