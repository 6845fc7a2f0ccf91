//! Cross-partition execution for Query Engine
//!
//! This crate merges per-partition result streams of a partitioned document store into
//! one globally ordered stream, and lets the whole multi-partition operation be paused
//! and resumed through a single continuation token.
//!
//! # Architecture
//!
//! The execution system consists of:
//! - **ItemProducer**: cursor over one partition range's backend pages
//! - **ItemProducerTree**: one or more producers for a range, absorbing splits
//! - **OrderByCrossPartitionStage**: priority merge over the trees
//! - **Resume**: rebuilds trees and range filters from a continuation token
//! - **ParallelCrossPartitionStage**: range-by-range drain for unordered queries
//! - **Pipeline**: stacks DISTINCT on top of the source stage
//!
//! # Example
//!
//! ```ignore
//! use query_core::{CancellationToken, OrderByColumn, QueryPlan};
//! use query_distributed::{CrossPartitionConfig, CrossPartitionQuery};
//!
//! let plan = QueryPlan::order_by(vec![OrderByColumn::asc("c.age")]);
//! let mut query = CrossPartitionQuery::create(
//!     container.clone(),
//!     routing.clone(),
//!     &plan,
//!     ranges,
//!     None,
//!     CrossPartitionConfig::default(),
//! )
//! .await?;
//!
//! let page = query.next_page(&CancellationToken::new()).await?;
//! let token = page.continuation_token()?;
//! ```
//!
//! # Modules
//!
//! - [`config`]: execution configuration
//! - [`producer`]: per-range cursors and row parsing
//! - [`tree`]: producer trees and resume walk-forward
//! - [`continuation`]: continuation token codecs
//! - [`resume`]: resume target and range filters
//! - [`orderby`]: ORDER BY merge stage
//! - [`parallel`]: stage for queries without ORDER BY
//! - [`pipeline`]: pipeline assembly and query handle

pub mod config;
pub mod continuation;
pub mod orderby;
pub mod parallel;
pub mod pipeline;
pub mod producer;
pub mod resume;
pub mod tree;

// Re-exports
pub use config::CrossPartitionConfig;
pub use continuation::{
    CompositeContinuationToken, OrderByContinuationToken, OrderByItem, ParallelContinuationToken,
};
pub use orderby::OrderByCrossPartitionStage;
pub use parallel::ParallelCrossPartitionStage;
pub use pipeline::{create_pipeline, CrossPartitionQuery, QueryId};
pub use producer::{FetchStats, ItemProducer, QueryRow, RowFormat};
pub use resume::FilterGroup;
pub use tree::{ItemProducerTree, ResumePosition};
