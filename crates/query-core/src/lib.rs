//! Core types for the cross-partition query engine
//!
//! # Features
//!
//! - **Value model**: closed union over null/bool/number/string/array/object/binary/guid
//!   with a total sort order and JSON conversion
//! - **Errors**: one error enum, with distinct kinds for malformed continuation tokens,
//!   cancellation and partition fetch failures
//! - **Collaborator contracts**: page fetch and partition topology resolution
//! - **Pipeline contract**: the async [`QueryPipelineStage`] trait and [`QueryPage`]
//!
//! # Modules
//!
//! - [`value`]: structured values and ordering
//! - [`types`]: sort columns, plans, partition ranges and row ids
//! - [`filter`]: resume range filters
//! - [`container`]: backend collaborator traits
//! - [`page`]: result pages
//! - [`stage`]: pipeline stage trait and cancellation

pub mod container;
pub mod error;
pub mod filter;
pub mod page;
pub mod stage;
pub mod types;
pub mod value;

// Re-exports
pub use container::{DocumentContainer, FetchRequest, FetchResponse, RoutingMapProvider};
pub use error::{QueryError, Result};
pub use filter::RangeFilter;
pub use page::QueryPage;
pub use stage::{CancellationToken, QueryPipelineStage};
pub use types::*;
pub use value::{Number, Value, ValueKind};
