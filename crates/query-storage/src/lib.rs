//! In-memory backend for the cross-partition query engine
//!
//! # Features
//!
//! - **Partitioned storage**: documents placed by effective partition key into
//!   physical partition ranges
//! - **Query execution**: sort-key projection, ORDER BY, resume filters and paging
//!   with position-based backend continuation tokens
//! - **Topology changes**: range splits with routing map resolution
//! - **Fault injection**: fail the next fetch of a range with any error
//!
//! # Example
//!
//! ```ignore
//! use query_core::{OrderByColumn, Value};
//! use query_storage::InMemoryContainer;
//!
//! let container = InMemoryContainer::with_partitions(4)
//!     .with_order_by(vec![OrderByColumn::asc("c.age")]);
//! container.insert("3A", Value::from(serde_json::json!({"age": 30})));
//! ```

pub mod memory;

// Re-exports
pub use memory::InMemoryContainer;
