//! JSON fixtures describing a partitioned container and the query to run on it

use anyhow::{Context, Result};
use query_core::{DistinctQueryType, OrderByColumn, PartitionKeyRange, QueryPlan, Value};
use query_storage::InMemoryContainer;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureDocument {
    /// Effective partition key, upper-case hex
    pub epk: String,
    pub body: serde_json::Value,
}

/// Example:
///
/// ```json
/// {
///   "partitions": [{"id": "0", "min": "", "max": "80"}, {"id": "1", "min": "80", "max": "FF"}],
///   "order_by": [{"expression": "c.age", "order": "Descending"}],
///   "distinct": "None",
///   "documents": [{"epk": "1F", "body": {"age": 30}}]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub partitions: Vec<PartitionKeyRange>,
    #[serde(default)]
    pub order_by: Vec<OrderByColumn>,
    #[serde(default = "no_distinct")]
    pub distinct: DistinctQueryType,
    pub documents: Vec<FixtureDocument>,
}

fn no_distinct() -> DistinctQueryType {
    DistinctQueryType::None
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture {}", path.display()))?;
        let fixture: Fixture = serde_json::from_str(&contents)
            .with_context(|| format!("parsing fixture {}", path.display()))?;
        Ok(fixture)
    }

    pub fn plan(&self) -> QueryPlan {
        QueryPlan::new(self.order_by.clone(), self.distinct)
    }

    /// Container holding the fixture's documents; one full-range partition if none are given
    pub fn container(&self) -> InMemoryContainer {
        let container = if self.partitions.is_empty() {
            InMemoryContainer::single_partition()
        } else {
            InMemoryContainer::new(self.partitions.clone())
        };
        let container = container.with_order_by(self.order_by.clone());
        for document in &self.documents {
            container.insert(document.epk.clone(), Value::from(document.body.clone()));
        }
        tracing::debug!(
            "loaded {} documents into {} partitions",
            self.documents.len(),
            container.ranges().len()
        );
        container
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixture() {
        let fixture: Fixture = serde_json::from_str(
            r#"{
                "partitions": [{"id": "0", "min": "", "max": "80"}, {"id": "1", "min": "80", "max": "FF"}],
                "order_by": [{"expression": "c.age", "order": "Descending"}],
                "documents": [{"epk": "1F", "body": {"age": 30}}, {"epk": "9A", "body": {"age": 41}}]
            }"#,
        )
        .unwrap();
        assert_eq!(fixture.distinct, DistinctQueryType::None);
        assert!(fixture.plan().has_order_by());

        let container = fixture.container();
        assert_eq!(container.ranges().len(), 2);
        assert_eq!(container.ranges()[1].id, "1");
    }
}
