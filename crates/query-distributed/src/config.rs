//! Execution configuration for cross-partition queries

use query_distinct::DistinctFlavor;

/// Configuration for cross-partition execution
#[derive(Debug, Clone)]
pub struct CrossPartitionConfig {
    /// Maximum concurrent backend fetches while filling producers
    pub max_concurrency: usize,
    /// Page size hint sent with every backend fetch
    pub page_size: usize,
    /// Default number of documents per drained page
    pub max_item_count: usize,
    /// Whether tokens are surfaced for SDK callers or a compute gateway
    pub distinct_flavor: DistinctFlavor,
}

impl Default for CrossPartitionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            page_size: 100,
            max_item_count: 100,
            distinct_flavor: DistinctFlavor::Client,
        }
    }
}

impl CrossPartitionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum fetch concurrency (at least 1)
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Set the backend page size hint (at least 1)
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set the default drain size (at least 1)
    pub fn with_max_item_count(mut self, max_item_count: usize) -> Self {
        self.max_item_count = max_item_count.max(1);
        self
    }

    pub fn with_distinct_flavor(mut self, flavor: DistinctFlavor) -> Self {
        self.distinct_flavor = flavor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_clamp_zero() {
        let config = CrossPartitionConfig::new()
            .with_max_concurrency(0)
            .with_page_size(0)
            .with_max_item_count(25);
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.page_size, 1);
        assert_eq!(config.max_item_count, 25);
        assert_eq!(config.distinct_flavor, DistinctFlavor::Client);
    }
}
