use anyhow::Result;
use query_distinct::DistinctFlavor;
use query_distributed::CrossPartitionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub page_size: usize,
    pub max_concurrency: usize,
    pub max_item_count: usize,
    pub show_charge: bool,
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Table,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        let execution = CrossPartitionConfig::default();
        Self {
            page_size: execution.page_size,
            max_concurrency: execution.max_concurrency,
            max_item_count: execution.max_item_count,
            show_charge: true,
            output_format: OutputFormat::Table,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Execution settings for the query pipeline
    pub fn execution(&self) -> CrossPartitionConfig {
        CrossPartitionConfig::new()
            .with_page_size(self.page_size)
            .with_max_concurrency(self.max_concurrency)
            .with_max_item_count(self.max_item_count)
            .with_distinct_flavor(DistinctFlavor::Client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("qe-config-{}.json", std::process::id()));
        let config = Config {
            page_size: 7,
            output_format: OutputFormat::Json,
            ..Config::default()
        };
        config.save(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.page_size, 7);
        assert_eq!(loaded.output_format, OutputFormat::Json);
        assert_eq!(loaded.execution().page_size, 7);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = serde_json::from_str(r#"{"page_size": 0}"#).unwrap();
        assert_eq!(config.max_item_count, 100);
        // zero is clamped by the execution config
        assert_eq!(config.execution().page_size, 1);
    }
}
