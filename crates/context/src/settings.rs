use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Settings are process-wide defaults shared by every Context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
    /// Rows fetched per round trip when reading tables.
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
    /// Rows buffered per table before a batch insert.
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,
    /// Recognised execution parameters and their defaults. Executions may
    /// override these without declaring them as variables.
    #[serde(default = "default_execution_parameters")]
    pub execution_parameters: BTreeMap<String, String>,
}

fn default_fetch_size() -> usize {
    1000
}

fn default_bulk_size() -> usize {
    100
}

fn default_execution_parameters() -> BTreeMap<String, String> {
    [
        ("bulkSize", default_bulk_size().to_string()),
        ("fetchSize", default_fetch_size().to_string()),
        ("failOnWarnings", "false".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fetch_size: default_fetch_size(),
            bulk_size: default_bulk_size(),
            execution_parameters: default_execution_parameters(),
        }
    }
}

impl Settings {
    pub fn is_execution_parameter(&self, key: &str) -> bool {
        self.execution_parameters.contains_key(key)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let settings: Settings = serde_yaml::from_str("fetchSize: 10").unwrap();
        assert_eq!(settings.fetch_size, 10);
        assert_eq!(settings.bulk_size, 100);
        assert!(settings.is_execution_parameter("bulkSize"));
        assert!(!settings.is_execution_parameter("region"));
    }
}
