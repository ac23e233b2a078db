use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::metadata::Table;

/// Sharding rule configuration as loaded from the rules file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShardingRuleConfig {
    pub data_sources: Vec<DataSourceConfig>,
    #[serde(default)]
    pub default_data_source: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableRuleConfig>,
    #[serde(default)]
    pub binding_tables: Vec<Vec<String>>,
    #[serde(default)]
    pub broadcast_tables: Vec<String>,
    #[serde(default)]
    pub single_tables: Vec<SingleTableConfig>,
    #[serde(default)]
    pub default_database_strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub default_table_strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub algorithms: HashMap<String, AlgorithmConfig>,
    #[serde(default)]
    pub key_generators: HashMap<String, AlgorithmConfig>,
    /// Optional logical schema shapes (column order for INSERT without a column list).
    #[serde(default)]
    pub schema: Vec<Table>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRuleConfig {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    /// Inline expression such as `ds_${0..1}.t_order_${0..1}`; defaults to the
    /// table name on every data source.
    #[serde(default)]
    pub actual_data_nodes: Option<String>,
    #[serde(default)]
    pub database_strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub table_strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub key_generate: Option<KeyGenerateConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    Standard {
        sharding_column: String,
        algorithm: String,
    },
    Complex {
        sharding_columns: Vec<String>,
        algorithm: String,
    },
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyGenerateConfig {
    pub column: String,
    pub generator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleTableConfig {
    pub name: String,
    pub data_source: String,
}

/// Algorithm type name plus its properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub props: AlgorithmProps,
}

/// Algorithm properties; numbers may be given as numbers or as strings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(transparent)]
pub struct AlgorithmProps(pub HashMap<String, serde_json::Value>);

impl AlgorithmProps {
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_config_deserialize() {
        let standard: StrategyConfig = serde_json::from_value(serde_json::json!({
            "type": "standard",
            "sharding_column": "user_id",
            "algorithm": "db_mod"
        }))
        .unwrap();
        assert_eq!(
            standard,
            StrategyConfig::Standard {
                sharding_column: "user_id".to_string(),
                algorithm: "db_mod".to_string()
            }
        );

        let none: StrategyConfig =
            serde_json::from_value(serde_json::json!({ "type": "none" })).unwrap();
        assert_eq!(none, StrategyConfig::None);
    }

    #[test]
    fn test_props_accept_numbers_and_strings() {
        let props = AlgorithmProps::default()
            .with("sharding-count", 4)
            .with("range-lower", "10")
            .with("algorithm-expression", "t_${id % 2}");
        assert_eq!(props.get_i64("sharding-count"), Some(4));
        assert_eq!(props.get_i64("range-lower"), Some(10));
        assert_eq!(props.get_str("sharding-count"), Some("4".to_string()));
        assert_eq!(props.get_str("algorithm-expression"), Some("t_${id % 2}".to_string()));
        assert_eq!(props.get_i64("missing"), None);
    }
}
