use serde::Serialize;

use crate::models::Value;

/// Localized SQL and parameters for one route unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlRewriteUnit {
    pub data_source: String,
    pub sql: String,
    pub parameters: Vec<Value>,
}

impl SqlRewriteUnit {
    pub fn new(data_source: impl Into<String>, sql: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self {
            data_source: data_source.into(),
            sql: sql.into(),
            parameters,
        }
    }
}
