use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Read-only snapshot of logical table shapes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaMetadata {
    pub tables: IndexMap<String, Table>,
    pub retrieved_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl SchemaMetadata {
    pub fn new(tables: Vec<Table>) -> Self {
        let tables = tables
            .into_iter()
            .map(|t| (t.name.to_ascii_lowercase(), t))
            .collect();
        Self {
            tables,
            retrieved_at: Some(chrono::Utc::now()),
        }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(&name.to_ascii_lowercase())
    }

    /// Column names of a table in declaration order.
    pub fn column_names(&self, table: &str) -> Vec<String> {
        self.table(table)
            .map(|t| t.columns.iter().map(|c| c.name.to_ascii_lowercase()).collect())
            .unwrap_or_default()
    }

    pub fn contains_column(&self, table: &str, column: &str) -> bool {
        self.table(table)
            .map(|t| t.columns.iter().any(|c| c.name.eq_ignore_ascii_case(column)))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub is_nullable: bool,
    #[serde(default)]
    pub is_primary_key: bool,
}

fn default_nullable() -> bool {
    true
}
