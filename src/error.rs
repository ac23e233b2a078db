use thiserror::Error;

use crate::models::ValueFamily;

/// Errors raised by the routing, rewriting, merging and execution kernel.
///
/// Routing, rewrite and merge failures are deterministic; none of them is
/// retried inside the kernel.
#[derive(Debug, Error)]
pub enum ShardingError {
    #[error("Unroutable {category} statement on [{}]: {reason}", .tables.join(", "))]
    UnroutableStatement {
        category: String,
        tables: Vec<String>,
        reason: String,
    },

    #[error("Binding tables [{}] resolve to inconsistent shards: {detail}", .tables.join(", "))]
    BindingTableInconsistency { tables: Vec<String>, detail: String },

    #[error("Rewrite failure: {reason}")]
    RewriteFailure { sql: String, reason: String },

    #[error("Merge type mismatch on column '{column}': {left} vs {right}")]
    MergeTypeMismatch {
        column: String,
        left: ValueFamily,
        right: ValueFamily,
    },

    #[error("Merge column not found: {0}")]
    MergeColumnNotFound(String),

    #[error("Invalid SQL: {0}")]
    InvalidSql(String),

    #[error("Invalid sharding rule: {0}")]
    InvalidRule(String),

    #[error("Sharding algorithm '{algorithm}' failed: {reason}")]
    Algorithm { algorithm: String, reason: String },

    #[error("Execution failed on data source '{data_source}': {reason}")]
    Execution { data_source: String, reason: String },

    #[error("Execution on data source '{data_source}' timed out after {seconds} seconds")]
    Timeout { data_source: String, seconds: u64 },

    #[error("Statement execution cancelled")]
    Cancelled,
}

impl ShardingError {
    pub fn unroutable(
        category: impl Into<String>,
        tables: &[String],
        reason: impl Into<String>,
    ) -> Self {
        ShardingError::UnroutableStatement {
            category: category.into(),
            tables: tables.to_vec(),
            reason: reason.into(),
        }
    }

    pub fn rewrite(sql: &str, reason: impl Into<String>) -> Self {
        ShardingError::RewriteFailure {
            sql: sql.to_string(),
            reason: reason.into(),
        }
    }

    pub fn algorithm(algorithm: impl Into<String>, reason: impl Into<String>) -> Self {
        ShardingError::Algorithm {
            algorithm: algorithm.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code, used by the HTTP error body.
    pub fn code(&self) -> &'static str {
        match self {
            ShardingError::UnroutableStatement { .. } => "UNROUTABLE_STATEMENT",
            ShardingError::BindingTableInconsistency { .. } => "BINDING_TABLE_INCONSISTENCY",
            ShardingError::RewriteFailure { .. } => "REWRITE_FAILURE",
            ShardingError::MergeTypeMismatch { .. } => "MERGE_TYPE_MISMATCH",
            ShardingError::MergeColumnNotFound(_) => "MERGE_COLUMN_NOT_FOUND",
            ShardingError::InvalidSql(_) => "INVALID_SQL",
            ShardingError::InvalidRule(_) => "INVALID_RULE",
            ShardingError::Algorithm { .. } => "ALGORITHM_ERROR",
            ShardingError::Execution { .. } => "EXECUTION_ERROR",
            ShardingError::Timeout { .. } => "EXECUTION_TIMEOUT",
            ShardingError::Cancelled => "CANCELLED",
        }
    }
}

pub type Result<T> = std::result::Result<T, ShardingError>;
