pub mod api;
pub mod binder;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod validation;

pub use error::{Result, ShardingError};
pub use models::*;
pub use services::{
    ExecutionContext, ExecutionCoordinator, ExecutorOptions, MemoryQueryResult, MergeEngine,
    QueryResult, RuleSnapshot, ShardExecutor, ShardingConditionEngine, ShardingKernel, ShardingRule,
    ShardingRouter, SnapshotHolder, SqlRewriter,
};
pub use validation::SqlValidator;
