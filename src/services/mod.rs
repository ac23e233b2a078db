pub mod algorithm;
pub mod condition;
pub mod executor;
pub mod kernel;
pub mod merge;
pub mod rewrite;
pub mod router;
pub mod rule;

pub use condition::ShardingConditionEngine;
pub use executor::{ExecutionCoordinator, ExecutorOptions, ShardExecutor};
pub use kernel::{ExecutionContext, ShardingKernel};
pub use merge::{MemoryQueryResult, MergeEngine, QueryResult};
pub use rewrite::SqlRewriter;
pub use router::ShardingRouter;
pub use rule::{RuleSnapshot, ShardingRule, SnapshotHolder};
