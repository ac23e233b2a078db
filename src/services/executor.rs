// Execution Coordinator
//
// Dispatches rewritten units to their data sources concurrently and collects
// the per-unit results in route order for the merge engine.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{AbortRegistration, Abortable};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Result, ShardingError};
use crate::models::SqlRewriteUnit;
use crate::services::merge::QueryResult;

/// Runs one rewritten statement against one physical data source.
#[async_trait::async_trait]
pub trait ShardExecutor: Send + Sync {
    async fn execute(&self, unit: &SqlRewriteUnit) -> Result<Box<dyn QueryResult>>;
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Units in flight at once.
    pub max_parallelism: usize,
    /// Per-unit limit.
    pub timeout: Duration,
    /// Abort sibling units as soon as one fails.
    pub fail_fast: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_parallelism: num_cpus::get(),
            timeout: Duration::from_secs(30),
            fail_fast: true,
        }
    }
}

pub struct ExecutionCoordinator {
    executor: Arc<dyn ShardExecutor>,
    options: ExecutorOptions,
}

impl ExecutionCoordinator {
    pub fn new(executor: Arc<dyn ShardExecutor>, options: ExecutorOptions) -> Self {
        Self { executor, options }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Executes every unit and returns the results in unit order. Any unit
    /// failure fails the whole call; no partial result is returned.
    pub async fn execute(&self, units: Vec<SqlRewriteUnit>) -> Result<Vec<Box<dyn QueryResult>>> {
        let count = units.len();
        let semaphore = Arc::new(Semaphore::new(self.options.max_parallelism.max(1)));
        let per_unit = self.options.timeout;
        let mut tasks = JoinSet::new();

        for (index, unit) in units.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let executor = Arc::clone(&self.executor);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| ShardingError::Cancelled)?;
                debug!("Executing on {}: {}", unit.data_source, unit.sql);
                match timeout(per_unit, executor.execute(&unit)).await {
                    Ok(result) => result.map(|rows| (index, rows)),
                    Err(_) => Err(ShardingError::Timeout {
                        data_source: unit.data_source.clone(),
                        seconds: per_unit.as_secs(),
                    }),
                }
            });
        }

        let mut results: Vec<Option<Box<dyn QueryResult>>> = (0..count).map(|_| None).collect();
        let mut failure: Option<ShardingError> = None;
        while let Some(joined) = tasks.join_next().await {
            let error = match joined {
                Ok(Ok((index, rows))) => {
                    results[index] = Some(rows);
                    continue;
                }
                Ok(Err(e)) => e,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => ShardingError::Execution {
                    data_source: "unknown".to_string(),
                    reason: format!("execution task failed: {}", e),
                },
            };
            warn!("Route unit execution failed: {}", error);
            if failure.is_none() {
                failure = Some(error);
                if self.options.fail_fast {
                    tasks.abort_all();
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(ShardingError::Cancelled)
    }

    /// Same as [`execute`](Self::execute), stopped early through the paired
    /// `AbortHandle`. Dropping the in-flight task set aborts every unit.
    pub async fn execute_abortable(
        &self,
        units: Vec<SqlRewriteUnit>,
        registration: AbortRegistration,
    ) -> Result<Vec<Box<dyn QueryResult>>> {
        match Abortable::new(self.execute(units), registration).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Statement execution cancelled");
                Err(ShardingError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;
    use crate::services::merge::MemoryQueryResult;
    use futures::future::AbortHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers with the unit's data source name after `delay`; fails on `fail_on`.
    struct FakeExecutor {
        delay: Duration,
        fail_on: Option<String>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeExecutor {
        fn new(delay: Duration, fail_on: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                delay,
                fail_on: fail_on.map(str::to_string),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ShardExecutor for FakeExecutor {
        async fn execute(&self, unit: &SqlRewriteUnit) -> Result<Box<dyn QueryResult>> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.fail_on.as_deref() == Some(unit.data_source.as_str()) {
                return Err(ShardingError::Execution {
                    data_source: unit.data_source.clone(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(Box::new(MemoryQueryResult::new(
                vec!["ds".to_string()],
                vec![vec![Value::String(unit.data_source.clone())]],
            )))
        }
    }

    fn units(n: usize) -> Vec<SqlRewriteUnit> {
        (0..n)
            .map(|i| SqlRewriteUnit::new(format!("ds_{}", i), "SELECT 1", Vec::new()))
            .collect()
    }

    fn options(max_parallelism: usize, timeout_ms: u64) -> ExecutorOptions {
        ExecutorOptions {
            max_parallelism,
            timeout: Duration::from_millis(timeout_ms),
            fail_fast: true,
        }
    }

    #[tokio::test]
    async fn test_results_follow_unit_order_within_parallelism() {
        let executor = FakeExecutor::new(Duration::from_millis(10), None);
        let coordinator = ExecutionCoordinator::new(executor.clone(), options(2, 1000));
        let results = coordinator.execute(units(5)).await.unwrap();
        let mut names = Vec::new();
        for mut result in results {
            names.push(result.next_row().unwrap().unwrap()[0].canonical_string());
        }
        assert_eq!(names, vec!["ds_0", "ds_1", "ds_2", "ds_3", "ds_4"]);
        assert!(executor.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failure_is_never_partial() {
        let executor = FakeExecutor::new(Duration::from_millis(5), Some("ds_1"));
        let coordinator = ExecutionCoordinator::new(executor, options(4, 1000));
        let err = coordinator.execute(units(3)).await.err().unwrap();
        assert!(matches!(err, ShardingError::Execution { ref data_source, .. } if data_source == "ds_1"));
    }

    #[tokio::test]
    async fn test_timeout_names_data_source() {
        let executor = FakeExecutor::new(Duration::from_millis(200), None);
        let coordinator = ExecutionCoordinator::new(executor, options(1, 20));
        let err = coordinator.execute(units(1)).await.err().unwrap();
        assert!(matches!(err, ShardingError::Timeout { ref data_source, .. } if data_source == "ds_0"));
    }

    #[tokio::test]
    async fn test_abort_handle_cancels_execution() {
        let executor = FakeExecutor::new(Duration::from_secs(5), None);
        let coordinator = ExecutionCoordinator::new(executor, options(2, 10_000));
        let (handle, registration) = AbortHandle::new_pair();
        handle.abort();
        let err = coordinator
            .execute_abortable(units(2), registration)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ShardingError::Cancelled));
    }

    #[test]
    fn test_empty_unit_list() {
        let coordinator =
            ExecutionCoordinator::new(FakeExecutor::new(Duration::ZERO, None), ExecutorOptions::default());
        let results = tokio_test::block_on(coordinator.execute(Vec::new())).unwrap();
        assert!(results.is_empty());
    }
}
