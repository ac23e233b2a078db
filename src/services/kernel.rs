// Sharding Kernel
//
// Entry point for one statement: bind, extract conditions, route, rewrite,
// and (optionally) execute and merge, all against a single rule snapshot.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::binder::StatementBinder;
use crate::error::Result;
use crate::models::{
    BoundStatement, CursorKind, DatabaseType, GeneratedKeyContext, MergeContext, RouteContext,
    SessionContext, SqlRewriteUnit, StatementCategory, StatementKind, Value,
};
use crate::services::condition::{generate_keys, ShardingConditionEngine};
use crate::services::executor::ExecutionCoordinator;
use crate::services::merge::{MemoryQueryResult, MergeEngine, QueryResult};
use crate::services::rewrite::SqlRewriter;
use crate::services::router::ShardingRouter;
use crate::services::rule::SnapshotHolder;
use crate::validation::SqlValidator;

/// Everything needed to execute one statement across its route units.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub id: Uuid,
    pub snapshot_version: u64,
    pub category: StatementCategory,
    pub route: RouteContext,
    pub units: Vec<SqlRewriteUnit>,
    pub merge: MergeContext,
    pub generated_keys: Option<GeneratedKeyContext>,
}

pub struct ShardingKernel {
    snapshots: Arc<SnapshotHolder>,
}

impl ShardingKernel {
    pub fn new(snapshots: Arc<SnapshotHolder>) -> Self {
        Self { snapshots }
    }

    pub fn snapshots(&self) -> &Arc<SnapshotHolder> {
        &self.snapshots
    }

    /// Routes and rewrites a statement outside of any session.
    pub fn prepare(
        &self,
        sql: &str,
        database_type: DatabaseType,
        parameters: &[Value],
    ) -> Result<ExecutionContext> {
        let statement = StatementBinder::bind(sql, database_type)?;
        self.prepare_statement(&statement, parameters, None)
    }

    /// Like [`prepare`](Self::prepare), with cursor state kept in `session`:
    /// DECLARE records the cursor's route, FETCH/MOVE reuse it, CLOSE drops it.
    pub fn prepare_in_session(
        &self,
        sql: &str,
        database_type: DatabaseType,
        parameters: &[Value],
        session: &mut SessionContext,
    ) -> Result<ExecutionContext> {
        let statement = StatementBinder::bind(sql, database_type)?;
        let context = self.prepare_statement(&statement, parameters, Some(&*session))?;
        if let (StatementKind::Cursor(kind), Some(name)) = (statement.kind, &statement.cursor_name) {
            match kind {
                CursorKind::Declare => session.declare_cursor(name, context.route.clone()),
                CursorKind::Close => {
                    session.close_cursor(name);
                }
                CursorKind::Fetch | CursorKind::Move => {}
            }
        }
        Ok(context)
    }

    fn prepare_statement(
        &self,
        statement: &BoundStatement,
        parameters: &[Value],
        session: Option<&SessionContext>,
    ) -> Result<ExecutionContext> {
        let started = Instant::now();
        let snapshot = self.snapshots.load();
        let rule = snapshot.rule.as_ref();

        let generated_keys = generate_keys(statement, rule);
        let conditions = ShardingConditionEngine::new(rule, snapshot.schema.as_ref()).create_conditions(
            statement,
            parameters,
            generated_keys.as_ref(),
        )?;
        let route = ShardingRouter::new(rule).route(statement, &conditions, parameters, session)?;
        let rewritten = SqlRewriter::new(statement, parameters).rewrite(&route, generated_keys.as_ref())?;
        for unit in &rewritten.units {
            SqlValidator::check_rewritten(&statement.sql, &unit.sql, statement.database_type)?;
        }

        let context = ExecutionContext {
            id: Uuid::new_v4(),
            snapshot_version: snapshot.version,
            category: statement.category(),
            route,
            units: rewritten.units,
            merge: rewritten.merge,
            generated_keys,
        };
        debug!(
            "Prepared {} statement {} in {:?}: {:?} route, {} unit(s), {:?} merge",
            context.category,
            context.id,
            started.elapsed(),
            context.route.route_type,
            context.units.len(),
            context.merge.strategy
        );
        Ok(context)
    }

    /// Runs the prepared units and merges their results.
    pub async fn execute(
        &self,
        context: &ExecutionContext,
        coordinator: &ExecutionCoordinator,
    ) -> Result<Box<dyn QueryResult>> {
        if context.units.is_empty() {
            return Ok(Box::new(MemoryQueryResult::default()));
        }
        let started = Instant::now();
        let results = coordinator.execute(context.units.clone()).await?;
        let merged = MergeEngine::new(&context.merge).merge(results)?;
        info!(
            "Executed statement {} on {} unit(s) in {:?}",
            context.id,
            context.units.len(),
            started.elapsed()
        );
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShardingError;
    use crate::models::{RouteType, SchemaMetadata};
    use crate::services::executor::{ExecutorOptions, ShardExecutor};
    use crate::services::rule::tests::sample_rule;

    fn kernel() -> ShardingKernel {
        ShardingKernel::new(Arc::new(SnapshotHolder::new(
            sample_rule(),
            SchemaMetadata::default(),
        )))
    }

    /// Every unit answers with one row holding its data source and SQL.
    struct EchoExecutor;

    #[async_trait::async_trait]
    impl ShardExecutor for EchoExecutor {
        async fn execute(&self, unit: &SqlRewriteUnit) -> Result<Box<dyn QueryResult>> {
            Ok(Box::new(MemoryQueryResult::new(
                vec!["data_source".to_string(), "sql".to_string()],
                vec![vec![
                    Value::String(unit.data_source.clone()),
                    Value::String(unit.sql.clone()),
                ]],
            )))
        }
    }

    #[test]
    fn test_prepare_routes_and_rewrites() {
        let context = kernel()
            .prepare(
                "SELECT * FROM t_order WHERE user_id = ? AND order_id = ?",
                DatabaseType::MySql,
                &[Value::Integer(1), Value::Integer(2)],
            )
            .unwrap();
        assert_eq!(context.snapshot_version, 1);
        assert_eq!(context.units.len(), 1);
        assert_eq!(context.units[0].data_source, "ds_1");
        assert_eq!(
            context.units[0].sql,
            "SELECT * FROM t_order_0 WHERE user_id = ? AND order_id = ?"
        );
    }

    #[test]
    fn test_prepare_is_deterministic_apart_from_id() {
        let kernel = kernel();
        let sql = "SELECT order_id FROM t_order WHERE order_id IN (1, 2) ORDER BY order_id";
        let first = kernel.prepare(sql, DatabaseType::MySql, &[]).unwrap();
        let second = kernel.prepare(sql, DatabaseType::MySql, &[]).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first.route, second.route);
        assert_eq!(first.units, second.units);
        assert_eq!(first.merge, second.merge);
    }

    #[test]
    fn test_insert_generates_keys_before_routing() {
        let context = kernel()
            .prepare(
                "INSERT INTO t_order (user_id, status) VALUES (1, 'A')",
                DatabaseType::MySql,
                &[],
            )
            .unwrap();
        let keys = context.generated_keys.unwrap();
        assert_eq!(keys.column, "order_id");
        assert_eq!(context.units.len(), 1);
        assert!(context.units[0].sql.contains("(user_id, status, order_id)"));
        assert_eq!(context.units[0].data_source, "ds_1");
    }

    #[test]
    fn test_cursor_lifecycle_in_session() {
        let kernel = kernel();
        let mut session = SessionContext::new();
        let declared = kernel
            .prepare_in_session(
                "DECLARE order_cursor CURSOR FOR SELECT * FROM t_order",
                DatabaseType::PostgreSql,
                &[],
                &mut session,
            )
            .unwrap();
        assert_eq!(session.cursor_count(), 1);

        let fetched = kernel
            .prepare_in_session("FETCH NEXT FROM order_cursor", DatabaseType::PostgreSql, &[], &mut session)
            .unwrap();
        assert_eq!(fetched.route.route_type, RouteType::Cursor);
        assert_eq!(fetched.units.len(), declared.units.len());

        kernel
            .prepare_in_session("CLOSE order_cursor", DatabaseType::PostgreSql, &[], &mut session)
            .unwrap();
        assert_eq!(session.cursor_count(), 0);
        assert!(kernel
            .prepare_in_session("FETCH NEXT FROM order_cursor", DatabaseType::PostgreSql, &[], &mut session)
            .is_err());
    }

    #[test]
    fn test_unknown_table_is_unroutable() {
        let err = kernel()
            .prepare("SELECT * FROM t_missing", DatabaseType::MySql, &[])
            .unwrap_err();
        assert!(matches!(err, ShardingError::UnroutableStatement { .. }));
        assert!(err.to_string().contains("t_missing"));
    }

    #[tokio::test]
    async fn test_execute_merges_all_units() {
        let kernel = kernel();
        let context = kernel
            .prepare("SELECT * FROM t_order", DatabaseType::MySql, &[])
            .unwrap();
        let coordinator = ExecutionCoordinator::new(Arc::new(EchoExecutor), ExecutorOptions::default());
        let mut merged = kernel.execute(&context, &coordinator).await.unwrap();
        let rows = merged.collect_rows().unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0][1], Value::String("SELECT * FROM t_order_0".to_string()));
        assert_eq!(rows[3][0], Value::String("ds_1".to_string()));
    }
}
