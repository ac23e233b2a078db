// Routing Engine
//
// Picks a routing strategy from the statement kind and its tables, then runs
// it against the rule snapshot. Every strategy is a pure function of
// (rule, statement, conditions); cursor follow-ups replay the route recorded
// when the cursor was declared.

pub mod broadcast;
pub mod standard;
pub mod validator;

use crate::error::{Result, ShardingError};
use crate::models::{
    BoundStatement, CursorKind, DalKind, DclKind, DdlKind, RouteContext, RouteType,
    SessionContext, ShardingConditions, StatementKind, Value,
};
use crate::services::rule::ShardingRule;

/// Routing path chosen for one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteStrategy {
    /// Every data source, with identity mappers for the given tables.
    DatabaseBroadcast(Vec<String>),
    /// One data source per physical database instance.
    InstanceBroadcast,
    /// Every data node of the given rule tables.
    TableBroadcast(Vec<String>),
    /// One data source per group of data sources sharing table rules.
    DataSourceGroupBroadcast,
    /// Exactly one data source able to serve every given table.
    Unicast(Vec<String>),
    /// Single tables or the default data source; `strict` rejects unknown tables.
    Single { tables: Vec<String>, strict: bool },
    Ignore,
    /// One sharding table, or tables of one binding group.
    Standard(Vec<String>),
    /// Sharding tables that are not all bound: per data source combination.
    Complex(Vec<String>),
}

pub struct ShardingRouter<'a> {
    rule: &'a ShardingRule,
}

impl<'a> ShardingRouter<'a> {
    pub fn new(rule: &'a ShardingRule) -> Self {
        Self { rule }
    }

    pub fn route(
        &self,
        statement: &BoundStatement,
        conditions: &ShardingConditions,
        parameters: &[Value],
        session: Option<&SessionContext>,
    ) -> Result<RouteContext> {
        if let StatementKind::Cursor(kind) = statement.kind {
            if kind != CursorKind::Declare {
                return self.route_cursor(statement, session);
            }
        }

        validator::validate_statement(self.rule, statement, conditions, parameters)?;
        let strategy = self.decide(statement, conditions);
        tracing::debug!(
            "Routing {} statement on {:?} with {:?}",
            statement.category(),
            statement.table_names(),
            strategy
        );

        let route = match strategy {
            RouteStrategy::DatabaseBroadcast(tables) => self.database_broadcast(&tables),
            RouteStrategy::InstanceBroadcast => self.instance_broadcast(),
            RouteStrategy::TableBroadcast(tables) => self.table_broadcast(&tables)?,
            RouteStrategy::DataSourceGroupBroadcast => self.data_source_group_broadcast(),
            RouteStrategy::Unicast(tables) => self.unicast(statement, &tables)?,
            RouteStrategy::Single { tables, strict } => self.single(statement, &tables, strict)?,
            RouteStrategy::Ignore => RouteContext::new(RouteType::Ignore),
            RouteStrategy::Standard(tables) => {
                let broadcast = self.broadcast_tables_of(statement);
                self.standard(statement, &tables, conditions, &broadcast)?
            }
            RouteStrategy::Complex(tables) => {
                let broadcast = self.broadcast_tables_of(statement);
                self.complex(statement, &tables, conditions, &broadcast)?
            }
        };

        validator::validate_route(statement, &route)?;
        tracing::debug!(
            "Routed {} statement to {} unit(s) via {:?}",
            statement.category(),
            route.len(),
            route.route_type
        );
        Ok(route)
    }

    /// Strategy selection, exhaustive over statement kinds.
    pub fn decide(&self, statement: &BoundStatement, conditions: &ShardingConditions) -> RouteStrategy {
        let tables = logical_tables(statement);
        let rule_tables = self.rule.sharding_rule_tables(&tables);
        match statement.kind {
            StatementKind::Tcl => RouteStrategy::DatabaseBroadcast(Vec::new()),
            StatementKind::Ddl(kind) => match kind {
                DdlKind::Function | DdlKind::Procedure => RouteStrategy::DatabaseBroadcast(Vec::new()),
                DdlKind::Tablespace => RouteStrategy::InstanceBroadcast,
                _ if tables.is_empty() => RouteStrategy::DatabaseBroadcast(Vec::new()),
                _ if rule_tables.is_empty() => RouteStrategy::Single {
                    tables,
                    strict: false,
                },
                _ => RouteStrategy::TableBroadcast(rule_tables),
            },
            StatementKind::Dal(kind) => match kind {
                DalKind::Use => RouteStrategy::Ignore,
                DalKind::Set | DalKind::Reset | DalKind::ShowDatabases | DalKind::Load => {
                    RouteStrategy::DatabaseBroadcast(Vec::new())
                }
                _ if !tables.is_empty() && rule_tables.is_empty() => RouteStrategy::Single {
                    tables,
                    strict: false,
                },
                DalKind::Optimize => RouteStrategy::TableBroadcast(rule_tables),
                DalKind::Analyze if rule_tables.is_empty() => {
                    RouteStrategy::DatabaseBroadcast(Vec::new())
                }
                DalKind::Analyze => RouteStrategy::TableBroadcast(rule_tables),
                _ if !rule_tables.is_empty() => RouteStrategy::Unicast(rule_tables),
                _ => RouteStrategy::DataSourceGroupBroadcast,
            },
            StatementKind::Dcl(kind) => {
                let user_level = matches!(
                    kind,
                    DclKind::CreateUser | DclKind::AlterUser | DclKind::DropUser | DclKind::RenameUser
                );
                if statement.wildcard_target || user_level || tables.is_empty() {
                    RouteStrategy::InstanceBroadcast
                } else if self.rule.is_all_broadcast_tables(&tables) {
                    RouteStrategy::DatabaseBroadcast(tables)
                } else if tables.len() == 1 && !rule_tables.is_empty() {
                    RouteStrategy::TableBroadcast(rule_tables)
                } else {
                    RouteStrategy::Ignore
                }
            }
            StatementKind::Dql | StatementKind::Dml(_) | StatementKind::Cursor(_) => {
                self.decide_data_access(statement, tables, conditions)
            }
        }
    }

    fn decide_data_access(
        &self,
        statement: &BoundStatement,
        tables: Vec<String>,
        conditions: &ShardingConditions,
    ) -> RouteStrategy {
        let is_select = statement.kind.is_select();
        if tables.is_empty() {
            return RouteStrategy::Unicast(tables);
        }
        if self.rule.is_all_broadcast_tables(&tables) {
            return if is_select {
                RouteStrategy::Unicast(tables)
            } else {
                RouteStrategy::DatabaseBroadcast(tables)
            };
        }
        let sharding = self.rule.sharding_logic_tables(&tables);
        if sharding.is_empty() {
            return RouteStrategy::Single {
                tables,
                strict: true,
            };
        }
        if conditions.always_false {
            return RouteStrategy::Unicast(sharding);
        }
        if sharding.len() == 1 || self.rule.is_all_binding_tables(&sharding) {
            RouteStrategy::Standard(sharding)
        } else {
            RouteStrategy::Complex(sharding)
        }
    }

    fn route_cursor(
        &self,
        statement: &BoundStatement,
        session: Option<&SessionContext>,
    ) -> Result<RouteContext> {
        let name = statement.cursor_name.clone().unwrap_or_default();
        let declared = session.and_then(|s| s.cursor(&name)).ok_or_else(|| {
            ShardingError::unroutable(
                statement.category().to_string(),
                &[],
                format!("cursor '{}' is not declared in this session", name),
            )
        })?;
        let mut route = declared.clone();
        route.route_type = RouteType::Cursor;
        Ok(route)
    }

    fn broadcast_tables_of(&self, statement: &BoundStatement) -> Vec<String> {
        logical_tables(statement)
            .into_iter()
            .filter(|t| self.rule.is_broadcast_table(t))
            .collect()
    }

    /// Rejects tables that would stay on their logical name next to sharding tables.
    fn check_mixed_tables(&self, statement: &BoundStatement, tables: &[String]) -> Result<()> {
        let stray: Vec<String> = logical_tables(statement)
            .into_iter()
            .filter(|t| !self.rule.is_sharding_table(t) && !self.rule.is_broadcast_table(t))
            .collect();
        if stray.is_empty() {
            return Ok(());
        }
        let mut involved = tables.to_vec();
        involved.extend(stray.iter().cloned());
        Err(ShardingError::unroutable(
            statement.category().to_string(),
            &involved,
            format!(
                "tables [{}] are neither sharding nor broadcast tables and cannot be combined with sharding tables",
                stray.join(", ")
            ),
        ))
    }
}

/// Source table names without the `DUAL` pseudo table.
fn logical_tables(statement: &BoundStatement) -> Vec<String> {
    statement
        .table_names()
        .into_iter()
        .filter(|t| t != "dual")
        .collect()
}
