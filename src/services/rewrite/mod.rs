// SQL Rewrite Engine

mod insert;
mod pagination;
mod projection;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::{Result, ShardingError};
use crate::models::{
    BoundStatement, GeneratedKeyContext, MergeContext, PlaceholderStyle, RouteContext, RouteUnit,
    SqlRewriteUnit, SqlSpan, Value,
};

pub use pagination::MAX_ROW_COUNT;

use pagination::PaginationRewrite;
use projection::DerivedProjections;

/// Per-unit SQL plus the merge plan for recombining their results.
#[derive(Debug, Clone, Serialize)]
pub struct RewriteResult {
    pub units: Vec<SqlRewriteUnit>,
    pub merge: MergeContext,
}

/// Replacement of `span` in the original SQL. Zero-width spans insert.
#[derive(Debug, Clone, PartialEq)]
struct Edit {
    span: SqlSpan,
    text: String,
}

impl Edit {
    fn new(span: SqlSpan, text: impl Into<String>) -> Self {
        Self {
            span,
            text: text.into(),
        }
    }
}

pub struct SqlRewriter<'a> {
    statement: &'a BoundStatement,
    parameters: &'a [Value],
}

impl<'a> SqlRewriter<'a> {
    pub fn new(statement: &'a BoundStatement, parameters: &'a [Value]) -> Self {
        Self {
            statement,
            parameters,
        }
    }

    /// Produces one rewrite unit per route unit, in route order.
    pub fn rewrite(
        &self,
        route: &RouteContext,
        generated_keys: Option<&GeneratedKeyContext>,
    ) -> Result<RewriteResult> {
        self.check_parameters()?;
        self.check_spans()?;

        let multi_unit = route.len() > 1;
        let derived = match (&self.statement.select, multi_unit) {
            (Some(select), true) => projection::derive(select),
            _ => DerivedProjections::default(),
        };
        let pagination = if multi_unit {
            pagination::rewrite(self.statement, self.parameters)?
        } else {
            PaginationRewrite::default()
        };
        let key_edits = match generated_keys {
            Some(keys) => insert::generated_key_edits(self.statement, keys)?,
            None => Vec::new(),
        };
        let merge = projection::merge_context(self.statement, route.len(), &derived, self.parameters)?;

        let mut units = Vec::with_capacity(route.len());
        for (index, unit) in route.units().enumerate() {
            let rewritten = self.rewrite_unit(
                unit,
                route.rows_for(index),
                &derived,
                &pagination,
                &key_edits,
            )?;
            debug!("Rewrote SQL for {}: {}", rewritten.data_source, rewritten.sql);
            units.push(rewritten);
        }
        Ok(RewriteResult { units, merge })
    }

    fn rewrite_unit(
        &self,
        unit: &RouteUnit,
        rows: Option<&[usize]>,
        derived: &DerivedProjections,
        pagination: &PaginationRewrite,
        key_edits: &[Edit],
    ) -> Result<SqlRewriteUnit> {
        let statement = self.statement;
        let sql = &statement.sql;
        let dropped = insert::dropped_rows(statement, rows);
        let mut edits: Vec<Edit> = key_edits.to_vec();
        edits.extend(pagination.edits.iter().cloned());

        for table in &statement.tables {
            let Some(actual) = unit.find_actual_table(&table.logic_name()) else {
                continue;
            };
            if actual.eq_ignore_ascii_case(&table.name) {
                continue;
            }
            edits.push(Edit::new(table.span, quote(actual, table.quote)));
        }

        let mut parameters = Vec::new();
        let mut renumbered: IndexMap<usize, usize> = IndexMap::new();
        for marker in &statement.parameter_markers {
            if dropped.iter().any(|row| row.contains(&marker.span)) {
                continue;
            }
            let value = pagination
                .parameter(marker.index)
                .or_else(|| self.parameters.get(marker.index))
                .cloned()
                .ok_or_else(|| failure(sql, format!("parameter {} is not bound", marker.index + 1)))?;
            match statement.placeholder_style {
                PlaceholderStyle::Question => parameters.push(value),
                PlaceholderStyle::Dollar => {
                    let next = renumbered.len();
                    let position = *renumbered.entry(marker.index).or_insert_with(|| {
                        parameters.push(value);
                        next
                    });
                    if position != marker.index {
                        edits.push(Edit::new(marker.span, format!("${}", position + 1)));
                    }
                }
            }
        }

        if let Some(text) = derived.render(unit) {
            let end = statement
                .select
                .as_ref()
                .map(|s| s.projection_end)
                .unwrap_or_default();
            edits.push(Edit::new(SqlSpan::point(end), text));
        }

        if let Some(kept) = rows {
            if let Some(values) = insert::split_values(statement, kept, &mut edits)? {
                edits.push(values);
            }
        }

        let rewritten = render(sql, SqlSpan::new(0, sql.len()), edits)?;
        Ok(SqlRewriteUnit::new(unit.data_source.clone(), rewritten, parameters))
    }

    /// Bound parameter count must match the placeholders, and every marker
    /// must still point at its placeholder text.
    fn check_parameters(&self) -> Result<()> {
        let statement = self.statement;
        let sql = &statement.sql;
        let expected = match statement.placeholder_style {
            PlaceholderStyle::Question => statement.parameter_markers.len(),
            PlaceholderStyle::Dollar => statement
                .parameter_markers
                .iter()
                .map(|m| m.index + 1)
                .max()
                .unwrap_or(0),
        };
        if expected != self.parameters.len() {
            return Err(failure(
                sql,
                format!(
                    "statement has {} parameter(s) but {} were bound",
                    expected,
                    self.parameters.len()
                ),
            ));
        }
        for marker in &statement.parameter_markers {
            marker.span.validate(sql).map_err(|e| failure(sql, e))?;
            let text = marker.span.slice(sql);
            let matches = match statement.placeholder_style {
                PlaceholderStyle::Question => text == "?",
                PlaceholderStyle::Dollar => text == format!("${}", marker.index + 1),
            };
            if !matches {
                return Err(failure(
                    sql,
                    format!("parameter marker at {} reads '{}'", marker.span.start, text),
                ));
            }
        }
        Ok(())
    }

    fn check_spans(&self) -> Result<()> {
        let sql = &self.statement.sql;
        for table in &self.statement.tables {
            table.span.validate(sql).map_err(|e| failure(sql, e))?;
            let text = table
                .span
                .slice(sql)
                .trim_matches(|c| matches!(c, '`' | '"' | '[' | ']'));
            if !text.eq_ignore_ascii_case(&table.name) {
                return Err(failure(
                    sql,
                    format!("table span {}..{} reads '{}', expected '{}'", table.span.start, table.span.stop, text, table.name),
                ));
            }
        }
        Ok(())
    }
}

fn failure(sql: &str, reason: impl Into<String>) -> ShardingError {
    let reason = reason.into();
    error!("SQL rewrite failed: {} (sql: {})", reason, sql);
    ShardingError::rewrite(sql, reason)
}

fn quote(name: &str, quote: Option<char>) -> String {
    match quote {
        Some('[') => format!("[{}]", name),
        Some(q) => format!("{}{}{}", q, name, q),
        None => name.to_string(),
    }
}

/// Renders `range` of `sql` with the edits inside it applied.
fn render(sql: &str, range: SqlSpan, mut edits: Vec<Edit>) -> Result<String> {
    range.validate(sql).map_err(|e| failure(sql, e))?;
    edits.sort_by_key(|e| (e.span.start, e.span.stop));
    edits.dedup_by(|b, a| !a.span.is_empty() && a == b);

    let mut out = String::with_capacity(range.len() + 32);
    let mut cursor = range.start;
    for edit in edits {
        edit.span.validate(sql).map_err(|e| failure(sql, e))?;
        if !range.contains(&edit.span) {
            return Err(failure(sql, "rewrite edit falls outside its fragment"));
        }
        if edit.span.start < cursor {
            return Err(failure(
                sql,
                format!("overlapping rewrite edits at offset {}", edit.span.start),
            ));
        }
        out.push_str(SqlSpan::new(cursor, edit.span.start).slice(sql));
        out.push_str(&edit.text);
        cursor = edit.span.stop;
    }
    out.push_str(SqlSpan::new(cursor, range.stop).slice(sql));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::StatementBinder;
    use crate::models::{DatabaseType, MergeStrategy, RouteMapper, RouteType};

    fn bind(sql: &str) -> BoundStatement {
        StatementBinder::bind(sql, DatabaseType::MySql).unwrap()
    }

    fn route(units: &[(&str, &str, &str)]) -> RouteContext {
        let mut route = RouteContext::new(RouteType::Standard);
        for (ds, logic, actual) in units {
            route.add_unit(RouteUnit::new(*ds, vec![RouteMapper::new(*logic, *actual)]));
        }
        route
    }

    #[test]
    fn test_single_unit_renames_tables_only() {
        let sql = "SELECT `t_order`.order_id FROM `t_order` WHERE user_id = ? AND order_id = 2";
        let statement = bind(sql);
        let params = vec![Value::Integer(1)];
        let result = SqlRewriter::new(&statement, &params)
            .rewrite(&route(&[("ds_1", "t_order", "t_order_0")]), None)
            .unwrap();
        assert_eq!(result.units.len(), 1);
        assert_eq!(
            result.units[0].sql,
            "SELECT `t_order_0`.order_id FROM `t_order_0` WHERE user_id = ? AND order_id = 2"
        );
        assert_eq!(result.units[0].parameters, params);
        assert_eq!(result.merge.strategy, MergeStrategy::PassThrough);
    }

    #[test]
    fn test_identity_mapping_keeps_text() {
        let sql = "select * from T_CONFIG where id = 1";
        let statement = bind(sql);
        let result = SqlRewriter::new(&statement, &[])
            .rewrite(&route(&[("ds_0", "t_config", "t_config"), ("ds_1", "t_config", "t_config")]), None)
            .unwrap();
        assert!(result.units.iter().all(|u| u.sql == sql));
    }

    #[test]
    fn test_insert_rows_split_per_unit() {
        let sql = "INSERT INTO t_order (user_id, order_id) VALUES (?, ?), (?, ?), (?, ?), (?, ?)";
        let statement = bind(sql);
        let params: Vec<Value> = (1..=8).map(Value::Integer).collect();
        let mut route = RouteContext::new(RouteType::Standard);
        let ds_0 = RouteUnit::new("ds_0", vec![RouteMapper::new("t_order", "t_order_0")]);
        let ds_1 = RouteUnit::new("ds_1", vec![RouteMapper::new("t_order", "t_order_1")]);
        route.assign_row(ds_0.clone(), 0);
        route.assign_row(ds_1.clone(), 1);
        route.assign_row(ds_0, 2);
        route.assign_row(ds_1, 3);

        let result = SqlRewriter::new(&statement, &params).rewrite(&route, None).unwrap();
        assert_eq!(
            result.units[0].sql,
            "INSERT INTO t_order_0 (user_id, order_id) VALUES (?, ?), (?, ?)"
        );
        assert_eq!(
            result.units[0].parameters,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(5), Value::Integer(6)]
        );
        assert_eq!(
            result.units[1].sql,
            "INSERT INTO t_order_1 (user_id, order_id) VALUES (?, ?), (?, ?)"
        );
        assert_eq!(
            result.units[1].parameters,
            vec![Value::Integer(3), Value::Integer(4), Value::Integer(7), Value::Integer(8)]
        );
        assert_eq!(result.merge.strategy, MergeStrategy::Concat);
    }

    #[test]
    fn test_dollar_parameters_renumbered_after_split() {
        let sql = "INSERT INTO t_order (user_id, order_id) VALUES ($1, $2), ($3, $4)";
        let statement = StatementBinder::bind(sql, DatabaseType::PostgreSql).unwrap();
        let params: Vec<Value> = (1..=4).map(Value::Integer).collect();
        let mut route = RouteContext::new(RouteType::Standard);
        route.assign_row(RouteUnit::new("ds_0", vec![RouteMapper::new("t_order", "t_order_0")]), 0);
        route.assign_row(RouteUnit::new("ds_1", vec![RouteMapper::new("t_order", "t_order_1")]), 1);

        let result = SqlRewriter::new(&statement, &params).rewrite(&route, None).unwrap();
        assert_eq!(
            result.units[0].sql,
            "INSERT INTO t_order_0 (user_id, order_id) VALUES ($1, $2)"
        );
        assert_eq!(
            result.units[1].sql,
            "INSERT INTO t_order_1 (user_id, order_id) VALUES ($1, $2)"
        );
        assert_eq!(result.units[1].parameters, vec![Value::Integer(3), Value::Integer(4)]);
    }

    #[test]
    fn test_generated_keys_appended_to_rows() {
        let sql = "INSERT INTO t_order (user_id, status) VALUES (1, 'A'), (2, 'B')";
        let statement = bind(sql);
        let keys = GeneratedKeyContext {
            table: "t_order".to_string(),
            column: "order_id".to_string(),
            values: vec![Value::Integer(10), Value::Integer(11)],
        };
        let mut route = RouteContext::new(RouteType::Standard);
        route.assign_row(RouteUnit::new("ds_1", vec![RouteMapper::new("t_order", "t_order_0")]), 0);
        route.assign_row(RouteUnit::new("ds_0", vec![RouteMapper::new("t_order", "t_order_1")]), 1);

        let result = SqlRewriter::new(&statement, &[]).rewrite(&route, Some(&keys)).unwrap();
        assert_eq!(
            result.units[0].sql,
            "INSERT INTO t_order_0 (user_id, status, order_id) VALUES (1, 'A', 10)"
        );
        assert_eq!(
            result.units[1].sql,
            "INSERT INTO t_order_1 (user_id, status, order_id) VALUES (2, 'B', 11)"
        );
    }

    #[test]
    fn test_multi_unit_pagination_and_avg() {
        let sql = "SELECT user_id, AVG(amount) FROM t_order GROUP BY user_id LIMIT 7, 5";
        let statement = bind(sql);
        let result = SqlRewriter::new(&statement, &[])
            .rewrite(&route(&[("ds_0", "t_order", "t_order_0"), ("ds_1", "t_order", "t_order_1")]), None)
            .unwrap();
        assert_eq!(
            result.units[1].sql,
            "SELECT user_id, AVG(amount), COUNT(amount) AS AVG_DERIVED_COUNT_0, SUM(amount) AS AVG_DERIVED_SUM_0 FROM t_order_1 GROUP BY user_id LIMIT 0, 2147483647"
        );
        assert_eq!(result.merge.strategy, MergeStrategy::GroupBy);
        assert_eq!(
            result.merge.pagination.map(|p| (p.offset, p.row_count)),
            Some((7, Some(5)))
        );
    }

    #[test]
    fn test_parameter_count_mismatch_fails() {
        let statement = bind("SELECT * FROM t_order WHERE user_id = ? AND order_id = ?");
        let err = SqlRewriter::new(&statement, &[Value::Integer(1)])
            .rewrite(&route(&[("ds_0", "t_order", "t_order_0")]), None)
            .unwrap_err();
        assert!(matches!(err, ShardingError::RewriteFailure { .. }));
    }

    #[test]
    fn test_overlapping_edits_fail() {
        let sql = "SELECT 1";
        let edits = vec![
            Edit::new(SqlSpan::new(0, 6), "select"),
            Edit::new(SqlSpan::new(3, 8), "x"),
        ];
        assert!(render(sql, SqlSpan::new(0, sql.len()), edits).is_err());
        let edits = vec![Edit::new(SqlSpan::point(8), " AS one")];
        assert_eq!(render(sql, SqlSpan::new(0, sql.len()), edits).unwrap(), "SELECT 1 AS one");
    }
}
