use crate::error::Result;
use crate::models::{BoundStatement, OrderByItem, PaginationOperand, PaginationValue, Value};
use crate::services::rewrite::{failure, Edit};

/// Row count sent to every unit when no bound is safe.
pub const MAX_ROW_COUNT: u64 = 2_147_483_647;

/// Pagination changes shared by every unit of a multi-unit query.
#[derive(Debug, Clone, Default)]
pub(super) struct PaginationRewrite {
    pub edits: Vec<Edit>,
    /// Parameter index to replacement value.
    pub overrides: Vec<(usize, Value)>,
}

impl PaginationRewrite {
    pub fn parameter(&self, index: usize) -> Option<&Value> {
        self.overrides
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, value)| value)
    }

    fn set(&mut self, target: &PaginationValue, value: u64) {
        match target.operand {
            PaginationOperand::Literal(_) => self.edits.push(Edit::new(target.span, value.to_string())),
            PaginationOperand::Parameter(index) => {
                self.overrides.push((index, Value::Integer(value as i64)))
            }
        }
    }
}

/// Each unit must return the first `offset + row_count` rows: the offset
/// becomes 0 and the row count absorbs it. Grouping that the shard does not
/// return in a shard-independent group order needs every row.
pub(super) fn rewrite(statement: &BoundStatement, parameters: &[Value]) -> Result<PaginationRewrite> {
    let mut rewrite = PaginationRewrite::default();
    let Some(select) = &statement.select else {
        return Ok(rewrite);
    };
    let Some(segment) = &select.pagination else {
        return Ok(rewrite);
    };

    let resolve = |value: &PaginationValue| {
        value
            .resolve(parameters)
            .ok_or_else(|| failure(&statement.sql, "pagination value is not a bound integer"))
    };
    let offset = match &segment.offset {
        Some(value) => resolve(value)?,
        None => 0,
    };
    if let Some(value) = &segment.offset {
        if offset != 0 {
            rewrite.set(value, 0);
        }
    }
    if let Some(value) = &segment.row_count {
        let row_count = resolve(value)?;
        let unbounded = select.distinct
            || (!select.group_by.is_empty() && !same_items(&select.group_by, &select.order_by));
        let rewritten = if unbounded {
            MAX_ROW_COUNT
        } else {
            offset.saturating_add(row_count).min(MAX_ROW_COUNT)
        };
        if rewritten != row_count {
            rewrite.set(value, rewritten);
        }
    }
    Ok(rewrite)
}

/// GROUP BY and ORDER BY name the same items. Without an ORDER BY a shard
/// returns its groups in no particular order, so nothing matches.
fn same_items(group_by: &[OrderByItem], order_by: &[OrderByItem]) -> bool {
    group_by.len() == order_by.len()
        && group_by
            .iter()
            .zip(order_by)
            .all(|(g, o)| g.text.eq_ignore_ascii_case(&o.text) && g.direction == o.direction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::StatementBinder;
    use crate::models::DatabaseType;

    fn rewrite_sql(sql: &str, database_type: DatabaseType, parameters: &[Value]) -> PaginationRewrite {
        let statement = StatementBinder::bind(sql, database_type).unwrap();
        rewrite(&statement, parameters).unwrap()
    }

    #[test]
    fn test_literal_limit_absorbs_offset() {
        let rewrite = rewrite_sql("SELECT * FROM t_order LIMIT 7, 5", DatabaseType::MySql, &[]);
        let texts: Vec<&str> = rewrite.edits.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["0", "12"]);
        assert!(rewrite.overrides.is_empty());
    }

    #[test]
    fn test_parameter_limit_is_overridden() {
        let rewrite = rewrite_sql(
            "SELECT * FROM t_order LIMIT $1 OFFSET $2",
            DatabaseType::PostgreSql,
            &[Value::Integer(5), Value::Integer(20)],
        );
        assert!(rewrite.edits.is_empty());
        assert_eq!(rewrite.parameter(0), Some(&Value::Integer(25)));
        assert_eq!(rewrite.parameter(1), Some(&Value::Integer(0)));
    }

    #[test]
    fn test_mismatched_group_and_order_fetch_everything() {
        let rewrite = rewrite_sql(
            "SELECT user_id, COUNT(*) FROM t_order GROUP BY user_id ORDER BY COUNT(*) DESC LIMIT 10",
            DatabaseType::MySql,
            &[],
        );
        assert_eq!(rewrite.edits[0].text, MAX_ROW_COUNT.to_string());

        let rewrite = rewrite_sql(
            "SELECT user_id, COUNT(*) FROM t_order GROUP BY user_id LIMIT 10",
            DatabaseType::MySql,
            &[],
        );
        assert_eq!(rewrite.edits[0].text, MAX_ROW_COUNT.to_string());

        let rewrite = rewrite_sql(
            "SELECT user_id, COUNT(*) FROM t_order GROUP BY user_id ORDER BY user_id LIMIT 5, 10",
            DatabaseType::MySql,
            &[],
        );
        let texts: Vec<&str> = rewrite.edits.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["0", "15"]);
    }

    #[test]
    fn test_group_by_without_order_by_parameter_fetches_everything() {
        let rewrite = rewrite_sql(
            "SELECT user_id, COUNT(*) FROM t_order GROUP BY user_id LIMIT $1",
            DatabaseType::PostgreSql,
            &[Value::Integer(2)],
        );
        assert_eq!(rewrite.parameter(0), Some(&Value::Integer(MAX_ROW_COUNT as i64)));
    }

    #[test]
    fn test_unbound_pagination_parameter_fails() {
        let statement =
            StatementBinder::bind("SELECT * FROM t_order LIMIT ?", DatabaseType::MySql).unwrap();
        assert!(rewrite(&statement, &[]).is_err());
    }
}
