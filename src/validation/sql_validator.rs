use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

use crate::error::{Result, ShardingError};
use crate::models::DatabaseType;

/// Parse checks on SQL text with the sqlparser dialect of the target database.
pub struct SqlValidator;

impl SqlValidator {
    /// Parses `sql`, which must hold exactly one statement.
    pub fn parse(sql: &str, database_type: DatabaseType) -> Result<Statement> {
        let dialect = Self::dialect(database_type);
        let mut statements = Parser::new(dialect.as_ref())
            .try_with_sql(sql)
            .and_then(|mut parser| parser.parse_statements())
            .map_err(|e| ShardingError::InvalidSql(format!("SQL parsing error: {}", e)))?;

        match statements.len() {
            0 => Err(ShardingError::InvalidSql("Empty SQL statement".to_string())),
            1 => Ok(statements.remove(0)),
            n => Err(ShardingError::InvalidSql(format!(
                "Expected a single statement, found {}",
                n
            ))),
        }
    }

    /// Rewritten SQL must stay parseable whenever the original was.
    /// Statements the dialect parser does not cover are not checked.
    pub fn check_rewritten(original: &str, rewritten: &str, database_type: DatabaseType) -> Result<()> {
        if original == rewritten || Self::parse(original, database_type).is_err() {
            return Ok(());
        }
        Self::parse(rewritten, database_type).map(|_| ()).map_err(|e| {
            tracing::error!("Rewritten SQL no longer parses: {} (original: {})", rewritten, original);
            ShardingError::rewrite(original, format!("rewritten SQL does not parse: {}", e))
        })
    }

    fn dialect(database_type: DatabaseType) -> Box<dyn Dialect> {
        match database_type {
            DatabaseType::MySql => Box::new(MySqlDialect {}),
            DatabaseType::PostgreSql => Box::new(PostgreSqlDialect {}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_statement() {
        assert!(matches!(
            SqlValidator::parse("SELECT * FROM t_order_0 WHERE user_id = 1", DatabaseType::MySql),
            Ok(Statement::Query(_))
        ));
        assert!(SqlValidator::parse("SELECT 1; SELECT 2", DatabaseType::MySql).is_err());
        assert!(SqlValidator::parse("", DatabaseType::PostgreSql).is_err());
    }

    #[test]
    fn test_dialect_specific_quoting() {
        assert!(SqlValidator::parse("SELECT `id` FROM `t_order_1`", DatabaseType::MySql).is_ok());
        assert!(SqlValidator::parse("SELECT \"id\" FROM \"t_order_1\" LIMIT $1", DatabaseType::PostgreSql).is_ok());
    }

    #[test]
    fn test_check_rewritten() {
        let original = "SELECT * FROM t_order WHERE user_id = 1";
        assert!(SqlValidator::check_rewritten(
            original,
            "SELECT * FROM t_order_0 WHERE user_id = 1",
            DatabaseType::MySql
        )
        .is_ok());
        let err = SqlValidator::check_rewritten(original, "SELECT * FROM WHERE user_id = 1", DatabaseType::MySql)
            .unwrap_err();
        assert!(matches!(err, ShardingError::RewriteFailure { .. }));
        // originals the parser cannot read are left alone
        assert!(SqlValidator::check_rewritten("FROBNICATE x", "FROBNICATE y", DatabaseType::MySql).is_ok());
    }
}
