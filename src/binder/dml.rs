use sqlparser::tokenizer::Token;

use crate::binder::Binder;
use crate::error::{Result, ShardingError};
use crate::models::{
    Assignment, BoundStatement, DmlKind, InsertForm, InsertRow, InsertStatement, Operand,
    Predicate, SqlSpan, StatementKind,
};

impl<'a> Binder<'a> {
    /// `INSERT`/`REPLACE` with VALUES rows, MySQL SET assignments, or a SELECT source.
    pub(super) fn bind_insert(&mut self) -> Result<BoundStatement> {
        self.advance();
        while self.eat_any_keyword(&["LOW_PRIORITY", "DELAYED", "HIGH_PRIORITY", "IGNORE"]) {}
        self.eat_keyword("INTO");
        let table_index = self.parse_table_name()?;
        if self.eat_keyword("AS") {
            let alias = self.parse_word()?;
            if let Some(table) = self.tables.get_mut(table_index) {
                table.alias = Some(alias);
            }
        }
        let table = self
            .tables
            .get(table_index)
            .map(|t| t.logic_name())
            .unwrap_or_default();

        let mut columns = Vec::new();
        let mut column_list_end = None;
        if self.at_token(&Token::LParen) && !self.at_subquery() {
            self.advance();
            loop {
                columns.push(self.parse_column_ref()?.name);
                if !self.eat_token(&Token::Comma) {
                    break;
                }
            }
            column_list_end = self.peek().map(|l| l.span.start);
            self.expect_token(&Token::RParen)?;
        }

        let mut statement =
            BoundStatement::new(self.sql, self.database_type, StatementKind::Dml(DmlKind::Insert));
        let mut rows = Vec::new();
        let form = if self.eat_any_keyword(&["VALUES", "VALUE"]) {
            loop {
                rows.push(self.parse_insert_row()?);
                if !self.eat_token(&Token::Comma) {
                    break;
                }
            }
            let span = match (rows.first(), rows.last()) {
                (Some(first), Some(last)) => SqlSpan::new(first.span.start, last.span.stop),
                _ => return Err(self.expected("VALUES row")),
            };
            InsertForm::Values { span }
        } else if self.eat_keyword("SET") {
            let start = self.peek().map(|l| l.span.start).unwrap_or(self.sql.len());
            let assignments = self.parse_assignments()?;
            let end = self.previous_stop();
            columns = assignments.iter().map(|a| a.column.name.clone()).collect();
            rows.push(InsertRow {
                span: SqlSpan::new(start, end),
                values: assignments.into_iter().map(|a| a.value).collect(),
            });
            InsertForm::Set { end }
        } else if self.at_keyword("SELECT") || self.at_subquery() || self.at_keyword("WITH") {
            if self.at_keyword("SELECT") {
                self.parse_select()?;
            } else if self.at_keyword("WITH") {
                self.bind_with_statement()?;
            } else {
                self.parse_subquery()?;
            }
            InsertForm::Select
        } else if self.at_keyword("DEFAULT") {
            return Err(ShardingError::InvalidSql(
                "INSERT ... DEFAULT VALUES is not supported".to_string(),
            ));
        } else {
            return Err(self.expected("VALUES, SET or SELECT"));
        };

        if self.eat_keywords(&["ON", "DUPLICATE", "KEY", "UPDATE"]) {
            statement.assignments = self.parse_assignments()?;
        }
        if self.at_keyword("ON") || self.at_keyword("RETURNING") {
            self.skip_clause()?;
        }

        statement.insert = Some(InsertStatement {
            table,
            columns,
            column_list_end,
            form,
            rows,
        });
        Ok(statement)
    }

    fn parse_insert_row(&mut self) -> Result<InsertRow> {
        let start = match self.peek() {
            Some(l) if l.is(&Token::LParen) => l.span.start,
            _ => return Err(self.expected("(")),
        };
        self.advance();
        let mut values = Vec::new();
        if !self.at_token(&Token::RParen) {
            loop {
                if self.eat_keyword("DEFAULT") {
                    values.push(Operand::Expression);
                } else {
                    values.push(self.parse_operand()?);
                }
                if !self.eat_token(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect_token(&Token::RParen)?;
        Ok(InsertRow {
            span: SqlSpan::new(start, self.previous_stop()),
            values,
        })
    }

    pub(super) fn bind_update(&mut self) -> Result<BoundStatement> {
        self.expect_keyword("UPDATE")?;
        while self.eat_any_keyword(&["LOW_PRIORITY", "IGNORE"]) {}
        let mut joins = self.parse_table_refs()?;
        self.expect_keyword("SET")?;
        let assignments = self.parse_assignments()?;
        if self.eat_keyword("FROM") {
            joins.extend(self.parse_table_refs()?);
        }
        let filter = self.parse_where()?;
        self.parse_dml_tail()?;

        let mut statement =
            BoundStatement::new(self.sql, self.database_type, StatementKind::Dml(DmlKind::Update));
        statement.assignments = assignments;
        statement.predicate = Self::combine_predicate(filter, joins);
        Ok(statement)
    }

    /// Single-table and MySQL multi-table `DELETE`, plus PostgreSQL `USING`.
    pub(super) fn bind_delete(&mut self) -> Result<BoundStatement> {
        self.expect_keyword("DELETE")?;
        while self.eat_any_keyword(&["LOW_PRIORITY", "QUICK", "IGNORE"]) {}

        let mut targets = Vec::new();
        if !self.at_keyword("FROM") {
            loop {
                let parts = self.parse_identifier_chain()?;
                if self.eat_token(&Token::Period) {
                    self.expect_token(&Token::Mul)?;
                }
                targets.push(parts);
                if !self.eat_token(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect_keyword("FROM")?;

        let first_source = self.tables.len();
        let mut joins = self.parse_table_refs()?;
        if self.eat_keyword("USING") {
            joins.extend(self.parse_table_refs()?);
        }
        for parts in targets {
            let Some((name, _, _)) = parts.last() else {
                continue;
            };
            let is_alias = self.tables[first_source..].iter().any(|t| {
                t.alias
                    .as_deref()
                    .is_some_and(|alias| alias.eq_ignore_ascii_case(name))
            });
            if !is_alias {
                self.push_table(parts);
            }
        }

        let filter = self.parse_where()?;
        self.parse_dml_tail()?;

        let mut statement =
            BoundStatement::new(self.sql, self.database_type, StatementKind::Dml(DmlKind::Delete));
        statement.predicate = Self::combine_predicate(filter, joins);
        Ok(statement)
    }

    fn parse_where(&mut self) -> Result<Option<Predicate>> {
        if self.eat_keyword("WHERE") {
            Ok(Some(self.parse_or()?))
        } else {
            Ok(None)
        }
    }

    /// Trailing ORDER BY / LIMIT / RETURNING of UPDATE and DELETE; not rewritten.
    fn parse_dml_tail(&mut self) -> Result<()> {
        if self.eat_keywords(&["ORDER", "BY"]) {
            self.parse_order_items()?;
        }
        self.parse_pagination()?;
        if self.eat_keyword("RETURNING") {
            self.skip_clause()?;
        }
        Ok(())
    }

    pub(super) fn parse_assignments(&mut self) -> Result<Vec<Assignment>> {
        let mut assignments = Vec::new();
        loop {
            let column = self.parse_column_ref()?;
            self.expect_token(&Token::Eq)?;
            let value = if self.eat_keyword("DEFAULT") {
                Operand::Expression
            } else {
                self.parse_operand()?
            };
            assignments.push(Assignment { column, value });
            if !self.eat_token(&Token::Comma) {
                break;
            }
        }
        Ok(assignments)
    }

    /// Stop offset of the last consumed lexeme.
    fn previous_stop(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.lexemes.get(i))
            .map(|l| l.span.stop)
            .unwrap_or(0)
    }
}
