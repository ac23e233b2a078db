// Statement Binder
//
// Turns SQL text into a `BoundStatement`: statement kind, table occurrences with
// byte spans, parameter markers, the WHERE predicate tree and the SELECT/INSERT
// shapes the router, rewriter and merger work from.

mod dml;
pub mod lexer;
mod predicate;
mod select;
mod utility;

use sqlparser::tokenizer::Token;

use crate::error::{Result, ShardingError};
use crate::models::{
    BoundStatement, ColumnRef, DatabaseType, ParameterMarker, PlaceholderStyle, Predicate, SqlSpan,
    TableRole, TableSegment,
};

pub use lexer::Lexeme;

/// Words that end an expression or table reference and therefore never act as an alias.
const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "ORDER", "BY", "HAVING", "LIMIT", "OFFSET", "UNION",
    "INTERSECT", "EXCEPT", "ALL", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL",
    "OUTER", "STRAIGHT_JOIN", "ON", "USING", "SET", "VALUES", "VALUE", "AND", "OR", "NOT", "AS",
    "INTO", "FOR", "LOCK", "WINDOW", "FETCH", "RETURNING", "USE", "FORCE", "IGNORE", "PARTITION",
    "END", "WHEN", "THEN", "ELSE", "ASC", "DESC", "IS", "IN", "LIKE", "BETWEEN", "NULL", "CASE",
    "ESCAPE", "COLLATE", "WITH", "ONLY", "DUPLICATE", "TRUE", "FALSE", "DISTINCT",
];

pub struct StatementBinder;

impl StatementBinder {
    /// Binds a single SQL statement for the given dialect.
    pub fn bind(sql: &str, database_type: DatabaseType) -> Result<BoundStatement> {
        let lexemes = lexer::tokenize(sql, database_type)?;
        if lexemes.iter().all(|l| l.is(&Token::SemiColon)) {
            return Err(ShardingError::InvalidSql("Empty SQL statement".to_string()));
        }
        let mut binder = Binder::new(sql, database_type, lexemes);
        let statement = binder.bind_statement()?;
        binder.finish(statement)
    }
}

/// Cursor over the lexemes of one statement plus everything collected so far.
pub(crate) struct Binder<'a> {
    sql: &'a str,
    database_type: DatabaseType,
    lexemes: Vec<Lexeme>,
    pos: usize,
    tables: Vec<TableSegment>,
    /// Spans of `schema.table` references, excluded when scanning column owners.
    table_ref_spans: Vec<SqlSpan>,
    cte_names: Vec<String>,
    has_subquery: bool,
}

impl<'a> Binder<'a> {
    fn new(sql: &'a str, database_type: DatabaseType, lexemes: Vec<Lexeme>) -> Self {
        Self {
            sql,
            database_type,
            lexemes,
            pos: 0,
            tables: Vec::new(),
            table_ref_spans: Vec::new(),
            cte_names: Vec::new(),
            has_subquery: false,
        }
    }

    fn bind_statement(&mut self) -> Result<BoundStatement> {
        let Some(first) = self.peek() else {
            return Err(ShardingError::InvalidSql("Empty SQL statement".to_string()));
        };
        let keyword = match first.word() {
            Some((word, None)) => word.to_ascii_uppercase(),
            _ => return Err(self.unexpected()),
        };
        match keyword.as_str() {
            "SELECT" => self.bind_select_statement(),
            "WITH" => self.bind_with_statement(),
            "INSERT" | "REPLACE" => self.bind_insert(),
            "UPDATE" => self.bind_update(),
            "DELETE" => self.bind_delete(),
            "CREATE" => self.bind_create(),
            "ALTER" => self.bind_alter(),
            "DROP" => self.bind_drop(),
            "TRUNCATE" => self.bind_truncate(),
            "RENAME" => self.bind_rename(),
            "COMMENT" => self.bind_comment(),
            "USE" | "SET" | "RESET" | "SHOW" | "DESC" | "DESCRIBE" | "EXPLAIN" | "OPTIMIZE"
            | "ANALYZE" | "LOAD" => self.bind_dal(&keyword),
            "GRANT" | "REVOKE" => self.bind_grant_or_revoke(&keyword),
            "BEGIN" | "START" | "COMMIT" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" | "END" | "ABORT" => {
                self.bind_tcl()
            }
            "DECLARE" | "FETCH" | "MOVE" | "CLOSE" => self.bind_cursor(&keyword),
            other => Err(ShardingError::InvalidSql(format!(
                "Unsupported statement type: {}",
                other
            ))),
        }
    }

    fn bind_with_statement(&mut self) -> Result<BoundStatement> {
        self.expect_keyword("WITH")?;
        self.eat_keyword("RECURSIVE");
        loop {
            let name = self.parse_word()?;
            self.cte_names.push(name);
            if self.at_token(&Token::LParen) {
                self.skip_group()?;
            }
            self.expect_keyword("AS")?;
            self.eat_keyword("NOT");
            self.eat_keyword("MATERIALIZED");
            self.parse_subquery()?;
            if !self.eat_token(&Token::Comma) {
                break;
            }
        }
        if self.at_keyword("SELECT") {
            self.bind_select_statement()
        } else if self.at_any_keyword(&["INSERT", "REPLACE"]) {
            self.bind_insert()
        } else if self.at_keyword("UPDATE") {
            self.bind_update()
        } else if self.at_keyword("DELETE") {
            self.bind_delete()
        } else {
            Err(self.unexpected())
        }
    }

    fn finish(mut self, mut statement: BoundStatement) -> Result<BoundStatement> {
        let mut separated = false;
        while self.eat_token(&Token::SemiColon) {
            separated = true;
        }
        if self.pos < self.lexemes.len() {
            return Err(if separated {
                ShardingError::InvalidSql("Multiple statements are not supported".to_string())
            } else {
                self.unexpected()
            });
        }

        let cte_names = std::mem::take(&mut self.cte_names);
        self.tables
            .retain(|t| !cte_names.iter().any(|c| c.eq_ignore_ascii_case(&t.name)));
        let owners = self.column_owners();
        statement.tables = std::mem::take(&mut self.tables);
        statement.tables.extend(owners);

        let mut style = PlaceholderStyle::Question;
        for lexeme in &self.lexemes {
            let Some(index) = lexeme.parameter else {
                continue;
            };
            if lexer::placeholder_text(&lexeme.token).is_some_and(|t| t.starts_with('$')) {
                style = PlaceholderStyle::Dollar;
            }
            statement.parameter_markers.push(ParameterMarker {
                span: lexeme.span,
                index,
            });
        }
        statement.placeholder_style = style;
        if let Some(select) = statement.select.as_mut() {
            select.has_subquery = self.has_subquery;
        }
        Ok(statement)
    }

    /// Qualifiers like `t_order.user_id` that name a source table directly (not via alias).
    fn column_owners(&self) -> Vec<TableSegment> {
        let mut owners = Vec::new();
        let lexemes = &self.lexemes;
        for i in 0..lexemes.len() {
            if i > 0 && lexemes[i - 1].is(&Token::Period) {
                continue;
            }
            if !Self::is_qualified_at(lexemes, i) {
                continue;
            }
            let (owner_index, schema) = if Self::is_qualified_at(lexemes, i + 2) {
                (i + 2, lexemes[i].word().map(|(w, _)| w.to_string()))
            } else {
                (i, None)
            };
            let owner = &lexemes[owner_index];
            if self.table_ref_spans.iter().any(|s| s.contains(&owner.span)) {
                continue;
            }
            let Some((name, quote)) = owner.word() else {
                continue;
            };
            let sources = || self.tables.iter().filter(|t| t.role == TableRole::Source);
            let aliased = sources().any(|t| {
                t.alias
                    .as_deref()
                    .is_some_and(|alias| alias.eq_ignore_ascii_case(name))
            });
            if aliased || !sources().any(|t| t.name.eq_ignore_ascii_case(name)) {
                continue;
            }
            owners.push(TableSegment {
                name: name.to_string(),
                schema,
                alias: None,
                span: owner.span,
                quote,
                role: TableRole::ColumnOwner,
            });
        }
        owners
    }

    /// `word . (word | *)` starting at `i`.
    fn is_qualified_at(lexemes: &[Lexeme], i: usize) -> bool {
        let (Some(a), Some(dot), Some(b)) = (lexemes.get(i), lexemes.get(i + 1), lexemes.get(i + 2))
        else {
            return false;
        };
        a.is_word() && dot.is(&Token::Period) && (b.is_word() || b.is(&Token::Mul))
    }

    // Cursor helpers

    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Lexeme> {
        self.lexemes.get(self.pos + offset)
    }

    fn advance(&mut self) {
        if self.pos < self.lexemes.len() {
            self.pos += 1;
        }
    }

    /// End of input or a statement separator.
    fn at_end(&self) -> bool {
        self.peek().map_or(true, |l| l.is(&Token::SemiColon))
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.peek().is_some_and(|l| l.is_keyword(keyword))
    }

    fn at_any_keyword(&self, keywords: &[&str]) -> bool {
        self.peek().is_some_and(|l| l.is_any_keyword(keywords))
    }

    fn keyword_at(&self, offset: usize, keyword: &str) -> bool {
        self.peek_at(offset).is_some_and(|l| l.is_keyword(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_any_keyword(&mut self, keywords: &[&str]) -> bool {
        if self.at_any_keyword(keywords) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consumes the whole keyword sequence or nothing.
    fn eat_keywords(&mut self, keywords: &[&str]) -> bool {
        let matched = keywords
            .iter()
            .enumerate()
            .all(|(i, k)| self.keyword_at(i, k));
        if matched {
            self.pos += keywords.len();
        }
        matched
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.expected(keyword))
        }
    }

    fn at_token(&self, token: &Token) -> bool {
        self.peek().is_some_and(|l| l.is(token))
    }

    fn eat_token(&mut self, token: &Token) -> bool {
        if self.at_token(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_token(&mut self, token: &Token) -> Result<()> {
        if self.eat_token(token) {
            Ok(())
        } else {
            Err(self.expected(&token.to_string()))
        }
    }

    fn at_subquery(&self) -> bool {
        self.at_token(&Token::LParen)
            && self
                .peek_at(1)
                .is_some_and(|l| l.is_any_keyword(&["SELECT", "WITH"]))
    }

    fn unexpected(&self) -> ShardingError {
        match self.peek() {
            Some(lexeme) => ShardingError::InvalidSql(format!(
                "Unexpected token '{}' at offset {}",
                lexeme.span.slice(self.sql),
                lexeme.span.start
            )),
            None => ShardingError::InvalidSql("Unexpected end of statement".to_string()),
        }
    }

    fn expected(&self, what: &str) -> ShardingError {
        match self.peek() {
            Some(lexeme) => ShardingError::InvalidSql(format!(
                "Expected {} but found '{}' at offset {}",
                what,
                lexeme.span.slice(self.sql),
                lexeme.span.start
            )),
            None => ShardingError::InvalidSql(format!("Expected {} but statement ended", what)),
        }
    }

    /// Source text of lexemes `[start, end)`.
    fn text(&self, start: usize, end: usize) -> String {
        if end <= start || end > self.lexemes.len() {
            return String::new();
        }
        SqlSpan::new(self.lexemes[start].span.start, self.lexemes[end - 1].span.stop)
            .slice(self.sql)
            .to_string()
    }

    fn skip_to_end(&mut self) {
        while !self.at_end() {
            self.advance();
        }
    }

    /// Skips the rest of a clause: up to the statement end or an unbalanced `)`.
    fn skip_clause(&mut self) -> Result<()> {
        while !self.at_end() && !self.at_token(&Token::RParen) {
            if self.at_token(&Token::LParen) {
                self.skip_group()?;
            } else {
                self.advance();
            }
        }
        Ok(())
    }

    /// Skips a balanced parenthesized group, binding any subquery inside it.
    fn skip_group(&mut self) -> Result<()> {
        if self.at_subquery() {
            return self.parse_subquery();
        }
        self.expect_token(&Token::LParen)?;
        let mut depth = 1usize;
        while depth > 0 {
            if self.peek().is_none() {
                return Err(self.expected(")"));
            }
            if self.at_subquery() {
                self.parse_subquery()?;
                continue;
            }
            if self.at_token(&Token::LParen) {
                depth += 1;
            } else if self.at_token(&Token::RParen) {
                depth -= 1;
            }
            self.advance();
        }
        Ok(())
    }

    /// `( SELECT ... )` anywhere inside the statement.
    fn parse_subquery(&mut self) -> Result<()> {
        self.expect_token(&Token::LParen)?;
        self.has_subquery = true;
        if self.at_keyword("WITH") {
            self.bind_with_statement()?;
        } else if self.at_subquery() {
            self.parse_subquery()?;
        } else {
            self.parse_select()?;
        }
        self.expect_token(&Token::RParen)
    }

    // Identifiers and tables

    fn parse_word(&mut self) -> Result<String> {
        match self.peek().and_then(|l| l.word()) {
            Some((word, _)) => {
                let word = word.to_string();
                self.advance();
                Ok(word)
            }
            None => Err(self.expected("identifier")),
        }
    }

    /// `a`, `a.b` or `a.b.c` as (text, quote, span) parts.
    fn parse_identifier_chain(&mut self) -> Result<Vec<(String, Option<char>, SqlSpan)>> {
        let mut parts = Vec::new();
        loop {
            let Some(lexeme) = self.peek() else {
                return Err(self.expected("identifier"));
            };
            let Some((word, quote)) = lexeme.word() else {
                return Err(self.expected("identifier"));
            };
            parts.push((word.to_string(), quote, lexeme.span));
            self.advance();
            if self.at_token(&Token::Period) && self.peek_at(1).is_some_and(|l| l.is_word()) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(parts)
    }

    fn parse_column_ref(&mut self) -> Result<ColumnRef> {
        let parts = self.parse_identifier_chain()?;
        let name = parts.last().map(|p| p.0.clone()).unwrap_or_default();
        let owner = parts.len().checked_sub(2).map(|i| parts[i].0.clone());
        Ok(ColumnRef { owner, name })
    }

    /// Table name in source position, recorded as a table occurrence. Returns its index.
    fn parse_table_name(&mut self) -> Result<usize> {
        let parts = self.parse_identifier_chain()?;
        Ok(self.push_table(parts))
    }

    fn push_table(&mut self, parts: Vec<(String, Option<char>, SqlSpan)>) -> usize {
        let (Some(first), Some(last)) = (parts.first(), parts.last()) else {
            return self.tables.len();
        };
        self.table_ref_spans
            .push(SqlSpan::new(first.2.start, last.2.stop));
        let schema = parts.len().checked_sub(2).map(|i| parts[i].0.clone());
        let (name, quote, span) = last.clone();
        self.tables.push(TableSegment {
            name,
            schema,
            alias: None,
            span,
            quote,
            role: TableRole::Source,
        });
        self.tables.len() - 1
    }

    fn parse_alias(&mut self) -> Result<Option<String>> {
        if self.eat_keyword("AS") {
            return self.parse_word().map(Some);
        }
        let alias = match self.peek().and_then(|l| l.word()) {
            Some((word, Some(_))) => word.to_string(),
            Some((word, None)) if !is_reserved(word) => word.to_string(),
            _ => return Ok(None),
        };
        self.advance();
        Ok(Some(alias))
    }

    /// One FROM item: a table, a derived table, or a parenthesized join.
    /// Returns the ON predicates of inner joins it contains.
    fn parse_table_factor(&mut self) -> Result<Vec<Predicate>> {
        self.eat_keyword("LATERAL");
        if self.at_subquery() {
            self.parse_subquery()?;
            self.parse_alias()?;
            if self.at_token(&Token::LParen) {
                self.skip_group()?;
            }
            return Ok(Vec::new());
        }
        if self.eat_token(&Token::LParen) {
            let joins = self.parse_table_refs()?;
            self.expect_token(&Token::RParen)?;
            self.parse_alias()?;
            return Ok(joins);
        }
        self.eat_keyword("ONLY");
        let index = self.parse_table_name()?;
        if self.at_token(&Token::LParen) {
            // table function, e.g. generate_series(1, 10)
            self.tables.truncate(index);
            self.table_ref_spans.pop();
            self.skip_group()?;
            self.parse_alias()?;
            return Ok(Vec::new());
        }
        if self.eat_keyword("PARTITION") {
            self.skip_group()?;
        }
        let alias = self.parse_alias()?;
        if let Some(table) = self.tables.get_mut(index) {
            table.alias = alias;
        }
        while self.at_any_keyword(&["USE", "FORCE", "IGNORE"])
            && self.peek_at(1).is_some_and(|l| l.is_any_keyword(&["INDEX", "KEY"]))
        {
            self.pos += 2;
            if self.eat_keyword("FOR") {
                self.eat_keywords(&["GROUP", "BY"]);
                self.eat_keywords(&["ORDER", "BY"]);
                self.eat_keyword("JOIN");
            }
            self.skip_group()?;
        }
        Ok(Vec::new())
    }

    /// Comma and JOIN separated table references.
    fn parse_table_refs(&mut self) -> Result<Vec<Predicate>> {
        let mut joins = self.parse_table_factor()?;
        loop {
            if self.eat_token(&Token::Comma) {
                joins.extend(self.parse_table_factor()?);
                continue;
            }
            let Some(inner) = self.parse_join_keyword()? else {
                break;
            };
            joins.extend(self.parse_table_factor()?);
            if self.eat_keyword("ON") {
                let predicate = self.parse_or()?;
                if inner {
                    joins.push(predicate);
                }
            } else if self.eat_keyword("USING") {
                self.skip_group()?;
            }
        }
        Ok(joins)
    }

    /// Consumes a join keyword sequence; `Some(true)` for inner joins.
    fn parse_join_keyword(&mut self) -> Result<Option<bool>> {
        let start = self.pos;
        self.eat_keyword("NATURAL");
        if self.eat_keyword("JOIN") || self.eat_keyword("STRAIGHT_JOIN") {
            return Ok(Some(true));
        }
        if self.eat_any_keyword(&["INNER", "CROSS"]) {
            self.expect_keyword("JOIN")?;
            return Ok(Some(true));
        }
        if self.eat_any_keyword(&["LEFT", "RIGHT", "FULL"]) {
            self.eat_keyword("OUTER");
            self.expect_keyword("JOIN")?;
            return Ok(Some(false));
        }
        self.pos = start;
        Ok(None)
    }

    /// Conjunction of the optional WHERE predicate and inner-join conditions.
    fn combine_predicate(filter: Option<Predicate>, joins: Vec<Predicate>) -> Option<Predicate> {
        let mut items: Vec<Predicate> = filter.into_iter().collect();
        items.extend(joins);
        match items.len() {
            0 => None,
            1 => items.pop(),
            _ => Some(Predicate::And(items)),
        }
    }
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StatementKind, TableRole};

    #[test]
    fn test_bind_rejects_empty_and_multiple_statements() {
        assert!(StatementBinder::bind("  ; ", DatabaseType::MySql).is_err());
        let err = StatementBinder::bind("SELECT 1; SELECT 2", DatabaseType::MySql).unwrap_err();
        assert!(err.to_string().contains("Multiple statements"));
        assert!(StatementBinder::bind("SELECT 1;", DatabaseType::MySql).is_ok());
    }

    #[test]
    fn test_bind_rejects_unknown_statement() {
        let err = StatementBinder::bind("FROBNICATE t", DatabaseType::MySql).unwrap_err();
        assert!(matches!(err, ShardingError::InvalidSql(_)));
    }

    #[test]
    fn test_column_owner_segments() {
        let sql = "SELECT t_order.order_id, i.item_id FROM t_order JOIN t_order_item i ON t_order.order_id = i.order_id";
        let statement = StatementBinder::bind(sql, DatabaseType::MySql).unwrap();
        let owners: Vec<&TableSegment> = statement
            .tables
            .iter()
            .filter(|t| t.role == TableRole::ColumnOwner)
            .collect();
        assert_eq!(owners.len(), 2);
        assert!(owners.iter().all(|o| o.span.slice(sql) == "t_order"));
        assert_eq!(statement.table_names(), vec!["t_order", "t_order_item"]);
    }

    #[test]
    fn test_schema_qualified_table_is_not_an_owner() {
        let sql = "SELECT * FROM db1.t_order WHERE db1.t_order.user_id = 1";
        let statement = StatementBinder::bind(sql, DatabaseType::MySql).unwrap();
        let source = &statement.tables[0];
        assert_eq!(source.schema.as_deref(), Some("db1"));
        assert_eq!(source.span.slice(sql), "t_order");
        let owner = statement
            .tables
            .iter()
            .find(|t| t.role == TableRole::ColumnOwner)
            .unwrap();
        assert_eq!(owner.schema.as_deref(), Some("db1"));
        assert_eq!(owner.span.start, sql.rfind("t_order").unwrap());
    }

    #[test]
    fn test_cte_names_are_not_tables() {
        let sql = "WITH recent AS (SELECT order_id FROM t_order WHERE user_id = 1) SELECT * FROM recent";
        let statement = StatementBinder::bind(sql, DatabaseType::PostgreSql).unwrap();
        assert_eq!(statement.kind, StatementKind::Dql);
        assert_eq!(statement.table_names(), vec!["t_order"]);
    }

    #[test]
    fn test_parameter_markers_and_style() {
        let statement =
            StatementBinder::bind("SELECT * FROM t WHERE a = $1 AND b = $2", DatabaseType::PostgreSql)
                .unwrap();
        assert_eq!(statement.placeholder_style, PlaceholderStyle::Dollar);
        assert_eq!(statement.parameter_count(), 2);

        let statement =
            StatementBinder::bind("SELECT * FROM t WHERE a = ? AND b = ?", DatabaseType::MySql).unwrap();
        assert_eq!(statement.placeholder_style, PlaceholderStyle::Question);
        let indexes: Vec<usize> = statement.parameter_markers.iter().map(|m| m.index).collect();
        assert_eq!(indexes, vec![0, 1]);
    }
}
