use sqlparser::tokenizer::Token;

use crate::binder::Binder;
use crate::error::{Result, ShardingError};
use crate::models::{BoundStatement, CursorKind, DalKind, DclKind, DdlKind, StatementKind};

/// Object keywords that follow CREATE/ALTER/DROP after optional modifiers.
const OBJECT_KEYWORDS: &[&str] = &[
    "TABLE", "INDEX", "VIEW", "FUNCTION", "PROCEDURE", "TABLESPACE", "USER", "DATABASE", "SCHEMA",
    "SEQUENCE", "TRIGGER", "ROLE", "EVENT", "TYPE", "EXTENSION",
];

/// Modifiers may precede the object keyword, e.g. `CREATE OR REPLACE DEFINER = x VIEW`.
const OBJECT_KEYWORD_WINDOW: usize = 12;

impl<'a> Binder<'a> {
    fn statement(&self, kind: StatementKind) -> BoundStatement {
        BoundStatement::new(self.sql, self.database_type, kind)
    }

    /// Advances past the object keyword and returns it upper-cased.
    fn find_object_keyword(&mut self) -> Option<String> {
        for offset in 0..OBJECT_KEYWORD_WINDOW {
            let lexeme = self.peek_at(offset)?;
            if lexeme.is(&Token::SemiColon) {
                return None;
            }
            if lexeme.is_any_keyword(OBJECT_KEYWORDS) {
                let keyword = lexeme.word().map(|(w, _)| w.to_ascii_uppercase());
                self.pos += offset + 1;
                return keyword;
            }
        }
        None
    }

    fn eat_if_exists(&mut self) {
        self.eat_keywords(&["IF", "NOT", "EXISTS"]);
        self.eat_keywords(&["IF", "EXISTS"]);
    }

    /// Skips a DDL body, binding referenced tables, renamed tables and embedded queries.
    fn skip_ddl_body(&mut self) -> Result<()> {
        while !self.at_end() {
            if self.eat_keyword("REFERENCES") {
                self.parse_table_name()?;
            } else if self.at_keyword("RENAME")
                && self.peek_at(1).is_some_and(|l| l.is_any_keyword(&["TO", "AS"]))
            {
                self.pos += 2;
                self.parse_table_name()?;
            } else if self.at_keyword("SELECT") {
                self.parse_select()?;
            } else {
                self.advance();
            }
        }
        Ok(())
    }

    fn parse_table_list(&mut self) -> Result<()> {
        loop {
            self.eat_keyword("ONLY");
            self.parse_table_name()?;
            if !self.eat_token(&Token::Comma) {
                return Ok(());
            }
        }
    }

    pub(super) fn bind_create(&mut self) -> Result<BoundStatement> {
        self.expect_keyword("CREATE")?;
        let object = self.find_object_keyword().unwrap_or_default();
        let kind = match object.as_str() {
            "TABLE" => {
                self.eat_if_exists();
                self.parse_table_name()?;
                if self.eat_keyword("LIKE") {
                    self.parse_table_name()?;
                }
                self.skip_ddl_body()?;
                StatementKind::Ddl(DdlKind::CreateTable)
            }
            "INDEX" => {
                while !self.at_end() && !self.at_keyword("ON") {
                    self.advance();
                }
                self.expect_keyword("ON")?;
                self.eat_keyword("ONLY");
                self.parse_table_name()?;
                self.skip_to_end();
                StatementKind::Ddl(DdlKind::CreateIndex)
            }
            "VIEW" => {
                while !self.at_end() && !self.at_keyword("AS") {
                    self.advance();
                }
                self.expect_keyword("AS")?;
                if self.at_keyword("WITH") {
                    self.bind_with_statement()?;
                } else {
                    self.parse_select()?;
                }
                self.skip_to_end();
                StatementKind::Ddl(DdlKind::CreateView)
            }
            "USER" | "ROLE" => {
                self.skip_to_end();
                StatementKind::Dcl(DclKind::CreateUser)
            }
            other => {
                self.skip_to_end();
                StatementKind::Ddl(routine_kind(other))
            }
        };
        Ok(self.statement(kind))
    }

    pub(super) fn bind_alter(&mut self) -> Result<BoundStatement> {
        self.expect_keyword("ALTER")?;
        let object = self.find_object_keyword().unwrap_or_default();
        let kind = match object.as_str() {
            "TABLE" => {
                self.eat_if_exists();
                self.eat_keyword("ONLY");
                self.parse_table_name()?;
                self.skip_ddl_body()?;
                StatementKind::Ddl(DdlKind::AlterTable)
            }
            "USER" | "ROLE" => {
                self.skip_to_end();
                StatementKind::Dcl(DclKind::AlterUser)
            }
            other => {
                self.skip_to_end();
                StatementKind::Ddl(routine_kind(other))
            }
        };
        Ok(self.statement(kind))
    }

    pub(super) fn bind_drop(&mut self) -> Result<BoundStatement> {
        self.expect_keyword("DROP")?;
        let object = self.find_object_keyword().unwrap_or_default();
        let kind = match object.as_str() {
            "TABLE" => {
                self.eat_if_exists();
                self.parse_table_list()?;
                self.skip_to_end();
                StatementKind::Ddl(DdlKind::DropTable)
            }
            "INDEX" => {
                while !self.at_end() && !self.at_keyword("ON") {
                    self.advance();
                }
                if self.eat_keyword("ON") {
                    self.parse_table_name()?;
                }
                self.skip_to_end();
                StatementKind::Ddl(DdlKind::DropIndex)
            }
            "VIEW" => {
                self.skip_to_end();
                StatementKind::Ddl(DdlKind::DropView)
            }
            "USER" | "ROLE" => {
                self.skip_to_end();
                StatementKind::Dcl(DclKind::DropUser)
            }
            other => {
                self.skip_to_end();
                StatementKind::Ddl(routine_kind(other))
            }
        };
        Ok(self.statement(kind))
    }

    pub(super) fn bind_truncate(&mut self) -> Result<BoundStatement> {
        self.expect_keyword("TRUNCATE")?;
        self.eat_keyword("TABLE");
        self.parse_table_list()?;
        self.skip_to_end();
        Ok(self.statement(StatementKind::Ddl(DdlKind::TruncateTable)))
    }

    /// MySQL `RENAME TABLE a TO b, c TO d` and `RENAME USER`.
    pub(super) fn bind_rename(&mut self) -> Result<BoundStatement> {
        self.expect_keyword("RENAME")?;
        if self.eat_keyword("USER") {
            self.skip_to_end();
            return Ok(self.statement(StatementKind::Dcl(DclKind::RenameUser)));
        }
        self.expect_keyword("TABLE")?;
        loop {
            self.parse_table_name()?;
            self.expect_keyword("TO")?;
            self.parse_table_name()?;
            if !self.eat_token(&Token::Comma) {
                break;
            }
        }
        Ok(self.statement(StatementKind::Ddl(DdlKind::AlterTable)))
    }

    /// PostgreSQL `COMMENT ON TABLE t IS '...'`.
    pub(super) fn bind_comment(&mut self) -> Result<BoundStatement> {
        self.expect_keyword("COMMENT")?;
        self.expect_keyword("ON")?;
        if self.eat_keyword("TABLE") {
            self.parse_table_name()?;
            self.skip_to_end();
            return Ok(self.statement(StatementKind::Ddl(DdlKind::AlterTable)));
        }
        self.skip_to_end();
        Ok(self.statement(StatementKind::Ddl(DdlKind::Other)))
    }

    pub(super) fn bind_dal(&mut self, keyword: &str) -> Result<BoundStatement> {
        self.advance();
        let kind = match keyword {
            "USE" => DalKind::Use,
            "SET" => return self.bind_set(),
            "RESET" => DalKind::Reset,
            "SHOW" => {
                if self.eat_any_keyword(&["DATABASES", "SCHEMAS"]) {
                    DalKind::ShowDatabases
                } else {
                    self.eat_any_keyword(&["FULL", "EXTENDED"]);
                    if self.eat_any_keyword(&["COLUMNS", "FIELDS", "INDEX", "INDEXES", "KEYS"])
                        && self.eat_any_keyword(&["FROM", "IN"])
                    {
                        self.parse_table_name()?;
                    } else if self.eat_keywords(&["CREATE", "TABLE"]) {
                        self.parse_table_name()?;
                    }
                    DalKind::Show
                }
            }
            "DESC" | "DESCRIBE" | "EXPLAIN" => {
                let describes_table = self.peek().is_some_and(|l| {
                    l.is_word()
                        && !l.is_any_keyword(&[
                            "SELECT", "INSERT", "UPDATE", "DELETE", "REPLACE", "WITH", "ANALYZE",
                            "FORMAT", "EXTENDED", "PARTITIONS", "VERBOSE",
                        ])
                });
                if !describes_table {
                    return Err(ShardingError::InvalidSql(
                        "EXPLAIN of a routed statement is not supported".to_string(),
                    ));
                }
                self.parse_table_name()?;
                DalKind::Describe
            }
            "OPTIMIZE" => {
                self.eat_any_keyword(&["NO_WRITE_TO_BINLOG", "LOCAL"]);
                self.expect_keyword("TABLE")?;
                self.parse_table_list()?;
                DalKind::Optimize
            }
            "ANALYZE" => {
                self.eat_any_keyword(&["NO_WRITE_TO_BINLOG", "LOCAL", "VERBOSE"]);
                self.eat_keyword("TABLE");
                if self.peek().is_some_and(|l| l.is_word()) {
                    self.parse_table_list()?;
                }
                DalKind::Analyze
            }
            _ => {
                while !self.at_end() && !self.at_keyword("INTO") {
                    self.advance();
                }
                if self.eat_keyword("INTO") && self.eat_keyword("TABLE") {
                    self.parse_table_name()?;
                }
                DalKind::Load
            }
        };
        self.skip_to_end();
        Ok(self.statement(StatementKind::Dal(kind)))
    }

    /// `SET` covers session variables, transaction settings and passwords.
    fn bind_set(&mut self) -> Result<BoundStatement> {
        self.eat_any_keyword(&["GLOBAL", "SESSION", "LOCAL"]);
        let kind = if self.at_any_keyword(&["TRANSACTION", "AUTOCOMMIT"]) {
            StatementKind::Tcl
        } else if self.at_keyword("PASSWORD") {
            StatementKind::Dcl(DclKind::AlterUser)
        } else {
            StatementKind::Dal(DalKind::Set)
        };
        self.skip_to_end();
        Ok(self.statement(kind))
    }

    /// `GRANT privileges ON object TO grantee` and the matching REVOKE.
    pub(super) fn bind_grant_or_revoke(&mut self, keyword: &str) -> Result<BoundStatement> {
        self.advance();
        let kind = if keyword == "GRANT" {
            DclKind::Grant
        } else {
            DclKind::Revoke
        };
        let mut statement = self.statement(StatementKind::Dcl(kind));
        while !self.at_end() && !self.at_any_keyword(&["ON", "TO", "FROM"]) {
            if self.at_token(&Token::LParen) {
                self.skip_group()?;
            } else {
                self.advance();
            }
        }
        if self.eat_keyword("ON") {
            self.eat_keyword("TABLE");
            if self.eat_keyword("ALL") {
                statement.wildcard_target = true;
            } else if !self.at_any_keyword(&["FUNCTION", "PROCEDURE", "SCHEMA", "DATABASE"]) {
                loop {
                    if self.eat_token(&Token::Mul) {
                        statement.wildcard_target = true;
                        self.eat_token(&Token::Period);
                        self.eat_token(&Token::Mul);
                    } else if self.peek().is_some_and(|l| l.is_word())
                        && self.peek_at(1).is_some_and(|l| l.is(&Token::Period))
                        && self.peek_at(2).is_some_and(|l| l.is(&Token::Mul))
                    {
                        statement.wildcard_target = true;
                        self.pos += 3;
                    } else {
                        self.parse_table_name()?;
                    }
                    if !self.eat_token(&Token::Comma) {
                        break;
                    }
                }
            }
        }
        self.skip_to_end();
        Ok(statement)
    }

    pub(super) fn bind_tcl(&mut self) -> Result<BoundStatement> {
        self.skip_to_end();
        Ok(self.statement(StatementKind::Tcl))
    }

    /// `DECLARE name ... CURSOR ... FOR query`, `FETCH`/`MOVE ... name`, `CLOSE name`.
    pub(super) fn bind_cursor(&mut self, keyword: &str) -> Result<BoundStatement> {
        self.advance();
        if keyword == "DECLARE" {
            let name = self.parse_word()?;
            while !self.at_end() && !self.at_keyword("FOR") {
                self.advance();
            }
            self.expect_keyword("FOR")?;
            let mut statement = if self.at_keyword("WITH") {
                self.bind_with_statement()?
            } else {
                self.bind_select_statement()?
            };
            statement.kind = StatementKind::Cursor(CursorKind::Declare);
            statement.cursor_name = Some(name);
            return Ok(statement);
        }

        let kind = match keyword {
            "FETCH" => CursorKind::Fetch,
            "MOVE" => CursorKind::Move,
            _ => CursorKind::Close,
        };
        let mut name = None;
        while !self.at_end() {
            name = self.peek().and_then(|l| l.word()).map(|(w, _)| w.to_string());
            self.advance();
        }
        let name = name.ok_or_else(|| ShardingError::InvalidSql("Cursor name is missing".to_string()))?;
        let mut statement = self.statement(StatementKind::Cursor(kind));
        statement.cursor_name = Some(name);
        Ok(statement)
    }
}

fn routine_kind(object: &str) -> DdlKind {
    match object {
        "FUNCTION" => DdlKind::Function,
        "PROCEDURE" => DdlKind::Procedure,
        "TABLESPACE" => DdlKind::Tablespace,
        _ => DdlKind::Other,
    }
}
