use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::error::{Result, ShardingError};
use crate::models::{DatabaseType, SqlSpan};

/// A significant token with its byte span in the original SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub span: SqlSpan,
    /// Bound parameter position for placeholder tokens.
    pub parameter: Option<usize>,
}

impl Lexeme {
    /// Unquoted word matching `keyword`, case-insensitively.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        match &self.token {
            Token::Word(w) => w.quote_style.is_none() && w.value.eq_ignore_ascii_case(keyword),
            _ => false,
        }
    }

    pub fn is_any_keyword(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.is_keyword(k))
    }

    /// Identifier text and quote character for word tokens.
    pub fn word(&self) -> Option<(&str, Option<char>)> {
        match &self.token {
            Token::Word(w) => Some((w.value.as_str(), w.quote_style)),
            _ => None,
        }
    }

    pub fn is_word(&self) -> bool {
        matches!(self.token, Token::Word(_))
    }

    pub fn is(&self, token: &Token) -> bool {
        &self.token == token
    }
}

/// Tokenizes `sql` and drops whitespace and comments, keeping byte spans.
pub fn tokenize(sql: &str, database_type: DatabaseType) -> Result<Vec<Lexeme>> {
    let dialect: Box<dyn Dialect> = match database_type {
        DatabaseType::MySql => Box::new(MySqlDialect {}),
        DatabaseType::PostgreSql => Box::new(PostgreSqlDialect {}),
    };
    let tokens = Tokenizer::new(dialect.as_ref(), sql)
        .tokenize_with_location()
        .map_err(|e| ShardingError::InvalidSql(format!("SQL tokenizing error: {}", e)))?;

    let index = OffsetIndex::new(sql);
    let starts: Vec<usize> = tokens
        .iter()
        .map(|t| index.offset(t.span.start.line, t.span.start.column))
        .collect();

    let mut lexemes = Vec::with_capacity(tokens.len());
    let mut positional = 0usize;
    for (i, token) in tokens.into_iter().enumerate() {
        if matches!(token.token, Token::Whitespace(_) | Token::EOF) {
            continue;
        }
        let start = starts[i];
        let stop = starts.get(i + 1).copied().unwrap_or(sql.len()).max(start);
        let parameter = placeholder_text(&token.token).map(|text| {
            match text.strip_prefix('$').and_then(|n| n.parse::<usize>().ok()) {
                Some(n) if n > 0 => n - 1,
                _ => {
                    positional += 1;
                    positional - 1
                }
            }
        });
        lexemes.push(Lexeme {
            token: token.token,
            span: SqlSpan::new(start, stop),
            parameter,
        });
    }
    Ok(lexemes)
}

/// Placeholder text for `?`, `?1`, `$1` style markers.
pub fn placeholder_text(token: &Token) -> Option<String> {
    match token {
        Token::Placeholder(text) => Some(text.clone()),
        other if other.to_string() == "?" => Some("?".to_string()),
        _ => None,
    }
}

/// Maps the tokenizer's one-based (line, column-in-characters) locations to byte offsets.
struct OffsetIndex {
    char_offsets: Vec<usize>,
    line_starts: Vec<usize>,
    len: usize,
}

impl OffsetIndex {
    fn new(sql: &str) -> Self {
        let mut char_offsets = Vec::with_capacity(sql.len());
        let mut line_starts = vec![0];
        for (char_index, (byte, c)) in sql.char_indices().enumerate() {
            char_offsets.push(byte);
            if c == '\n' {
                line_starts.push(char_index + 1);
            }
        }
        Self {
            char_offsets,
            line_starts,
            len: sql.len(),
        }
    }

    fn offset(&self, line: u64, column: u64) -> usize {
        if line == 0 || column == 0 {
            return self.len;
        }
        let Some(line_start) = self.line_starts.get(line as usize - 1) else {
            return self.len;
        };
        self.char_offsets
            .get(line_start + column as usize - 1)
            .copied()
            .unwrap_or(self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_cover_tokens() {
        let sql = "SELECT name FROM t_order WHERE id = ?";
        let lexemes = tokenize(sql, DatabaseType::MySql).unwrap();
        let texts: Vec<&str> = lexemes.iter().map(|l| l.span.slice(sql)).collect();
        assert_eq!(texts, vec!["SELECT", "name", "FROM", "t_order", "WHERE", "id", "=", "?"]);
        assert_eq!(lexemes[7].parameter, Some(0));
    }

    #[test]
    fn test_spans_across_lines_and_multibyte_text() {
        let sql = "SELECT 'héllo'\n  FROM `t_order`";
        let lexemes = tokenize(sql, DatabaseType::MySql).unwrap();
        let texts: Vec<&str> = lexemes.iter().map(|l| l.span.slice(sql)).collect();
        assert_eq!(texts, vec!["SELECT", "'héllo'", "FROM", "`t_order`"]);
        assert_eq!(lexemes[3].word(), Some(("t_order", Some('`'))));
    }

    #[test]
    fn test_comments_are_skipped() {
        let sql = "SELECT /* hint */ a -- trailing\nFROM t";
        let lexemes = tokenize(sql, DatabaseType::MySql).unwrap();
        assert_eq!(lexemes.len(), 4);
        assert_eq!(lexemes[1].span.slice(sql), "a");
        assert!(lexemes[2].is_keyword("from"));
    }

    #[test]
    fn test_dollar_placeholders() {
        let sql = "SELECT * FROM t WHERE a = $2 AND b = $1";
        let lexemes = tokenize(sql, DatabaseType::PostgreSql).unwrap();
        let params: Vec<usize> = lexemes.iter().filter_map(|l| l.parameter).collect();
        assert_eq!(params, vec![1, 0]);
    }
}
