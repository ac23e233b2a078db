use sqlparser::tokenizer::Token;

use crate::binder::{is_reserved, Binder, Lexeme};
use crate::error::Result;
use crate::models::{
    AggregateFunction, AggregateProjection, BoundStatement, ColumnRef, OrderByItem, OrderDirection,
    OrderExpression, Operand, PaginationOperand, PaginationSegment, PaginationValue, Predicate,
    Projection, ProjectionKind, SelectStatement, SqlSpan, StatementKind,
};

/// Keywords that close a projection item at nesting depth zero.
const PROJECTION_END: &[&str] = &[
    "FROM", "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET", "FETCH", "UNION", "INTERSECT",
    "EXCEPT", "INTO", "FOR", "WINDOW", "LOCK",
];

impl<'a> Binder<'a> {
    pub(super) fn bind_select_statement(&mut self) -> Result<BoundStatement> {
        let (select, predicate) = self.parse_select()?;
        let mut statement = BoundStatement::new(self.sql, self.database_type, StatementKind::Dql);
        statement.predicate = predicate;
        statement.select = Some(select);
        Ok(statement)
    }

    /// One query block starting at SELECT, including trailing set operations,
    /// ORDER BY, pagination and locking clauses.
    pub(super) fn parse_select(&mut self) -> Result<(SelectStatement, Option<Predicate>)> {
        self.expect_keyword("SELECT")?;
        let mut select = SelectStatement::default();
        loop {
            if self.eat_any_keyword(&["DISTINCT", "DISTINCTROW"]) {
                select.distinct = true;
                if self.eat_keyword("ON") {
                    self.skip_group()?;
                }
            } else if !self.eat_any_keyword(&[
                "ALL",
                "HIGH_PRIORITY",
                "STRAIGHT_JOIN",
                "SQL_SMALL_RESULT",
                "SQL_BIG_RESULT",
                "SQL_BUFFER_RESULT",
                "SQL_NO_CACHE",
                "SQL_CACHE",
                "SQL_CALC_FOUND_ROWS",
            ]) {
                break;
            }
        }

        select.projections = self.parse_projections()?;
        select.projection_end = select.projections.last().map(|p| p.span.stop).unwrap_or(0);

        let mut joins = Vec::new();
        if self.eat_keyword("FROM") {
            joins = self.parse_table_refs()?;
        }
        let filter = if self.eat_keyword("WHERE") {
            Some(self.parse_or()?)
        } else {
            None
        };
        let mut predicate = Self::combine_predicate(filter, joins);

        if self.eat_keywords(&["GROUP", "BY"]) {
            select.group_by = self.parse_order_items()?;
            self.eat_keywords(&["WITH", "ROLLUP"]);
        }
        if self.eat_keyword("HAVING") {
            self.parse_or()?;
            select.having = true;
        }
        if self.eat_keyword("WINDOW") {
            self.skip_clause_until(&["ORDER", "LIMIT", "OFFSET", "FETCH", "UNION", "FOR"])?;
        }

        if self.eat_any_keyword(&["UNION", "INTERSECT", "EXCEPT"]) {
            select.has_union = true;
            self.eat_any_keyword(&["ALL", "DISTINCT"]);
            let (other, other_predicate) = if self.at_subquery() {
                self.advance();
                let parsed = self.parse_select()?;
                self.expect_token(&Token::RParen)?;
                parsed
            } else {
                self.parse_select()?
            };
            predicate = Some(Predicate::Or(vec![
                predicate.unwrap_or(Predicate::Opaque),
                other_predicate.unwrap_or(Predicate::Opaque),
            ]));
            if select.order_by.is_empty() {
                select.order_by = other.order_by;
            }
            if select.pagination.is_none() {
                select.pagination = other.pagination;
            }
        }

        if self.eat_keywords(&["ORDER", "BY"]) {
            select.order_by = self.parse_order_items()?;
        }
        if let Some(pagination) = self.parse_pagination()? {
            select.pagination = Some(pagination);
        }
        if self.at_keyword("FOR") || self.eat_keywords(&["LOCK", "IN", "SHARE", "MODE"]) {
            self.skip_clause()?;
        }
        Ok((select, predicate))
    }

    fn skip_clause_until(&mut self, keywords: &[&str]) -> Result<()> {
        while !self.at_end() && !self.at_token(&Token::RParen) && !self.at_any_keyword(keywords) {
            if self.at_token(&Token::LParen) {
                self.skip_group()?;
            } else {
                self.advance();
            }
        }
        Ok(())
    }

    fn parse_projections(&mut self) -> Result<Vec<Projection>> {
        let mut projections = Vec::new();
        loop {
            let start = self.pos;
            self.skip_projection_item()?;
            if self.pos == start {
                return Err(self.expected("projection"));
            }
            projections.push(self.classify_projection(start, self.pos));
            if !self.eat_token(&Token::Comma) {
                break;
            }
        }
        Ok(projections)
    }

    fn skip_projection_item(&mut self) -> Result<()> {
        while !self.at_end() {
            let ends_item = self.peek().is_some_and(|l| {
                l.is(&Token::Comma) || l.is(&Token::RParen) || l.is_any_keyword(PROJECTION_END)
            });
            if ends_item {
                break;
            }
            if self.at_token(&Token::LParen) {
                self.skip_group()?;
            } else if self.at_keyword("CASE") {
                self.parse_operand()?;
            } else {
                self.advance();
            }
        }
        Ok(())
    }

    fn classify_projection(&self, start: usize, end: usize) -> Projection {
        let items = &self.lexemes[start..end];
        let n = items.len();
        let (expr_len, alias) = if n >= 3 && items[n - 2].is_keyword("AS") {
            (n - 2, items[n - 1].word().map(|(w, _)| w.to_string()))
        } else if n >= 2 && is_implicit_alias(&items[n - 2], &items[n - 1]) {
            (n - 1, items[n - 1].word().map(|(w, _)| w.to_string()))
        } else {
            (n, None)
        };
        let expression = &items[..expr_len];
        let kind = projection_kind(self.sql, expression);
        Projection {
            kind,
            alias,
            text: self.text(start, start + expr_len),
            span: SqlSpan::new(items[0].span.start, items[n - 1].span.stop),
        }
    }

    pub(super) fn parse_order_items(&mut self) -> Result<Vec<OrderByItem>> {
        let mut items = Vec::new();
        loop {
            let start = self.pos;
            let operand = self.parse_operand()?;
            let end = self.pos;
            let position = match (&self.lexemes[start].token, end - start) {
                (Token::Number(n, _), 1) => n.parse::<usize>().ok(),
                _ => None,
            };
            let expression = match (position, operand) {
                (Some(position), _) => OrderExpression::Position(position),
                (None, Operand::Column(column)) => OrderExpression::Column(column),
                _ => OrderExpression::Expression,
            };
            let direction = if self.eat_keyword("DESC") {
                OrderDirection::Desc
            } else {
                self.eat_keyword("ASC");
                OrderDirection::Asc
            };
            if self.eat_keyword("NULLS") {
                self.eat_any_keyword(&["FIRST", "LAST"]);
            }
            items.push(OrderByItem {
                expression,
                direction,
                text: self.text(start, end),
            });
            if !self.eat_token(&Token::Comma) {
                break;
            }
        }
        Ok(items)
    }

    /// MySQL `LIMIT [offset,] count`, `LIMIT count OFFSET offset`, and
    /// PostgreSQL `OFFSET n ROWS FETCH FIRST m ROWS ONLY`.
    pub(super) fn parse_pagination(&mut self) -> Result<Option<PaginationSegment>> {
        let mut segment = PaginationSegment::default();
        let mut found = false;
        loop {
            if self.eat_keyword("LIMIT") {
                found = true;
                if !self.eat_keyword("ALL") {
                    let first = self.parse_pagination_value()?;
                    if self.eat_token(&Token::Comma) {
                        segment.offset = Some(first);
                        segment.row_count = Some(self.parse_pagination_value()?);
                    } else {
                        segment.row_count = Some(first);
                    }
                }
            } else if self.eat_keyword("OFFSET") {
                found = true;
                segment.offset = Some(self.parse_pagination_value()?);
                self.eat_any_keyword(&["ROW", "ROWS"]);
            } else if self.at_keyword("FETCH")
                && self.peek_at(1).is_some_and(|l| l.is_any_keyword(&["FIRST", "NEXT"]))
            {
                found = true;
                self.pos += 2;
                if !self.at_any_keyword(&["ROW", "ROWS"]) {
                    segment.row_count = Some(self.parse_pagination_value()?);
                }
                self.eat_any_keyword(&["ROW", "ROWS"]);
                if !self.eat_keyword("ONLY") {
                    self.eat_keywords(&["WITH", "TIES"]);
                }
            } else {
                break;
            }
        }
        Ok(found.then_some(segment))
    }

    fn parse_pagination_value(&mut self) -> Result<PaginationValue> {
        let Some(lexeme) = self.peek() else {
            return Err(self.expected("row count"));
        };
        let operand = match (&lexeme.token, lexeme.parameter) {
            (_, Some(index)) => PaginationOperand::Parameter(index),
            (Token::Number(n, _), None) => match n.parse::<u64>() {
                Ok(v) => PaginationOperand::Literal(v),
                Err(_) => return Err(self.expected("non-negative integer")),
            },
            _ => return Err(self.expected("row count")),
        };
        let span = lexeme.span;
        self.advance();
        Ok(PaginationValue { span, operand })
    }
}

/// `expr alias` without AS: the alias is a non-reserved word after a complete expression.
fn is_implicit_alias(before: &Lexeme, last: &Lexeme) -> bool {
    let alias_ok = match last.word() {
        Some((_, Some(_))) => true,
        Some((word, None)) => !is_reserved(word),
        None => false,
    };
    let ends_expression = match &before.token {
        Token::Word(w) => w.quote_style.is_some() || !is_reserved(&w.value) || w.value.eq_ignore_ascii_case("END"),
        Token::Number(_, _) | Token::SingleQuotedString(_) | Token::RParen => true,
        _ => false,
    };
    alias_ok && ends_expression
}

fn projection_kind(sql: &str, expression: &[Lexeme]) -> ProjectionKind {
    match expression {
        [star] if star.is(&Token::Mul) => return ProjectionKind::Star { owner: None },
        [owner, dot, star] if dot.is(&Token::Period) && star.is(&Token::Mul) => {
            return ProjectionKind::Star {
                owner: owner.word().map(|(w, _)| w.to_string()),
            }
        }
        _ => {}
    }
    if let Some(column) = column_chain(expression) {
        return ProjectionKind::Column(column);
    }
    if let Some(aggregate) = aggregate(sql, expression) {
        return ProjectionKind::Aggregate(aggregate);
    }
    ProjectionKind::Expression
}

/// `a`, `t.a` or `s.t.a` spanning the whole slice.
pub(super) fn column_chain(items: &[Lexeme]) -> Option<ColumnRef> {
    if items.is_empty() || items.len() % 2 == 0 || items.len() > 5 {
        return None;
    }
    let mut words = Vec::new();
    for (i, item) in items.iter().enumerate() {
        if i % 2 == 0 {
            let (word, quote) = item.word()?;
            if quote.is_none() && is_reserved(word) {
                return None;
            }
            words.push(word.to_string());
        } else if !item.is(&Token::Period) {
            return None;
        }
    }
    let name = words.pop()?;
    Some(ColumnRef {
        owner: words.pop(),
        name,
    })
}

fn aggregate(sql: &str, items: &[Lexeme]) -> Option<AggregateProjection> {
    let [name, open, .., close] = items else {
        return None;
    };
    let (word, None) = name.word()? else {
        return None;
    };
    let function = AggregateFunction::from_name(word)?;
    if !open.is(&Token::LParen) || !close.is(&Token::RParen) {
        return None;
    }
    // the opening parenthesis must close at the end of the item
    let mut depth = 0usize;
    for (i, item) in items.iter().enumerate().skip(1) {
        if item.is(&Token::LParen) {
            depth += 1;
        } else if item.is(&Token::RParen) {
            depth -= 1;
            if depth == 0 && i != items.len() - 1 {
                return None;
            }
        }
    }
    let mut inner = &items[2..items.len() - 1];
    let distinct = inner.first().is_some_and(|l| l.is_keyword("DISTINCT"));
    if distinct {
        inner = &inner[1..];
    }
    let (first, last) = (inner.first()?, inner.last()?);
    Some(AggregateProjection {
        function,
        distinct,
        argument: SqlSpan::new(first.span.start, last.span.stop).slice(sql).to_string(),
        argument_column: column_chain(inner),
    })
}
