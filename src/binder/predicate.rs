use rust_decimal::Decimal;
use sqlparser::tokenizer::Token;
use std::str::FromStr;

use crate::binder::Binder;
use crate::error::Result;
use crate::models::{ColumnRef, CompareOp, Operand, Predicate, Value};

impl<'a> Binder<'a> {
    pub(super) fn parse_or(&mut self) -> Result<Predicate> {
        let mut items = vec![self.parse_and()?];
        while self.eat_keyword("OR") {
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Predicate::Or(items)
        })
    }

    fn parse_and(&mut self) -> Result<Predicate> {
        let mut items = vec![self.parse_not()?];
        while self.eat_keyword("AND") {
            items.push(self.parse_not()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Predicate::And(items)
        })
    }

    fn parse_not(&mut self) -> Result<Predicate> {
        if self.eat_keyword("NOT") {
            self.parse_not()?;
            return Ok(Predicate::Opaque);
        }
        if self.eat_keyword("EXISTS") {
            self.parse_subquery()?;
            return Ok(Predicate::Opaque);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Predicate> {
        if self.at_token(&Token::LParen) && !self.at_subquery() {
            let start = self.pos;
            self.advance();
            let inner = self.parse_or()?;
            if self.eat_token(&Token::RParen) {
                if self.at_comparison_tail() {
                    return self.parse_comparison_tail(Operand::Expression);
                }
                return Ok(inner);
            }
            // row constructor, e.g. (a, b) IN ((1, 2))
            self.pos = start;
            self.skip_group()?;
            return self.parse_comparison_tail(Operand::Expression);
        }
        let left = self.parse_operand()?;
        self.parse_comparison_tail(left)
    }

    fn at_comparison_tail(&self) -> bool {
        self.peek().is_some_and(|l| {
            compare_op(&l.token).is_some()
                || is_binary_operator(&l.token)
                || l.is(&Token::Spaceship)
                || l.is_any_keyword(&[
                    "IN", "NOT", "BETWEEN", "LIKE", "ILIKE", "REGEXP", "RLIKE", "SIMILAR", "IS",
                ])
        })
    }

    /// Everything after the left operand of a comparison.
    fn parse_comparison_tail(&mut self, left: Operand) -> Result<Predicate> {
        let left = self.continue_operand(left)?;
        if let Some(op) = self.peek().and_then(|l| compare_op(&l.token)) {
            self.advance();
            if self.eat_any_keyword(&["ANY", "ALL", "SOME"]) {
                self.skip_group()?;
                return Ok(Predicate::Opaque);
            }
            let right = self.parse_operand()?;
            return Ok(compare(left, op, right));
        }
        if self.eat_token(&Token::Spaceship) {
            self.parse_operand()?;
            return Ok(Predicate::Opaque);
        }

        let negated = self.at_keyword("NOT")
            && self.peek_at(1).is_some_and(|l| {
                l.is_any_keyword(&["IN", "BETWEEN", "LIKE", "ILIKE", "REGEXP", "RLIKE", "SIMILAR"])
            });
        if negated {
            self.advance();
        }

        if self.eat_keyword("IN") {
            if self.at_subquery() {
                self.parse_subquery()?;
                return Ok(Predicate::Opaque);
            }
            self.expect_token(&Token::LParen)?;
            let mut list = Vec::new();
            if !self.at_token(&Token::RParen) {
                loop {
                    list.push(self.parse_operand()?);
                    if !self.eat_token(&Token::Comma) {
                        break;
                    }
                }
            }
            self.expect_token(&Token::RParen)?;
            if as_column(&left).is_none() {
                return Ok(Predicate::Opaque);
            }
            return Ok(Predicate::In {
                column: left,
                list,
                negated,
            });
        }
        if self.eat_keyword("BETWEEN") {
            self.eat_keyword("SYMMETRIC");
            let low = self.parse_operand()?;
            self.expect_keyword("AND")?;
            let high = self.parse_operand()?;
            if as_column(&left).is_none() {
                return Ok(Predicate::Opaque);
            }
            return Ok(Predicate::Between {
                column: left,
                low,
                high,
                negated,
            });
        }
        if self.eat_any_keyword(&["LIKE", "ILIKE", "REGEXP", "RLIKE"]) {
            self.parse_operand()?;
            if self.eat_keyword("ESCAPE") {
                self.parse_operand()?;
            }
            return Ok(Predicate::Opaque);
        }
        if self.eat_keyword("SIMILAR") {
            self.expect_keyword("TO")?;
            self.parse_operand()?;
            return Ok(Predicate::Opaque);
        }
        if negated {
            return Err(self.unexpected());
        }
        if self.eat_keyword("IS") {
            self.eat_keyword("NOT");
            if self.eat_keyword("DISTINCT") {
                self.expect_keyword("FROM")?;
                self.parse_operand()?;
            } else {
                self.parse_word()?;
            }
            return Ok(Predicate::Opaque);
        }
        Ok(Predicate::Opaque)
    }

    pub(super) fn parse_operand(&mut self) -> Result<Operand> {
        let term = self.parse_term()?;
        self.continue_operand(term)
    }

    /// Folds trailing arithmetic, casts and collations into an opaque expression.
    fn continue_operand(&mut self, mut operand: Operand) -> Result<Operand> {
        loop {
            let binary = self.peek().is_some_and(|l| {
                is_binary_operator(&l.token) || l.is_any_keyword(&["DIV", "MOD"])
            });
            if binary {
                self.advance();
                self.parse_term()?;
                operand = Operand::Expression;
            } else if self.eat_keyword("COLLATE") {
                self.parse_word()?;
                operand = Operand::Expression;
            } else {
                return Ok(operand);
            }
        }
    }

    fn parse_term(&mut self) -> Result<Operand> {
        let Some(lexeme) = self.peek().cloned() else {
            return Err(self.unexpected());
        };
        if let Some(index) = lexeme.parameter {
            self.advance();
            return Ok(Operand::Parameter(index));
        }
        match &lexeme.token {
            Token::Number(text, _) => {
                self.advance();
                Ok(Operand::Literal(number_value(text)))
            }
            Token::Minus | Token::Plus => {
                self.advance();
                let negative = lexeme.is(&Token::Minus);
                Ok(match self.parse_term()? {
                    Operand::Literal(value) if !negative => Operand::Literal(value),
                    Operand::Literal(Value::Integer(i)) => Operand::Literal(Value::Integer(-i)),
                    Operand::Literal(Value::Decimal(d)) => Operand::Literal(Value::Decimal(-d)),
                    Operand::Literal(Value::Float(f)) => Operand::Literal(Value::Float(-f)),
                    _ => Operand::Expression,
                })
            }
            Token::SingleQuotedString(s)
            | Token::DoubleQuotedString(s)
            | Token::NationalStringLiteral(s)
            | Token::EscapedStringLiteral(s) => {
                self.advance();
                Ok(Operand::Literal(Value::String(s.clone())))
            }
            Token::LParen => {
                self.skip_group()?;
                Ok(Operand::Expression)
            }
            Token::Mul => {
                self.advance();
                Ok(Operand::Expression)
            }
            Token::Word(word) => {
                if word.quote_style.is_none() {
                    if let Some(operand) = self.parse_keyword_term(&word.value)? {
                        return Ok(operand);
                    }
                }
                if self.peek_at(1).is_some_and(|l| l.is(&Token::LParen)) {
                    self.advance();
                    self.skip_group()?;
                    if self.eat_keyword("OVER") {
                        if self.at_token(&Token::LParen) {
                            self.skip_group()?;
                        } else {
                            self.parse_word()?;
                        }
                    }
                    return Ok(Operand::Expression);
                }
                let column = self.parse_column_ref()?;
                if self.at_token(&Token::Period) && self.peek_at(1).is_some_and(|l| l.is(&Token::Mul)) {
                    self.pos += 2;
                    return Ok(Operand::Expression);
                }
                Ok(Operand::Column(column))
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Literal keywords and keyword-introduced expressions.
    fn parse_keyword_term(&mut self, word: &str) -> Result<Option<Operand>> {
        let upper = word.to_ascii_uppercase();
        let operand = match upper.as_str() {
            "NULL" => {
                self.advance();
                Operand::Literal(Value::Null)
            }
            "TRUE" | "FALSE" => {
                self.advance();
                Operand::Literal(Value::Boolean(upper == "TRUE"))
            }
            "CASE" => {
                self.skip_case()?;
                Operand::Expression
            }
            "EXISTS" => {
                self.advance();
                self.parse_subquery()?;
                Operand::Expression
            }
            "INTERVAL" => {
                self.advance();
                self.parse_term()?;
                if self.peek().is_some_and(|l| l.is_word()) && !self.at_any_keyword(&["AND", "OR"]) {
                    self.advance();
                }
                Operand::Expression
            }
            "NOT" | "BINARY" | "DISTINCT" => {
                self.advance();
                self.parse_term()?;
                Operand::Expression
            }
            "DATE" | "TIME" | "TIMESTAMP"
                if self
                    .peek_at(1)
                    .is_some_and(|l| matches!(l.token, Token::SingleQuotedString(_))) =>
            {
                self.advance();
                return self.parse_term().map(Some);
            }
            _ => return Ok(None),
        };
        Ok(Some(operand))
    }

    fn skip_case(&mut self) -> Result<()> {
        self.expect_keyword("CASE")?;
        let mut depth = 1usize;
        while depth > 0 {
            if self.peek().is_none() {
                return Err(self.expected("END"));
            }
            if self.at_subquery() {
                self.parse_subquery()?;
                continue;
            }
            if self.at_keyword("CASE") {
                depth += 1;
            } else if self.at_keyword("END") {
                depth -= 1;
            }
            self.advance();
        }
        Ok(())
    }
}

fn compare_op(token: &Token) -> Option<CompareOp> {
    match token {
        Token::Eq | Token::DoubleEq => Some(CompareOp::Eq),
        Token::Neq => Some(CompareOp::NotEq),
        Token::Lt => Some(CompareOp::Lt),
        Token::LtEq => Some(CompareOp::LtEq),
        Token::Gt => Some(CompareOp::Gt),
        Token::GtEq => Some(CompareOp::GtEq),
        _ => None,
    }
}

fn is_binary_operator(token: &Token) -> bool {
    matches!(
        token,
        Token::Plus
            | Token::Minus
            | Token::Mul
            | Token::Div
            | Token::Mod
            | Token::StringConcat
            | Token::DoubleColon
            | Token::Ampersand
            | Token::Pipe
            | Token::Caret
            | Token::ShiftLeft
            | Token::ShiftRight
    )
}

/// Keeps only `column op value` shapes, normalized with the column on the left.
fn compare(left: Operand, op: CompareOp, right: Operand) -> Predicate {
    let is_value = |o: &Operand| {
        matches!(o, Operand::Parameter(_))
            || matches!(o, Operand::Literal(v) if !v.is_null())
    };
    match (&left, &right) {
        (Operand::Column(_), r) if is_value(r) => Predicate::Compare { left, op, right },
        (l, Operand::Column(_)) if is_value(l) => Predicate::Compare {
            left: right,
            op: op.flip(),
            right: left,
        },
        _ => Predicate::Opaque,
    }
}

pub(super) fn number_value(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(d) = Decimal::from_str(text) {
        return Value::Decimal(d);
    }
    text.parse::<f64>()
        .map(Value::Float)
        .unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Column reference when `operand` is a plain column.
pub(super) fn as_column(operand: &Operand) -> Option<&ColumnRef> {
    match operand {
        Operand::Column(column) => Some(column),
        _ => None,
    }
}
