// Inline Expressions
//
// `ds_${0..1}.t_order_${[0, 1]}` expands to every combination of its segments;
// `t_order_${order_id % 4}` evaluates against sharding column values.

use std::collections::HashMap;

use crate::error::{Result, ShardingError};
use crate::models::Value;

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    Segment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineExpression {
    source: String,
    parts: Vec<Part>,
}

impl InlineExpression {
    pub fn parse(expression: &str) -> Result<Self> {
        let chars: Vec<char> = expression.chars().collect();
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut i = 0;
        while i < chars.len() {
            let open = if chars[i] == '$' && chars.get(i + 1) == Some(&'{') {
                Some(i + 2)
            } else if chars[i] == '$'
                && chars.get(i + 1) == Some(&'-')
                && chars.get(i + 2) == Some(&'>')
                && chars.get(i + 3) == Some(&'{')
            {
                Some(i + 4)
            } else {
                None
            };
            let Some(body_start) = open else {
                literal.push(chars[i]);
                i += 1;
                continue;
            };
            let mut depth = 1;
            let mut j = body_start;
            while j < chars.len() {
                match chars[j] {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                j += 1;
            }
            if depth != 0 {
                return Err(ShardingError::InvalidRule(format!(
                    "Unclosed segment in inline expression '{}'",
                    expression
                )));
            }
            if !literal.is_empty() {
                parts.push(Part::Literal(std::mem::take(&mut literal)));
            }
            parts.push(Part::Segment(chars[body_start..j].iter().collect()));
            i = j + 1;
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }
        Ok(Self {
            source: expression.to_string(),
            parts,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every combination of the segment values, in declaration order.
    pub fn expand(&self) -> Result<Vec<String>> {
        let mut results = vec![String::new()];
        for part in &self.parts {
            let options = match part {
                Part::Literal(text) => vec![text.clone()],
                Part::Segment(body) => expand_segment(body).map_err(|reason| {
                    ShardingError::InvalidRule(format!(
                        "Cannot expand '{}': {}",
                        self.source, reason
                    ))
                })?,
            };
            results = results
                .iter()
                .flat_map(|prefix| options.iter().map(move |o| format!("{}{}", prefix, o)))
                .collect();
        }
        Ok(results)
    }

    /// Evaluates each segment as an arithmetic expression over `variables`.
    pub fn evaluate(&self, variables: &HashMap<String, Value>) -> Result<String> {
        let mut output = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => output.push_str(text),
                Part::Segment(body) => {
                    let value = Evaluator::new(body, variables).run().map_err(|reason| {
                        ShardingError::algorithm(
                            "INLINE",
                            format!("cannot evaluate '{}': {}", self.source, reason),
                        )
                    })?;
                    output.push_str(&value.canonical_string());
                }
            }
        }
        Ok(output)
    }
}

/// Expands a comma separated list of inline expressions, ignoring commas inside segments.
pub fn expand_list(expression: &str) -> Result<Vec<String>> {
    let mut result = Vec::new();
    for item in split_top_level(expression) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        result.extend(InlineExpression::parse(item)?.expand()?);
    }
    Ok(result)
}

fn split_top_level(expression: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for c in expression.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            ',' if depth == 0 => {
                items.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    items.push(current);
    items
}

fn expand_segment(body: &str) -> std::result::Result<Vec<String>, String> {
    let body = body.trim();
    if let Some((low, high)) = body.split_once("..") {
        let low: i64 = low.trim().parse().map_err(|_| format!("bad range start '{}'", low))?;
        let high: i64 = high.trim().parse().map_err(|_| format!("bad range end '{}'", high))?;
        if low > high {
            return Err(format!("empty range {}..{}", low, high));
        }
        return Ok((low..=high).map(|v| v.to_string()).collect());
    }
    let inner = body
        .strip_prefix('[')
        .and_then(|b| b.strip_suffix(']'))
        .unwrap_or(body);
    let values: Vec<String> = inner
        .split(',')
        .map(|v| v.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if values.is_empty() {
        return Err("empty segment".to_string());
    }
    Ok(values)
}

/// Integer arithmetic over `+ - * / %`, parentheses, literals and variables.
struct Evaluator<'a> {
    chars: Vec<char>,
    pos: usize,
    variables: &'a HashMap<String, Value>,
}

impl<'a> Evaluator<'a> {
    fn new(body: &str, variables: &'a HashMap<String, Value>) -> Self {
        Self {
            chars: body.chars().collect(),
            pos: 0,
            variables,
        }
    }

    fn run(mut self) -> std::result::Result<Value, String> {
        let value = self.expression()?;
        self.skip_whitespace();
        if self.pos != self.chars.len() {
            return Err(format!("unexpected '{}'", self.chars[self.pos]));
        }
        Ok(value)
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.get(self.pos).copied()
    }

    fn expression(&mut self) -> std::result::Result<Value, String> {
        let mut left = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let right = self.term()?;
            left = arithmetic(&left, op, &right)?;
        }
        Ok(left)
    }

    fn term(&mut self) -> std::result::Result<Value, String> {
        let mut left = self.factor()?;
        while let Some(op @ ('*' | '/' | '%')) = self.peek() {
            self.pos += 1;
            let right = self.factor()?;
            left = arithmetic(&left, op, &right)?;
        }
        Ok(left)
    }

    fn factor(&mut self) -> std::result::Result<Value, String> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.expression()?;
                if self.peek() != Some(')') {
                    return Err("missing ')'".to_string());
                }
                self.pos += 1;
                Ok(value)
            }
            Some('-') => {
                self.pos += 1;
                let value = self.factor()?;
                arithmetic(&Value::Integer(0), '-', &value)
            }
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while self.pos < self.chars.len() && self.chars[self.pos].is_ascii_digit() {
                    self.pos += 1;
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                text.parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|e| e.to_string())
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let start = self.pos;
                while self.pos < self.chars.len()
                    && (self.chars[self.pos].is_alphanumeric() || self.chars[self.pos] == '_')
                {
                    self.pos += 1;
                }
                let name: String = self.chars[start..self.pos].iter().collect();
                self.variables
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(&name))
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| format!("unknown variable '{}'", name))
            }
            Some(c) => Err(format!("unexpected '{}'", c)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn arithmetic(left: &Value, op: char, right: &Value) -> std::result::Result<Value, String> {
    let l = left
        .as_i64()
        .ok_or_else(|| format!("'{}' is not an integer", left))?;
    let r = right
        .as_i64()
        .ok_or_else(|| format!("'{}' is not an integer", right))?;
    let result = match op {
        '+' => l.checked_add(r),
        '-' => l.checked_sub(r),
        '*' => l.checked_mul(r),
        '/' => l.checked_div(r),
        // Non-negative modulo so negative keys still land on a shard.
        '%' => l.checked_rem_euclid(r),
        _ => None,
    };
    result
        .map(Value::Integer)
        .ok_or_else(|| format!("arithmetic error in {} {} {}", l, op, r))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_range_and_list() {
        let nodes = InlineExpression::parse("ds_${0..1}.t_order_${[0, 1]}")
            .unwrap()
            .expand()
            .unwrap();
        assert_eq!(
            nodes,
            vec!["ds_0.t_order_0", "ds_0.t_order_1", "ds_1.t_order_0", "ds_1.t_order_1"]
        );
    }

    #[test]
    fn test_expand_legacy_marker_and_top_level_list() {
        let nodes = expand_list("ds_$->{0..1}.t_user, ds_2.t_user_${['a','b']}").unwrap();
        assert_eq!(
            nodes,
            vec!["ds_0.t_user", "ds_1.t_user", "ds_2.t_user_a", "ds_2.t_user_b"]
        );
    }

    #[test]
    fn test_evaluate_modulo() {
        let expr = InlineExpression::parse("t_order_${order_id % 4}").unwrap();
        let mut vars = HashMap::new();
        vars.insert("order_id".to_string(), Value::Integer(10));
        assert_eq!(expr.evaluate(&vars).unwrap(), "t_order_2");

        vars.insert("order_id".to_string(), Value::Integer(-3));
        assert_eq!(expr.evaluate(&vars).unwrap(), "t_order_1");
    }

    #[test]
    fn test_evaluate_precedence_and_parentheses() {
        let expr = InlineExpression::parse("ds_${(user_id + 1) * 2 % 3}").unwrap();
        let mut vars = HashMap::new();
        vars.insert("USER_ID".to_string(), Value::String("4".to_string()));
        assert_eq!(expr.evaluate(&vars).unwrap(), "ds_1");
    }

    #[test]
    fn test_evaluate_errors() {
        let expr = InlineExpression::parse("t_${missing % 2}").unwrap();
        assert!(expr.evaluate(&HashMap::new()).is_err());
        assert!(InlineExpression::parse("t_${0..1").is_err());
        assert!(InlineExpression::parse("t_${2..1}").unwrap().expand().is_err());
    }
}
