use indexmap::IndexMap;
use std::collections::HashMap;

use crate::error::{Result, ShardingError};
use crate::models::{AlgorithmProps, ShardingValue, Value};
use crate::services::algorithm::{dedup, ShardingAlgorithm};
use crate::services::rule::inline::InlineExpression;

const ALGORITHM_EXPRESSION: &str = "algorithm-expression";

fn parse_expression(props: &AlgorithmProps, algorithm: &str) -> Result<InlineExpression> {
    let expression = props.get_str(ALGORITHM_EXPRESSION).ok_or_else(|| {
        ShardingError::algorithm(algorithm, format!("missing property '{}'", ALGORITHM_EXPRESSION))
    })?;
    InlineExpression::parse(&expression)
}

/// Evaluated target must be one of the available targets.
fn resolve_target(targets: &[String], evaluated: &str, algorithm: &str) -> Result<String> {
    targets
        .iter()
        .find(|t| t.eq_ignore_ascii_case(evaluated))
        .cloned()
        .ok_or_else(|| {
            ShardingError::algorithm(
                algorithm,
                format!("'{}' is not one of the available targets [{}]", evaluated, targets.join(", ")),
            )
        })
}

/// Single-column inline expression, e.g. `t_order_${order_id % 2}`.
#[derive(Debug)]
pub struct InlineShardingAlgorithm {
    expression: InlineExpression,
}

impl InlineShardingAlgorithm {
    pub fn new(props: &AlgorithmProps) -> Result<Self> {
        Ok(Self {
            expression: parse_expression(props, "INLINE")?,
        })
    }
}

impl ShardingAlgorithm for InlineShardingAlgorithm {
    fn type_name(&self) -> &'static str {
        "INLINE"
    }

    fn do_sharding(&self, targets: &[String], column: &str, value: &ShardingValue) -> Result<Vec<String>> {
        match value {
            ShardingValue::List(values) => {
                let mut result = Vec::with_capacity(values.len());
                for value in values {
                    let mut variables = HashMap::new();
                    variables.insert(column.to_string(), value.clone());
                    let evaluated = self.expression.evaluate(&variables)?;
                    result.push(resolve_target(targets, &evaluated, "INLINE")?);
                }
                Ok(dedup(result))
            }
            ShardingValue::Range(_) => {
                tracing::debug!(
                    "Inline expression '{}' cannot narrow a range, routing to all targets",
                    self.expression.source()
                );
                Ok(targets.to_vec())
            }
        }
    }
}

/// Multi-column inline expression, e.g. `t_${user_id % 2}_${order_id % 2}`.
#[derive(Debug)]
pub struct ComplexInlineShardingAlgorithm {
    columns: Vec<String>,
    expression: InlineExpression,
}

impl ComplexInlineShardingAlgorithm {
    pub fn new(props: &AlgorithmProps) -> Result<Self> {
        let columns = props
            .get_str("sharding-columns")
            .map(|c| {
                c.split(',')
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            columns,
            expression: parse_expression(props, "COMPLEX_INLINE")?,
        })
    }
}

impl ShardingAlgorithm for ComplexInlineShardingAlgorithm {
    fn type_name(&self) -> &'static str {
        "COMPLEX_INLINE"
    }

    fn do_sharding(&self, targets: &[String], column: &str, value: &ShardingValue) -> Result<Vec<String>> {
        let mut values = IndexMap::new();
        values.insert(column.to_string(), value.clone());
        self.do_complex_sharding(targets, &values)
    }

    fn do_complex_sharding(
        &self,
        targets: &[String],
        values: &IndexMap<String, ShardingValue>,
    ) -> Result<Vec<String>> {
        let mut combinations: Vec<HashMap<String, Value>> = vec![HashMap::new()];
        let required: Vec<String> = if self.columns.is_empty() {
            values.keys().map(|k| k.to_ascii_lowercase()).collect()
        } else {
            self.columns.clone()
        };
        for column in &required {
            let list = values
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(column))
                .map(|(_, v)| v);
            let Some(ShardingValue::List(list)) = list else {
                // Missing or range-valued column: every target is possible.
                return Ok(targets.to_vec());
            };
            combinations = combinations
                .into_iter()
                .flat_map(|base| {
                    list.iter().map(move |v| {
                        let mut next = base.clone();
                        next.insert(column.clone(), v.clone());
                        next
                    })
                })
                .collect();
        }
        let mut result = Vec::with_capacity(combinations.len());
        for variables in &combinations {
            let evaluated = self.expression.evaluate(variables)?;
            result.push(resolve_target(targets, &evaluated, "COMPLEX_INLINE")?);
        }
        Ok(dedup(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ValueRange;

    fn tables(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_inline_list() {
        let algorithm = InlineShardingAlgorithm::new(
            &AlgorithmProps::default().with("algorithm-expression", "t_order_${order_id % 2}"),
        )
        .unwrap();
        let targets = tables(&["t_order_0", "t_order_1"]);
        let result = algorithm
            .do_sharding(
                &targets,
                "order_id",
                &ShardingValue::List(vec![Value::Integer(3), Value::Integer(5)]),
            )
            .unwrap();
        assert_eq!(result, vec!["t_order_1"]);
    }

    #[test]
    fn test_inline_range_routes_everywhere() {
        let algorithm = InlineShardingAlgorithm::new(
            &AlgorithmProps::default().with("algorithm-expression", "t_order_${order_id % 2}"),
        )
        .unwrap();
        let targets = tables(&["t_order_0", "t_order_1"]);
        let range = ValueRange::closed(Value::Integer(1), Value::Integer(100));
        let result = algorithm
            .do_sharding(&targets, "order_id", &ShardingValue::Range(range))
            .unwrap();
        assert_eq!(result, targets);
    }

    #[test]
    fn test_inline_unknown_target_is_an_error() {
        let algorithm = InlineShardingAlgorithm::new(
            &AlgorithmProps::default().with("algorithm-expression", "t_order_${order_id % 4}"),
        )
        .unwrap();
        let targets = tables(&["t_order_0", "t_order_1"]);
        assert!(algorithm
            .do_sharding(&targets, "order_id", &ShardingValue::List(vec![Value::Integer(3)]))
            .is_err());
    }

    #[test]
    fn test_complex_inline_cartesian() {
        let algorithm = ComplexInlineShardingAlgorithm::new(
            &AlgorithmProps::default()
                .with("sharding-columns", "user_id, order_id")
                .with("algorithm-expression", "t_${user_id % 2}_${order_id % 2}"),
        )
        .unwrap();
        let targets = tables(&["t_0_0", "t_0_1", "t_1_0", "t_1_1"]);
        let mut values = IndexMap::new();
        values.insert(
            "user_id".to_string(),
            ShardingValue::List(vec![Value::Integer(1)]),
        );
        values.insert(
            "order_id".to_string(),
            ShardingValue::List(vec![Value::Integer(2), Value::Integer(3)]),
        );
        let result = algorithm.do_complex_sharding(&targets, &values).unwrap();
        assert_eq!(result, vec!["t_1_0", "t_1_1"]);

        values.shift_remove("order_id");
        let result = algorithm.do_complex_sharding(&targets, &values).unwrap();
        assert_eq!(result, targets);
    }
}
