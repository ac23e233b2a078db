use std::cmp::Ordering;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{Result, ShardingError};
use crate::models::{AggregateFunction, Value, ValueFamily};
use crate::services::merge::order::compare_cells;

/// Running numeric total. Widens from integer to decimal to float, never narrows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum Number {
    Integer(i128),
    Decimal(Decimal),
    Float(f64),
}

impl Number {
    fn from_value(value: &Value, column: &str) -> Result<Option<Number>> {
        match value {
            Value::Null => Ok(None),
            Value::Integer(v) => Ok(Some(Number::Integer(i128::from(*v)))),
            Value::Decimal(d) => Ok(Some(Number::Decimal(*d))),
            Value::Float(f) => Ok(Some(Number::Float(*f))),
            other => Err(ShardingError::MergeTypeMismatch {
                column: column.to_string(),
                left: ValueFamily::Numeric,
                right: other.family(),
            }),
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Number::Integer(v) => v as f64,
            Number::Decimal(d) => d.to_f64().unwrap_or(f64::NAN),
            Number::Float(f) => f,
        }
    }

    fn to_decimal(self) -> Option<Decimal> {
        match self {
            Number::Integer(v) => Decimal::try_from_i128_with_scale(v, 0).ok(),
            Number::Decimal(d) => Some(d),
            Number::Float(_) => None,
        }
    }

    fn add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => match a.checked_add(b) {
                Some(sum) => Number::Integer(sum),
                None => Number::Float(a as f64 + b as f64),
            },
            (Number::Float(_), _) | (_, Number::Float(_)) => Number::Float(self.to_f64() + other.to_f64()),
            _ => match (self.to_decimal(), other.to_decimal()) {
                (Some(a), Some(b)) => a
                    .checked_add(b)
                    .map(Number::Decimal)
                    .unwrap_or_else(|| Number::Float(self.to_f64() + other.to_f64())),
                _ => Number::Float(self.to_f64() + other.to_f64()),
            },
        }
    }

    fn into_value(self) -> Value {
        match self {
            Number::Integer(v) => match i64::try_from(v) {
                Ok(v) => Value::Integer(v),
                Err(_) => match Decimal::try_from_i128_with_scale(v, 0) {
                    Ok(d) => Value::Decimal(d),
                    Err(_) => Value::Float(v as f64),
                },
            },
            Number::Decimal(d) => Value::Decimal(d),
            Number::Float(f) => Value::Float(f),
        }
    }

    fn divide(self, count: Number) -> Value {
        if count.to_f64() == 0.0 {
            return Value::Null;
        }
        match (self, count) {
            (Number::Float(_), _) | (_, Number::Float(_)) => Value::Float(self.to_f64() / count.to_f64()),
            _ => match (self.to_decimal(), count.to_decimal()) {
                (Some(dividend), Some(divisor)) => dividend
                    .checked_div(divisor)
                    .map(|d| Value::Decimal(d.normalize()))
                    .unwrap_or_else(|| Value::Float(self.to_f64() / count.to_f64())),
                _ => Value::Float(self.to_f64() / count.to_f64()),
            },
        }
    }
}

/// Replaces `current` when `value` orders as `wanted` against it.
fn keep_extreme(current: &mut Option<Value>, value: &Value, wanted: Ordering, column: &str) -> Result<()> {
    if value.is_null() {
        return Ok(());
    }
    let replace = match current {
        Some(existing) => compare_cells(value, existing, column)? == wanted,
        None => true,
    };
    if replace {
        *current = Some(value.clone());
    }
    Ok(())
}

fn accumulate(total: Option<Number>, value: &Value, column: &str) -> Result<Option<Number>> {
    Ok(match (total, Number::from_value(value, column)?) {
        (Some(total), Some(next)) => Some(total.add(next)),
        (total, next) => total.or(next),
    })
}

/// Merges one aggregate column across the partial rows of a group.
#[derive(Debug, Clone)]
pub(super) enum Accumulator {
    Count(Option<Number>),
    Sum(Option<Number>),
    Min(Option<Value>),
    Max(Option<Value>),
    Avg {
        count: Option<Number>,
        sum: Option<Number>,
    },
}

impl Accumulator {
    pub fn new(function: AggregateFunction) -> Self {
        match function {
            AggregateFunction::Count => Accumulator::Count(None),
            AggregateFunction::Sum => Accumulator::Sum(None),
            AggregateFunction::Min => Accumulator::Min(None),
            AggregateFunction::Max => Accumulator::Max(None),
            AggregateFunction::Avg => Accumulator::Avg {
                count: None,
                sum: None,
            },
        }
    }

    /// Folds in one shard's partial value. AVG takes the shard's derived
    /// COUNT and SUM instead of its partial average.
    pub fn merge(&mut self, value: &Value, derived: Option<(&Value, &Value)>, column: &str) -> Result<()> {
        match self {
            Accumulator::Count(total) | Accumulator::Sum(total) => {
                *total = accumulate(*total, value, column)?;
            }
            Accumulator::Min(current) => keep_extreme(current, value, Ordering::Less, column)?,
            Accumulator::Max(current) => keep_extreme(current, value, Ordering::Greater, column)?,
            Accumulator::Avg { count, sum } => {
                let Some((partial_count, partial_sum)) = derived else {
                    return Err(ShardingError::MergeColumnNotFound(format!(
                        "derived COUNT/SUM for AVG column '{}'",
                        column
                    )));
                };
                *count = accumulate(*count, partial_count, column)?;
                *sum = accumulate(*sum, partial_sum, column)?;
            }
        }
        Ok(())
    }

    pub fn result(&self) -> Value {
        match self {
            Accumulator::Count(total) => total.map(Number::into_value).unwrap_or(Value::Integer(0)),
            Accumulator::Sum(total) => total.map(Number::into_value).unwrap_or(Value::Null),
            Accumulator::Min(value) | Accumulator::Max(value) => value.clone().unwrap_or(Value::Null),
            Accumulator::Avg { count, sum } => match (sum, count) {
                (Some(sum), Some(count)) => sum.divide(*count),
                _ => Value::Null,
            },
        }
    }

    /// Merged derived COUNT and SUM of an AVG.
    pub fn derived(&self) -> Option<(Value, Value)> {
        match self {
            Accumulator::Avg { count, sum } => Some((
                count.map(Number::into_value).unwrap_or(Value::Integer(0)),
                sum.map(Number::into_value).unwrap_or(Value::Null),
            )),
            _ => None,
        }
    }
}
