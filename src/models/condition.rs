use serde::Serialize;
use std::cmp::Ordering;
use std::ops::Bound;

use crate::models::Value;

/// Interval of sharding values; bounds that cannot be compared never narrow.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRange {
    pub lower: Bound<Value>,
    pub upper: Bound<Value>,
}

impl ValueRange {
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    pub fn closed(low: Value, high: Value) -> Self {
        Self {
            lower: Bound::Included(low),
            upper: Bound::Included(high),
        }
    }

    pub fn at_least(low: Value, inclusive: bool) -> Self {
        Self {
            lower: if inclusive { Bound::Included(low) } else { Bound::Excluded(low) },
            upper: Bound::Unbounded,
        }
    }

    pub fn at_most(high: Value, inclusive: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: if inclusive { Bound::Included(high) } else { Bound::Excluded(high) },
        }
    }

    pub fn lower_value(&self) -> Option<&Value> {
        match &self.lower {
            Bound::Included(v) | Bound::Excluded(v) => Some(v),
            Bound::Unbounded => None,
        }
    }

    pub fn upper_value(&self) -> Option<&Value> {
        match &self.upper {
            Bound::Included(v) | Bound::Excluded(v) => Some(v),
            Bound::Unbounded => None,
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        let above_lower = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(low) => value.compare(low).map(|o| o != Ordering::Less).unwrap_or(true),
            Bound::Excluded(low) => value
                .compare(low)
                .map(|o| o == Ordering::Greater)
                .unwrap_or(true),
        };
        let below_upper = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(high) => value
                .compare(high)
                .map(|o| o != Ordering::Greater)
                .unwrap_or(true),
            Bound::Excluded(high) => value
                .compare(high)
                .map(|o| o == Ordering::Less)
                .unwrap_or(true),
        };
        above_lower && below_upper
    }

    /// Intersection of two ranges; `None` when provably empty.
    pub fn intersect(&self, other: &ValueRange) -> Option<ValueRange> {
        let lower = tighter_lower(&self.lower, &other.lower);
        let upper = tighter_upper(&self.upper, &other.upper);
        let range = ValueRange { lower, upper };
        if range.is_empty() {
            None
        } else {
            Some(range)
        }
    }

    fn is_empty(&self) -> bool {
        let (Some(low), Some(high)) = (self.lower_value(), self.upper_value()) else {
            return false;
        };
        match low.compare(high) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => {
                matches!(self.lower, Bound::Excluded(_)) || matches!(self.upper, Bound::Excluded(_))
            }
            _ => false,
        }
    }
}

fn tighter_lower(a: &Bound<Value>, b: &Bound<Value>) -> Bound<Value> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            match x.compare(y) {
                Some(Ordering::Greater) => a.clone(),
                Some(Ordering::Less) => b.clone(),
                Some(Ordering::Equal) if matches!(b, Bound::Excluded(_)) => b.clone(),
                Some(Ordering::Equal) => a.clone(),
                None => a.clone(),
            }
        }
    }
}

fn tighter_upper(a: &Bound<Value>, b: &Bound<Value>) -> Bound<Value> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            match x.compare(y) {
                Some(Ordering::Less) => a.clone(),
                Some(Ordering::Greater) => b.clone(),
                Some(Ordering::Equal) if matches!(b, Bound::Excluded(_)) => b.clone(),
                Some(Ordering::Equal) => a.clone(),
                None => a.clone(),
            }
        }
    }
}

/// What an algorithm receives for one sharding column.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardingValue {
    List(Vec<Value>),
    Range(ValueRange),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionOperator {
    Eq,
    In,
    Range,
    Unknown,
}

/// One sharding column constraint inside a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardingConditionValue {
    pub table: String,
    pub column: String,
    pub operator: ConditionOperator,
    pub values: Vec<Value>,
    pub range: Option<ValueRange>,
    /// Positions of the bound parameters the values came from.
    pub parameter_indexes: Vec<usize>,
}

impl ShardingConditionValue {
    pub fn list(table: &str, column: &str, values: Vec<Value>, parameter_indexes: Vec<usize>) -> Self {
        let operator = if values.len() == 1 {
            ConditionOperator::Eq
        } else {
            ConditionOperator::In
        };
        Self {
            table: table.to_string(),
            column: column.to_string(),
            operator,
            values,
            range: None,
            parameter_indexes,
        }
    }

    pub fn range(table: &str, column: &str, range: ValueRange, parameter_indexes: Vec<usize>) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            operator: ConditionOperator::Range,
            values: Vec::new(),
            range: Some(range),
            parameter_indexes,
        }
    }

    pub fn unknown(table: &str, column: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            operator: ConditionOperator::Unknown,
            values: Vec::new(),
            range: None,
            parameter_indexes: Vec::new(),
        }
    }

    /// Narrowing value for an algorithm; `None` means unconstrained.
    pub fn sharding_value(&self) -> Option<ShardingValue> {
        match self.operator {
            ConditionOperator::Eq | ConditionOperator::In => {
                Some(ShardingValue::List(self.values.clone()))
            }
            ConditionOperator::Range => self.range.clone().map(ShardingValue::Range),
            ConditionOperator::Unknown => None,
        }
    }
}

/// Conjunction of column constraints: one OR branch, or one INSERT row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShardingCondition {
    pub values: Vec<ShardingConditionValue>,
    pub row_index: Option<usize>,
}

impl ShardingCondition {
    pub fn value_for(&self, table: &str, column: &str) -> Option<&ShardingConditionValue> {
        self.values.iter().find(|v| {
            v.table.eq_ignore_ascii_case(table) && v.column.eq_ignore_ascii_case(column)
        })
    }

    pub fn has_values_for(&self, table: &str) -> bool {
        self.values.iter().any(|v| {
            v.table.eq_ignore_ascii_case(table) && v.operator != ConditionOperator::Unknown
        })
    }
}

/// Disjunction of conditions. Empty means the statement cannot be narrowed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShardingConditions {
    pub conditions: Vec<ShardingCondition>,
    pub always_false: bool,
}

impl ShardingConditions {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn always_false() -> Self {
        Self {
            conditions: Vec::new(),
            always_false: true,
        }
    }

    /// First table carrying a narrowing value, in condition order.
    pub fn first_constrained_table(&self) -> Option<&str> {
        self.conditions
            .iter()
            .flat_map(|c| c.values.iter())
            .find(|v| v.operator != ConditionOperator::Unknown)
            .map(|v| v.table.as_str())
    }
}

/// Keys generated for INSERT rows that omit the table's generate-key column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedKeyContext {
    pub table: String,
    pub column: String,
    /// One value per INSERT row, in row order.
    pub values: Vec<Value>,
}
