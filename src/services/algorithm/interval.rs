use chrono::{Duration, Months, NaiveDateTime};

use crate::error::{Result, ShardingError};
use crate::models::{AlgorithmProps, ShardingValue, DEFAULT_DATETIME_FORMAT};
use crate::services::algorithm::{dedup, targets_with_suffix, ShardingAlgorithm};

const MAX_INTERVALS: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl IntervalUnit {
    fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "SECONDS" => Some(IntervalUnit::Seconds),
            "MINUTES" => Some(IntervalUnit::Minutes),
            "HOURS" => Some(IntervalUnit::Hours),
            "DAYS" => Some(IntervalUnit::Days),
            "WEEKS" => Some(IntervalUnit::Weeks),
            "MONTHS" => Some(IntervalUnit::Months),
            "YEARS" => Some(IntervalUnit::Years),
            _ => None,
        }
    }
}

/// Time-bucketed sharding: the interval containing the value, starting from
/// `datetime-lower`, selects the table whose suffix is the interval start
/// formatted with `sharding-suffix-pattern`.
#[derive(Debug)]
pub struct IntervalShardingAlgorithm {
    datetime_pattern: String,
    lower: NaiveDateTime,
    upper: NaiveDateTime,
    suffix_pattern: String,
    amount: u32,
    unit: IntervalUnit,
}

impl IntervalShardingAlgorithm {
    pub fn new(props: &AlgorithmProps) -> Result<Self> {
        let datetime_pattern = props
            .get_str("datetime-pattern")
            .unwrap_or_else(|| DEFAULT_DATETIME_FORMAT.to_string());
        let parse = |key: &str| -> Result<Option<NaiveDateTime>> {
            match props.get_str(key) {
                Some(text) => NaiveDateTime::parse_from_str(&text, &datetime_pattern)
                    .map(Some)
                    .map_err(|e| {
                        ShardingError::algorithm("INTERVAL", format!("invalid '{}' ({}): {}", key, text, e))
                    }),
                None => Ok(None),
            }
        };
        let lower = parse("datetime-lower")?
            .ok_or_else(|| ShardingError::algorithm("INTERVAL", "missing property 'datetime-lower'"))?;
        let upper = parse("datetime-upper")?.unwrap_or_else(|| chrono::Utc::now().naive_utc());
        if upper < lower {
            return Err(ShardingError::algorithm(
                "INTERVAL",
                "'datetime-upper' is before 'datetime-lower'",
            ));
        }
        let suffix_pattern = props.get_str("sharding-suffix-pattern").ok_or_else(|| {
            ShardingError::algorithm("INTERVAL", "missing property 'sharding-suffix-pattern'")
        })?;
        let amount = props.get_i64("datetime-interval-amount").unwrap_or(1);
        if amount <= 0 || amount > i64::from(u32::MAX) {
            return Err(ShardingError::algorithm(
                "INTERVAL",
                "'datetime-interval-amount' must be positive",
            ));
        }
        let unit_text = props
            .get_str("datetime-interval-unit")
            .unwrap_or_else(|| "DAYS".to_string());
        let unit = IntervalUnit::parse(&unit_text).ok_or_else(|| {
            ShardingError::algorithm("INTERVAL", format!("unknown interval unit '{}'", unit_text))
        })?;
        Ok(Self {
            datetime_pattern,
            lower,
            upper,
            suffix_pattern,
            amount: amount as u32,
            unit,
        })
    }

    fn step(&self, from: NaiveDateTime) -> Option<NaiveDateTime> {
        let amount = i64::from(self.amount);
        match self.unit {
            IntervalUnit::Seconds => from.checked_add_signed(Duration::seconds(amount)),
            IntervalUnit::Minutes => from.checked_add_signed(Duration::minutes(amount)),
            IntervalUnit::Hours => from.checked_add_signed(Duration::hours(amount)),
            IntervalUnit::Days => from.checked_add_signed(Duration::days(amount)),
            IntervalUnit::Weeks => from.checked_add_signed(Duration::weeks(amount)),
            IntervalUnit::Months => from.checked_add_months(Months::new(self.amount)),
            IntervalUnit::Years => from.checked_add_months(Months::new(self.amount.saturating_mul(12))),
        }
    }

    /// Start of every interval overlapping `[from, to]`, clipped to the configured bounds.
    fn interval_starts(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<NaiveDateTime> {
        let mut starts = Vec::new();
        let mut current = self.lower;
        let mut iterations = 0;
        while current <= self.upper && current <= to && iterations < MAX_INTERVALS {
            let Some(next) = self.step(current) else {
                break;
            };
            if next > from {
                starts.push(current);
            }
            current = next;
            iterations += 1;
        }
        starts
    }

    fn suffixes(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<String> {
        self.interval_starts(from, to)
            .into_iter()
            .map(|start| start.format(&self.suffix_pattern).to_string())
            .collect()
    }
}

impl ShardingAlgorithm for IntervalShardingAlgorithm {
    fn type_name(&self) -> &'static str {
        "INTERVAL"
    }

    fn do_sharding(&self, targets: &[String], _column: &str, value: &ShardingValue) -> Result<Vec<String>> {
        let mut suffixes = Vec::new();
        match value {
            ShardingValue::List(values) => {
                for value in values {
                    let ts = value.as_timestamp(&self.datetime_pattern).ok_or_else(|| {
                        ShardingError::algorithm(
                            "INTERVAL",
                            format!("sharding value '{}' is not a date-time", value),
                        )
                    })?;
                    if ts < self.lower || ts > self.upper {
                        continue;
                    }
                    suffixes.extend(self.suffixes(ts, ts));
                }
            }
            ShardingValue::Range(range) => {
                let from = match range.lower_value() {
                    Some(v) => match v.as_timestamp(&self.datetime_pattern) {
                        Some(ts) => ts.max(self.lower),
                        None => return Ok(targets.to_vec()),
                    },
                    None => self.lower,
                };
                let to = match range.upper_value() {
                    Some(v) => match v.as_timestamp(&self.datetime_pattern) {
                        Some(ts) => ts.min(self.upper),
                        None => return Ok(targets.to_vec()),
                    },
                    None => self.upper,
                };
                if from <= to {
                    suffixes.extend(self.suffixes(from, to));
                }
            }
        }
        let result = dedup(suffixes)
            .iter()
            .flat_map(|suffix| targets_with_suffix(targets, suffix))
            .collect();
        Ok(dedup(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Value, ValueRange};

    fn monthly() -> IntervalShardingAlgorithm {
        IntervalShardingAlgorithm::new(
            &AlgorithmProps::default()
                .with("datetime-lower", "2021-01-01 00:00:00")
                .with("datetime-upper", "2021-12-31 23:59:59")
                .with("sharding-suffix-pattern", "%Y%m")
                .with("datetime-interval-amount", 1)
                .with("datetime-interval-unit", "MONTHS"),
        )
        .unwrap()
    }

    fn tables() -> Vec<String> {
        (1..=12).map(|m| format!("t_order_2021{:02}", m)).collect()
    }

    #[test]
    fn test_interval_equal_value() {
        let result = monthly()
            .do_sharding(
                &tables(),
                "create_time",
                &ShardingValue::List(vec![Value::String("2021-03-15 10:00:00".to_string())]),
            )
            .unwrap();
        assert_eq!(result, vec!["t_order_202103"]);
    }

    #[test]
    fn test_interval_value_out_of_bounds_has_no_target() {
        let result = monthly()
            .do_sharding(
                &tables(),
                "create_time",
                &ShardingValue::List(vec![Value::String("2022-01-01 00:00:00".to_string())]),
            )
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_interval_range() {
        let range = ValueRange::closed(
            Value::String("2021-02-10 00:00:00".to_string()),
            Value::String("2021-04-01 00:00:00".to_string()),
        );
        let result = monthly()
            .do_sharding(&tables(), "create_time", &ShardingValue::Range(range))
            .unwrap();
        assert_eq!(result, vec!["t_order_202102", "t_order_202103", "t_order_202104"]);
    }

    #[test]
    fn test_interval_requires_lower_bound() {
        assert!(IntervalShardingAlgorithm::new(
            &AlgorithmProps::default().with("sharding-suffix-pattern", "%Y%m")
        )
        .is_err());
    }
}
