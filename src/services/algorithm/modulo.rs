use crate::error::{Result, ShardingError};
use crate::models::{AlgorithmProps, ShardingValue, Value};
use crate::services::algorithm::{dedup, required_positive, targets_with_suffix, ShardingAlgorithm};

const SHARDING_COUNT: &str = "sharding-count";

/// `value % sharding-count`, matched against the numeric suffix of each target.
#[derive(Debug)]
pub struct ModShardingAlgorithm {
    sharding_count: i64,
}

impl ModShardingAlgorithm {
    pub fn new(props: &AlgorithmProps) -> Result<Self> {
        Ok(Self {
            sharding_count: required_positive(props, "MOD", SHARDING_COUNT)?,
        })
    }

    fn shard_of(&self, value: &Value) -> Result<i64> {
        value
            .as_i64()
            .map(|v| v.rem_euclid(self.sharding_count))
            .ok_or_else(|| {
                ShardingError::algorithm("MOD", format!("sharding value '{}' is not an integer", value))
            })
    }
}

impl ShardingAlgorithm for ModShardingAlgorithm {
    fn type_name(&self) -> &'static str {
        "MOD"
    }

    fn do_sharding(&self, targets: &[String], _column: &str, value: &ShardingValue) -> Result<Vec<String>> {
        match value {
            ShardingValue::List(values) => {
                let mut result = Vec::new();
                for value in values {
                    let shard = self.shard_of(value)?;
                    result.extend(targets_with_suffix(targets, &shard.to_string()));
                }
                Ok(dedup(result))
            }
            ShardingValue::Range(range) => {
                let low = range.lower_value().and_then(|v| v.as_i64());
                let high = range.upper_value().and_then(|v| v.as_i64());
                match (low, high) {
                    (Some(low), Some(high))
                        if high >= low
                            && high.checked_sub(low).is_some_and(|span| span < self.sharding_count) =>
                    {
                        let mut result = Vec::new();
                        for v in low..=high {
                            if range.contains(&Value::Integer(v)) {
                                let shard = v.rem_euclid(self.sharding_count);
                                result.extend(targets_with_suffix(targets, &shard.to_string()));
                            }
                        }
                        Ok(dedup(result))
                    }
                    _ => Ok(targets.to_vec()),
                }
            }
        }
    }
}

/// CRC32 of the value's canonical text, modulo `sharding-count`.
#[derive(Debug)]
pub struct HashModShardingAlgorithm {
    sharding_count: i64,
}

impl HashModShardingAlgorithm {
    pub fn new(props: &AlgorithmProps) -> Result<Self> {
        Ok(Self {
            sharding_count: required_positive(props, "HASH_MOD", SHARDING_COUNT)?,
        })
    }

    fn shard_of(&self, value: &Value) -> i64 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(value.canonical_string().as_bytes());
        i64::from(hasher.finalize()) % self.sharding_count
    }
}

impl ShardingAlgorithm for HashModShardingAlgorithm {
    fn type_name(&self) -> &'static str {
        "HASH_MOD"
    }

    fn do_sharding(&self, targets: &[String], _column: &str, value: &ShardingValue) -> Result<Vec<String>> {
        match value {
            ShardingValue::List(values) => {
                let result = values
                    .iter()
                    .flat_map(|v| targets_with_suffix(targets, &self.shard_of(v).to_string()))
                    .collect();
                Ok(dedup(result))
            }
            ShardingValue::Range(_) => Ok(targets.to_vec()),
        }
    }
}
