use crate::error::{Result, ShardingError};
use crate::models::{AlgorithmProps, ShardingValue, Value};
use crate::services::algorithm::{dedup, required_positive, targets_with_suffix, ShardingAlgorithm};

/// Sorted partition boundaries: partition `i` holds values with exactly `i`
/// boundaries less than or equal to them.
#[derive(Debug, Clone)]
struct Partitions {
    boundaries: Vec<i64>,
}

impl Partitions {
    fn partition_of(&self, value: i64) -> usize {
        self.boundaries.partition_point(|b| *b <= value)
    }

    fn last(&self) -> usize {
        self.boundaries.len()
    }

    fn route(&self, algorithm: &str, targets: &[String], value: &ShardingValue) -> Result<Vec<String>> {
        let partitions: Vec<usize> = match value {
            ShardingValue::List(values) => {
                let mut partitions = Vec::with_capacity(values.len());
                for value in values {
                    let v = integer(algorithm, value)?;
                    partitions.push(self.partition_of(v));
                }
                partitions
            }
            ShardingValue::Range(range) => {
                let low = match range.lower_value() {
                    Some(v) => match v.as_i64() {
                        Some(v) => self.partition_of(v),
                        None => return Ok(targets.to_vec()),
                    },
                    None => 0,
                };
                let high = match range.upper_value() {
                    Some(v) => match v.as_i64() {
                        Some(v) => self.partition_of(v),
                        None => return Ok(targets.to_vec()),
                    },
                    None => self.last(),
                };
                if low > high {
                    Vec::new()
                } else {
                    (low..=high).collect()
                }
            }
        };
        let result = partitions
            .into_iter()
            .flat_map(|p| targets_with_suffix(targets, &p.to_string()))
            .collect();
        Ok(dedup(result))
    }
}

fn integer(algorithm: &str, value: &Value) -> Result<i64> {
    value.as_i64().ok_or_else(|| {
        ShardingError::algorithm(algorithm, format!("sharding value '{}' is not an integer", value))
    })
}

/// Fixed-width partitions between `range-lower` and `range-upper`, plus one
/// partition on each side.
#[derive(Debug)]
pub struct VolumeRangeShardingAlgorithm {
    partitions: Partitions,
}

impl VolumeRangeShardingAlgorithm {
    pub fn new(props: &AlgorithmProps) -> Result<Self> {
        let lower = props
            .get_i64("range-lower")
            .ok_or_else(|| ShardingError::algorithm("VOLUME_RANGE", "missing property 'range-lower'"))?;
        let upper = props
            .get_i64("range-upper")
            .ok_or_else(|| ShardingError::algorithm("VOLUME_RANGE", "missing property 'range-upper'"))?;
        let volume = required_positive(props, "VOLUME_RANGE", "sharding-volume")?;
        if upper <= lower {
            return Err(ShardingError::algorithm(
                "VOLUME_RANGE",
                "'range-upper' must be greater than 'range-lower'",
            ));
        }
        let mut boundaries = Vec::new();
        let mut boundary = lower;
        while boundary < upper {
            boundaries.push(boundary);
            boundary = boundary.saturating_add(volume);
        }
        boundaries.push(upper);
        Ok(Self {
            partitions: Partitions { boundaries },
        })
    }
}

impl ShardingAlgorithm for VolumeRangeShardingAlgorithm {
    fn type_name(&self) -> &'static str {
        "VOLUME_RANGE"
    }

    fn do_sharding(&self, targets: &[String], _column: &str, value: &ShardingValue) -> Result<Vec<String>> {
        self.partitions.route("VOLUME_RANGE", targets, value)
    }
}

/// Partitions split at the ascending boundaries listed in `sharding-ranges`.
#[derive(Debug)]
pub struct BoundaryRangeShardingAlgorithm {
    partitions: Partitions,
}

impl BoundaryRangeShardingAlgorithm {
    pub fn new(props: &AlgorithmProps) -> Result<Self> {
        let ranges = props.get_str("sharding-ranges").ok_or_else(|| {
            ShardingError::algorithm("BOUNDARY_RANGE", "missing property 'sharding-ranges'")
        })?;
        let mut boundaries = Vec::new();
        for item in ranges.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let boundary = item.parse::<i64>().map_err(|_| {
                ShardingError::algorithm("BOUNDARY_RANGE", format!("invalid boundary '{}'", item))
            })?;
            boundaries.push(boundary);
        }
        boundaries.sort_unstable();
        boundaries.dedup();
        if boundaries.is_empty() {
            return Err(ShardingError::algorithm("BOUNDARY_RANGE", "'sharding-ranges' is empty"));
        }
        Ok(Self {
            partitions: Partitions { boundaries },
        })
    }
}

impl ShardingAlgorithm for BoundaryRangeShardingAlgorithm {
    fn type_name(&self) -> &'static str {
        "BOUNDARY_RANGE"
    }

    fn do_sharding(&self, targets: &[String], _column: &str, value: &ShardingValue) -> Result<Vec<String>> {
        self.partitions.route("BOUNDARY_RANGE", targets, value)
    }
}
