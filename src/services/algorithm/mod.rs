// Sharding Algorithms
//
// Algorithms are resolved by type name through `AlgorithmRegistry` when the
// rule is built, never per statement.

pub mod inline;
pub mod interval;
pub mod keygen;
pub mod modulo;
pub mod range;

use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, ShardingError};
use crate::models::{AlgorithmConfig, AlgorithmProps, ShardingValue};

pub use inline::{ComplexInlineShardingAlgorithm, InlineShardingAlgorithm};
pub use interval::IntervalShardingAlgorithm;
pub use keygen::{KeyGenerator, SnowflakeKeyGenerator, UuidKeyGenerator};
pub use modulo::{HashModShardingAlgorithm, ModShardingAlgorithm};
pub use range::{BoundaryRangeShardingAlgorithm, VolumeRangeShardingAlgorithm};

/// Maps sharding values onto a subset of available targets (data source or table names).
pub trait ShardingAlgorithm: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &'static str;

    /// Single-column sharding. A range the algorithm cannot narrow returns every target.
    fn do_sharding(&self, targets: &[String], column: &str, value: &ShardingValue)
        -> Result<Vec<String>>;

    /// Multi-column sharding. Columns missing from `values` are unconstrained.
    fn do_complex_sharding(
        &self,
        targets: &[String],
        values: &IndexMap<String, ShardingValue>,
    ) -> Result<Vec<String>> {
        match values.iter().next() {
            Some((column, value)) if values.len() == 1 => self.do_sharding(targets, column, value),
            _ => Err(ShardingError::algorithm(
                self.type_name(),
                "algorithm does not support complex sharding",
            )),
        }
    }
}

type AlgorithmFactory = fn(&AlgorithmProps) -> Result<Arc<dyn ShardingAlgorithm>>;
type KeyGeneratorFactory = fn(&AlgorithmProps) -> Result<Arc<dyn KeyGenerator>>;

/// Startup-time registry from algorithm type names to constructors.
pub struct AlgorithmRegistry {
    algorithms: HashMap<String, AlgorithmFactory>,
    key_generators: HashMap<String, KeyGeneratorFactory>,
}

impl AlgorithmRegistry {
    /// Registry with every built-in algorithm.
    pub fn new() -> Self {
        let mut registry = Self {
            algorithms: HashMap::new(),
            key_generators: HashMap::new(),
        };
        registry.register("MOD", |props| Ok(Arc::new(ModShardingAlgorithm::new(props)?)));
        registry.register("HASH_MOD", |props| {
            Ok(Arc::new(HashModShardingAlgorithm::new(props)?))
        });
        registry.register("INLINE", |props| Ok(Arc::new(InlineShardingAlgorithm::new(props)?)));
        registry.register("COMPLEX_INLINE", |props| {
            Ok(Arc::new(ComplexInlineShardingAlgorithm::new(props)?))
        });
        registry.register("VOLUME_RANGE", |props| {
            Ok(Arc::new(VolumeRangeShardingAlgorithm::new(props)?))
        });
        registry.register("BOUNDARY_RANGE", |props| {
            Ok(Arc::new(BoundaryRangeShardingAlgorithm::new(props)?))
        });
        registry.register("INTERVAL", |props| {
            Ok(Arc::new(IntervalShardingAlgorithm::new(props)?))
        });
        registry.register_key_generator("SNOWFLAKE", |props| {
            Ok(Arc::new(SnowflakeKeyGenerator::new(props)?))
        });
        registry.register_key_generator("UUID", |_| Ok(Arc::new(UuidKeyGenerator)));
        registry
    }

    pub fn register(&mut self, type_name: &str, factory: AlgorithmFactory) {
        self.algorithms.insert(type_name.to_ascii_uppercase(), factory);
    }

    pub fn register_key_generator(&mut self, type_name: &str, factory: KeyGeneratorFactory) {
        self.key_generators
            .insert(type_name.to_ascii_uppercase(), factory);
    }

    pub fn create(&self, name: &str, config: &AlgorithmConfig) -> Result<Arc<dyn ShardingAlgorithm>> {
        let factory = self
            .algorithms
            .get(&config.kind.to_ascii_uppercase())
            .ok_or_else(|| {
                ShardingError::InvalidRule(format!(
                    "Unknown sharding algorithm type '{}' for '{}'",
                    config.kind, name
                ))
            })?;
        factory(&config.props)
    }

    pub fn create_key_generator(
        &self,
        name: &str,
        config: &AlgorithmConfig,
    ) -> Result<Arc<dyn KeyGenerator>> {
        let factory = self
            .key_generators
            .get(&config.kind.to_ascii_uppercase())
            .ok_or_else(|| {
                ShardingError::InvalidRule(format!(
                    "Unknown key generator type '{}' for '{}'",
                    config.kind, name
                ))
            })?;
        factory(&config.props)
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Targets whose name ends with `suffix` where the suffix is not part of a longer number
/// (`t_order_12` does not match suffix `2`).
pub fn targets_with_suffix(targets: &[String], suffix: &str) -> Vec<String> {
    targets
        .iter()
        .filter(|target| match target.strip_suffix(suffix) {
            Some(head) => {
                let numeric_suffix = suffix.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false);
                !(numeric_suffix && head.chars().last().map(|c| c.is_ascii_digit()).unwrap_or(false))
            }
            None => false,
        })
        .cloned()
        .collect()
}

/// Reads a required positive integer property.
pub(crate) fn required_positive(props: &AlgorithmProps, algorithm: &str, key: &str) -> Result<i64> {
    match props.get_i64(key) {
        Some(v) if v > 0 => Ok(v),
        Some(v) => Err(ShardingError::algorithm(
            algorithm,
            format!("'{}' must be positive, got {}", key, v),
        )),
        None => Err(ShardingError::algorithm(
            algorithm,
            format!("missing property '{}'", key),
        )),
    }
}

/// Keeps first-seen order and drops duplicates.
pub(crate) fn dedup(targets: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(targets.len());
    for target in targets {
        if !seen.contains(&target) {
            seen.push(target);
        }
    }
    seen
}
