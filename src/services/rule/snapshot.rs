use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::models::SchemaMetadata;
use crate::services::rule::ShardingRule;

/// One consistent (rule, schema) pair. Statements hold an `Arc` to a snapshot
/// for their whole route, rewrite and merge cycle.
#[derive(Debug)]
pub struct RuleSnapshot {
    pub version: u64,
    pub rule: Arc<ShardingRule>,
    pub schema: Arc<SchemaMetadata>,
    pub loaded_at: DateTime<Utc>,
}

/// Single-writer, many-reader holder; writers publish a whole new snapshot.
#[derive(Debug)]
pub struct SnapshotHolder {
    current: RwLock<Arc<RuleSnapshot>>,
}

impl SnapshotHolder {
    pub fn new(rule: ShardingRule, schema: SchemaMetadata) -> Self {
        Self {
            current: RwLock::new(Arc::new(RuleSnapshot {
                version: 1,
                rule: Arc::new(rule),
                schema: Arc::new(schema),
                loaded_at: Utc::now(),
            })),
        }
    }

    pub fn load(&self) -> Arc<RuleSnapshot> {
        self.current.read().clone()
    }

    /// Publishes a new rule and schema, returning the new version.
    pub fn swap(&self, rule: ShardingRule, schema: SchemaMetadata) -> u64 {
        let mut current = self.current.write();
        let version = current.version + 1;
        *current = Arc::new(RuleSnapshot {
            version,
            rule: Arc::new(rule),
            schema: Arc::new(schema),
            loaded_at: Utc::now(),
        });
        tracing::info!("Published sharding rule snapshot version {}", version);
        version
    }

    /// Replaces only the schema metadata, keeping the current rule.
    pub fn refresh_schema(&self, schema: SchemaMetadata) -> u64 {
        let mut current = self.current.write();
        let version = current.version + 1;
        *current = Arc::new(RuleSnapshot {
            version,
            rule: current.rule.clone(),
            schema: Arc::new(schema),
            loaded_at: Utc::now(),
        });
        tracing::info!("Refreshed schema metadata, snapshot version {}", version);
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rule::tests::sample_rule;

    #[test]
    fn test_readers_keep_their_snapshot_across_swap() {
        let holder = SnapshotHolder::new(sample_rule(), SchemaMetadata::default());
        let before = holder.load();
        assert_eq!(before.version, 1);

        let version = holder.swap(sample_rule(), SchemaMetadata::default());
        assert_eq!(version, 2);
        assert_eq!(before.version, 1);
        assert_eq!(holder.load().version, 2);
        assert!(!Arc::ptr_eq(&before.rule, &holder.load().rule));
    }

    #[test]
    fn test_refresh_schema_keeps_rule() {
        let holder = SnapshotHolder::new(sample_rule(), SchemaMetadata::default());
        let rule = holder.load().rule.clone();
        assert_eq!(holder.refresh_schema(SchemaMetadata::default()), 2);
        assert!(Arc::ptr_eq(&rule, &holder.load().rule));
    }

    #[test]
    fn test_concurrent_readers_see_complete_snapshots() {
        let holder = Arc::new(SnapshotHolder::new(sample_rule(), SchemaMetadata::default()));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let holder = holder.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let snapshot = holder.load();
                        assert_eq!(snapshot.rule.data_source_names().len(), 2);
                    }
                })
            })
            .collect();
        for _ in 0..20 {
            holder.swap(sample_rule(), SchemaMetadata::default());
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(holder.load().version, 21);
    }
}
