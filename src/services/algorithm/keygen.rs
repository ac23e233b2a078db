use parking_lot::Mutex;
use std::fmt;

use crate::error::{Result, ShardingError};
use crate::models::{AlgorithmProps, Value};

/// Generates values for an INSERT's missing key column.
pub trait KeyGenerator: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &'static str;

    fn generate(&self) -> Value;
}

/// 2016-11-01T00:00:00Z in epoch milliseconds.
pub const SNOWFLAKE_EPOCH_MILLIS: i64 = 1_477_958_400_000;

const SEQUENCE_BITS: u32 = 12;
const WORKER_ID_BITS: u32 = 10;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;
const MAX_WORKER_ID: i64 = (1 << WORKER_ID_BITS) - 1;

#[derive(Debug, Default)]
struct SnowflakeState {
    last_millis: i64,
    sequence: i64,
}

/// 41-bit millisecond timestamp, 10-bit worker id, 12-bit sequence.
///
/// The clock never runs backwards from the generator's point of view: if the
/// system clock moves back, ids keep counting from the last issued millisecond.
#[derive(Debug)]
pub struct SnowflakeKeyGenerator {
    worker_id: i64,
    state: Mutex<SnowflakeState>,
}

impl SnowflakeKeyGenerator {
    pub fn new(props: &AlgorithmProps) -> Result<Self> {
        let worker_id = props.get_i64("worker-id").unwrap_or(0);
        if !(0..=MAX_WORKER_ID).contains(&worker_id) {
            return Err(ShardingError::algorithm(
                "SNOWFLAKE",
                format!("'worker-id' must be between 0 and {}", MAX_WORKER_ID),
            ));
        }
        Ok(Self {
            worker_id,
            state: Mutex::new(SnowflakeState::default()),
        })
    }

    fn next_id(&self, now_millis: i64) -> i64 {
        let mut state = self.state.lock();
        let mut millis = now_millis.max(state.last_millis);
        if millis == state.last_millis {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                millis += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_millis = millis;
        ((millis - SNOWFLAKE_EPOCH_MILLIS) << (SEQUENCE_BITS + WORKER_ID_BITS))
            | (self.worker_id << SEQUENCE_BITS)
            | state.sequence
    }
}

impl KeyGenerator for SnowflakeKeyGenerator {
    fn type_name(&self) -> &'static str {
        "SNOWFLAKE"
    }

    fn generate(&self) -> Value {
        Value::Integer(self.next_id(chrono::Utc::now().timestamp_millis()))
    }
}

/// Random UUID without hyphens.
#[derive(Debug)]
pub struct UuidKeyGenerator;

impl KeyGenerator for UuidKeyGenerator {
    fn type_name(&self) -> &'static str {
        "UUID"
    }

    fn generate(&self) -> Value {
        Value::String(uuid::Uuid::new_v4().simple().to_string())
    }
}
