//! Row identifiers for the SQLite backing.
//!
//! Ids are Snowflake values (timestamp, machine, node, sequence) rendered as
//! decimal strings, so they are unique per process and sort by creation time.

use snowflake::SnowflakeIdBucket;
use std::sync::Mutex;

/// Machine and node ids each occupy five bits.
const MAX_WORKER_ID: i32 = 31;

#[derive(Debug, thiserror::Error)]
#[error("snowflake {field} must be within 0..=31, got {value}")]
pub struct IdConfigError {
    pub field: &'static str,
    pub value: i32,
}

static GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

fn check(field: &'static str, value: i32) -> Result<i32, IdConfigError> {
    if (0..=MAX_WORKER_ID).contains(&value) {
        Ok(value)
    } else {
        Err(IdConfigError { field, value })
    }
}

/// Configures the process-wide generator. Calling it again replaces the
/// generator; ids already handed out stay valid.
pub fn init(machine_id: i32, node_id: i32) -> Result<(), IdConfigError> {
    let bucket = SnowflakeIdBucket::new(check("machine_id", machine_id)?, check("node_id", node_id)?);
    *GENERATOR.lock().unwrap_or_else(|p| p.into_inner()) = Some(bucket);
    Ok(())
}

/// Next row id. Falls back to machine 1 / node 1 if [`init`] never ran.
pub fn next_id() -> String {
    let mut guard = GENERATOR.lock().unwrap_or_else(|p| p.into_inner());
    guard
        .get_or_insert_with(|| SnowflakeIdBucket::new(1, 1))
        .get_id()
        .to_string()
}
