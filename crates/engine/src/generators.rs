//! Value generators
//!
//! Plans may compute argument values with generator calls. The time source
//! is captured once per execution, so every `now` within one plan sees the
//! same instant.

use sluice_core::{Error, Result, Timestamp, Value};
use uuid::Uuid;

/// Generators bound to one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorSnapshot {
    now: Timestamp,
}

impl GeneratorSnapshot {
    /// Capture the current time
    pub fn capture() -> Self {
        GeneratorSnapshot { now: Timestamp::now() }
    }

    /// A snapshot pinned to `now`
    pub fn at(now: Timestamp) -> Self {
        GeneratorSnapshot { now }
    }

    /// The captured instant
    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Names this snapshot answers
    pub fn is_known(name: &str) -> bool {
        matches!(name, "now" | "uuid")
    }

    /// Evaluate generator `name`
    pub fn generate(&self, name: &str, args: &[Value]) -> Result<Value> {
        match name {
            "now" => Ok(Value::DateTime(self.now)),
            "uuid" => match args.first() {
                None => Ok(Value::String(Uuid::new_v4().to_string())),
                Some(Value::Int(4)) => Ok(Value::String(Uuid::new_v4().to_string())),
                Some(other) => Err(Error::binding(format!("unsupported uuid version {other:?}"))),
            },
            other => Err(Error::binding(format!("unknown generator '{other}'"))),
        }
    }
}
