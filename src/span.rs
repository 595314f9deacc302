//! Timed units of work reported as `<name>.start` / `<name>.end` / `<name>.panic`.
//!
//! The suffixes are appended to the caller's base name verbatim. A base name
//! that already ends in one of them (e.g. `"db.start"`) produces names such as
//! `"db.start.start"`; this is left to callers to avoid.

use std::time::SystemTime;

use serde_json::Value;

use crate::{Measurement, Metadata};

pub const START_SUFFIX: &str = ".start";
pub const END_SUFFIX: &str = ".end";
pub const PANIC_SUFFIX: &str = ".panic";

/// Milliseconds since Unix epoch at which the span started (`.start`, `.end`).
pub const START_TIME: &str = "start_time";
/// Milliseconds since Unix epoch at which the span body returned (`.end`).
pub const END_TIME: &str = "end_time";
/// `end_time - start_time` in milliseconds (`.end`).
pub const DURATION: &str = "duration";

/// Panic message of the span body (`.panic` metadata).
pub const ERROR: &str = "error";
/// Milliseconds since Unix epoch at which the panic was caught (`.panic` metadata).
pub const ERROR_TIME: &str = "errorTime";
/// Backtrace captured where the panic was caught (`.panic` metadata).
pub const STACK_TRACE: &str = "stackTrace";

/// What a span body hands back: its result plus the payloads of the
/// `.end` event.
///
/// ```rust
/// use pulse::SpanOutcome;
///
/// let outcome: SpanOutcome<u32, String> = SpanOutcome::ok(3)
///     .with_measurement("rows", 3)
///     .with_metadata("table", "orders");
/// ```
#[derive(Debug, Clone)]
pub struct SpanOutcome<T, E> {
    pub result: Result<T, E>,
    pub measurement: Measurement,
    pub metadata: Metadata,
}

impl<T, E> SpanOutcome<T, E> {
    pub fn new(result: Result<T, E>) -> Self {
        Self {
            result,
            measurement: Measurement::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn ok(value: T) -> Self {
        Self::new(Ok(value))
    }

    pub fn err(error: E) -> Self {
        Self::new(Err(error))
    }

    pub fn with_measurement<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.measurement.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub(crate) fn derived_name(base: &str, suffix: &str) -> String {
    let mut name = String::with_capacity(base.len() + suffix.len());
    name.push_str(base);
    name.push_str(suffix);
    name
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
