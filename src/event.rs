use std::{sync::Arc, time::SystemTime};

use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::EventId;

/// Numeric or timing data attached to an event occurrence.
pub type Measurement = serde_json::Map<String, serde_json::Value>;

/// Descriptive or result data attached to an event occurrence.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A single occurrence of a named event, as delivered to handler callbacks.
///
/// - `id`: unique identifier of this occurrence.
/// - `timestamp`: creation time in nanoseconds since Unix epoch, saturating at
///   `u64::MAX` (reached in the year 2554).
/// - `name`: the event name. Matching is exact; dots carry no hierarchy.
/// - `measurement` / `metadata`: the two payload maps, either may be empty.
///
/// One `Event` is shared (behind an `Arc`) by every callback it fans out to.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(serialize_with = "id_as_string")]
    id: EventId,
    timestamp: u64,
    name: Arc<str>,
    measurement: Measurement,
    metadata: Metadata,
}

impl Event {
    pub fn new<N>(name: N, measurement: Measurement, metadata: Metadata) -> Self
    where
        N: Into<Arc<str>>,
    {
        Self {
            id: Uuid::new_v4().as_u128(),
            timestamp: now_nanos(),
            name: name.into(),
            measurement,
            metadata,
        }
    }

    /// Unique identifier for this occurrence.
    #[inline]
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Timestamp in nanoseconds since Unix epoch, saturating at `u64::MAX`.
    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    #[inline]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

fn now_nanos() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    u64::try_from(nanos).unwrap_or(u64::MAX)
}

/// `serde_json::Value` can't hold a `u128`, so ids travel as decimal strings.
fn id_as_string<S: Serializer>(id: &EventId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(id)
}
