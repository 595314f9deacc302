use serde_json::Value;

use crate::{Event, Measurement, Metadata};

/// One recorded delivery: the measurement and metadata of an event
/// occurrence, as seen by a [`Mailbox`](crate::testing::Mailbox).
#[derive(Debug, Clone, PartialEq)]
pub struct MailData {
    pub measurement: Measurement,
    pub metadata: Metadata,
}

impl MailData {
    /// Returns the measurement value under `key`, if present.
    #[inline]
    pub fn measurement_value(&self, key: &str) -> Option<&Value> {
        self.measurement.get(key)
    }

    /// Returns the metadata value under `key`, if present.
    #[inline]
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

impl From<&Event> for MailData {
    fn from(event: &Event) -> Self {
        Self {
            measurement: event.measurement().clone(),
            metadata: event.metadata().clone(),
        }
    }
}
