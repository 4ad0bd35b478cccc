//! Change notifications

use parking_lot::Mutex;

use crate::error::Result;

pub const PERMISSIONS_SET: &str = "set_resources_permissions_event";
pub const PERMISSIONS_DELETED: &str = "delete_resources_permissions_event";

/// Sink for `(topic, payload)` notifications. Payloads are JSON.
pub trait EventSink: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;
}

/// Discards everything.
pub struct NoopEvents;

impl EventSink for NoopEvents {
    fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Keeps published events in memory.
#[derive(Default)]
pub struct MemoryEvents {
    events: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything published so far.
    pub fn take(&self) -> Vec<(String, Vec<u8>)> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn topics(&self) -> Vec<String> {
        self.events.lock().iter().map(|(t, _)| t.clone()).collect()
    }
}

impl EventSink for MemoryEvents {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.events.lock().push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}
