use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One authorization outcome, shaped for the offline analytics pump.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub request_id: String,
    pub timestamp: i64,
    pub secret_id: String,
    pub owner: String,
    /// Token `sub`, when the caller supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub resource: String,
    pub action: String,
    pub allowed: bool,
    pub reason: String,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

const DEFAULT_RETAINED_EVENTS: usize = 1024;

/// Keeps the most recent events only; older ones are dropped as new ones
/// arrive.
#[derive(Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    capacity: usize,
}

impl Default for InMemoryAuditSink {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RETAINED_EVENTS)
    }
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(
                capacity.min(DEFAULT_RETAINED_EVENTS),
            ))),
            capacity,
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn list(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.events.lock();
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}

pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}
