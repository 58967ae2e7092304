//! Bounded, append-only event log.
//!
//! Entries live in a fixed-capacity ring buffer. Every entry is written to the
//! journal before it enters the buffer; when the buffer is full the oldest
//! in-memory entry is dropped, the journal keeps it.

use colony_core::{EventLogEntry, EventType, MemoryError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

use crate::journal::{append_json, Journal, NoopJournal};

pub struct EventLog {
    capacity: usize,
    entries: Mutex<VecDeque<EventLogEntry>>,
    journal: Arc<dyn Journal>,
}

impl EventLog {
    pub fn new(capacity: usize, journal: Arc<dyn Journal>) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            journal,
        }
    }

    /// A log with no durable mirror.
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(capacity, Arc::new(NoopJournal))
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<EventLogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Journal then buffer the entry, evicting the oldest when full.
    pub fn record(&self, entry: EventLogEntry) -> Result<(), MemoryError> {
        // Held across the append so journal order matches buffer order.
        let mut entries = self.buffer();
        append_json(self.journal.as_ref(), &entry)?;
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        Ok(())
    }

    /// Fire-and-forget variant for callers whose own operation already succeeded.
    pub fn emit(&self, entry: EventLogEntry) {
        let event_type = entry.event_type;
        if let Err(e) = self.record(entry) {
            warn!(?event_type, error = %e, "Failed to record event");
        }
    }

    /// The newest `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<EventLogEntry> {
        let entries = self.buffer();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn entries(&self) -> Vec<EventLogEntry> {
        self.buffer().iter().cloned().collect()
    }

    pub fn by_type(&self, event_type: EventType) -> Vec<EventLogEntry> {
        self.buffer()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn close(&self) -> Result<(), MemoryError> {
        self.journal.close()
    }
}
