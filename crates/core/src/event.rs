//! System-level events recorded in the bounded event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::WorkerId;

/// Everything the runtime records about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkerSpawned,
    WorkerRemoved,
    WorkerStatusChanged,
    MessageRouted,
    TaskCompleted,
    TaskFailed,
    TaskDeadLettered,
    RecordStored,
    RecordRemoved,
    RetentionSweep,
    CoordinationSweep,
    ActionDenied,
}

/// One append-only event log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: String,

    pub event_type: EventType,

    #[serde(default)]
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<WorkerId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<WorkerId>,
}

impl EventLogEntry {
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            payload,
            timestamp: Utc::now(),
            source: None,
            target: None,
        }
    }

    pub fn from_worker(mut self, source: &WorkerId) -> Self {
        self.source = Some(source.clone());
        self
    }

    pub fn to_worker(mut self, target: &WorkerId) -> Self {
        self.target = Some(target.clone());
        self
    }
}
