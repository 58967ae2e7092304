//! Audit trail of gate decisions.
//!
//! [`AuditedGate`] wraps any [`ActionGate`] and records each decision to an
//! [`AuditLogger`], which keeps a bounded in-memory history and forwards
//! entries to its sinks.

use chrono::{DateTime, Utc};
use colony_core::{ActionGate, GateDecision};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Allowed,
    Denied,
}

/// Trait for audit log sinks (where entries are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// Bounded in-memory audit log; the oldest entry is dropped when full.
pub struct AuditLogger {
    capacity: usize,
    entries: Mutex<VecDeque<AuditEntry>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("capacity", &self.capacity)
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl AuditLogger {
    pub fn new(capacity: usize) -> Self {
        Self::with_sinks(capacity, Vec::new())
    }

    pub fn with_sinks(capacity: usize, sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
            sinks,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn log(&self, actor: &str, action: &str, decision: &GateDecision) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            outcome: if decision.allowed { AuditOutcome::Allowed } else { AuditOutcome::Denied },
            reason: (!decision.reason.is_empty()).then(|| decision.reason.clone()),
        };

        {
            let mut entries = self.lock();
            entries.push_back(entry.clone());
            while entries.len() > self.capacity {
                entries.pop_front();
            }
        }

        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn entries_by_outcome(&self, outcome: AuditOutcome) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| e.outcome == outcome)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }
}

/// Logs allowed decisions at debug and denials at warn.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        match entry.outcome {
            AuditOutcome::Allowed => tracing::debug!(
                actor = %entry.actor,
                action = %entry.action,
                "AUDIT allowed"
            ),
            AuditOutcome::Denied => tracing::warn!(
                actor = %entry.actor,
                action = %entry.action,
                reason = ?entry.reason,
                "AUDIT denied"
            ),
        }
    }
}

/// A gate that records every decision of the gate it wraps.
pub struct AuditedGate {
    inner: Arc<dyn ActionGate>,
    logger: Arc<AuditLogger>,
}

impl AuditedGate {
    pub fn new(inner: Arc<dyn ActionGate>, logger: Arc<AuditLogger>) -> Self {
        Self { inner, logger }
    }

    pub fn logger(&self) -> &Arc<AuditLogger> {
        &self.logger
    }
}

impl ActionGate for AuditedGate {
    fn check_allowed(&self, actor_id: &str, action_name: &str) -> GateDecision {
        let decision = self.inner.check_allowed(actor_id, action_name);
        self.logger.log(actor_id, action_name, &decision);
        decision
    }
}
