//! Live worker handles, shared by the supervisor, the coordination loop and
//! workers routing replies to each other.

use chrono::{DateTime, Utc};
use colony_core::{EventLogEntry, EventType, InteractionRecord, WorkerId, WorkerSnapshot, WorkerSpecification, WorkerStatus};
use colony_memory::EventLog;
use serde_json::json;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::handler::Task;
use crate::mailbox::MailboxSender;

pub type Registry = Arc<RwLock<HashMap<WorkerId, Arc<WorkerHandle>>>>;

/// Mutable per-worker state. Written by the worker loop, the coordination
/// loop and the supervisor, always through the handle's `RwLock`.
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub status: WorkerStatus,
    pub last_active: DateTime<Utc>,
    pub queue: VecDeque<Task>,
    pub history: VecDeque<InteractionRecord>,
    /// Learned patterns waiting to be flushed to memory
    pub patterns: Vec<serde_json::Value>,
    pub connections: BTreeSet<WorkerId>,
    pub consecutive_failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub quarantined: bool,
    pub dead_lettered: u64,
}

impl WorkerState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: WorkerStatus::Idle,
            last_active: now,
            queue: VecDeque::new(),
            history: VecDeque::new(),
            patterns: Vec::new(),
            connections: BTreeSet::new(),
            consecutive_failures: 0,
            last_failure: None,
            quarantined: false,
            dead_lettered: 0,
        }
    }

    /// Move to `next` if the state machine allows it. Returns whether the
    /// status changed.
    pub fn transition(&mut self, next: WorkerStatus) -> bool {
        if self.status == next || !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }
}

/// Transition and record the change in the event log.
pub(crate) fn transition_logged(
    id: &WorkerId,
    state: &mut WorkerState,
    next: WorkerStatus,
    reason: &str,
    events: &EventLog,
) -> bool {
    let from = state.status;
    if !state.transition(next) {
        return false;
    }
    debug!(worker_id = %id, %from, to = %next, reason, "Worker status changed");
    // Idle/Processing churn happens on every task and is not worth an event.
    if from != WorkerStatus::Processing && next != WorkerStatus::Processing {
        events.emit(
            EventLogEntry::new(
                EventType::WorkerStatusChanged,
                json!({ "from": from, "to": next, "reason": reason }),
            )
            .from_worker(id),
        );
    }
    true
}

pub struct WorkerHandle {
    pub id: WorkerId,
    pub spec: Arc<WorkerSpecification>,
    pub created_at: DateTime<Utc>,
    pub state: Arc<RwLock<WorkerState>>,
    pub mailbox: MailboxSender,
    pub(crate) token: CancellationToken,
    pub(crate) join: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    pub async fn snapshot(&self) -> WorkerSnapshot {
        let state = self.state.read().await;
        WorkerSnapshot {
            id: self.id.clone(),
            name: self.spec.name.clone(),
            specialization: self.spec.specialization.clone(),
            status: state.status,
            created_at: self.created_at,
            last_active: state.last_active,
            queued_tasks: state.queue.len(),
            history_len: state.history.len(),
            pending_patterns: state.patterns.len(),
            connections: state.connections.clone(),
            consecutive_failures: state.consecutive_failures,
            quarantined: state.quarantined,
        }
    }

    pub(crate) fn take_join(&self) -> Option<JoinHandle<()>> {
        self.join.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Handles ordered by creation time.
pub(crate) async fn handles(registry: &Registry) -> Vec<Arc<WorkerHandle>> {
    let mut handles: Vec<Arc<WorkerHandle>> = registry.read().await.values().cloned().collect();
    handles.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    handles
}
