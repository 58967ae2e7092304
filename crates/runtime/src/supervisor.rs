//! The agent supervisor: spawns, messages, monitors and shuts down workers.
//!
//! The supervisor owns the worker registry and the process-wide cancellation
//! token. Background loops (coordination and retention) are started
//! explicitly with [`AgentSupervisor::start_background_loops`].

use chrono::Utc;
use colony_config::{AppConfig, CoordinationConfig, RetentionConfig, RuntimeConfig};
use colony_core::{
    ActionGate, Error, EventLogEntry, EventType, Gated, Result, WorkerId, WorkerSnapshot,
    WorkerSpecification, WorkerStatus,
};
use colony_memory::{EventLog, MemoryStore, RetentionManager};
use futures::future::join_all;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordination::CoordinationLoop;
use crate::dead_letter::{DeadLetter, DeadLetterQueue};
use crate::handler::HandlerTable;
use crate::mailbox::{mailbox, Message};
use crate::registry::{handles, transition_logged, Registry, WorkerHandle, WorkerState};
use crate::worker::{Worker, WorkerEnv};

/// Actor id the supervisor uses for its own gated actions.
pub const SUPERVISOR_ACTOR: &str = "supervisor";

pub struct AgentSupervisor {
    runtime: RuntimeConfig,
    coordination_config: CoordinationConfig,
    retention_config: RetentionConfig,
    registry: Registry,
    env: Arc<WorkerEnv>,
    coordination: Arc<CoordinationLoop>,
    retention: Arc<RetentionManager>,
    token: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl AgentSupervisor {
    pub fn new(
        config: &AppConfig,
        store: Arc<MemoryStore>,
        gate: Arc<dyn ActionGate>,
        handlers: HandlerTable,
    ) -> Self {
        let registry: Registry = Arc::new(RwLock::new(HashMap::new()));
        let events = store.events().clone();
        let env = Arc::new(WorkerEnv {
            runtime: config.runtime.clone(),
            store: store.clone(),
            events: events.clone(),
            gate,
            handlers: Arc::new(handlers),
            dead_letters: Arc::new(DeadLetterQueue::new(config.runtime.dead_letter_capacity)),
            registry: registry.clone(),
        });

        Self {
            runtime: config.runtime.clone(),
            coordination_config: config.coordination.clone(),
            retention_config: config.retention.clone(),
            coordination: Arc::new(CoordinationLoop::new(
                registry.clone(),
                config.coordination.clone(),
                events,
            )),
            retention: Arc::new(RetentionManager::new(store, config.retention.clone())),
            registry,
            env,
            token: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.env.store
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.env.events
    }

    pub fn coordination(&self) -> &Arc<CoordinationLoop> {
        &self.coordination
    }

    pub fn retention(&self) -> &Arc<RetentionManager> {
        &self.retention
    }

    /// Validate, gate, then start a new worker loop.
    pub async fn spawn_worker(&self, spec: WorkerSpecification) -> Result<Gated<WorkerId>> {
        spec.validate()?;
        if self.token.is_cancelled() {
            return Err(Error::Concurrency("supervisor is shutting down".into()));
        }

        let decision = self.env.gate.check_allowed(SUPERVISOR_ACTOR, "spawn_worker");
        if !decision.allowed {
            let reason = if decision.reason.is_empty() { "denied".to_string() } else { decision.reason };
            warn!(name = %spec.name, reason = %reason, "Worker spawn denied");
            self.env.events.emit(EventLogEntry::new(
                EventType::ActionDenied,
                json!({ "action": "spawn_worker", "actor": SUPERVISOR_ACTOR, "name": spec.name, "reason": reason }),
            ));
            return Ok(Gated::Denied { reason });
        }

        let mut registry = self.registry.write().await;
        let mut live = 0;
        for handle in registry.values() {
            if handle.state.read().await.status != WorkerStatus::Completed {
                live += 1;
            }
        }
        if live >= self.runtime.max_workers {
            return Err(Error::Capacity { resource: "workers", limit: self.runtime.max_workers });
        }

        let id = WorkerId::new();
        let now = Utc::now();
        let spec = Arc::new(spec);
        let state = Arc::new(RwLock::new(WorkerState::new(now)));
        let (tx, rx) = mailbox(self.runtime.mailbox_capacity);
        let token = self.token.child_token();

        let worker = Worker::new(id.clone(), spec.clone(), state.clone(), rx, self.env.clone());
        let join = tokio::spawn(worker.run(token.clone()));

        registry.insert(
            id.clone(),
            Arc::new(WorkerHandle {
                id: id.clone(),
                spec: spec.clone(),
                created_at: now,
                state,
                mailbox: tx,
                token,
                join: Mutex::new(Some(join)),
            }),
        );
        drop(registry);

        info!(worker_id = %id, name = %spec.name, specialization = %spec.specialization, "Worker spawned");
        self.env.events.emit(
            EventLogEntry::new(
                EventType::WorkerSpawned,
                json!({ "name": spec.name, "specialization": spec.specialization }),
            )
            .from_worker(&id),
        );
        Ok(Gated::Allowed(id))
    }

    async fn handle(&self, id: &WorkerId) -> Result<Arc<WorkerHandle>> {
        self.registry
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::worker_not_found(id))
    }

    pub async fn send_message(&self, id: &WorkerId, message: Message) -> Result<()> {
        let handle = self.handle(id).await?;
        let kind = message.kind;
        let sender = message.sender.clone();
        handle.mailbox.deliver(message)?;

        debug!(worker_id = %id, ?kind, "Message routed");
        let mut entry = EventLogEntry::new(EventType::MessageRouted, json!({ "kind": kind })).to_worker(id);
        entry.source = sender;
        self.env.events.emit(entry);
        Ok(())
    }

    /// Deliver a copy to every live worker. Returns how many accepted it.
    pub async fn broadcast_message(&self, message: Message) -> usize {
        let mut delivered = 0;
        for handle in handles(&self.registry).await {
            let mut copy = message.clone();
            copy.id = uuid::Uuid::new_v4().to_string();
            match handle.mailbox.deliver(copy) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(worker_id = %handle.id, error = %e, "Broadcast delivery failed"),
            }
        }
        debug!(delivered, kind = ?message.kind, "Broadcast sent");
        delivered
    }

    pub async fn get_status(&self, id: &WorkerId) -> Result<WorkerSnapshot> {
        Ok(self.handle(id).await?.snapshot().await)
    }

    /// Every worker, oldest first.
    pub async fn get_all_statuses(&self) -> Vec<WorkerSnapshot> {
        let mut snapshots = Vec::new();
        for handle in handles(&self.registry).await {
            snapshots.push(handle.snapshot().await);
        }
        snapshots
    }

    /// Mark a worker Completed. Its loop exits on the next tick.
    pub async fn complete_worker(&self, id: &WorkerId) -> Result<()> {
        let handle = self.handle(id).await?;
        let mut state = handle.state.write().await;
        if transition_logged(id, &mut state, WorkerStatus::Completed, "completed by supervisor", &self.env.events) {
            info!(worker_id = %id, "Worker completed");
        }
        Ok(())
    }

    /// Stop one worker and forget it.
    pub async fn remove_worker(&self, id: &WorkerId) -> Result<WorkerSnapshot> {
        let handle = self
            .registry
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::worker_not_found(id))?;

        handle.token.cancel();
        if let Some(join) = handle.take_join() {
            let abort = join.abort_handle();
            if tokio::time::timeout(self.runtime.shutdown_timeout(), join).await.is_err() {
                warn!(worker_id = %id, "Worker did not stop in time, aborting");
                abort.abort();
            }
        }

        let snapshot = handle.snapshot().await;
        info!(worker_id = %id, "Worker removed");
        self.env.events.emit(
            EventLogEntry::new(EventType::WorkerRemoved, json!({ "name": snapshot.name })).from_worker(id),
        );
        Ok(snapshot)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.env.dead_letters.snapshot()
    }

    /// Take every dead letter, leaving the queue empty.
    pub fn drain_dead_letters(&self) -> Vec<DeadLetter> {
        self.env.dead_letters.drain()
    }

    /// Start the coordination and retention loops (each only if enabled).
    /// Calling this again is a no-op.
    pub fn start_background_loops(&self) {
        let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        if !background.is_empty() {
            return;
        }
        if self.coordination_config.enabled {
            background.push(self.coordination.clone().spawn(self.token.child_token()));
            info!(interval_secs = self.coordination_config.interval_secs, "Coordination loop started");
        }
        if self.retention_config.enabled {
            background.push(self.retention.clone().spawn(self.token.child_token()));
            info!(interval_secs = self.retention_config.interval_secs, "Retention loop started");
        }
    }

    /// Cancel every loop, wait for them within the shutdown timeout, then
    /// close the journals.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Supervisor shutting down");
        self.token.cancel();

        let mut joins: Vec<JoinHandle<()>> = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles(&self.registry).await {
            joins.extend(handle.take_join());
        }

        let aborts: Vec<_> = joins.iter().map(JoinHandle::abort_handle).collect();
        let count = joins.len();
        if tokio::time::timeout(self.runtime.shutdown_timeout(), join_all(joins)).await.is_err() {
            warn!(tasks = count, "Shutdown timed out, aborting remaining loops");
            for abort in aborts {
                abort.abort();
            }
        }

        self.env.store.close()?;
        self.env.events.close()?;
        info!(tasks = count, "Supervisor stopped");
        Ok(())
    }
}
