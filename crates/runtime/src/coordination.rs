//! Periodic coordination across workers: health checks and recovery,
//! connection optimization, and load balancing.

use chrono::{DateTime, Utc};
use colony_config::{CoordinationConfig, RecoveryConfig};
use colony_core::{EventLogEntry, EventType, WorkerId, WorkerStatus};
use colony_memory::EventLog;
use futures::FutureExt;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::{handles, transition_logged, Registry, WorkerHandle, WorkerState};

/// What to do with a worker in Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Recover,
    /// Still inside its backoff window
    Wait,
    Quarantine,
}

/// Bounded recovery: exponential backoff from the last failure, and
/// quarantine after too many consecutive failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPolicy {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Zero disables quarantine
    pub quarantine_after: u32,
}

impl RecoveryPolicy {
    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self {
            base_backoff: Duration::from_secs(config.base_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            quarantine_after: config.quarantine_after,
        }
    }

    /// `base * 2^(failures - 1)`, capped at `max_backoff`.
    pub fn backoff(&self, failures: u32) -> Duration {
        if self.base_backoff.is_zero() || failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32 << failures.saturating_sub(1).min(20);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    pub fn decide(&self, state: &WorkerState, now: DateTime<Utc>) -> RecoveryAction {
        if self.quarantine_after > 0 && state.consecutive_failures >= self.quarantine_after {
            return RecoveryAction::Quarantine;
        }
        let wait = self.backoff(state.consecutive_failures);
        match state.last_failure {
            Some(failed_at) => {
                let elapsed = (now - failed_at).to_std().unwrap_or(Duration::ZERO);
                if elapsed >= wait { RecoveryAction::Recover } else { RecoveryAction::Wait }
            }
            None => RecoveryAction::Recover,
        }
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::from_config(&RecoveryConfig::default())
    }
}

/// What one sweep observed and changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinationReport {
    pub workers: usize,
    pub inactive: Vec<WorkerId>,
    pub recovered: Vec<WorkerId>,
    pub quarantined: Vec<WorkerId>,
    pub connections_added: usize,
    pub promoted: Vec<WorkerId>,
}

impl CoordinationReport {
    pub fn changed_anything(&self) -> bool {
        !self.recovered.is_empty()
            || !self.quarantined.is_empty()
            || self.connections_added > 0
            || !self.promoted.is_empty()
    }
}

pub struct CoordinationLoop {
    registry: Registry,
    config: CoordinationConfig,
    policy: RecoveryPolicy,
    events: Arc<EventLog>,
}

impl CoordinationLoop {
    pub fn new(registry: Registry, config: CoordinationConfig, events: Arc<EventLog>) -> Self {
        let policy = RecoveryPolicy::from_config(&config.recovery);
        Self { registry, config, policy, events }
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Run one sweep as of `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> CoordinationReport {
        let workers = handles(&self.registry).await;
        let mut report = CoordinationReport { workers: workers.len(), ..Default::default() };

        self.check_health(&workers, now, &mut report).await;
        self.optimize_connections(&workers, &mut report).await;
        self.balance_load(&workers, &mut report).await;

        if report.changed_anything() {
            info!(
                recovered = report.recovered.len(),
                quarantined = report.quarantined.len(),
                connections_added = report.connections_added,
                promoted = report.promoted.len(),
                "Coordination sweep"
            );
            self.events.emit(EventLogEntry::new(
                EventType::CoordinationSweep,
                json!({
                    "workers": report.workers,
                    "recovered": report.recovered,
                    "quarantined": report.quarantined,
                    "connections_added": report.connections_added,
                    "promoted": report.promoted,
                }),
            ));
        }
        report
    }

    async fn check_health(&self, workers: &[Arc<WorkerHandle>], now: DateTime<Utc>, report: &mut CoordinationReport) {
        let threshold = chrono::Duration::seconds(self.config.inactivity_threshold_secs as i64);

        for worker in workers {
            let mut state = worker.state.write().await;
            if !matches!(state.status, WorkerStatus::Idle | WorkerStatus::Completed)
                && now - state.last_active > threshold
            {
                warn!(worker_id = %worker.id, status = %state.status, last_active = %state.last_active, "Worker inactive");
                report.inactive.push(worker.id.clone());
            }

            if state.status != WorkerStatus::Error || state.quarantined {
                continue;
            }
            match self.policy.decide(&state, now) {
                RecoveryAction::Recover => {
                    if transition_logged(&worker.id, &mut state, WorkerStatus::Idle, "recovered", &self.events) {
                        info!(worker_id = %worker.id, failures = state.consecutive_failures, "Worker recovered");
                        report.recovered.push(worker.id.clone());
                    }
                }
                RecoveryAction::Quarantine => {
                    state.quarantined = true;
                    warn!(worker_id = %worker.id, failures = state.consecutive_failures, "Worker quarantined");
                    report.quarantined.push(worker.id.clone());
                }
                RecoveryAction::Wait => {
                    debug!(worker_id = %worker.id, "Worker in recovery backoff");
                }
            }
        }
    }

    /// Connect every worker to every live worker of a different
    /// specialization, via a specialization index.
    async fn optimize_connections(&self, workers: &[Arc<WorkerHandle>], report: &mut CoordinationReport) {
        let mut index: BTreeMap<&str, Vec<&WorkerId>> = BTreeMap::new();
        let mut live: HashSet<&WorkerId> = HashSet::new();
        for worker in workers {
            if worker.state.read().await.status == WorkerStatus::Completed {
                continue;
            }
            index.entry(worker.spec.specialization.as_str()).or_default().push(&worker.id);
            live.insert(&worker.id);
        }

        for worker in workers {
            let mut state = worker.state.write().await;
            state.connections.retain(|c| live.contains(c));
            if !live.contains(&worker.id) {
                continue;
            }
            for (specialization, ids) in &index {
                if *specialization == worker.spec.specialization {
                    continue;
                }
                for id in ids {
                    if state.connections.insert((*id).clone()) {
                        report.connections_added += 1;
                    }
                }
            }
        }
    }

    /// Promote idle workers when busy ones outnumber them more than two to one.
    async fn balance_load(&self, workers: &[Arc<WorkerHandle>], report: &mut CoordinationReport) {
        let mut busy = 0usize;
        let mut idle: Vec<&Arc<WorkerHandle>> = Vec::new();
        for worker in workers {
            let state = worker.state.read().await;
            if state.status.is_busy() {
                busy += 1;
            } else if state.status == WorkerStatus::Idle && !state.quarantined {
                idle.push(worker);
            }
        }

        if busy <= 2 * idle.len() {
            return;
        }

        let quota = self.config.max_promotions.min(idle.len());
        for worker in idle.into_iter().take(quota) {
            let mut state = worker.state.write().await;
            // Re-check: the worker may have picked up a task since the count.
            if state.status == WorkerStatus::Idle
                && transition_logged(&worker.id, &mut state, WorkerStatus::Active, "load balancing", &self.events)
            {
                report.promoted.push(worker.id.clone());
            }
        }
    }

    /// Start the periodic sweep. A panicking sweep is logged and the loop
    /// carries on; it ends when `token` is cancelled.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval());
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Coordination loop stopping");
                        return;
                    }
                    _ = interval.tick() => {}
                }

                if AssertUnwindSafe(self.sweep_at(Utc::now())).catch_unwind().await.is_err() {
                    error!("Coordination sweep panicked");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_state(failures: u32, at: DateTime<Utc>) -> WorkerState {
        let mut state = WorkerState::new(at);
        state.status = WorkerStatus::Error;
        state.consecutive_failures = failures;
        state.last_failure = Some(at);
        state
    }

    #[test]
    fn default_policy_recovers_immediately() {
        let policy = RecoveryPolicy::default();
        let now = Utc::now();
        assert_eq!(policy.decide(&failed_state(1, now), now), RecoveryAction::Recover);
        assert_eq!(policy.decide(&failed_state(4, now), now), RecoveryAction::Recover);
    }

    #[test]
    fn default_policy_quarantines_after_five_failures() {
        let policy = RecoveryPolicy::default();
        let now = Utc::now();
        assert_eq!(policy.decide(&failed_state(5, now), now), RecoveryAction::Quarantine);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RecoveryPolicy {
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
            quarantine_after: 0,
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(4), Duration::from_secs(10));
        assert_eq!(policy.backoff(400), Duration::from_secs(10));

        let failed_at = Utc::now();
        let state = failed_state(2, failed_at);
        assert_eq!(policy.decide(&state, failed_at + chrono::Duration::seconds(3)), RecoveryAction::Wait);
        assert_eq!(policy.decide(&state, failed_at + chrono::Duration::seconds(4)), RecoveryAction::Recover);
        assert_eq!(policy.decide(&failed_state(50, failed_at), failed_at), RecoveryAction::Wait);
    }

    fn pool() -> (CoordinationLoop, Registry, Arc<EventLog>) {
        let registry: Registry = Arc::new(tokio::sync::RwLock::new(std::collections::HashMap::new()));
        let events = Arc::new(EventLog::in_memory(100));
        let looper = CoordinationLoop::new(registry.clone(), CoordinationConfig::default(), events.clone());
        (looper, registry, events)
    }

    async fn add(registry: &Registry, name: &str, specialization: &str, status: WorkerStatus) -> WorkerId {
        let (mailbox, _inbox) = crate::mailbox::mailbox(4);
        let id = WorkerId::from(name);
        let mut state = WorkerState::new(Utc::now());
        state.status = status;
        let handle = WorkerHandle {
            id: id.clone(),
            spec: Arc::new(colony_core::WorkerSpecification::new(name, specialization)),
            created_at: Utc::now(),
            state: Arc::new(tokio::sync::RwLock::new(state)),
            mailbox,
            token: CancellationToken::new(),
            join: std::sync::Mutex::new(None),
        };
        registry.write().await.insert(id.clone(), Arc::new(handle));
        id
    }

    async fn status_of(registry: &Registry, id: &WorkerId) -> WorkerStatus {
        let handle = registry.read().await.get(id).cloned().unwrap();
        let status = handle.state.read().await.status;
        status
    }

    #[tokio::test]
    async fn errored_worker_recovers_on_sweep() {
        let (looper, registry, events) = pool();
        let id = add(&registry, "w", "x", WorkerStatus::Error).await;
        let report = looper.sweep_at(Utc::now()).await;
        assert_eq!(report.recovered, vec![id.clone()]);
        assert_eq!(status_of(&registry, &id).await, WorkerStatus::Idle);
        assert_eq!(events.by_type(EventType::CoordinationSweep).len(), 1);
    }

    #[tokio::test]
    async fn repeated_failures_quarantine_instead_of_recover() {
        let (looper, registry, _events) = pool();
        let id = add(&registry, "w", "x", WorkerStatus::Error).await;
        registry.read().await[&id].state.write().await.consecutive_failures = 5;

        let report = looper.sweep_at(Utc::now()).await;
        assert_eq!(report.quarantined, vec![id.clone()]);
        assert_eq!(status_of(&registry, &id).await, WorkerStatus::Error);
        assert!(looper.sweep_at(Utc::now()).await.quarantined.is_empty());
    }

    #[tokio::test]
    async fn stale_busy_workers_are_reported_inactive() {
        let (looper, registry, _events) = pool();
        let stale = add(&registry, "stale", "x", WorkerStatus::Active).await;
        add(&registry, "idle", "x", WorkerStatus::Idle).await;
        let report = looper.sweep_at(Utc::now() + chrono::Duration::seconds(120)).await;
        assert_eq!(report.inactive, vec![stale]);
    }

    #[tokio::test]
    async fn connections_link_distinct_specializations_only() {
        let (looper, registry, _events) = pool();
        let a = add(&registry, "a", "research", WorkerStatus::Idle).await;
        let b = add(&registry, "b", "writing", WorkerStatus::Idle).await;
        let c = add(&registry, "c", "writing", WorkerStatus::Idle).await;

        let report = looper.sweep_at(Utc::now()).await;
        assert_eq!(report.connections_added, 4);

        let connections = |id: WorkerId| {
            let registry = registry.clone();
            async move { registry.read().await[&id].state.read().await.connections.clone() }
        };
        assert_eq!(connections(a.clone()).await.into_iter().collect::<Vec<_>>(), vec![b.clone(), c.clone()]);
        assert_eq!(connections(b.clone()).await.into_iter().collect::<Vec<_>>(), vec![a.clone()]);

        assert_eq!(looper.sweep_at(Utc::now()).await.connections_added, 0);

        registry.read().await[&b].state.write().await.status = WorkerStatus::Completed;
        looper.sweep_at(Utc::now()).await;
        assert!(!connections(a).await.contains(&b));
        assert!(!connections(c).await.contains(&b));
    }

    #[tokio::test]
    async fn overloaded_pool_promotes_idle_workers() {
        let (looper, registry, _events) = pool();
        for n in 0..5 {
            add(&registry, &format!("busy{n}"), "x", WorkerStatus::Processing).await;
        }
        let idle = add(&registry, "idle", "x", WorkerStatus::Idle).await;

        let report = looper.sweep_at(Utc::now()).await;
        assert_eq!(report.promoted, vec![idle.clone()]);
        assert_eq!(status_of(&registry, &idle).await, WorkerStatus::Active);
    }

    #[tokio::test]
    async fn balanced_pool_is_left_alone() {
        let (looper, registry, events) = pool();
        add(&registry, "busy0", "x", WorkerStatus::Processing).await;
        add(&registry, "busy1", "x", WorkerStatus::Processing).await;
        add(&registry, "idle", "x", WorkerStatus::Idle).await;

        let report = looper.sweep_at(Utc::now()).await;
        assert!(report.promoted.is_empty());
        assert!(!report.changed_anything());
        assert!(events.by_type(EventType::CoordinationSweep).is_empty());
    }
}
