//! The worker loop.
//!
//! Each tick does at most one of each step, in order:
//!
//! 1. Pop one mailbox message: tasks are queued, queries answered from
//!    memory, replies appended to history.
//! 2. If the worker is Idle or Active, run the oldest queued task under a
//!    timeout and record the interaction plus a learned pattern.
//! 3. Flush learned patterns to the memory store (gated by `store_experience`).
//!
//! Any failure moves the worker to Error; it keeps draining its mailbox but
//! runs no tasks until the coordination loop recovers it. Tasks execute
//! inline, so a long task delays the worker's mailbox by up to the task
//! timeout.

use chrono::Utc;
use colony_config::RuntimeConfig;
use colony_core::{
    ActionGate, Error, EventLogEntry, EventType, InteractionRecord, Result, SimilarityQuery,
    TaskError, WorkerId, WorkerSpecification, WorkerStatus, LEARNED_PATTERN_TAG,
};
use colony_memory::{EventLog, MemoryStore};
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dead_letter::DeadLetterQueue;
use crate::handler::{HandlerTable, Task};
use crate::mailbox::{payload_text, Message, MessageKind};
use crate::registry::{transition_logged, Registry, WorkerState};

/// Results returned for a query message when it doesn't say otherwise.
const DEFAULT_QUERY_LIMIT: usize = 5;

/// Everything a worker shares with the rest of the runtime.
pub struct WorkerEnv {
    pub runtime: RuntimeConfig,
    pub store: Arc<MemoryStore>,
    pub events: Arc<EventLog>,
    pub gate: Arc<dyn ActionGate>,
    pub handlers: Arc<HandlerTable>,
    pub dead_letters: Arc<DeadLetterQueue>,
    pub registry: Registry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A message or task was handled
    Worked,
    /// Nothing to do
    Idle,
    /// The worker is Completed; the loop should exit
    Stopped,
}

pub struct Worker {
    id: WorkerId,
    spec: Arc<WorkerSpecification>,
    state: Arc<RwLock<WorkerState>>,
    inbox: mpsc::Receiver<Message>,
    env: Arc<WorkerEnv>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        spec: Arc<WorkerSpecification>,
        state: Arc<RwLock<WorkerState>>,
        inbox: mpsc::Receiver<Message>,
        env: Arc<WorkerEnv>,
    ) -> Self {
        Self { id, spec, state, inbox, env }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Run ticks until cancelled or Completed.
    pub async fn run(mut self, token: CancellationToken) {
        info!(worker_id = %self.id, name = %self.spec.name, specialization = %self.spec.specialization, "Worker loop started");
        let pause = self.env.runtime.tick_interval();

        loop {
            if token.is_cancelled() {
                break;
            }
            match self.tick().await {
                TickOutcome::Stopped => break,
                TickOutcome::Worked => tokio::task::yield_now().await,
                TickOutcome::Idle => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
            }
        }

        info!(worker_id = %self.id, "Worker loop stopped");
    }

    /// One iteration of the loop.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.state.read().await.status == WorkerStatus::Completed {
            return TickOutcome::Stopped;
        }

        let mut worked = false;
        let mut failure: Option<String> = None;

        match self.inbox.try_recv() {
            Ok(message) => {
                worked = true;
                if let Err(e) = self.dispatch(message).await {
                    failure = Some(e.to_string());
                }
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }

        match self.run_next_task().await {
            Ok(ran) => worked |= ran,
            Err(e) => {
                worked = true;
                failure = Some(e.to_string());
            }
        }

        if let Err(e) = self.flush_patterns().await {
            failure = Some(e.to_string());
        }

        if let Some(reason) = failure {
            self.enter_error(&reason).await;
        }

        if worked { TickOutcome::Worked } else { TickOutcome::Idle }
    }

    async fn dispatch(&self, message: Message) -> Result<()> {
        self.state.write().await.last_active = Utc::now();
        debug!(worker_id = %self.id, message_id = %message.id, kind = ?message.kind, "Message received");

        match message.kind {
            MessageKind::Task => {
                self.enqueue(Task::from_message(&message)).await;
                Ok(())
            }
            MessageKind::Query => self.answer_query(message).await,
            MessageKind::Reply => {
                let from = message
                    .sender
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "unknown".into());
                self.push_history(InteractionRecord {
                    task: format!("reply from {from}"),
                    result: payload_text(&message.payload),
                    timestamp: Utc::now(),
                })
                .await;
                Ok(())
            }
        }
    }

    async fn enqueue(&self, task: Task) {
        let capacity = self.env.runtime.task_queue_capacity;
        let rejected = {
            let mut state = self.state.write().await;
            if state.queue.len() >= capacity {
                state.dead_lettered += 1;
                Some(task)
            } else {
                state.queue.push_back(task);
                None
            }
        };

        if let Some(task) = rejected {
            let reason = Error::Capacity { resource: "task queue", limit: capacity }.to_string();
            self.dead_letter(task, reason);
        }
    }

    async fn answer_query(&self, message: Message) -> Result<()> {
        let tags: Vec<String> = message
            .payload
            .get("tags")
            .and_then(|t| t.as_array())
            .map(|items| items.iter().filter_map(|t| t.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let limit = message
            .payload
            .get("limit")
            .and_then(|l| l.as_u64())
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_QUERY_LIMIT);
        let query = SimilarityQuery::new(message.text()).with_tags(tags);

        let hits = self
            .env
            .store
            .dynamic_find_similar(&query, Some(&self.id), limit)
            .await?;

        let results: Vec<serde_json::Value> = hits
            .iter()
            .map(|hit| {
                json!({
                    "record_id": hit.record.id,
                    "owner": hit.record.owner,
                    "score": hit.score,
                    "content": hit.record.content,
                })
            })
            .collect();
        let payload = json!({
            "query": query.text,
            "in_reply_to": message.id,
            "results": results,
        });

        let Some(recipient) = message.sender else {
            debug!(worker_id = %self.id, "Query has no sender, dropping reply");
            return Ok(());
        };

        let mailbox = self
            .env
            .registry
            .read()
            .await
            .get(&recipient)
            .map(|h| h.mailbox.clone());
        let Some(mailbox) = mailbox else {
            debug!(worker_id = %self.id, recipient = %recipient, "Reply recipient unknown, dropping reply");
            return Ok(());
        };

        match mailbox.deliver(Message::reply(payload).from_worker(&self.id)) {
            Ok(()) => self.env.events.emit(
                EventLogEntry::new(EventType::MessageRouted, json!({ "kind": MessageKind::Reply }))
                    .from_worker(&self.id)
                    .to_worker(&recipient),
            ),
            Err(e) => warn!(worker_id = %self.id, recipient = %recipient, error = %e, "Failed to deliver reply"),
        }
        Ok(())
    }

    async fn push_history(&self, record: InteractionRecord) {
        let limit = self.env.runtime.history_limit.max(1);
        let mut state = self.state.write().await;
        state.history.push_back(record);
        while state.history.len() > limit {
            state.history.pop_front();
        }
    }

    /// Run the oldest queued task if the worker can take work.
    /// `Ok(false)` means nothing ran.
    async fn run_next_task(&self) -> std::result::Result<bool, TaskError> {
        let task = {
            let mut state = self.state.write().await;
            if state.quarantined || !state.status.accepts_work() {
                return Ok(false);
            }
            let Some(task) = state.queue.pop_front() else {
                return Ok(false);
            };
            transition_logged(&self.id, &mut state, WorkerStatus::Processing, "task started", &self.env.events);
            state.last_active = Utc::now();
            task
        };

        debug!(worker_id = %self.id, task_id = %task.id, attempt = task.attempts + 1, "Running task");
        match self.execute(&task).await {
            Ok(result) => {
                self.complete_task(task, result).await;
                Ok(true)
            }
            Err(e) => {
                self.fail_task(task, &e).await;
                Err(e)
            }
        }
    }

    async fn execute(&self, task: &Task) -> std::result::Result<String, TaskError> {
        let handler = self.env.handlers.resolve(&self.spec.specialization)?;
        let timeout = self.env.runtime.task_timeout();
        let run = AssertUnwindSafe(handler.handle(&self.spec, task)).catch_unwind();

        match tokio::time::timeout(timeout, run).await {
            Err(_) => Err(TaskError::Timeout { timeout_secs: timeout.as_secs() }),
            Ok(Err(_)) => Err(TaskError::failed("handler panicked")),
            Ok(Ok(result)) => result,
        }
    }

    async fn complete_task(&self, task: Task, result: String) {
        let now = Utc::now();
        let summary = task.summary();
        let pattern = json!({
            "text": format!("{}: {} -> {}", self.spec.specialization, summary, result),
            "task_id": task.id,
            "worker": self.spec.name,
            "tags": [self.spec.specialization, LEARNED_PATTERN_TAG],
        });

        self.push_history(InteractionRecord {
            task: summary,
            result,
            timestamp: now,
        })
        .await;

        {
            let mut state = self.state.write().await;
            state.patterns.push(pattern);
            state.consecutive_failures = 0;
            state.last_active = now;
            transition_logged(&self.id, &mut state, WorkerStatus::Idle, "task completed", &self.env.events);
        }

        self.env.events.emit(
            EventLogEntry::new(EventType::TaskCompleted, json!({ "task_id": task.id, "attempts": task.attempts + 1 }))
                .from_worker(&self.id),
        );
    }

    /// Retry at the front of the queue while attempts remain, otherwise
    /// dead-letter.
    async fn fail_task(&self, mut task: Task, error: &TaskError) {
        task.attempts += 1;
        task.last_error = Some(error.to_string());
        let max_attempts = self.env.runtime.max_task_attempts.max(1);

        warn!(worker_id = %self.id, task_id = %task.id, attempts = task.attempts, error = %error, "Task failed");
        self.env.events.emit(
            EventLogEntry::new(
                EventType::TaskFailed,
                json!({ "task_id": task.id, "attempts": task.attempts, "error": error.to_string() }),
            )
            .from_worker(&self.id),
        );

        if error.is_retryable() && task.attempts < max_attempts {
            self.state.write().await.queue.push_front(task);
        } else {
            self.state.write().await.dead_lettered += 1;
            self.dead_letter(task, error.to_string());
        }
    }

    fn dead_letter(&self, task: Task, reason: String) {
        self.env.events.emit(
            EventLogEntry::new(
                EventType::TaskDeadLettered,
                json!({ "task_id": task.id, "attempts": task.attempts, "error": reason }),
            )
            .from_worker(&self.id),
        );
        self.env.dead_letters.push(&self.id, task, reason);
    }

    async fn flush_patterns(&self) -> Result<()> {
        let patterns = {
            let mut state = self.state.write().await;
            if state.patterns.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut state.patterns)
        };

        let decision = self.env.gate.check_allowed(self.id.as_str(), "store_experience");
        if !decision.allowed {
            let reason = decision.reason;
            warn!(worker_id = %self.id, reason = %reason, discarded = patterns.len(), "Learned patterns not stored: action denied");
            self.env.events.emit(
                EventLogEntry::new(
                    EventType::ActionDenied,
                    json!({ "action": "store_experience", "reason": reason }),
                )
                .from_worker(&self.id),
            );
            return Ok(());
        }

        let total = patterns.len();
        for (stored, pattern) in patterns.into_iter().enumerate() {
            if let Err(e) = self.env.store.store_experience(&self.id, pattern).await {
                warn!(worker_id = %self.id, error = %e, dropped = total - stored, "Failed to flush learned patterns");
                return Err(e);
            }
        }
        debug!(worker_id = %self.id, count = total, "Learned patterns flushed");
        Ok(())
    }

    async fn enter_error(&self, reason: &str) {
        let mut state = self.state.write().await;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(Utc::now());
        if transition_logged(&self.id, &mut state, WorkerStatus::Error, reason, &self.env.events) {
            warn!(worker_id = %self.id, failures = state.consecutive_failures, reason, "Worker entered error state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{FnHandler, TaskHandler};
    use crate::mailbox::{mailbox, MailboxSender};
    use colony_core::GateDecision;
    use std::collections::HashMap;

    struct DenyStore;

    impl ActionGate for DenyStore {
        fn check_allowed(&self, _actor_id: &str, action_name: &str) -> GateDecision {
            if action_name == "store_experience" {
                GateDecision::deny("read-only")
            } else {
                GateDecision::allow()
            }
        }
    }

    struct AllowAll;

    impl ActionGate for AllowAll {
        fn check_allowed(&self, _actor_id: &str, _action_name: &str) -> GateDecision {
            GateDecision::allow()
        }
    }

    struct Fixture {
        worker: Worker,
        tx: MailboxSender,
        state: Arc<RwLock<WorkerState>>,
        env: Arc<WorkerEnv>,
    }

    fn fixture(handlers: HandlerTable, gate: Arc<dyn ActionGate>, runtime: RuntimeConfig) -> Fixture {
        let events = Arc::new(EventLog::in_memory(500));
        let env = Arc::new(WorkerEnv {
            store: Arc::new(MemoryStore::in_memory(32, events.clone())),
            events,
            gate,
            handlers: Arc::new(handlers),
            dead_letters: Arc::new(DeadLetterQueue::new(16)),
            registry: Arc::new(RwLock::new(HashMap::new())),
            runtime,
        });
        let (tx, rx) = mailbox(env.runtime.mailbox_capacity);
        let state = Arc::new(RwLock::new(WorkerState::new(Utc::now())));
        let worker = Worker::new(
            WorkerId::from("w1"),
            Arc::new(WorkerSpecification::new("scout", "discovery")),
            state.clone(),
            rx,
            env.clone(),
        );
        Fixture { worker, tx, state, env }
    }

    fn failing() -> Arc<dyn TaskHandler> {
        Arc::new(FnHandler(|_: &WorkerSpecification, _: &Task| Err(TaskError::failed("upstream down"))))
    }

    #[tokio::test]
    async fn task_runs_in_one_tick_and_flushes_pattern() {
        let mut f = fixture(HandlerTable::echo(), Arc::new(AllowAll), RuntimeConfig::default());
        f.tx.deliver(Message::task(json!("find grants"))).unwrap();

        assert_eq!(f.worker.tick().await, TickOutcome::Worked);
        let state = f.state.read().await;
        assert_eq!(state.status, WorkerStatus::Idle);
        assert_eq!(state.history.len(), 1);
        assert!(state.patterns.is_empty());
        drop(state);

        let stored = f.env.store.snapshot().await;
        assert_eq!(stored.len(), 1);
        assert!(stored[0].tags.iter().any(|t| t == LEARNED_PATTERN_TAG));
        assert!(stored[0].tags.contains(&"discovery".to_string()));
    }

    #[tokio::test]
    async fn empty_tick_is_idle() {
        let mut f = fixture(HandlerTable::echo(), Arc::new(AllowAll), RuntimeConfig::default());
        assert_eq!(f.worker.tick().await, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn failure_requeues_at_front_and_enters_error() {
        let handlers = HandlerTable::new().with_default(failing());
        let mut f = fixture(handlers, Arc::new(AllowAll), RuntimeConfig::default());
        f.tx.deliver(Message::task(json!("first"))).unwrap();
        f.tx.deliver(Message::task(json!("second"))).unwrap();

        f.worker.tick().await;
        let state = f.state.read().await;
        assert_eq!(state.status, WorkerStatus::Error);
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.queue.front().unwrap().summary(), "first");
        assert_eq!(state.queue.front().unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn error_worker_queues_but_does_not_run() {
        let mut f = fixture(HandlerTable::echo(), Arc::new(AllowAll), RuntimeConfig::default());
        f.state.write().await.status = WorkerStatus::Error;
        f.tx.deliver(Message::task(json!("wait"))).unwrap();

        f.worker.tick().await;
        let state = f.state.read().await;
        assert_eq!(state.queue.len(), 1);
        assert!(state.history.is_empty());
    }

    #[tokio::test]
    async fn exhausted_task_is_dead_lettered() {
        let handlers = HandlerTable::new().with_default(failing());
        let runtime = RuntimeConfig { max_task_attempts: 2, ..RuntimeConfig::default() };
        let mut f = fixture(handlers, Arc::new(AllowAll), runtime);
        f.tx.deliver(Message::task(json!("doomed"))).unwrap();

        f.worker.tick().await;
        f.state.write().await.transition(WorkerStatus::Idle);
        f.worker.tick().await;

        let letters = f.env.dead_letters.snapshot();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].task.attempts, 2);
        assert!(letters[0].error.contains("upstream down"));
        assert!(f.state.read().await.queue.is_empty());
    }

    #[tokio::test]
    async fn missing_handler_dead_letters_immediately() {
        let mut f = fixture(HandlerTable::new(), Arc::new(AllowAll), RuntimeConfig::default());
        f.tx.deliver(Message::task(json!("nobody home"))).unwrap();
        f.worker.tick().await;
        assert_eq!(f.env.dead_letters.len(), 1);
        assert_eq!(f.state.read().await.status, WorkerStatus::Error);
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        struct Slow;

        #[async_trait::async_trait]
        impl TaskHandler for Slow {
            async fn handle(&self, _: &WorkerSpecification, _: &Task) -> std::result::Result<String, TaskError> {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Ok("late".into())
            }
        }

        let runtime = RuntimeConfig { task_timeout_secs: 1, max_task_attempts: 1, ..RuntimeConfig::default() };
        let mut f = fixture(HandlerTable::new().with_default(Arc::new(Slow)), Arc::new(AllowAll), runtime);
        f.tx.deliver(Message::task(json!("slow"))).unwrap();

        tokio::time::pause();
        f.worker.tick().await;
        let letters = f.env.dead_letters.snapshot();
        assert_eq!(letters.len(), 1);
        assert!(letters[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn full_task_queue_dead_letters_new_tasks() {
        let runtime = RuntimeConfig { task_queue_capacity: 1, ..RuntimeConfig::default() };
        let mut f = fixture(HandlerTable::echo(), Arc::new(AllowAll), runtime);
        f.state.write().await.status = WorkerStatus::Error;
        f.tx.deliver(Message::task(json!("kept"))).unwrap();
        f.tx.deliver(Message::task(json!("overflow"))).unwrap();

        f.worker.tick().await;
        f.worker.tick().await;
        assert_eq!(f.state.read().await.queue.len(), 1);
        let letters = f.env.dead_letters.snapshot();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].task.summary(), "overflow");
    }

    #[tokio::test]
    async fn denied_flush_discards_patterns() {
        let mut f = fixture(HandlerTable::echo(), Arc::new(DenyStore), RuntimeConfig::default());
        f.tx.deliver(Message::task(json!("note this"))).unwrap();
        f.worker.tick().await;

        assert!(f.env.store.is_empty().await);
        assert!(f.state.read().await.patterns.is_empty());
        assert_eq!(f.env.events.by_type(EventType::ActionDenied).len(), 1);
        assert_eq!(f.state.read().await.status, WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn reply_appends_to_history() {
        let mut f = fixture(HandlerTable::echo(), Arc::new(AllowAll), RuntimeConfig::default());
        f.tx.deliver(Message::reply(json!({"text": "three matches"})).from_worker(&WorkerId::from("w2")))
            .unwrap();
        f.worker.tick().await;

        let state = f.state.read().await;
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].task, "reply from w2");
        assert_eq!(state.history[0].result, "three matches");
    }

    #[tokio::test]
    async fn query_without_known_sender_is_answered_and_dropped() {
        let mut f = fixture(HandlerTable::echo(), Arc::new(AllowAll), RuntimeConfig::default());
        f.env.store.store_experience(&WorkerId::from("w1"), json!("grant list")).await.unwrap();
        f.tx.deliver(Message::query("grant").from_worker(&WorkerId::from("ghost"))).unwrap();

        assert_eq!(f.worker.tick().await, TickOutcome::Worked);
        assert_eq!(f.state.read().await.status, WorkerStatus::Idle);
        assert!(f.env.events.by_type(EventType::MessageRouted).is_empty());
    }

    #[tokio::test]
    async fn completed_worker_stops() {
        let mut f = fixture(HandlerTable::echo(), Arc::new(AllowAll), RuntimeConfig::default());
        f.state.write().await.transition(WorkerStatus::Completed);
        assert_eq!(f.worker.tick().await, TickOutcome::Stopped);
    }
}
