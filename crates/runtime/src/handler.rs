//! Task handlers: what a worker actually does with a task.
//!
//! The runtime only dispatches, tracks and records tasks. Handlers are
//! registered per specialization in a [`HandlerTable`]; a worker whose
//! specialization has no entry falls back to the table's default handler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use colony_core::{TaskError, WorkerSpecification};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::mailbox::{payload_text, Message};

/// A queued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub payload: serde_json::Value,

    /// Failed attempts so far
    #[serde(default)]
    pub attempts: u32,

    pub received_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Task {
    pub fn new(payload: serde_json::Value) -> Self {
        Self::from_message(&Message::task(payload))
    }

    pub fn from_message(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            payload: message.payload.clone(),
            attempts: 0,
            received_at: Utc::now(),
            last_error: None,
        }
    }

    /// Short human-readable form, used in history and learned patterns.
    pub fn summary(&self) -> String {
        payload_text(&self.payload)
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Produce the result text for `task`. The runtime stores it verbatim.
    async fn handle(&self, spec: &WorkerSpecification, task: &Task) -> Result<String, TaskError>;
}

/// Acknowledges every task. The default when no handler is configured.
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn handle(&self, spec: &WorkerSpecification, task: &Task) -> Result<String, TaskError> {
        Ok(format!("{} ({}) handled: {}", spec.name, spec.specialization, task.summary()))
    }
}

/// Adapts a closure into a handler.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(&WorkerSpecification, &Task) -> Result<String, TaskError> + Send + Sync,
{
    async fn handle(&self, spec: &WorkerSpecification, task: &Task) -> Result<String, TaskError> {
        (self.0)(spec, task)
    }
}

/// Specialization → handler routing.
#[derive(Default, Clone)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    fallback: Option<Arc<dyn TaskHandler>>,
}

impl HandlerTable {
    /// An empty table with no fallback: every task fails with `NoHandler`.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that echoes every task.
    pub fn echo() -> Self {
        Self::new().with_default(Arc::new(EchoHandler))
    }

    pub fn register(&mut self, specialization: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(specialization.into(), handler);
    }

    pub fn with_handler(mut self, specialization: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(specialization, handler);
        self
    }

    pub fn with_default(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub fn resolve(&self, specialization: &str) -> Result<Arc<dyn TaskHandler>, TaskError> {
        self.handlers
            .get(specialization)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| TaskError::NoHandler(specialization.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registered_handler_wins_over_default() {
        let table = HandlerTable::echo().with_handler(
            "discovery",
            Arc::new(FnHandler(|_: &WorkerSpecification, _: &Task| Ok("found 3 leads".to_string()))),
        );
        let spec = WorkerSpecification::new("scout", "discovery");
        let task = Task::new(json!("find leads"));

        let handler = table.resolve("discovery").unwrap();
        assert_eq!(handler.handle(&spec, &task).await.unwrap(), "found 3 leads");

        let fallback = table.resolve("writing").unwrap();
        let out = fallback.handle(&spec, &task).await.unwrap();
        assert!(out.contains("find leads"));
    }

    #[test]
    fn missing_handler_is_reported() {
        let table = HandlerTable::new();
        assert!(matches!(table.resolve("writing"), Err(TaskError::NoHandler(s)) if s == "writing"));
    }

    #[test]
    fn task_summary_prefers_text_field() {
        assert_eq!(Task::new(json!({"text": "draft intro", "priority": 1})).summary(), "draft intro");
        assert_eq!(Task::new(json!([1, 2])).summary(), "[1,2]");
    }
}
