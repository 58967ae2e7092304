//! Worker mailboxes: bounded channels carrying tasks, queries and replies.

use chrono::{DateTime, Utc};
use colony_core::{Error, Result, WorkerId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Work to be queued and executed
    Task,
    /// A request for similar prior experience; answered with a `Reply`
    Query,
    /// An answer to an earlier query, appended to history
    Reply,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,

    /// Worker to reply to (queries) or that replied (replies)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<WorkerId>,

    pub payload: serde_json::Value,
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn new(kind: MessageKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            sender: None,
            payload,
            sent_at: Utc::now(),
        }
    }

    pub fn task(payload: serde_json::Value) -> Self {
        Self::new(MessageKind::Task, payload)
    }

    pub fn query(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Query, serde_json::json!({ "text": text.into() }))
    }

    pub fn reply(payload: serde_json::Value) -> Self {
        Self::new(MessageKind::Reply, payload)
    }

    pub fn from_worker(mut self, sender: &WorkerId) -> Self {
        self.sender = Some(sender.clone());
        self
    }

    pub fn text(&self) -> String {
        payload_text(&self.payload)
    }
}

/// Text of a payload: the string itself, its `text` field, or compact JSON.
pub fn payload_text(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(s) => s.clone(),
        other => other
            .get("text")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

/// Sending half of a worker's mailbox.
#[derive(Debug, Clone)]
pub struct MailboxSender {
    tx: mpsc::Sender<Message>,
    capacity: usize,
}

impl MailboxSender {
    /// Enqueue without waiting. A full mailbox is a capacity error; a
    /// dropped receiver means the worker loop has exited.
    pub fn deliver(&self, message: Message) -> Result<()> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => Error::Capacity { resource: "mailbox", limit: self.capacity },
            TrySendError::Closed(_) => Error::Concurrency("worker loop has exited".into()),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a mailbox holding at most `capacity` undelivered messages.
pub fn mailbox(capacity: usize) -> (MailboxSender, mpsc::Receiver<Message>) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (MailboxSender { tx, capacity }, rx)
}
