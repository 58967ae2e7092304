//! Worker specification, identity and lifecycle state types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a caller submits to spawn a worker. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpecification {
    /// Human-readable name (e.g., "researcher")
    pub name: String,

    /// Free-text description of the worker's purpose
    #[serde(default)]
    pub description: String,

    /// What the worker can do. Must be non-empty.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Names of tools the worker may use
    #[serde(default)]
    pub tools: Vec<String>,

    /// Routing key for the handler table and connection grouping
    #[serde(default = "default_specialization")]
    pub specialization: String,

    #[serde(default = "default_communication_style")]
    pub communication_style: String,

    #[serde(default = "default_autonomy_level")]
    pub autonomy_level: String,
}

fn default_specialization() -> String {
    "general".into()
}
fn default_communication_style() -> String {
    "concise".into()
}
fn default_autonomy_level() -> String {
    "supervised".into()
}

impl WorkerSpecification {
    /// Minimal specification with one capability and the given specialization.
    pub fn new(name: impl Into<String>, specialization: impl Into<String>) -> Self {
        let specialization = specialization.into();
        Self {
            name: name.into(),
            description: String::new(),
            capabilities: vec![specialization.clone()],
            tools: Vec::new(),
            specialization,
            communication_style: default_communication_style(),
            autonomy_level: default_autonomy_level(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Reject specifications the runtime cannot route.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("worker name must not be empty".into()));
        }
        if self.capabilities.iter().all(|c| c.trim().is_empty()) {
            return Err(Error::Validation(format!(
                "worker '{}' declares no capabilities",
                self.name
            )));
        }
        Ok(())
    }
}

/// Lifecycle status of a worker.
///
/// ```text
/// Idle ⇄ Processing      Idle → Active → Processing
/// any (not Completed) → Error → Idle (recovery only)
/// any (not Completed) → Completed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Active,
    Processing,
    Completed,
    Error,
}

impl WorkerStatus {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: WorkerStatus) -> bool {
        use WorkerStatus::*;
        match (self, next) {
            (Completed, _) => false,
            (_, Completed) | (_, Error) => true,
            (Idle, Active) | (Idle, Processing) => true,
            (Active, Processing) | (Active, Idle) => true,
            (Processing, Idle) => true,
            (Error, Idle) => true,
            _ => false,
        }
    }

    /// Whether the worker may start a queued task in this status.
    pub fn accepts_work(self) -> bool {
        matches!(self, WorkerStatus::Idle | WorkerStatus::Active)
    }

    pub fn is_busy(self) -> bool {
        matches!(self, WorkerStatus::Active | WorkerStatus::Processing)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Active => "active",
            WorkerStatus::Processing => "processing",
            WorkerStatus::Completed => "completed",
            WorkerStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// One executed task in a worker's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub task: String,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

/// A point-in-time view of a worker, safe to hand to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub name: String,
    pub specialization: String,
    pub status: WorkerStatus,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub queued_tasks: usize,
    pub history_len: usize,
    pub pending_patterns: usize,
    pub connections: BTreeSet<WorkerId>,
    pub consecutive_failures: u32,
    pub quarantined: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_without_capabilities_is_rejected() {
        let spec = WorkerSpecification::new("scout", "research").with_capabilities(vec![]);
        assert!(matches!(spec.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn spec_with_blank_name_is_rejected() {
        let spec = WorkerSpecification::new("  ", "research");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn spec_defaults_from_toml_like_json() {
        let spec: WorkerSpecification =
            serde_json::from_str(r#"{"name":"writer","capabilities":["draft"]}"#).unwrap();
        assert_eq!(spec.specialization, "general");
        assert_eq!(spec.autonomy_level, "supervised");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn status_machine_allows_documented_edges() {
        use WorkerStatus::*;
        assert!(Idle.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Active));
        assert!(Active.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Error));
        assert!(Error.can_transition_to(Idle));
        assert!(Active.can_transition_to(Completed));
    }

    #[test]
    fn status_machine_rejects_other_edges() {
        use WorkerStatus::*;
        assert!(!Error.can_transition_to(Processing));
        assert!(!Error.can_transition_to(Active));
        assert!(!Processing.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Idle));
        assert!(!Completed.can_transition_to(Error));
    }

    #[test]
    fn worker_ids_are_unique() {
        let a = WorkerId::new();
        let b = WorkerId::new();
        assert_ne!(a, b);
    }
}
