//! ActionGate: the external policy boundary consulted before visible actions.
//!
//! A denial is never an error: the caller skips the action, logs the reason,
//! and reports [`Gated::Denied`].

use serde::{Deserialize, Serialize};

/// Answer from the policy layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: String,
}

impl GateDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

pub trait ActionGate: Send + Sync {
    fn check_allowed(&self, actor_id: &str, action_name: &str) -> GateDecision;
}

/// Outcome of a gated operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gated<T> {
    Allowed(T),
    Denied { reason: String },
}

impl<T> Gated<T> {
    pub fn allowed(self) -> Option<T> {
        match self {
            Gated::Allowed(v) => Some(v),
            Gated::Denied { .. } => None,
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Gated::Denied { .. })
    }
}
