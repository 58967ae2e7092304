//! Bounded store of tasks that could not be completed.

use chrono::{DateTime, Utc};
use colony_core::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

use crate::handler::Task;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub worker_id: WorkerId,
    pub task: Task,
    pub error: String,
    pub dead_at: DateTime<Utc>,
}

/// Drop-oldest queue of dead letters.
pub struct DeadLetterQueue {
    capacity: usize,
    letters: Mutex<VecDeque<DeadLetter>>,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            letters: Mutex::new(VecDeque::new()),
        }
    }

    fn letters(&self) -> MutexGuard<'_, VecDeque<DeadLetter>> {
        self.letters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, worker_id: &WorkerId, task: Task, error: impl Into<String>) {
        let error = error.into();
        warn!(worker_id = %worker_id, task_id = %task.id, attempts = task.attempts, error = %error, "Task dead-lettered");

        let mut letters = self.letters();
        letters.push_back(DeadLetter {
            worker_id: worker_id.clone(),
            task,
            error,
            dead_at: Utc::now(),
        });
        while letters.len() > self.capacity {
            letters.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<DeadLetter> {
        self.letters().iter().cloned().collect()
    }

    /// Take every dead letter out of the queue.
    pub fn drain(&self) -> Vec<DeadLetter> {
        self.letters().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.letters().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
