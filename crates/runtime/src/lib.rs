//! The Colony multi-agent runtime.
//!
//! An [`AgentSupervisor`] spawns independent [`Worker`] loops, routes
//! [`Message`]s into their mailboxes and runs the [`CoordinationLoop`] that
//! keeps the pool healthy. Workers record what they learn in the shared
//! [`colony_memory::MemoryStore`].
//!
//! ```text
//!  caller ──send_message──▶ mailbox ──▶ worker loop ──▶ handler table
//!                                          │  ▲
//!                          learned patterns│  │queries
//!                                          ▼  │
//!                                       MemoryStore ◀── RetentionManager
//! ```

pub mod coordination;
pub mod dead_letter;
pub mod handler;
pub mod mailbox;
pub mod registry;
pub mod supervisor;
pub mod worker;

pub use coordination::{CoordinationLoop, CoordinationReport, RecoveryAction, RecoveryPolicy};
pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use handler::{EchoHandler, FnHandler, HandlerTable, Task, TaskHandler};
pub use mailbox::{Message, MessageKind};
pub use registry::{WorkerHandle, WorkerState};
pub use supervisor::AgentSupervisor;
pub use worker::{TickOutcome, Worker, WorkerEnv};
