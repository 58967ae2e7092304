//! # Colony Core
//!
//! Domain types, traits, and error definitions for the Colony multi-agent
//! runtime. This crate has **no runtime dependencies**; it defines the domain
//! model that the memory engine, the supervisor and the policy layer implement
//! against.
//!
//! ## Design Philosophy
//!
//! Every pluggable seam is a trait here ([`Embedder`], [`ActionGate`]).
//! Implementations live in their respective crates, so tests can substitute
//! stubs and the dependency graph points inward at core.

pub mod error;
pub mod agent;
pub mod memory;
pub mod event;
pub mod embed;
pub mod gate;

// Re-export key types at crate root for ergonomics
pub use error::{Error, MemoryError, Result, TaskError};
pub use agent::{InteractionRecord, WorkerId, WorkerSnapshot, WorkerSpecification, WorkerStatus};
pub use memory::{MemoryKind, LEARNED_PATTERN_TAG, MemoryRecord, RecordId, ScoredRecord, SearchFilters, SimilarityQuery};
pub use event::{EventLogEntry, EventType};
pub use embed::Embedder;
pub use gate::{ActionGate, GateDecision, Gated};
