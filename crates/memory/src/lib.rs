//! Shared memory engine for Colony.
//!
//! [`MemoryStore`] keeps records, embeddings and the relationship graph under
//! one lock; [`EventLog`] is the bounded system log; [`RetentionManager`]
//! evicts stale low-value records. Both the store and the log mirror their
//! writes to a [`Journal`].

pub mod embedder;
pub mod event_log;
pub mod graph;
pub mod journal;
pub mod retention;
pub mod scoring;
pub mod store;
pub mod vector;

pub use embedder::HashEmbedder;
pub use event_log::EventLog;
pub use graph::RelationGraph;
pub use journal::{Journal, JournalEntry, JsonlJournal, MemoryJournal, NoopJournal};
pub use retention::{RetentionManager, RetentionReport};
pub use store::MemoryStore;
pub use vector::cosine_similarity;
