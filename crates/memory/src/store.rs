//! The shared memory store.
//!
//! Records, their embeddings and the relationship graph sit behind a single
//! `RwLock`, so every mutation touches all three atomically. Embeddings are
//! computed before the lock is taken. A mutation is journaled while holding
//! the lock and before the in-memory state changes, so a failed write leaves
//! the index untouched.

use chrono::Utc;
use colony_config::MemoryConfig;
use colony_core::{
    Embedder, Error, EventLogEntry, EventType, MemoryError, MemoryKind, MemoryRecord, RecordId,
    Result, ScoredRecord, SearchFilters, SimilarityQuery, WorkerId,
};
use serde_json::json;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::embedder::HashEmbedder;
use crate::event_log::EventLog;
use crate::graph::RelationGraph;
use crate::journal::{append_json, replay, Journal, JournalEntry, JsonlJournal, NoopJournal};
use crate::scoring;
use crate::vector::{cosine_similarity, rank_by_similarity};

#[derive(Default)]
struct StoreState {
    records: HashMap<RecordId, MemoryRecord>,
    embeddings: HashMap<RecordId, Vec<f32>>,
    graph: RelationGraph,
}

impl StoreState {
    fn insert(&mut self, record: MemoryRecord, embedding: Vec<f32>) {
        let id = record.id.clone();
        for related in &record.relations {
            self.graph.link(&id, related);
            if let Some(neighbour) = self.records.get_mut(related) {
                if !neighbour.relations.contains(&id) {
                    neighbour.relations.push(id.clone());
                }
            }
        }
        self.embeddings.insert(id.clone(), embedding);
        self.records.insert(id, record);
    }

    fn remove(&mut self, id: &RecordId) -> Option<MemoryRecord> {
        let record = self.records.remove(id)?;
        self.embeddings.remove(id);
        for neighbour in self.graph.remove(id) {
            if let Some(n) = self.records.get_mut(&neighbour) {
                n.relations.retain(|r| r != id);
            }
        }
        Some(record)
    }
}

pub struct MemoryStore {
    state: RwLock<StoreState>,
    embedder: Arc<dyn Embedder>,
    journal: Arc<dyn Journal>,
    events: Arc<EventLog>,
    max_records: Option<usize>,
}

impl MemoryStore {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        journal: Arc<dyn Journal>,
        events: Arc<EventLog>,
        max_records: Option<usize>,
    ) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            embedder,
            journal,
            events,
            max_records,
        }
    }

    /// Unbounded, non-persistent store with a [`HashEmbedder`].
    pub fn in_memory(dimensions: usize, events: Arc<EventLog>) -> Self {
        Self::new(
            Arc::new(HashEmbedder::new(dimensions)),
            Arc::new(NoopJournal),
            events,
            None,
        )
    }

    /// Build a store from configuration and replay its journal.
    pub async fn open(config: &MemoryConfig, journal_path: &Path, events: Arc<EventLog>) -> Result<Self> {
        let journal: Arc<dyn Journal> = if config.persist {
            Arc::new(JsonlJournal::open(journal_path, config.fsync)?)
        } else {
            Arc::new(NoopJournal)
        };
        let store = Self::new(
            Arc::new(HashEmbedder::new(config.embedding_dimensions)),
            journal,
            events,
            config.max_records,
        );
        let restored = store.restore_from_journal().await?;
        info!(
            records = restored,
            journal = store.journal.name(),
            embedder = store.embedder.name(),
            "Memory store opened"
        );
        Ok(store)
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self.embedder.embed(text).await?;
        let expected = self.embedder.dimensions();
        if embedding.len() != expected {
            return Err(MemoryError::DimensionMismatch { expected, actual: embedding.len() }.into());
        }
        Ok(embedding)
    }

    /// Store an experience (default confidence 1.0).
    pub async fn store_experience(&self, owner: &WorkerId, content: serde_json::Value) -> Result<RecordId> {
        self.store_record(MemoryKind::Experience, owner, content).await
    }

    /// Store knowledge (default confidence 0.8).
    pub async fn store_knowledge(&self, owner: &WorkerId, content: serde_json::Value) -> Result<RecordId> {
        self.store_record(MemoryKind::Knowledge, owner, content).await
    }

    pub async fn store_record(
        &self,
        kind: MemoryKind,
        owner: &WorkerId,
        content: serde_json::Value,
    ) -> Result<RecordId> {
        let mut record = MemoryRecord::from_content(kind, owner.clone(), content);
        let embedding = self.embed(&record.content_text()).await?;
        let declared = record.declared_relations();
        let id = record.id.clone();

        {
            let mut state = self.state.write().await;
            if let Some(limit) = self.max_records {
                if state.records.len() >= limit {
                    return Err(Error::Capacity { resource: "memory records", limit });
                }
            }

            for related in declared {
                if state.records.contains_key(&related) {
                    if !record.relations.contains(&related) {
                        record.relations.push(related);
                    }
                } else {
                    debug!(record_id = %id, related = %related, "Ignoring relation to unknown record");
                }
            }

            append_json(self.journal.as_ref(), &JournalEntry::Stored { record: record.clone() })?;
            state.insert(record, embedding);
        }

        debug!(record_id = %id, owner = %owner, ?kind, "Record stored");
        self.events.emit(
            EventLogEntry::new(EventType::RecordStored, json!({ "record_id": id, "kind": kind }))
                .from_worker(owner),
        );
        Ok(id)
    }

    pub async fn get(&self, id: &RecordId) -> Option<MemoryRecord> {
        self.state.read().await.records.get(id).cloned()
    }

    pub async fn embedding(&self, id: &RecordId) -> Option<Vec<f32>> {
        self.state.read().await.embeddings.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of undirected relationship edges.
    pub async fn relation_count(&self) -> usize {
        self.state.read().await.graph.edge_count()
    }

    /// Records linked to `id` in the relationship graph.
    pub async fn related(&self, id: &RecordId) -> Vec<MemoryRecord> {
        let state = self.state.read().await;
        state
            .graph
            .neighbours(id)
            .iter()
            .filter_map(|n| state.records.get(n).cloned())
            .collect()
    }

    /// Every record, oldest first.
    pub async fn snapshot(&self) -> Vec<MemoryRecord> {
        let mut records: Vec<MemoryRecord> =
            self.state.read().await.records.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Top `limit` records by cosine similarity, scored by relevance.
    ///
    /// Access counts of the returned records are incremented.
    pub async fn find_similar(&self, query: &SimilarityQuery, limit: usize) -> Result<Vec<ScoredRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embed(&query.text).await?;
        let now = Utc::now();

        let hits: Vec<(RecordId, f32, f32)> = {
            let state = self.state.read().await;
            rank_by_similarity(&state.embeddings, &query_embedding)
                .into_iter()
                .filter_map(|(id, similarity)| {
                    let record = state.records.get(&id)?;
                    let score = scoring::relevance(record, &query.tags, now);
                    Some((id, similarity, score))
                })
                .take(limit)
                .collect()
        };
        self.record_access(hits).await
    }

    /// Top `limit` records by the combined score, with a small bonus for
    /// records owned by `owner`. Ties fall back to cosine similarity.
    pub async fn dynamic_find_similar(
        &self,
        query: &SimilarityQuery,
        owner: Option<&WorkerId>,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embed(&query.text).await?;
        let now = Utc::now();

        let mut scored: Vec<(RecordId, f32, f32)> = {
            let state = self.state.read().await;
            state
                .records
                .values()
                .filter_map(|record| {
                    let embedding = state.embeddings.get(&record.id)?;
                    let cosine = cosine_similarity(embedding, &query_embedding);
                    let score = scoring::combined(record, cosine, &query.tags, owner, now);
                    Some((record.id.clone(), cosine, score))
                })
                .collect()
        };
        sort_by_combined(&mut scored);
        scored.truncate(limit);
        self.record_access(scored).await
    }

    /// Journal one access per hit, bump the counts and return the records.
    /// Hits removed since ranking are dropped.
    async fn record_access(&self, hits: Vec<(RecordId, f32, f32)>) -> Result<Vec<ScoredRecord>> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        let mut state = self.state.write().await;
        let hits: Vec<(RecordId, f32, f32)> = hits
            .into_iter()
            .filter(|(id, _, _)| state.records.contains_key(id))
            .collect();
        let ids: Vec<RecordId> = hits.iter().map(|(id, _, _)| id.clone()).collect();
        if !ids.is_empty() {
            append_json(self.journal.as_ref(), &JournalEntry::Accessed { ids })?;
        }

        let mut results = Vec::with_capacity(hits.len());
        for (id, similarity, score) in hits {
            if let Some(record) = state.records.get_mut(&id) {
                record.access_count = record.access_count.saturating_add(1);
                results.push(ScoredRecord { record: record.clone(), similarity, score });
            }
        }
        Ok(results)
    }

    /// Case-insensitive substring search over serialized content.
    ///
    /// Most-accessed first, newest first among equals.
    pub async fn search_by_text(&self, text: &str, filters: &SearchFilters) -> Vec<MemoryRecord> {
        let needle = text.to_lowercase();
        let state = self.state.read().await;
        let mut matches: Vec<MemoryRecord> = state
            .records
            .values()
            .filter(|r| filters.matches(r))
            .filter(|r| r.content_text().to_lowercase().contains(&needle))
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        matches
    }

    pub async fn update_confidence(&self, id: &RecordId, confidence: f32) -> Result<()> {
        let confidence = confidence.clamp(0.0, 1.0);
        let mut state = self.state.write().await;
        if !state.records.contains_key(id) {
            return Err(Error::record_not_found(id));
        }
        append_json(self.journal.as_ref(), &JournalEntry::Confidence { id: id.clone(), confidence })?;
        if let Some(record) = state.records.get_mut(id) {
            record.confidence = confidence;
        }
        Ok(())
    }

    /// Remove a record together with its embedding and graph edges.
    pub async fn remove_record(&self, id: &RecordId) -> Result<MemoryRecord> {
        let removed = {
            let mut state = self.state.write().await;
            if !state.records.contains_key(id) {
                return Err(Error::record_not_found(id));
            }
            append_json(
                self.journal.as_ref(),
                &JournalEntry::Removed { id: id.clone(), at: Utc::now() },
            )?;
            state.remove(id).ok_or_else(|| Error::record_not_found(id))?
        };

        debug!(record_id = %id, "Record removed");
        self.events.emit(
            EventLogEntry::new(EventType::RecordRemoved, json!({ "record_id": id }))
                .from_worker(&removed.owner),
        );
        Ok(removed)
    }

    /// Rebuild the in-memory state by replaying the journal.
    ///
    /// Embeddings are recomputed; access counts are rebuilt from the
    /// `accessed` entries. Returns the number of records restored.
    pub async fn restore_from_journal(&self) -> Result<usize> {
        let entries: Vec<JournalEntry> = replay(self.journal.as_ref())?;

        let mut order: Vec<RecordId> = Vec::new();
        let mut records: HashMap<RecordId, MemoryRecord> = HashMap::new();
        for entry in entries {
            match entry {
                JournalEntry::Stored { record } => {
                    order.push(record.id.clone());
                    records.insert(record.id.clone(), record);
                }
                JournalEntry::Removed { id, .. } => {
                    records.remove(&id);
                }
                JournalEntry::Confidence { id, confidence } => match records.get_mut(&id) {
                    Some(record) => record.confidence = confidence,
                    None => warn!(record_id = %id, "Confidence update for unknown record in journal"),
                },
                JournalEntry::Accessed { ids } => {
                    for id in ids {
                        if let Some(record) = records.get_mut(&id) {
                            record.access_count = record.access_count.saturating_add(1);
                        }
                    }
                }
            }
        }

        let mut rebuilt = StoreState::default();
        for id in order {
            let Some(mut record) = records.remove(&id) else {
                continue;
            };
            let embedding = self.embed(&record.content_text()).await?;
            record.relations.retain(|r| rebuilt.records.contains_key(r));
            rebuilt.insert(record, embedding);
        }

        let count = rebuilt.records.len();
        *self.state.write().await = rebuilt;
        Ok(count)
    }

    /// Flush and close the journal. Later mutations fail with `JournalClosed`.
    pub fn close(&self) -> Result<()> {
        self.journal.close()?;
        Ok(())
    }
}

/// Order `(id, cosine, combined)` hits by combined score, then cosine, then id.
fn sort_by_combined(scored: &mut [(RecordId, f32, f32)]) {
    scored.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal))
            .then_with(|| a.0.cmp(&b.0))
    });
}
