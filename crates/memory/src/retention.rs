//! Periodic eviction of stale, low-value records.
//!
//! A record is evicted only when all three hold at sweep time: it is older
//! than `max_age_days`, its confidence is below `min_confidence`, and it has
//! been accessed fewer than `min_access_count` times.

use chrono::{DateTime, Duration, Utc};
use colony_config::RetentionConfig;
use colony_core::{Error, EventLogEntry, EventType, MemoryRecord, RecordId};
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::MemoryStore;

/// Outcome of one retention pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionReport {
    pub scanned: usize,
    pub removed: Vec<RecordId>,
}

pub struct RetentionManager {
    store: Arc<MemoryStore>,
    config: RetentionConfig,
}

impl RetentionManager {
    pub fn new(store: Arc<MemoryStore>, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    pub fn is_expired(&self, record: &MemoryRecord, now: DateTime<Utc>) -> bool {
        // Past chrono's range nothing is old enough.
        let Some(max_age) = Duration::try_days(i64::from(self.config.max_age_days)) else {
            return false;
        };
        now - record.created_at > max_age
            && record.confidence < self.config.min_confidence
            && record.access_count < self.config.min_access_count
    }

    /// Run one pass as of `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> RetentionReport {
        let records = self.store.snapshot().await;
        let mut report = RetentionReport { scanned: records.len(), removed: Vec::new() };

        for record in records.iter().filter(|r| self.is_expired(r, now)) {
            match self.store.remove_record(&record.id).await {
                Ok(_) => report.removed.push(record.id.clone()),
                // Removed concurrently since the snapshot.
                Err(Error::NotFound { .. }) => {}
                Err(e) => warn!(record_id = %record.id, error = %e, "Retention failed to remove record"),
            }
        }

        if !report.removed.is_empty() {
            info!(scanned = report.scanned, removed = report.removed.len(), "Retention sweep");
        } else {
            debug!(scanned = report.scanned, "Retention sweep found nothing to evict");
        }
        self.store.events().emit(EventLogEntry::new(
            EventType::RetentionSweep,
            json!({ "scanned": report.scanned, "removed": report.removed.len() }),
        ));
        report
    }

    /// Start the periodic sweep. The loop ends when `token` is cancelled; a
    /// panicking pass is logged and the next one runs on schedule.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval());
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Retention loop stopping");
                        return;
                    }
                    _ = interval.tick() => {}
                }

                let pass = AssertUnwindSafe(self.sweep_at(Utc::now())).catch_unwind().await;
                if pass.is_err() {
                    error!("Retention sweep panicked");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::EventLog;
    use colony_core::{SimilarityQuery, WorkerId};

    fn setup() -> (Arc<MemoryStore>, RetentionManager) {
        let store = Arc::new(MemoryStore::in_memory(32, Arc::new(EventLog::in_memory(100))));
        let manager = RetentionManager::new(store.clone(), RetentionConfig::default());
        (store, manager)
    }

    async fn low_value(store: &MemoryStore, text: &str) -> MemoryRecord {
        let id = store
            .store_experience(&WorkerId::from("w1"), json!({ "text": text, "confidence": 0.3 }))
            .await
            .unwrap();
        store.get(&id).await.unwrap()
    }

    #[tokio::test]
    async fn evicts_old_low_confidence_unused_record() {
        let (store, manager) = setup();
        let record = low_value(&store, "stale").await;

        let report = manager.sweep_at(record.created_at + Duration::days(40)).await;
        assert_eq!(report.removed, vec![record.id.clone()]);
        assert!(store.get(&record.id).await.is_none());
    }

    #[tokio::test]
    async fn never_evicts_young_records() {
        let (store, manager) = setup();
        let record = low_value(&store, "young").await;

        let report = manager.sweep_at(record.created_at + Duration::days(29)).await;
        assert!(report.removed.is_empty());
        assert_eq!(report.scanned, 1);
        assert!(store.get(&record.id).await.is_some());
    }

    #[tokio::test]
    async fn out_of_range_max_age_never_expires() {
        let (store, _) = setup();
        let config = RetentionConfig {
            max_age_days: u32::MAX,
            ..RetentionConfig::default()
        };
        let manager = RetentionManager::new(store.clone(), config);
        let record = low_value(&store, "ancient").await;

        let report = manager.sweep_at(record.created_at + Duration::days(100_000)).await;
        assert!(report.removed.is_empty());
        assert_eq!(report.scanned, 1);
    }

    #[tokio::test]
    async fn confident_records_survive() {
        let (store, manager) = setup();
        let id = store
            .store_experience(&WorkerId::from("w1"), json!("confident by default"))
            .await
            .unwrap();
        let created = store.get(&id).await.unwrap().created_at;

        assert!(manager.sweep_at(created + Duration::days(400)).await.removed.is_empty());
    }

    #[tokio::test]
    async fn frequently_accessed_records_survive() {
        let (store, manager) = setup();
        let record = low_value(&store, "popular").await;
        for _ in 0..3 {
            store.find_similar(&SimilarityQuery::new("popular"), 1).await.unwrap();
        }

        let report = manager.sweep_at(record.created_at + Duration::days(40)).await;
        assert!(report.removed.is_empty());
    }

    #[tokio::test]
    async fn sweep_is_recorded_in_event_log() {
        let (store, manager) = setup();
        let record = low_value(&store, "stale").await;
        manager.sweep_at(record.created_at + Duration::days(40)).await;

        let sweeps = store.events().by_type(EventType::RetentionSweep);
        assert_eq!(sweeps.len(), 1);
        assert_eq!(sweeps[0].payload["removed"], 1);
        assert_eq!(store.events().by_type(EventType::RecordRemoved).len(), 1);
    }

    #[tokio::test]
    async fn spawned_loop_stops_on_cancel() {
        let (_store, manager) = setup();
        let token = CancellationToken::new();
        let handle = Arc::new(manager).spawn(token.clone());
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
