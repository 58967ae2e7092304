use colony_config::{MemoryConfig, RetentionConfig};
use colony_core::{EventType, MemoryKind, SimilarityQuery, WorkerId};
use colony_memory::{EventLog, JsonlJournal, MemoryStore, RetentionManager};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_produce_distinct_records() {
    let store = Arc::new(MemoryStore::in_memory(64, Arc::new(EventLog::in_memory(1000))));

    let mut handles = Vec::new();
    for worker in ["alpha", "beta"] {
        for n in 0..500 {
            let store = store.clone();
            let owner = WorkerId::from(worker);
            handles.push(tokio::spawn(async move {
                store
                    .store_experience(&owner, json!({ "text": format!("{worker} result {n}") }))
                    .await
                    .unwrap()
            }));
        }
    }

    let ids: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let distinct: HashSet<_> = ids.iter().cloned().collect();
    assert_eq!(distinct.len(), 1000);
    assert_eq!(store.len().await, 1000);
    for id in ids.iter().take(20) {
        assert_eq!(store.embedding(id).await.unwrap().len(), 64);
    }
    assert_eq!(store.events().len(), 1000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_searches_count_every_hit() {
    let store = Arc::new(MemoryStore::in_memory(64, Arc::new(EventLog::in_memory(1000))));
    let owner = WorkerId::from("alpha");
    for n in 0..10 {
        store
            .store_knowledge(&owner, json!({ "text": format!("grant note {n}") }))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for n in 0..100 {
        let store = store.clone();
        let owner = owner.clone();
        handles.push(tokio::spawn(async move {
            let query = SimilarityQuery::new(format!("grant note {}", n % 10));
            let hits = if n % 2 == 0 {
                store.find_similar(&query, 1).await.unwrap()
            } else {
                store.dynamic_find_similar(&query, Some(&owner), 1).await.unwrap()
            };
            hits.len()
        }));
    }
    let returned: usize = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .sum();

    assert_eq!(returned, 100);
    let total: u64 = store
        .snapshot()
        .await
        .iter()
        .map(|r| u64::from(r.access_count))
        .sum();
    assert_eq!(total, 100);
}

#[tokio::test]
async fn reopening_replays_the_file_journal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.jsonl");
    let config = MemoryConfig::default();
    let owner = WorkerId::from("scribe");

    let (kept, removed) = {
        let store = MemoryStore::open(&config, &path, Arc::new(EventLog::in_memory(100)))
            .await
            .unwrap();
        let kept = store
            .store_knowledge(&owner, json!({ "text": "board meets quarterly", "tags": ["governance"] }))
            .await
            .unwrap();
        let removed = store.store_experience(&owner, json!("drafted the outline")).await.unwrap();
        store.remove_record(&removed).await.unwrap();
        store.close().unwrap();
        (kept, removed)
    };

    let reopened = MemoryStore::open(&config, &path, Arc::new(EventLog::in_memory(100)))
        .await
        .unwrap();
    assert_eq!(reopened.len().await, 1);
    let record = reopened.get(&kept).await.unwrap();
    assert_eq!(record.kind, MemoryKind::Knowledge);
    assert_eq!(record.tags, vec!["governance"]);
    assert!(reopened.get(&removed).await.is_none());

    let hits = reopened
        .find_similar(&SimilarityQuery::new("when does the board meet"), 5)
        .await
        .unwrap();
    assert_eq!(hits[0].record.id, kept);
}

#[tokio::test]
async fn event_log_mirrors_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let events = Arc::new(EventLog::new(2, Arc::new(JsonlJournal::open(&path, false).unwrap())));
    let store = MemoryStore::in_memory(16, events.clone());

    for n in 0..3 {
        store.store_experience(&WorkerId::from("w"), json!(n.to_string())).await.unwrap();
    }
    events.close().unwrap();

    assert_eq!(events.len(), 2);
    let lines = std::fs::read_to_string(&path).unwrap();
    assert_eq!(lines.lines().count(), 3);
    assert!(lines.lines().all(|l| l.contains("record_stored")));
    assert_eq!(events.by_type(EventType::RecordStored).len(), 2);
}

#[tokio::test]
async fn frequently_used_records_survive_retention_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.jsonl");
    let config = MemoryConfig::default();
    let owner = WorkerId::from("archivist");

    let (hot, cold) = {
        let store = MemoryStore::open(&config, &path, Arc::new(EventLog::in_memory(100)))
            .await
            .unwrap();
        let hot = store
            .store_knowledge(&owner, json!({ "text": "matching funds policy", "confidence": 0.3 }))
            .await
            .unwrap();
        let cold = store
            .store_knowledge(&owner, json!({ "text": "old parking memo", "confidence": 0.3 }))
            .await
            .unwrap();
        for _ in 0..5 {
            store.find_similar(&SimilarityQuery::new("matching funds policy"), 1).await.unwrap();
        }
        assert_eq!(store.get(&hot).await.unwrap().access_count, 5);
        store.close().unwrap();
        (hot, cold)
    };

    let reopened = Arc::new(
        MemoryStore::open(&config, &path, Arc::new(EventLog::in_memory(100)))
            .await
            .unwrap(),
    );
    let record = reopened.get(&hot).await.unwrap();
    assert_eq!(record.access_count, 5);

    let retention = RetentionManager::new(reopened.clone(), RetentionConfig::default());
    let report = retention.sweep_at(record.created_at + chrono::Duration::days(40)).await;
    assert_eq!(report.removed, vec![cold]);
    assert!(reopened.get(&hot).await.is_some());
}
