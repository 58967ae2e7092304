use colony_core::{SearchFilters, SimilarityQuery, LEARNED_PATTERN_TAG};
use colony_memory::RetentionManager;
use std::collections::BTreeMap;
use std::path::Path;

pub async fn search(
    path: Option<&Path>,
    query: &str,
    limit: usize,
    text: bool,
    tags: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path)?;
    let store = super::open_store(&config).await?;

    if text {
        let filters = SearchFilters { tags, ..Default::default() };
        let records = store.search_by_text(query, &filters).await;
        println!("🔎 {} records containing \"{query}\"", records.len());
        for record in records.iter().take(limit) {
            println!("  {}  {:?}  {}", record.id, record.kind, record.content_text());
        }
        return Ok(());
    }

    let results = store
        .find_similar(&SimilarityQuery::new(query).with_tags(tags), limit)
        .await?;
    if results.is_empty() {
        println!("No records in store");
        return Ok(());
    }
    println!("🔎 Top {} matches for \"{query}\"", results.len());
    for scored in &results {
        println!(
            "  {:.3} (sim {:.3})  {}  {}",
            scored.score,
            scored.similarity,
            scored.record.id,
            scored.record.content_text()
        );
    }
    Ok(())
}

pub async fn stats(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path)?;
    let store = super::open_store(&config).await?;
    let records = store.snapshot().await;

    let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
    for record in &records {
        *by_kind.entry(format!("{:?}", record.kind)).or_default() += 1;
    }

    println!("🧠 Memory store");
    println!("   Journal:  {}", config.memory_journal_path().display());
    println!("   Records:  {}", records.len());
    for (kind, count) in &by_kind {
        println!("     {kind:<12}  {count}");
    }
    println!("   Links:    {}", store.relation_count().await);
    let patterns = records
        .iter()
        .filter(|r| r.tags.iter().any(|t| t == LEARNED_PATTERN_TAG))
        .count();
    if patterns > 0 {
        println!("   Learned patterns make up {patterns} of them");
    }
    Ok(())
}

pub async fn sweep(path: Option<&Path>, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path)?;
    if !config.memory.persist {
        println!("⚠️  memory.persist is off; there is nothing on disk to sweep");
        return Ok(());
    }
    let store = super::open_store(&config).await?;
    let manager = RetentionManager::new(store.clone(), config.retention.clone());
    let now = chrono::Utc::now();

    if dry_run {
        let expired: Vec<_> = store
            .snapshot()
            .await
            .into_iter()
            .filter(|r| manager.is_expired(r, now))
            .collect();
        println!("Would evict {} records", expired.len());
        for record in &expired {
            println!("  {}  conf {:.2}  accessed {}x", record.id, record.confidence, record.access_count);
        }
    } else {
        let report = manager.sweep_at(now).await;
        println!("🧹 Scanned {}, evicted {}", report.scanned, report.removed.len());
    }

    store.close()?;
    store.events().close()?;
    Ok(())
}
