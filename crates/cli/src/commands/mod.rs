pub mod config_cmd;
pub mod events;
pub mod memory;
pub mod run;

use colony_config::AppConfig;
use std::path::Path;

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    Ok(config.map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Open the event log and memory store the way `run` does, replaying both journals.
pub async fn open_store(
    config: &AppConfig,
) -> Result<std::sync::Arc<colony_memory::MemoryStore>, Box<dyn std::error::Error>> {
    use colony_memory::{EventLog, Journal, JsonlJournal, MemoryStore, NoopJournal};
    use std::sync::Arc;

    let event_journal: Arc<dyn Journal> = if config.event_log.persist {
        Arc::new(JsonlJournal::open(config.event_journal_path(), config.event_log.fsync)?)
    } else {
        Arc::new(NoopJournal)
    };
    let events = Arc::new(EventLog::new(config.event_log.capacity, event_journal));
    let store = MemoryStore::open(&config.memory, &config.memory_journal_path(), events).await?;
    Ok(Arc::new(store))
}
