use colony_core::EventLogEntry;
use colony_memory::journal::replay;
use colony_memory::JsonlJournal;
use std::path::Path;

pub fn run(path: Option<&Path>, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path)?;
    let journal_path = config.event_journal_path();
    if !journal_path.exists() {
        println!("No event journal at {}", journal_path.display());
        return Ok(());
    }

    let journal = JsonlJournal::open(&journal_path, false)?;
    let entries: Vec<EventLogEntry> = replay(&journal)?;
    let skip = entries.len().saturating_sub(limit);

    println!("📜 Last {} of {} events", entries.len() - skip, entries.len());
    for entry in entries.iter().skip(skip) {
        let source = entry.source.as_ref().map(|s| s.as_str()).unwrap_or("-");
        println!(
            "  {}  {:<22} {:<38} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", entry.event_type),
            source,
            entry.payload
        );
    }
    Ok(())
}
