//! Append-only JSON-lines journals.
//!
//! The store and the event log write one JSON object per line before an
//! operation reports success. A journal is replayed line by line on restore;
//! lines that fail to parse are skipped with a warning, never fatal.
//!
//! Default locations: `~/.colony/data/memory.jsonl` and `~/.colony/data/events.jsonl`

use chrono::{DateTime, Utc};
use colony_core::{MemoryError, MemoryRecord, RecordId};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Durable sink for serialized entries.
pub trait Journal: Send + Sync {
    fn name(&self) -> &str;

    /// Append one line. Must be durable (to the implementation's standard)
    /// when this returns `Ok`.
    fn append(&self, line: &str) -> Result<(), MemoryError>;

    /// Every line written so far, in order.
    fn read_all(&self) -> Result<Vec<String>, MemoryError>;

    /// Flush and refuse further appends.
    fn close(&self) -> Result<(), MemoryError>;
}

/// Serialize `entry` and append it.
pub fn append_json<T: Serialize>(journal: &dyn Journal, entry: &T) -> Result<(), MemoryError> {
    let line = serde_json::to_string(entry)
        .map_err(|e| MemoryError::Storage(format!("Failed to serialize journal entry: {e}")))?;
    journal.append(&line)
}

/// Parse every line, skipping the ones that don't decode.
pub fn replay<T: DeserializeOwned>(journal: &dyn Journal) -> Result<Vec<T>, MemoryError> {
    let lines = journal.read_all()?;
    Ok(lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<T>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(journal = journal.name(), error = %e, "Skipping corrupted journal line");
                None
            }
        })
        .collect())
}

/// Mutations recorded by the memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalEntry {
    Stored { record: MemoryRecord },
    Removed { id: RecordId, at: DateTime<Utc> },
    Confidence { id: RecordId, confidence: f32 },
    /// One search hit per id, batched per search.
    Accessed { ids: Vec<RecordId> },
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn write_line(writer: &mut BufWriter<File>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// A journal backed by a JSONL file, opened in append mode.
pub struct JsonlJournal {
    path: PathBuf,
    fsync: bool,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonlJournal {
    /// Open (creating parent directories and the file as needed).
    pub fn open(path: impl AsRef<Path>, fsync: bool) -> Result<Self, MemoryError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MemoryError::Storage(format!("Failed to create journal directory: {e}"))
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| MemoryError::Storage(format!("Failed to open journal: {e}")))?;
        debug!(path = %path.display(), "Journal opened");
        Ok(Self {
            path,
            fsync,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Journal for JsonlJournal {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn append(&self, line: &str) -> Result<(), MemoryError> {
        let mut guard = lock(&self.writer);
        let writer = guard.as_mut().ok_or(MemoryError::JournalClosed)?;
        write_line(writer, line)
            .map_err(|e| MemoryError::Storage(format!("Failed to write journal: {e}")))?;
        if self.fsync {
            writer
                .get_ref()
                .sync_data()
                .map_err(|e| MemoryError::Storage(format!("Failed to sync journal: {e}")))?;
        }
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<String>, MemoryError> {
        // Hold the writer lock so a concurrent append can't interleave a partial line.
        let _guard = lock(&self.writer);
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(MemoryError::Storage(format!("Failed to read journal: {e}"))),
        }
    }

    fn close(&self) -> Result<(), MemoryError> {
        if let Some(mut writer) = lock(&self.writer).take() {
            writer
                .flush()
                .map_err(|e| MemoryError::Storage(format!("Failed to flush journal: {e}")))?;
            debug!(path = %self.path.display(), "Journal closed");
        }
        Ok(())
    }
}

/// In-process journal. Useful for tests and ephemeral runs that still want
/// replay semantics.
#[derive(Default)]
pub struct MemoryJournal {
    lines: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Used by tests to simulate a damaged journal.
    pub fn push_raw(&self, line: impl Into<String>) {
        lock(&self.lines).push(line.into());
    }

    pub fn len(&self) -> usize {
        lock(&self.lines).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Journal for MemoryJournal {
    fn name(&self) -> &str {
        "in_memory"
    }

    fn append(&self, line: &str) -> Result<(), MemoryError> {
        if *lock(&self.closed) {
            return Err(MemoryError::JournalClosed);
        }
        lock(&self.lines).push(line.to_string());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<String>, MemoryError> {
        Ok(lock(&self.lines).clone())
    }

    fn close(&self) -> Result<(), MemoryError> {
        *lock(&self.closed) = true;
        Ok(())
    }
}

/// Discards everything. Used when persistence is disabled.
pub struct NoopJournal;

impl Journal for NoopJournal {
    fn name(&self) -> &str {
        "noop"
    }

    fn append(&self, _line: &str) -> Result<(), MemoryError> {
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<String>, MemoryError> {
        Ok(Vec::new())
    }

    fn close(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}
