//! Configuration loading, validation, and management for Colony.
//!
//! Loads configuration from `~/.colony/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use colony_core::WorkerSpecification;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.colony/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding the memory and event journals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Worker loop settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Supervisor-level health/rebalancing sweep
    #[serde(default)]
    pub coordination: CoordinationConfig,

    /// Memory store settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Eviction of aged, low-value records
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Bounded event log
    #[serde(default)]
    pub event_log: EventLogConfig,

    /// Action gate rules
    #[serde(default)]
    pub gate: GateConfig,

    /// Workers spawned at startup by `colony run`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workers: Vec<WorkerSpecification>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Sleep between worker ticks when there is nothing to do
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    #[serde(default = "default_task_queue_capacity")]
    pub task_queue_capacity: usize,

    /// Per-task deadline; a task exceeding it counts as a failed attempt
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Attempts before a task is moved to the dead-letter queue
    #[serde(default = "default_max_task_attempts")]
    pub max_task_attempts: u32,

    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,

    /// Interaction history entries kept per worker
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Bound on joining all loops during shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_tick_interval_ms() -> u64 {
    50
}
fn default_mailbox_capacity() -> usize {
    256
}
fn default_task_queue_capacity() -> usize {
    128
}
fn default_task_timeout_secs() -> u64 {
    30
}
fn default_max_task_attempts() -> u32 {
    3
}
fn default_dead_letter_capacity() -> usize {
    256
}
fn default_history_limit() -> usize {
    1000
}
fn default_max_workers() -> usize {
    64
}
fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl RuntimeConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            mailbox_capacity: default_mailbox_capacity(),
            task_queue_capacity: default_task_queue_capacity(),
            task_timeout_secs: default_task_timeout_secs(),
            max_task_attempts: default_max_task_attempts(),
            dead_letter_capacity: default_dead_letter_capacity(),
            history_limit: default_history_limit(),
            max_workers: default_max_workers(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_coordination_interval")]
    pub interval_secs: u64,

    /// Non-idle workers silent for longer than this get a health warning
    #[serde(default = "default_inactivity_threshold")]
    pub inactivity_threshold_secs: u64,

    /// Upper bound on idle workers promoted per sweep
    #[serde(default = "default_max_promotions")]
    pub max_promotions: usize,

    #[serde(default)]
    pub recovery: RecoveryConfig,
}

fn default_coordination_interval() -> u64 {
    5
}
fn default_inactivity_threshold() -> u64 {
    60
}
fn default_max_promotions() -> usize {
    2
}

impl CoordinationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_coordination_interval(),
            inactivity_threshold_secs: default_inactivity_threshold(),
            max_promotions: default_max_promotions(),
            recovery: RecoveryConfig::default(),
        }
    }
}

/// How Error workers are brought back to Idle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Wait after the first failure; doubles per consecutive failure.
    /// Zero recovers on the next sweep.
    #[serde(default)]
    pub base_backoff_secs: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Consecutive failures after which the worker is quarantined.
    /// Zero disables quarantine.
    #[serde(default = "default_quarantine_after")]
    pub quarantine_after: u32,
}

fn default_max_backoff() -> u64 {
    300
}
fn default_quarantine_after() -> u32 {
    5
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            base_backoff_secs: 0,
            max_backoff_secs: default_max_backoff(),
            quarantine_after: default_quarantine_after(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    /// Hard cap on stored records; unset means unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_records: Option<usize>,

    /// Mirror records to `journal_file` under the data directory
    #[serde(default = "default_true")]
    pub persist: bool,

    #[serde(default = "default_memory_journal")]
    pub journal_file: String,

    /// fsync after every journal append
    #[serde(default)]
    pub fsync: bool,
}

fn default_embedding_dimensions() -> usize {
    64
}
fn default_memory_journal() -> String {
    "memory.jsonl".into()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            embedding_dimensions: default_embedding_dimensions(),
            max_records: None,
            persist: true,
            journal_file: default_memory_journal(),
            fsync: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_retention_interval")]
    pub interval_secs: u64,

    /// Records must be strictly older than this to be evicted
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,

    /// ... and have confidence strictly below this
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// ... and fewer accesses than this
    #[serde(default = "default_min_access_count")]
    pub min_access_count: u32,
}

/// Upper bound for `retention.max_age_days` (a century).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

fn default_retention_interval() -> u64 {
    300
}
fn default_max_age_days() -> u32 {
    30
}
fn default_min_confidence() -> f32 {
    0.5
}
fn default_min_access_count() -> u32 {
    3
}

impl RetentionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_retention_interval(),
            max_age_days: default_max_age_days(),
            min_confidence: default_min_confidence(),
            min_access_count: default_min_access_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,

    #[serde(default = "default_true")]
    pub persist: bool,

    #[serde(default = "default_event_journal")]
    pub journal_file: String,

    /// fsync after every journal append
    #[serde(default)]
    pub fsync: bool,
}

fn default_event_capacity() -> usize {
    1000
}
fn default_event_journal() -> String {
    "events.jsonl".into()
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
            persist: true,
            journal_file: default_event_journal(),
            fsync: false,
        }
    }
}

/// Rules for the built-in policy gate.
///
/// Deny rules win over allow rules; anything unmatched gets `default_allow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_true")]
    pub default_allow: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<GateRule>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<GateRule>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            default_allow: true,
            allow: vec![],
            deny: vec![],
        }
    }
}

/// One actor/action pair. `"*"` matches anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRule {
    #[serde(default = "default_wildcard")]
    pub actor: String,

    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn default_wildcard() -> String {
    "*".into()
}

impl AppConfig {
    /// Load configuration from the default path (~/.colony/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `COLONY_DATA_DIR`
    /// - `COLONY_TICK_MS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(dir) = std::env::var("COLONY_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }

        if let Ok(tick) = std::env::var("COLONY_TICK_MS") {
            self.runtime.tick_interval_ms = tick.parse().map_err(|_| {
                ConfigError::ValidationError(format!("COLONY_TICK_MS is not a number: {tick}"))
            })?;
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".colony")
    }

    /// Directory for journals: `data_dir` or `~/.colony/data`.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("data"))
    }

    pub fn memory_journal_path(&self) -> PathBuf {
        self.data_dir().join(&self.memory.journal_file)
    }

    pub fn event_journal_path(&self) -> PathBuf {
        self.data_dir().join(&self.event_log.journal_file)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.tick_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.tick_interval_ms must be > 0".into(),
            ));
        }

        if self.runtime.mailbox_capacity == 0 || self.runtime.task_queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "mailbox and task queue capacities must be > 0".into(),
            ));
        }

        if self.runtime.max_task_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.max_task_attempts must be at least 1".into(),
            ));
        }

        if self.memory.embedding_dimensions == 0 {
            return Err(ConfigError::ValidationError(
                "memory.embedding_dimensions must be > 0".into(),
            ));
        }

        if self.event_log.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "event_log.capacity must be > 0".into(),
            ));
        }

        if self.coordination.interval_secs == 0 || self.retention.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "coordination and retention intervals must be > 0".into(),
            ));
        }

        if self.retention.max_age_days > MAX_RETENTION_DAYS {
            return Err(ConfigError::ValidationError(format!(
                "retention.max_age_days must be <= {MAX_RETENTION_DAYS}"
            )));
        }

        if !(0.0..=1.0).contains(&self.retention.min_confidence) {
            return Err(ConfigError::ValidationError(
                "retention.min_confidence must be between 0.0 and 1.0".into(),
            ));
        }

        let recovery = &self.coordination.recovery;
        if recovery.max_backoff_secs < recovery.base_backoff_secs {
            return Err(ConfigError::ValidationError(
                "coordination.recovery.max_backoff_secs must be >= base_backoff_secs".into(),
            ));
        }

        for spec in &self.workers {
            spec.validate()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `colony config`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            runtime: RuntimeConfig::default(),
            coordination: CoordinationConfig::default(),
            memory: MemoryConfig::default(),
            retention: RetentionConfig::default(),
            event_log: EventLogConfig::default(),
            gate: GateConfig::default(),
            workers: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
