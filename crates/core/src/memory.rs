//! Memory record types shared by the store, the retention sweep and workers.
//!
//! A record's content is an arbitrary JSON payload. When the payload is an
//! object, three fields are read at store time:
//! - `tags`: array of strings, becomes the record's tag set
//! - `confidence`: number, overrides the kind's default confidence
//! - `related_to`: array of record ids, becomes relationship edges

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::WorkerId;

/// Unique identifier for a memory record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Experience,
    Knowledge,
    Pattern,
    Relationship,
    Event,
}

impl MemoryKind {
    /// Confidence assigned when the content does not override it.
    pub fn default_confidence(self) -> f32 {
        match self {
            MemoryKind::Experience => 1.0,
            MemoryKind::Knowledge => 0.8,
            _ => 1.0,
        }
    }
}

/// Tag carried by every pattern a worker learns from a completed task.
pub const LEARNED_PATTERN_TAG: &str = "learned_pattern";

/// A single stored unit of experience or knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: RecordId,

    pub kind: MemoryKind,

    /// Worker that produced this record
    pub owner: WorkerId,

    /// Immutable payload
    pub content: serde_json::Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Ids of related records (kept in sync with the relationship graph)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<RecordId>,

    /// In [0, 1]
    pub confidence: f32,

    #[serde(default)]
    pub access_count: u32,

    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Build a record from raw content, applying the content conventions.
    pub fn from_content(kind: MemoryKind, owner: WorkerId, content: serde_json::Value) -> Self {
        let tags = string_array(&content, "tags");
        let confidence = content
            .get("confidence")
            .and_then(|c| c.as_f64())
            .map(|c| (c as f32).clamp(0.0, 1.0))
            .unwrap_or_else(|| kind.default_confidence());

        Self {
            id: RecordId::new(),
            kind,
            owner,
            content,
            tags,
            relations: Vec::new(),
            confidence,
            access_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Cross-references declared in the content.
    pub fn declared_relations(&self) -> Vec<RecordId> {
        string_array(&self.content, "related_to")
            .into_iter()
            .map(RecordId)
            .collect()
    }

    /// Text used for embedding and substring search.
    pub fn content_text(&self) -> String {
        match &self.content {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Age in seconds at `now`, never negative.
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.created_at).num_milliseconds() as f64 / 1000.0).max(0.0)
    }
}

fn string_array(content: &serde_json::Value, field: &str) -> Vec<String> {
    content
        .get(field)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// A similarity query: free text plus optional tags for overlap scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimilarityQuery {
    pub text: String,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl SimilarityQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Filters for text search. Every set field must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MemoryKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<WorkerId>,

    /// The record must carry all of these tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl SearchFilters {
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if let Some(kind) = self.kind {
            if record.kind != kind {
                return false;
            }
        }
        if let Some(owner) = &self.owner {
            if &record.owner != owner {
                return false;
            }
        }
        self.tags.iter().all(|t| record.tags.contains(t))
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: MemoryRecord,

    /// Cosine similarity between query and record embeddings
    pub similarity: f32,

    /// The ranking score (relevance for `find_similar`, combined score for
    /// `dynamic_find_similar`)
    pub score: f32,
}
