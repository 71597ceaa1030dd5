use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of a stored `MemoryItem` (spec §3 MemoryItem).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Ephemeral, TTL-bound intra-phase scratch state.
    Working,
    /// Long-term code/design pattern, either authored directly or promoted
    /// from a recurring reflection.
    Pattern,
    /// Episodic failure-and-lesson record from a self-correction attempt.
    Reflection,
    /// A file snapshot captured during task execution.
    Artifact,
}

/// Provenance tag for a `MemoryItem` (SPEC_FULL.md §3 supplemental
/// attribute, mirroring the reference memory crate's chunk provenance
/// field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    Message,
    File,
    Reflection,
    PatternPromotion,
}

/// Which scope a `MemoryItem` is visible in (SPEC_FULL.md §3: "partition
/// (project/global) used by the working-memory TTL store").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Project(String),
    Global,
}

/// The embedding tier that actually produced a `MemoryItem`'s vector (spec
/// §4.5 fallback chain), recorded for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingTier {
    Remote,
    Local,
    HashBucket,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    /// `None` for global (cross-project) items.
    pub project_id: Option<String>,
    pub kind: MemoryKind,
    pub source: MemorySource,
    pub tags: Vec<String>,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub embedding_tier: Option<EmbeddingTier>,
    /// Relevance score most recently computed for this item (updated by
    /// retrieval, not persisted as an independent ranking signal).
    pub relevance_score: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Incremented each time this item (for `Reflection` kind) is recalled
    /// independently by a different task; drives promotion to `Pattern`
    /// after the configured threshold (spec §3 invariant).
    pub promotion_count: u32,
    /// For a `Reflection`, the (project, task, attempt) key it was recorded
    /// under, and the `generalizable_lesson` tag used for promotion
    /// matching.
    pub episode_key: Option<EpisodeKey>,
    pub lesson_tag: Option<String>,
    /// For a `Pattern` promoted from reflections, the ids of the originating
    /// episodic entries it is linked to.
    pub promoted_from: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeKey {
    pub project_id: String,
    pub task_id: String,
    pub attempt: u32,
}

/// A structured reflection produced by the self-correction loop on gate
/// failure (spec §4.4 step 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    pub root_cause: String,
    pub incorrect_assumptions: String,
    pub improved_strategy: String,
    pub generalizable_lesson: String,
}

/// A single item returned from `get_context`, alongside the score that
/// placed it (spec §4.5 retrieval contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub item: MemoryItem,
    pub score: f64,
    /// True if this item's content was middle-truncated to fit the budget
    /// (spec §4.5 step 6: "preserve head and tail of any oversized item").
    pub truncated: bool,
}

/// The result of `get_context`: items ordered so the most critical
/// instructions are at the tail (spec §4.5 retrieval contract step 7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderedContextBundle {
    pub items: Vec<ContextItem>,
    pub total_tokens: usize,
    pub token_budget: usize,
}

impl OrderedContextBundle {
    /// Concatenates item content in bundle order, i.e. with the most
    /// critical instructions last.
    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(|ci| ci.item.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type MemoryResult<T> = Result<T, MemoryError>;

/// Default promotion threshold: after this many independent episodic
/// recalls of the same lesson tag, promote to a pattern (spec §3 invariant,
/// default 3).
pub const DEFAULT_PROMOTION_THRESHOLD: u32 = 3;

/// Default working-memory TTL (spec §4.5 Tiers: "default 1 hour").
pub const DEFAULT_WORKING_TTL_SECS: i64 = 3600;

/// Recency boost window used in the retrieval pipeline (spec §4.5 step 5).
pub const RECENCY_BOOST_WINDOW_HOURS: i64 = 24;
