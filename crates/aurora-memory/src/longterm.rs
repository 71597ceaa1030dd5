use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use aurora_core::store::DurableStore;

use crate::embeddings::{cosine_similarity, embed_with_fallback, EmbeddingProvider, LocalEncoder};
use crate::types::{MemoryItem, MemoryKind, MemoryResult, MemorySource};

const NAMESPACE: &str = "longterm";

/// Long-term semantic store: every pattern/artifact carries an embedding
/// vector (spec §4.5 Tiers). Vector search here is a brute-force
/// cosine-similarity scan — correct for the scale this orchestration core
/// targets (patterns and artifacts accumulated per project, not a
/// web-scale corpus) and avoids bundling a native vector-index dependency
/// for a headless service (see DESIGN.md).
pub struct LongTermStore {
    store: Arc<DurableStore>,
    items: RwLock<Vec<MemoryItem>>,
}

impl LongTermStore {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self {
            store,
            items: RwLock::new(Vec::new()),
        }
    }

    pub async fn load(&self) -> MemoryResult<()> {
        let snapshot: Option<Vec<MemoryItem>> = self
            .store
            .load_snapshot(NAMESPACE)
            .map_err(|e| crate::types::MemoryError::Store(e.to_string()))?;
        if let Some(items) = snapshot {
            *self.items.write().await = items;
        }
        Ok(())
    }

    async fn persist(&self) -> MemoryResult<()> {
        let snapshot = self.items.read().await.clone();
        self.store
            .save_snapshot(NAMESPACE, &snapshot)
            .map_err(|e| crate::types::MemoryError::Store(e.to_string()))
    }

    /// Stores a pattern or artifact, embedding its content through the
    /// three-tier fallback chain (spec §4.5).
    pub async fn store(
        &self,
        remote: &dyn EmbeddingProvider,
        local: &LocalEncoder,
        project_id: Option<String>,
        kind: MemoryKind,
        source: MemorySource,
        tags: Vec<String>,
        content: String,
    ) -> MemoryResult<MemoryItem> {
        let (embedding, tier) = embed_with_fallback(remote, local, &content).await;
        let item = MemoryItem {
            id: format!("mem_{}", Uuid::new_v4()),
            project_id,
            kind,
            source,
            tags,
            content,
            embedding: Some(embedding),
            embedding_tier: Some(tier),
            relevance_score: 0.0,
            created_at: Utc::now(),
            expires_at: None,
            promotion_count: 0,
            episode_key: None,
            lesson_tag: None,
            promoted_from: Vec::new(),
        };
        self.items.write().await.push(item.clone());
        self.persist().await?;
        Ok(item)
    }

    /// Inserts a pattern promoted from episodic reflections (spec §3
    /// invariant), linking back to the originating reflections.
    pub async fn store_promoted_pattern(
        &self,
        remote: &dyn EmbeddingProvider,
        local: &LocalEncoder,
        project_id: Option<String>,
        lesson_tag: String,
        content: String,
        promoted_from: Vec<String>,
    ) -> MemoryResult<MemoryItem> {
        let (embedding, tier) = embed_with_fallback(remote, local, &content).await;
        let item = MemoryItem {
            id: format!("pattern_{}", Uuid::new_v4()),
            project_id,
            kind: MemoryKind::Pattern,
            source: MemorySource::PatternPromotion,
            tags: vec![lesson_tag.clone()],
            content,
            embedding: Some(embedding),
            embedding_tier: Some(tier),
            relevance_score: 0.0,
            created_at: Utc::now(),
            expires_at: None,
            promotion_count: 1,
            episode_key: None,
            lesson_tag: Some(lesson_tag),
            promoted_from,
        };
        self.items.write().await.push(item.clone());
        self.persist().await?;
        Ok(item)
    }

    /// Returns whether a pattern already exists for this lesson tag, so
    /// promotion is idempotent (spec §8 testable property: "exactly one
    /// pattern row exists ... referencing all three").
    pub async fn pattern_exists_for_tag(&self, lesson_tag: &str) -> bool {
        self.items
            .read()
            .await
            .iter()
            .any(|item| item.kind == MemoryKind::Pattern && item.lesson_tag.as_deref() == Some(lesson_tag))
    }

    /// Keyword prefilter over tags (pipeline step 1, spec §4.5).
    pub async fn keyword_prefilter(&self, project_id: Option<&str>, tags: &[String]) -> Vec<MemoryItem> {
        self.items
            .read()
            .await
            .iter()
            .filter(|item| project_scope_matches(item, project_id))
            .filter(|item| tags.is_empty() || item.tags.iter().any(|t| tags.contains(t)))
            .cloned()
            .collect()
    }

    /// Vector similarity query against the long-term store, fetching
    /// `limit` candidates ranked by cosine similarity (pipeline step 3).
    pub async fn vector_query(
        &self,
        project_id: Option<&str>,
        query_embedding: &[f32],
        limit: usize,
    ) -> Vec<(MemoryItem, f64)> {
        let mut scored: Vec<(MemoryItem, f64)> = self
            .items
            .read()
            .await
            .iter()
            .filter(|item| project_scope_matches(item, project_id))
            .filter_map(|item| {
                let embedding = item.embedding.as_ref()?;
                Some((item.clone(), cosine_similarity(embedding, query_embedding)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }
}

fn project_scope_matches(item: &MemoryItem, project_id: Option<&str>) -> bool {
    match (&item.project_id, project_id) {
        (None, _) => true, // global items are visible everywhere
        (Some(item_project), Some(query_project)) => item_project == query_project,
        (Some(_), None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::UnconfiguredRemoteEmbedder;
    use tempfile::tempdir;

    #[tokio::test]
    async fn vector_query_ranks_by_similarity_and_respects_project_scope() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DurableStore::new(dir.path()).unwrap());
        let lt = LongTermStore::new(store);
        let local = LocalEncoder::new();

        lt.store(
            &UnconfiguredRemoteEmbedder,
            &local,
            Some("proj_1".into()),
            MemoryKind::Pattern,
            MemorySource::File,
            vec!["retry".into()],
            "exponential backoff with jitter for transient failures".into(),
        )
        .await
        .unwrap();
        lt.store(
            &UnconfiguredRemoteEmbedder,
            &local,
            Some("proj_2".into()),
            MemoryKind::Pattern,
            MemorySource::File,
            vec!["retry".into()],
            "exponential backoff with jitter for transient failures".into(),
        )
        .await
        .unwrap();

        let query = local.encode("backoff strategy for flaky network calls").unwrap();
        let results = lt.vector_query(Some("proj_1"), &query, 5).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.project_id.as_deref(), Some("proj_1"));
    }

    #[tokio::test]
    async fn promoted_pattern_is_idempotent_per_lesson_tag() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DurableStore::new(dir.path()).unwrap());
        let lt = LongTermStore::new(store);
        let local = LocalEncoder::new();

        assert!(!lt.pattern_exists_for_tag("pagination-off-by-one").await);
        lt.store_promoted_pattern(
            &UnconfiguredRemoteEmbedder,
            &local,
            Some("proj_1".into()),
            "pagination-off-by-one".into(),
            "use 1-indexed page params consistently".into(),
            vec!["refl_a".into(), "refl_b".into(), "refl_c".into()],
        )
        .await
        .unwrap();
        assert!(lt.pattern_exists_for_tag("pagination-off-by-one").await);
    }
}
