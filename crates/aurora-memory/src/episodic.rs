use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use aurora_core::store::DurableStore;

use crate::types::{
    EpisodeKey, MemoryItem, MemoryKind, MemoryResult, MemorySource, Reflection,
    DEFAULT_PROMOTION_THRESHOLD,
};

/// Append-only episodic log of reflections keyed by (project, task, attempt)
/// (spec §4.5 Tiers). Tracks recall counts per `generalizable_lesson` tag so
/// the promotion invariant — "after N (default 3) independent recalls of
/// the same reflection ... it is promoted to a pattern" (spec §3) — can be
/// evaluated without rescanning the whole log.
pub struct EpisodicStore {
    store: Arc<DurableStore>,
    promotion_threshold: u32,
    /// In-memory cache of entries by lesson tag, used to detect "three
    /// independent episodic entries bearing the same lesson tag" without a
    /// full log replay. Durability is provided by `store`; this cache is
    /// rebuilt from persisted events on `load`.
    by_lesson_tag: RwLock<HashMap<String, Vec<MemoryItem>>>,
}

const NAMESPACE: &str = "episodic";

impl EpisodicStore {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self {
            store,
            promotion_threshold: DEFAULT_PROMOTION_THRESHOLD,
            by_lesson_tag: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_promotion_threshold(store: Arc<DurableStore>, threshold: u32) -> Self {
        Self {
            store,
            promotion_threshold: threshold,
            by_lesson_tag: RwLock::new(HashMap::new()),
        }
    }

    /// Reloads the in-memory lesson-tag index from the durable log. Call
    /// once at process start to recover counts after a restart.
    pub async fn load(&self) -> MemoryResult<()> {
        let events = self
            .store
            .load_events(NAMESPACE)
            .map_err(|e| crate::types::MemoryError::Store(e.to_string()))?;
        let mut index = self.by_lesson_tag.write().await;
        for value in events {
            if let Ok(item) = serde_json::from_value::<MemoryItem>(value) {
                if let Some(tag) = item.lesson_tag.clone() {
                    index.entry(tag).or_default().push(item);
                }
            }
        }
        Ok(())
    }

    /// Records a reflection emitted by the self-correction loop (spec §4.4
    /// step 6) and returns whether this just crossed the promotion
    /// threshold for its lesson tag, plus the entries to link if so.
    pub async fn record(
        &self,
        project_id: &str,
        task_id: &str,
        attempt: u32,
        reflection: Reflection,
    ) -> MemoryResult<PromotionOutcome> {
        let item = MemoryItem {
            id: format!("refl_{}", Uuid::new_v4()),
            project_id: Some(project_id.to_string()),
            kind: MemoryKind::Reflection,
            source: MemorySource::Reflection,
            tags: vec![reflection.generalizable_lesson.clone()],
            content: format!(
                "root_cause: {}\nincorrect_assumptions: {}\nimproved_strategy: {}",
                reflection.root_cause, reflection.incorrect_assumptions, reflection.improved_strategy
            ),
            embedding: None,
            embedding_tier: None,
            relevance_score: 0.0,
            created_at: Utc::now(),
            expires_at: None,
            promotion_count: 0,
            episode_key: Some(EpisodeKey {
                project_id: project_id.to_string(),
                task_id: task_id.to_string(),
                attempt,
            }),
            lesson_tag: Some(reflection.generalizable_lesson.clone()),
            promoted_from: Vec::new(),
        };

        self.store
            .append_event(NAMESPACE, &item)
            .map_err(|e| crate::types::MemoryError::Store(e.to_string()))?;

        let mut index = self.by_lesson_tag.write().await;
        let entries = index.entry(reflection.generalizable_lesson.clone()).or_default();
        entries.push(item.clone());

        // "independent" recalls: distinct (task, attempt) pairs, so retrying
        // the same task repeatedly does not inflate the count on its own.
        let mut distinct_episodes: Vec<&EpisodeKey> = entries
            .iter()
            .filter_map(|e| e.episode_key.as_ref())
            .collect();
        distinct_episodes.sort_by(|a, b| (&a.task_id, a.attempt).cmp(&(&b.task_id, b.attempt)));
        distinct_episodes.dedup_by(|a, b| a.task_id == b.task_id && a.attempt == b.attempt);

        if distinct_episodes.len() as u32 >= self.promotion_threshold {
            Ok(PromotionOutcome::Ready {
                lesson_tag: reflection.generalizable_lesson,
                source_entries: entries.clone(),
            })
        } else {
            Ok(PromotionOutcome::NotYet)
        }
    }

    pub async fn entries_for_tag(&self, lesson_tag: &str) -> Vec<MemoryItem> {
        self.by_lesson_tag
            .read()
            .await
            .get(lesson_tag)
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub enum PromotionOutcome {
    NotYet,
    Ready {
        lesson_tag: String,
        source_entries: Vec<MemoryItem>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn reflection(lesson: &str) -> Reflection {
        Reflection {
            root_cause: "off-by-one in pagination".into(),
            incorrect_assumptions: "assumed zero-indexed page param".into(),
            improved_strategy: "validate against API contract before coding".into(),
            generalizable_lesson: lesson.to_string(),
        }
    }

    #[tokio::test]
    async fn promotes_after_three_independent_recalls_of_same_lesson() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DurableStore::new(dir.path()).unwrap());
        let episodic = EpisodicStore::new(store);

        let r1 = episodic
            .record("proj_1", "task_a", 1, reflection("pagination-off-by-one"))
            .await
            .unwrap();
        assert!(matches!(r1, PromotionOutcome::NotYet));

        let r2 = episodic
            .record("proj_1", "task_b", 1, reflection("pagination-off-by-one"))
            .await
            .unwrap();
        assert!(matches!(r2, PromotionOutcome::NotYet));

        let r3 = episodic
            .record("proj_1", "task_c", 1, reflection("pagination-off-by-one"))
            .await
            .unwrap();
        match r3 {
            PromotionOutcome::Ready { source_entries, .. } => assert_eq!(source_entries.len(), 3),
            PromotionOutcome::NotYet => panic!("expected promotion after third independent recall"),
        }
    }

    #[tokio::test]
    async fn repeated_recall_of_the_same_attempt_does_not_double_count() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DurableStore::new(dir.path()).unwrap());
        let episodic = EpisodicStore::new(store);

        episodic
            .record("proj_1", "task_a", 1, reflection("flaky-retry"))
            .await
            .unwrap();
        episodic
            .record("proj_1", "task_b", 1, reflection("flaky-retry"))
            .await
            .unwrap();
        // a duplicate record for the same (task, attempt) pair is appended
        // to the log but must not count as a third independent episode.
        let outcome = episodic
            .record("proj_1", "task_a", 1, reflection("flaky-retry"))
            .await
            .unwrap();
        assert!(matches!(outcome, PromotionOutcome::NotYet));
    }
}
