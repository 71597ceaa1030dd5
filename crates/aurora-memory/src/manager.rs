use std::sync::Arc;

use chrono::Utc;

use aurora_core::store::DurableStore;
use aurora_types::estimate_tokens;

use crate::embeddings::{EmbeddingProvider, LocalEncoder, UnconfiguredRemoteEmbedder};
use crate::episodic::{EpisodicStore, PromotionOutcome};
use crate::longterm::LongTermStore;
use crate::reranker::{NoopReranker, Reranker};
use crate::types::{
    ContextItem, MemoryItem, MemoryResult, OrderedContextBundle, Reflection,
    RECENCY_BOOST_WINDOW_HOURS,
};
use crate::working::WorkingMemory;

/// Candidates fetched from the vector query are 3x the bundle's final quota
/// (spec §4.5 pipeline step 3); the quota itself is a fixed number of items,
/// independent of the token budget that only bounds the final packed bundle.
const FINAL_QUOTA: usize = 10;
const VECTOR_QUERY_MULTIPLIER: usize = 3;

/// Score boost applied to items created within the recency window (pipeline
/// step 5). Additive, not multiplicative, so it cannot invert an
/// overwhelming similarity gap.
const RECENCY_BOOST: f64 = 0.1;

/// Coordinates the three memory tiers behind the single retrieval contract
/// `get_context` (spec §4.5), mirroring the reference memory crate's
/// manager, which fans a query out across tiers and trims the result to a
/// token budget before handing it back for prompt assembly.
pub struct MemoryManager {
    long_term: LongTermStore,
    episodic: EpisodicStore,
    working: WorkingMemory,
    local_encoder: LocalEncoder,
    remote_embedder: Box<dyn EmbeddingProvider>,
    reranker: Box<dyn Reranker>,
}

impl MemoryManager {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self {
            long_term: LongTermStore::new(store.clone()),
            episodic: EpisodicStore::new(store),
            working: WorkingMemory::new(),
            local_encoder: LocalEncoder::new(),
            remote_embedder: Box::new(UnconfiguredRemoteEmbedder),
            reranker: Box::new(NoopReranker),
        }
    }

    pub fn with_remote_embedder(mut self, embedder: Box<dyn EmbeddingProvider>) -> Self {
        self.remote_embedder = embedder;
        self
    }

    pub fn with_reranker(mut self, reranker: Box<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn working(&self) -> &WorkingMemory {
        &self.working
    }

    pub fn long_term(&self) -> &LongTermStore {
        &self.long_term
    }

    pub fn episodic(&self) -> &EpisodicStore {
        &self.episodic
    }

    /// Recovers the episodic lesson-tag index and long-term item list from
    /// disk. Call once at process start before serving any `get_context`
    /// calls.
    pub async fn load(&self) -> MemoryResult<()> {
        self.long_term.load().await?;
        self.episodic.load().await?;
        Ok(())
    }

    /// Stores a reflection from the self-correction loop (spec §4.4 step 6)
    /// and, if this recall crosses the promotion threshold for its lesson
    /// tag, copies it into the long-term store as a pattern linked back to
    /// its originating episodic entries (spec §3 invariant).
    pub async fn record_reflection(
        &self,
        project_id: &str,
        task_id: &str,
        attempt: u32,
        reflection: Reflection,
    ) -> MemoryResult<Option<MemoryItem>> {
        let outcome = self
            .episodic
            .record(project_id, task_id, attempt, reflection)
            .await?;

        match outcome {
            PromotionOutcome::NotYet => Ok(None),
            PromotionOutcome::Ready {
                lesson_tag,
                source_entries,
            } => {
                if self.long_term.pattern_exists_for_tag(&lesson_tag).await {
                    return Ok(None);
                }
                let content = source_entries
                    .iter()
                    .map(|e| e.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n---\n");
                let promoted_from = source_entries.iter().map(|e| e.id.clone()).collect();
                let pattern = self
                    .long_term
                    .store_promoted_pattern(
                        self.remote_embedder.as_ref(),
                        &self.local_encoder,
                        Some(project_id.to_string()),
                        lesson_tag,
                        content,
                        promoted_from,
                    )
                    .await?;
                Ok(Some(pattern))
            }
        }
    }

    /// Stores a pattern or artifact in the long-term store, embedding its
    /// content through the three-tier fallback chain.
    pub async fn remember(
        &self,
        project_id: Option<String>,
        kind: crate::types::MemoryKind,
        source: crate::types::MemorySource,
        tags: Vec<String>,
        content: String,
    ) -> MemoryResult<MemoryItem> {
        self.long_term
            .store(
                self.remote_embedder.as_ref(),
                &self.local_encoder,
                project_id,
                kind,
                source,
                tags,
                content,
            )
            .await
    }

    /// `get_context(query, project, token_budget) -> OrderedContextBundle`
    /// (spec §4.5 retrieval contract). Runs the seven-step pipeline and
    /// returns items ordered so the most critical instructions are at the
    /// tail of the bundle.
    pub async fn get_context(
        &self,
        query: &str,
        project_id: Option<&str>,
        token_budget: usize,
    ) -> MemoryResult<OrderedContextBundle> {
        let query_tags = tokenize_query(query);

        // Step 1: keyword prefilter over tags/paths.
        let prefiltered = self.long_term.keyword_prefilter(project_id, &query_tags).await;

        // Step 2: dependency graph of file imports, expanded by the
        // path:/imports: tag convention, to include callers/callees of any
        // seed file already in the prefiltered set.
        let expanded = expand_by_import_graph(&prefiltered, &self.long_term, project_id).await;

        // Step 3: vector similarity query fetching 3x the final quota.
        let query_embedding = crate::embeddings::embed_with_fallback(
            self.remote_embedder.as_ref(),
            &self.local_encoder,
            query,
        )
        .await
        .0;
        let vector_hits = self
            .long_term
            .vector_query(project_id, &query_embedding, FINAL_QUOTA * VECTOR_QUERY_MULTIPLIER)
            .await;

        // Union the three sources, deduping by item id. Items found only by
        // keyword/import expansion (no similarity score yet) start at 0.0
        // and are re-scored below; vector hits carry their cosine score.
        let mut by_id: std::collections::HashMap<String, (MemoryItem, f64)> =
            std::collections::HashMap::new();
        for item in prefiltered.into_iter().chain(expanded.into_iter()) {
            by_id.entry(item.id.clone()).or_insert((item, 0.0));
        }
        for (item, score) in vector_hits {
            by_id
                .entry(item.id.clone())
                .and_modify(|(_, existing)| *existing = existing.max(score))
                .or_insert((item, score));
        }

        let candidates: Vec<ContextItem> = by_id
            .into_values()
            .map(|(item, score)| ContextItem {
                item,
                score,
                truncated: false,
            })
            .collect();

        // Step 4: cross-encoder rerank over the union (pass-through by
        // default).
        let reranked = self.reranker.rerank(query, candidates);

        // Step 5: recency boost (24h window).
        let now = Utc::now();
        let mut boosted: Vec<ContextItem> = reranked
            .into_iter()
            .map(|mut ci| {
                let age_hours = (now - ci.item.created_at).num_hours();
                if age_hours >= 0 && age_hours < RECENCY_BOOST_WINDOW_HOURS {
                    ci.score += RECENCY_BOOST;
                }
                ci
            })
            .collect();

        boosted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        boosted.truncate(FINAL_QUOTA);

        // Step 6: budget packing with middle truncation.
        let packed = pack_to_budget(boosted, token_budget);

        // Step 7: order so the most critical instructions are at the tail —
        // items are currently ranked highest-score-first, so reverse.
        let mut items = packed;
        items.reverse();

        let total_tokens = items.iter().map(|ci| estimate_tokens(&ci.item.content)).sum();

        Ok(OrderedContextBundle {
            items,
            total_tokens,
            token_budget,
        })
    }
}

fn tokenize_query(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Expands a seed set to its callers/callees using the `path:<p>` /
/// `imports:<p>` tag convention: a seed item tagged `path:foo.rs` pulls in
/// any item tagged `imports:foo.rs` (a caller of it), and an item tagged
/// `imports:bar.rs` pulls in the item tagged `path:bar.rs` (something it
/// imports). No real import graph is built in this crate; tags are the
/// substrate other components annotate file-derived memory items with.
async fn expand_by_import_graph(
    seeds: &[MemoryItem],
    long_term: &LongTermStore,
    project_id: Option<&str>,
) -> Vec<MemoryItem> {
    let seed_paths: Vec<String> = seeds
        .iter()
        .flat_map(|item| item.tags.iter())
        .filter_map(|tag| tag.strip_prefix("path:").map(|p| p.to_string()))
        .collect();
    if seed_paths.is_empty() {
        return Vec::new();
    }

    let caller_tags: Vec<String> = seed_paths.iter().map(|p| format!("imports:{p}")).collect();
    let callers = long_term.keyword_prefilter(project_id, &caller_tags).await;

    let seed_import_tags: Vec<String> = seeds
        .iter()
        .flat_map(|item| item.tags.iter())
        .filter_map(|tag| tag.strip_prefix("imports:").map(|p| format!("path:{p}")))
        .collect();
    let callees = if seed_import_tags.is_empty() {
        Vec::new()
    } else {
        long_term.keyword_prefilter(project_id, &seed_import_tags).await
    };

    callers.into_iter().chain(callees.into_iter()).collect()
}

/// Greedily packs items (already ranked highest score first) into
/// `token_budget`. When an item would not fit whole but the budget still
/// has meaningful room, it is middle-truncated — preserving its head and
/// tail — rather than dropped outright, so the most relevant item is never
/// sacrificed purely for being long (spec §4.5 step 6).
fn pack_to_budget(items: Vec<ContextItem>, token_budget: usize) -> Vec<ContextItem> {
    let mut packed = Vec::new();
    let mut used = 0usize;

    for mut ci in items {
        if used >= token_budget {
            break;
        }
        let remaining = token_budget - used;
        let item_tokens = estimate_tokens(&ci.item.content);

        if item_tokens <= remaining {
            used += item_tokens;
            packed.push(ci);
            continue;
        }

        // Only middle-truncate if there's enough budget left to carry a
        // meaningful head and tail; otherwise stop packing entirely.
        const MIN_TRUNCATED_TOKENS: usize = 32;
        if remaining < MIN_TRUNCATED_TOKENS {
            break;
        }
        ci.item.content = middle_truncate(&ci.item.content, remaining);
        ci.truncated = true;
        used += estimate_tokens(&ci.item.content);
        packed.push(ci);
        break;
    }

    packed
}

/// Truncates `content` to roughly `budget_tokens`, keeping its head and
/// tail and replacing the middle with a marker.
fn middle_truncate(content: &str, budget_tokens: usize) -> String {
    let budget_chars = budget_tokens.saturating_mul(4);
    let marker = "\n...[truncated]...\n";
    if content.len() <= budget_chars || budget_chars <= marker.len() {
        return content.to_string();
    }
    let remaining_chars = budget_chars - marker.len();
    let head_chars = remaining_chars / 2;
    let tail_chars = remaining_chars - head_chars;

    let head: String = content.chars().take(head_chars).collect();
    let tail: String = content
        .chars()
        .rev()
        .take(tail_chars)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    format!("{head}{marker}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryKind, MemorySource};
    use tempfile::tempdir;

    async fn manager_with_tmp() -> (MemoryManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(DurableStore::new(dir.path()).unwrap());
        let mgr = MemoryManager::new(store);
        mgr.load().await.unwrap();
        (mgr, dir)
    }

    #[tokio::test]
    async fn get_context_orders_highest_score_last() {
        let (mgr, _dir) = manager_with_tmp().await;
        mgr.remember(
            Some("proj_1".into()),
            MemoryKind::Pattern,
            MemorySource::File,
            vec!["retry".into()],
            "retry with exponential backoff and jitter for flaky network calls".into(),
        )
        .await
        .unwrap();
        mgr.remember(
            Some("proj_1".into()),
            MemoryKind::Pattern,
            MemorySource::File,
            vec!["unrelated".into()],
            "css flexbox centering trick for the login page".into(),
        )
        .await
        .unwrap();

        let bundle = mgr
            .get_context("backoff strategy for flaky network calls", Some("proj_1"), 10_000)
            .await
            .unwrap();

        assert!(!bundle.items.is_empty());
        // most critical (highest score) item is last.
        assert!(bundle.items.last().unwrap().item.content.contains("backoff"));
    }

    #[tokio::test]
    async fn get_context_respects_project_scope() {
        let (mgr, _dir) = manager_with_tmp().await;
        mgr.remember(
            Some("proj_2".into()),
            MemoryKind::Pattern,
            MemorySource::File,
            vec!["retry".into()],
            "retry with exponential backoff and jitter for flaky network calls".into(),
        )
        .await
        .unwrap();

        let bundle = mgr
            .get_context("backoff strategy", Some("proj_1"), 10_000)
            .await
            .unwrap();
        assert!(bundle.items.is_empty());
    }

    #[tokio::test]
    async fn get_context_middle_truncates_when_over_budget() {
        let (mgr, _dir) = manager_with_tmp().await;
        let long_content = "lesson ".repeat(200);
        mgr.remember(
            Some("proj_1".into()),
            MemoryKind::Pattern,
            MemorySource::File,
            vec!["lesson".into()],
            long_content.clone(),
        )
        .await
        .unwrap();

        let bundle = mgr.get_context("lesson", Some("proj_1"), 40).await.unwrap();
        assert_eq!(bundle.items.len(), 1);
        assert!(bundle.items[0].truncated);
        assert!(bundle.items[0].item.content.contains("...[truncated]..."));
        assert!(bundle.items[0].item.content.len() < long_content.len());
    }

    #[tokio::test]
    async fn record_reflection_promotes_to_pattern_after_threshold() {
        let (mgr, _dir) = manager_with_tmp().await;
        fn refl() -> Reflection {
            Reflection {
                root_cause: "off-by-one".into(),
                incorrect_assumptions: "zero-indexed pages".into(),
                improved_strategy: "validate contract first".into(),
                generalizable_lesson: "pagination-off-by-one".into(),
            }
        }

        let r1 = mgr.record_reflection("proj_1", "task_a", 1, refl()).await.unwrap();
        assert!(r1.is_none());
        let r2 = mgr.record_reflection("proj_1", "task_b", 1, refl()).await.unwrap();
        assert!(r2.is_none());
        let r3 = mgr.record_reflection("proj_1", "task_c", 1, refl()).await.unwrap();
        assert!(r3.is_some());
        assert!(mgr.long_term.pattern_exists_for_tag("pagination-off-by-one").await);
    }
}
