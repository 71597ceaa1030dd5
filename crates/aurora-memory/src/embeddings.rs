use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::types::{EmbeddingTier, MemoryError, MemoryResult};

pub const HASH_BUCKET_DIMENSION: usize = 64;
pub const LOCAL_ENCODER_DIMENSION: usize = 128;

/// Tier (a): a configured remote embedder. No concrete HTTP transport ships
/// in this crate (LLM API transport is out of scope, spec §1) — callers
/// inject a real implementation, or a test double, behind this trait.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>>;
    fn is_available(&self) -> bool;
    fn disabled_reason(&self) -> Option<&str>;
}

/// A remote provider that was never configured. `is_available` is always
/// `false`, so the chain below falls through to the local encoder without
/// attempting a call.
pub struct UnconfiguredRemoteEmbedder;

#[async_trait]
impl EmbeddingProvider for UnconfiguredRemoteEmbedder {
    async fn embed(&self, _text: &str) -> MemoryResult<Vec<f32>> {
        Err(MemoryError::Embedding(
            "no remote embedding provider configured".to_string(),
        ))
    }

    fn is_available(&self) -> bool {
        false
    }

    fn disabled_reason(&self) -> Option<&str> {
        Some("no remote embedding provider configured")
    }
}

/// Tier (b): a local, dependency-free encoder using the hashing trick over
/// character trigrams (a standard degraded-mode technique when no ML
/// runtime is bundled). Mirrors the reference crate's degraded-mode
/// `EmbeddingService` shape (`is_available`/`disabled_reason`) without
/// requiring a downloaded model.
pub struct LocalEncoder {
    dimension: usize,
    enabled: bool,
}

impl LocalEncoder {
    pub fn new() -> Self {
        Self {
            dimension: LOCAL_ENCODER_DIMENSION,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            dimension: LOCAL_ENCODER_DIMENSION,
            enabled: false,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn is_available(&self) -> bool {
        self.enabled
    }

    pub fn disabled_reason(&self) -> Option<&str> {
        if self.enabled {
            None
        } else {
            Some("local encoder disabled by configuration")
        }
    }

    pub fn encode(&self, text: &str) -> MemoryResult<Vec<f32>> {
        if !self.enabled {
            return Err(MemoryError::Embedding(
                "local encoder disabled by configuration".to_string(),
            ));
        }
        let normalized = normalize(text);
        let mut buckets = vec![0f32; self.dimension];
        if normalized.len() < 3 {
            hash_into(&normalized, &mut buckets);
        } else {
            let chars: Vec<char> = normalized.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                hash_into(&trigram, &mut buckets);
            }
        }
        l2_normalize(&mut buckets);
        Ok(buckets)
    }
}

impl Default for LocalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Tier (c): deterministic SHA-256 hash-bucketing. Always available, never
/// fails — the last-resort fallback that keeps retrieval "correct but
/// coarser" (spec §4.5) rather than unavailable.
pub fn hash_bucket_embedding(text: &str) -> Vec<f32> {
    let normalized = normalize(text);
    let digest = Sha256::digest(normalized.as_bytes());
    let mut buckets = vec![0f32; HASH_BUCKET_DIMENSION];
    for (i, byte) in digest.iter().enumerate() {
        let idx = i % HASH_BUCKET_DIMENSION;
        buckets[idx] += (*byte as f32) / 255.0;
    }
    l2_normalize(&mut buckets);
    buckets
}

fn hash_into(token: &str, buckets: &mut [f32]) {
    let digest = Sha256::digest(token.as_bytes());
    let idx = (u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize)
        % buckets.len();
    let sign = if digest[4] % 2 == 0 { 1.0 } else { -1.0 };
    buckets[idx] += sign;
}

fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)) as f64
    }
}

/// Runs the full three-tier fallback chain (spec §4.5, resolving Open
/// Question #2): try the remote provider, then the local encoder, then the
/// always-available hash bucket. Returns both the embedding and which tier
/// produced it, since that tier is recorded on the stored `MemoryItem`.
pub async fn embed_with_fallback(
    remote: &dyn EmbeddingProvider,
    local: &LocalEncoder,
    text: &str,
) -> (Vec<f32>, EmbeddingTier) {
    if remote.is_available() {
        match remote.embed(text).await {
            Ok(vector) => return (vector, EmbeddingTier::Remote),
            Err(err) => {
                tracing::warn!(target: "aurora.memory", error = %err, "remote embedder failed, falling back to local encoder");
            }
        }
    }

    if local.is_available() {
        match local.encode(text) {
            Ok(vector) => return (vector, EmbeddingTier::Local),
            Err(err) => {
                tracing::warn!(target: "aurora.memory", error = %err, "local encoder failed, falling back to hash bucket");
            }
        }
    }

    (hash_bucket_embedding(text), EmbeddingTier::HashBucket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn falls_through_all_three_tiers_when_nothing_available() {
        let (vector, tier) =
            embed_with_fallback(&UnconfiguredRemoteEmbedder, &LocalEncoder::disabled(), "hello")
                .await;
        assert_eq!(tier, EmbeddingTier::HashBucket);
        assert_eq!(vector.len(), HASH_BUCKET_DIMENSION);
    }

    #[tokio::test]
    async fn uses_local_encoder_when_remote_unavailable_but_local_is() {
        let (vector, tier) =
            embed_with_fallback(&UnconfiguredRemoteEmbedder, &LocalEncoder::new(), "hello world")
                .await;
        assert_eq!(tier, EmbeddingTier::Local);
        assert_eq!(vector.len(), LOCAL_ENCODER_DIMENSION);
    }

    #[test]
    fn hash_bucket_embedding_is_deterministic() {
        let a = hash_bucket_embedding("the quick brown fox");
        let b = hash_bucket_embedding("the quick brown fox");
        assert_eq!(a, b);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let encoder = LocalEncoder::new();
        let v = encoder.encode("reflection about flaky test retries").unwrap();
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn similar_text_scores_higher_than_unrelated_text() {
        let encoder = LocalEncoder::new();
        let base = encoder.encode("database migration failed on null constraint").unwrap();
        let similar = encoder
            .encode("database migration failed due to null constraint violation")
            .unwrap();
        let unrelated = encoder.encode("frontend css flexbox alignment bug").unwrap();
        assert!(cosine_similarity(&base, &similar) > cosine_similarity(&base, &unrelated));
    }
}
