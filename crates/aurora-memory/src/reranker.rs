use crate::types::ContextItem;

/// Cross-encoder rerank over the union of candidates (spec §4.5 retrieval
/// pipeline step 4). No concrete cross-encoder model ships in this crate;
/// the default `NoopReranker` passes items through unchanged, matching
/// "otherwise passes through" in spec.md.
pub trait Reranker: Send + Sync {
    fn rerank(&self, query: &str, items: Vec<ContextItem>) -> Vec<ContextItem>;
}

pub struct NoopReranker;

impl Reranker for NoopReranker {
    fn rerank(&self, _query: &str, items: Vec<ContextItem>) -> Vec<ContextItem> {
        items
    }
}
