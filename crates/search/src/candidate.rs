//! A ranked candidate flowing through the retrieval pipeline (§4.4). Wraps
//! the persisted row so every stage — FTS, semantic, fuzzy, hybrid rerank —
//! can share one `MemoryLike` accessor surface (§9 "polymorphic item
//! shapes") instead of threading loose tuples of fields around.

use codemem_core::MemoryLike;
use codemem_db::MemoryItem;
use serde_json::Value;

/// Which retrieval stage produced this candidate. A candidate may be
/// upgraded in place (e.g. an FTS hit that's also found by semantic search
/// gets `semantic_present = true`) rather than duplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    FullText,
    Semantic,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub item: MemoryItem,
    /// The stage's raw relevance score, normalized to roughly `[0, 1]`
    /// before the hybrid reranker adds its bonuses.
    pub base_score: f64,
    pub source: CandidateSource,
    /// Set when the same id was also surfaced by semantic search, even if
    /// `source` records a different originating stage — drives the hybrid
    /// reranker's `semantic_present_bonus`.
    pub semantic_present: bool,
}

impl Candidate {
    pub fn new(item: MemoryItem, base_score: f64, source: CandidateSource) -> Self {
        Self { item, base_score, source, semantic_present: source == CandidateSource::Semantic }
    }
}

impl MemoryLike for Candidate {
    fn id(&self) -> i64 {
        self.item.id
    }
    fn kind(&self) -> &str {
        &self.item.kind
    }
    fn title(&self) -> &str {
        &self.item.title
    }
    fn body(&self) -> &str {
        &self.item.body_text
    }
    fn tags_text(&self) -> &str {
        &self.item.tags_text
    }
    fn created_at(&self) -> &str {
        &self.item.created_at
    }
    fn confidence(&self) -> f64 {
        self.item.confidence
    }
    fn metadata(&self) -> &Value {
        &self.item.metadata
    }
    fn project(&self) -> &str {
        &self.item.project
    }
    fn session_id(&self) -> &str {
        &self.item.session_id
    }
}
