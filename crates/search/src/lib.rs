//! The indexer and retrieval engine (C3/C4, §4.3-§4.4): full-text index
//! maintenance over `codemem-db`'s memory items, a pluggable embedding
//! provider, fuzzy fallback, and the hybrid reranker that fuses all three
//! into one ranked candidate list.
//!
//! Mirrors the role `claude-view-search` plays for claude-view: a Tantivy
//! index sitting in front of the relational store, queried through a
//! qualifier-aware parser, with the BM25-scored candidates reranked by
//! domain-specific signals this crate owns and the teacher's search crate
//! does not need (kind bonus, recency decay, semantic fusion).

pub mod candidate;
pub mod classify;
pub mod embeddings;
pub mod index;
pub mod indexer;
pub mod retrieval;

pub use candidate::{Candidate, CandidateSource};
pub use embeddings::{DisabledEmbeddings, EmbeddingProvider};
pub use index::{SearchIndex, SEARCH_SCHEMA_VERSION};
pub use indexer::{backfill_tags_text, backfill_vectors, extract_tags_text};
pub use retrieval::{RetrievalEngine, SearchHit, SearchOutcome, TimelineAnchor};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Db(#[from] codemem_db::DbError),
}

pub type SearchResult<T> = Result<T, SearchError>;
