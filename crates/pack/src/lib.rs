//! The pack builder (C5, §4.5): gathers ranked candidates from
//! `codemem-search`, sections them into Summary/Timeline/Observations,
//! exact-dedupes, fits a token budget, and reports delta + savings metrics
//! against the project's most recent pack.

pub mod builder;
pub mod budget;
pub mod dedup;
pub mod delta;
pub mod savings;
pub mod section;

pub use builder::{build_memory_pack, MemoryPack, PackItem, PackMetrics};

#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("database error: {0}")]
    Db(#[from] codemem_db::DbError),

    #[error("search error: {0}")]
    Search(#[from] codemem_search::SearchError),
}

pub type PackResult<T> = Result<T, PackError>;
