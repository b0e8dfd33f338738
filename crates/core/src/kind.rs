//! The memory kind taxonomy and its ranking bonus.
//!
//! Ported from `codemem.memory_kinds` / `codemem.store.search._kind_bonus`:
//! a closed set of kinds, each worth a fixed additive bonus in the hybrid
//! reranker, with unknown/absent kinds worth nothing.

use std::fmt;

/// The canonical memory kind taxonomy (§3 Data model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemoryKind {
    SessionSummary,
    Decision,
    Feature,
    Bugfix,
    Refactor,
    Change,
    Discovery,
    Exploration,
    Note,
    Observation,
    Entities,
}

/// All kinds in the canonical set, in declaration order.
pub const ALLOWED_MEMORY_KINDS: &[MemoryKind] = &[
    MemoryKind::SessionSummary,
    MemoryKind::Decision,
    MemoryKind::Feature,
    MemoryKind::Bugfix,
    MemoryKind::Refactor,
    MemoryKind::Change,
    MemoryKind::Discovery,
    MemoryKind::Exploration,
    MemoryKind::Note,
    MemoryKind::Observation,
    MemoryKind::Entities,
];

impl MemoryKind {
    /// The lowercase, canonical wire/storage form of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryKind::SessionSummary => "session_summary",
            MemoryKind::Decision => "decision",
            MemoryKind::Feature => "feature",
            MemoryKind::Bugfix => "bugfix",
            MemoryKind::Refactor => "refactor",
            MemoryKind::Change => "change",
            MemoryKind::Discovery => "discovery",
            MemoryKind::Exploration => "exploration",
            MemoryKind::Note => "note",
            MemoryKind::Observation => "observation",
            MemoryKind::Entities => "entities",
        }
    }

    /// Parse a kind from arbitrary input, case/whitespace insensitive.
    /// Returns `None` for anything outside the canonical set (callers then
    /// normalize to `note` or reject, per call site — §3 "kind is always
    /// normalized to the canonical set at write time").
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "session_summary" => Some(MemoryKind::SessionSummary),
            "decision" => Some(MemoryKind::Decision),
            "feature" => Some(MemoryKind::Feature),
            "bugfix" => Some(MemoryKind::Bugfix),
            "refactor" => Some(MemoryKind::Refactor),
            "change" => Some(MemoryKind::Change),
            "discovery" => Some(MemoryKind::Discovery),
            "exploration" => Some(MemoryKind::Exploration),
            "note" => Some(MemoryKind::Note),
            "observation" => Some(MemoryKind::Observation),
            "entities" => Some(MemoryKind::Entities),
            _ => None,
        }
    }

    /// The observation-kind priority pool used by the pack builder, in the
    /// exact declared order from §4.5.
    pub fn observation_pool() -> &'static [MemoryKind] {
        &[
            MemoryKind::Decision,
            MemoryKind::Feature,
            MemoryKind::Bugfix,
            MemoryKind::Refactor,
            MemoryKind::Change,
            MemoryKind::Discovery,
            MemoryKind::Exploration,
            MemoryKind::Note,
        ]
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a free-form kind string to its canonical form, falling back to
/// `note` when unrecognized — the write-time normalization named in §3.
pub fn normalize_kind(raw: &str) -> MemoryKind {
    MemoryKind::parse(raw).unwrap_or(MemoryKind::Note)
}

/// The additive kind bonus applied by the hybrid reranker (§4.4).
///
/// Case/whitespace insensitive; unknown or absent kinds score 0.0.
pub fn kind_bonus(kind: Option<&str>) -> f64 {
    let Some(raw) = kind else { return 0.0 };
    match MemoryKind::parse(raw) {
        Some(MemoryKind::SessionSummary) => 0.25,
        Some(MemoryKind::Decision) => 0.20,
        Some(MemoryKind::Feature) => 0.18,
        Some(MemoryKind::Bugfix) => 0.18,
        Some(MemoryKind::Refactor) => 0.17,
        Some(MemoryKind::Note) => 0.15,
        Some(MemoryKind::Change) => 0.12,
        Some(MemoryKind::Discovery) => 0.12,
        Some(MemoryKind::Observation) => 0.10,
        Some(MemoryKind::Exploration) => 0.10,
        Some(MemoryKind::Entities) => 0.05,
        None => 0.0,
    }
}
