//! Savings metrics (§4.5 step 6): "work tokens" estimated (or taken from
//! metadata) per item, grouped by discovery group, to derive
//! `tokens_saved` and a compression ratio against the emitted pack.

use std::collections::HashMap;

use codemem_core::Metadata;
use codemem_db::MemoryItem;

use crate::budget::item_tokens;

/// Floor applied to every item's estimated work tokens — §4.5:
/// `max(2000, estimate_tokens(...))`.
const MIN_WORK_TOKENS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkSource {
    Usage,
    Estimate,
}

impl WorkSource {
    fn as_str(self) -> &'static str {
        match self {
            WorkSource::Usage => "usage",
            WorkSource::Estimate => "estimate",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SavingsMetrics {
    pub work_tokens_unique: u64,
    pub tokens_saved: u64,
    pub work_source: String,
    pub compression_ratio: Option<f64>,
    pub overhead_tokens: Option<i64>,
}

/// Per-item work tokens, from `metadata.discovery_tokens` if present,
/// otherwise the `max(2000, estimate_tokens)` floor. The source label is
/// independent of where the token count came from: it is `Usage` iff
/// `metadata.discovery_source == "usage"`, matching the original's
/// `_work_source`, which never infers usage from `discovery_tokens` alone.
fn item_work_tokens(item: &MemoryItem) -> (u64, WorkSource) {
    let metadata = Metadata::from_value(item.metadata.clone());
    let tokens = metadata.discovery_tokens().unwrap_or_else(|| item_tokens(item).max(MIN_WORK_TOKENS));
    let source = if metadata.discovery_source() == Some("usage") {
        WorkSource::Usage
    } else {
        WorkSource::Estimate
    };
    (tokens, source)
}

fn discovery_group(item: &MemoryItem) -> String {
    Metadata::from_value(item.metadata.clone())
        .discovery_group()
        .unwrap_or_else(|| format!("memory:{}", item.id))
}

/// Compute savings metrics for the final set of packed items against
/// `pack_tokens` (the total token count the pack itself uses).
pub fn compute_savings(items: &[MemoryItem], pack_tokens: u64) -> SavingsMetrics {
    if items.is_empty() {
        return SavingsMetrics {
            work_source: WorkSource::Estimate.as_str().to_string(),
            ..Default::default()
        };
    }

    let mut by_group: HashMap<String, (u64, WorkSource)> = HashMap::new();
    for item in items {
        let (tokens, source) = item_work_tokens(item);
        let group = discovery_group(item);
        by_group
            .entry(group)
            .and_modify(|(existing_tokens, existing_source)| {
                if tokens > *existing_tokens {
                    *existing_tokens = tokens;
                    *existing_source = source;
                }
            })
            .or_insert((tokens, source));
    }

    let work_tokens_unique: u64 = by_group.values().map(|(tokens, _)| tokens).sum();
    let tokens_saved = work_tokens_unique.saturating_sub(pack_tokens);

    let sources: std::collections::HashSet<WorkSource> = by_group.values().map(|(_, s)| *s).collect();
    let work_source = if sources.len() > 1 {
        "mixed".to_string()
    } else {
        sources.into_iter().next().map(|s| s.as_str().to_string()).unwrap_or_else(|| "estimate".to_string())
    };

    let (compression_ratio, overhead_tokens) = if work_tokens_unique > 0 {
        (
            Some(pack_tokens as f64 / work_tokens_unique as f64),
            Some(pack_tokens as i64 - work_tokens_unique as i64),
        )
    } else {
        (None, None)
    };

    SavingsMetrics { work_tokens_unique, tokens_saved, work_source, compression_ratio, overhead_tokens }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: i64, body_len: usize, metadata: serde_json::Value) -> MemoryItem {
        MemoryItem {
            id,
            session_id: "s".into(),
            kind: "note".into(),
            title: "t".into(),
            body_text: "x".repeat(body_len),
            confidence: 1.0,
            tags_text: String::new(),
            created_at: "2026-01-01T00:00:00+00:00".into(),
            updated_at: "2026-01-01T00:00:00+00:00".into(),
            active: true,
            metadata,
            import_key: None,
            project: "proj".into(),
        }
    }

    #[test]
    fn applies_floor_and_estimate_source_by_default() {
        let items = vec![item(1, 4, json!({}))];
        let metrics = compute_savings(&items, 50);
        assert_eq!(metrics.work_tokens_unique, MIN_WORK_TOKENS);
        assert_eq!(metrics.work_source, "estimate");
        assert_eq!(metrics.tokens_saved, MIN_WORK_TOKENS - 50);
    }

    #[test]
    fn discovery_tokens_overrides_estimate_but_source_follows_discovery_source() {
        let items = vec![item(1, 4, json!({"discovery_tokens": 9000}))];
        let metrics = compute_savings(&items, 100);
        assert_eq!(metrics.work_tokens_unique, 9000);
        assert_eq!(metrics.work_source, "estimate");
    }

    #[test]
    fn discovery_source_usage_marks_usage_source() {
        let items = vec![item(1, 4, json!({"discovery_tokens": 9000, "discovery_source": "usage"}))];
        let metrics = compute_savings(&items, 100);
        assert_eq!(metrics.work_source, "usage");
    }

    #[test]
    fn groups_by_discovery_group_and_takes_max() {
        let items = vec![
            item(1, 4, json!({"discovery_group": "g", "discovery_tokens": 3000})),
            item(2, 4, json!({"discovery_group": "g", "discovery_tokens": 5000})),
        ];
        let metrics = compute_savings(&items, 100);
        assert_eq!(metrics.work_tokens_unique, 5000);
    }

    #[test]
    fn mixed_sources_reported_as_mixed() {
        let items = vec![
            item(1, 4, json!({"discovery_tokens": 9000, "discovery_source": "usage"})),
            item(2, 4, json!({})),
        ];
        let metrics = compute_savings(&items, 100);
        assert_eq!(metrics.work_source, "mixed");
    }
}
