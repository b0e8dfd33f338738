//! Sectioning (§4.5 step 2): split ranked candidates into Summary (≤1),
//! Timeline (≤3), and Observations (the remainder, kind-prioritized).

use std::collections::HashSet;

use codemem_core::MemoryKind;
use codemem_db::MemoryItem;

pub const TIMELINE_LIMIT: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct Sections {
    pub summary: Option<MemoryItem>,
    pub timeline: Vec<MemoryItem>,
    pub observations: Vec<MemoryItem>,
}

/// Split ranked candidates into sections. `query` drives the observation
/// pool's tag-overlap tiebreak; an empty query means every item overlaps
/// equally (zero), so the pool falls back to kind-priority then recency.
pub fn section_candidates(ranked: Vec<MemoryItem>, query: &str) -> Sections {
    let query_tokens: HashSet<String> =
        codemem_search::extract_tags_text(query, "").split(' ').filter(|s| !s.is_empty()).map(str::to_string).collect();

    let mut summary_candidates = Vec::new();
    let mut timeline = Vec::new();
    let mut rest = Vec::new();

    for item in ranked {
        if item.kind == "session_summary" {
            summary_candidates.push(item);
        } else if timeline.len() < TIMELINE_LIMIT {
            timeline.push(item);
        } else {
            rest.push(item);
        }
    }

    // The most-recent summary wins, not the first seen in ranked order
    // (`packs.py`'s `_sort_recent(summary_candidates)[0]`).
    let summary = summary_candidates.into_iter().max_by(|a, b| a.created_at.cmp(&b.created_at));

    let pool_priority: Vec<&str> = MemoryKind::observation_pool().iter().map(|k| k.as_str()).collect();
    rest.sort_by(|a, b| {
        let pa = pool_priority.iter().position(|k| *k == a.kind).unwrap_or(pool_priority.len());
        let pb = pool_priority.iter().position(|k| *k == b.kind).unwrap_or(pool_priority.len());
        pa.cmp(&pb)
            .then_with(|| tag_overlap(b, &query_tokens).cmp(&tag_overlap(a, &query_tokens)))
            .then_with(|| b.created_at.cmp(&a.created_at))
    });

    Sections { summary, timeline, observations: rest }
}

fn tag_overlap(item: &MemoryItem, query_tokens: &HashSet<String>) -> usize {
    if query_tokens.is_empty() {
        return 0;
    }
    item.tags_text.split(' ').filter(|t| query_tokens.contains(*t)).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: i64, kind: &str, tags: &str, created_at: &str) -> MemoryItem {
        MemoryItem {
            id,
            session_id: "s".into(),
            kind: kind.into(),
            title: format!("item {id}"),
            body_text: String::new(),
            confidence: 1.0,
            tags_text: tags.into(),
            created_at: created_at.into(),
            updated_at: created_at.into(),
            active: true,
            metadata: json!({}),
            import_key: None,
            project: "proj".into(),
        }
    }

    #[test]
    fn picks_at_most_one_summary_and_up_to_three_timeline() {
        let items = vec![
            item(1, "session_summary", "", "2026-01-05T00:00:00+00:00"),
            item(2, "session_summary", "", "2026-01-04T00:00:00+00:00"),
            item(3, "decision", "", "2026-01-03T00:00:00+00:00"),
            item(4, "note", "", "2026-01-02T00:00:00+00:00"),
            item(5, "feature", "", "2026-01-01T00:00:00+00:00"),
            item(6, "bugfix", "", "2025-12-31T00:00:00+00:00"),
        ];
        let sections = section_candidates(items, "");
        // The most-recent summary wins (id 1), not the first seen in ranked
        // order; both session_summary items are excluded from Timeline.
        assert_eq!(sections.summary.unwrap().id, 1);
        assert_eq!(sections.timeline.len(), 3);
        assert_eq!(sections.timeline.iter().map(|i| i.id).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(sections.observations.len(), 1);
        assert_eq!(sections.observations[0].id, 6);
    }

    #[test]
    fn most_recent_summary_wins_even_when_ranked_lower() {
        let items = vec![
            item(1, "session_summary", "", "2026-01-01T00:00:00+00:00"),
            item(2, "session_summary", "", "2026-01-10T00:00:00+00:00"),
        ];
        let sections = section_candidates(items, "");
        assert_eq!(sections.summary.unwrap().id, 2);
        assert!(sections.timeline.is_empty());
    }

    #[test]
    fn observations_sort_by_kind_priority_then_tag_overlap_then_recency() {
        let items = vec![
            item(10, "note", "rust async", "2026-01-01T00:00:00+00:00"),
            item(11, "decision", "python sync", "2026-01-02T00:00:00+00:00"),
            item(12, "decision", "rust async", "2026-01-01T00:00:00+00:00"),
        ];
        // consume the timeline slots first with unrelated fillers so all
        // three land in `observations`.
        let mut all = vec![
            item(1, "bugfix", "", "2026-02-01T00:00:00+00:00"),
            item(2, "bugfix", "", "2026-02-02T00:00:00+00:00"),
            item(3, "bugfix", "", "2026-02-03T00:00:00+00:00"),
        ];
        all.extend(items);
        let sections = section_candidates(all, "rust async");
        let obs_ids: Vec<i64> = sections.observations.iter().map(|i| i.id).collect();
        // decision (priority 0) before note (priority 7); among decisions,
        // tag overlap (id 12) before no overlap (id 11).
        assert_eq!(obs_ids, vec![12, 11, 10]);
    }
}
