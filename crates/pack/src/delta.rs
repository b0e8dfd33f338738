//! Delta accounting (§4.5 step 5): compare this pack's item ids and token
//! count against the project's most recent `pack` usage event.

use std::collections::HashSet;

use codemem_db::UsageEvent;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackDelta {
    pub added_ids: Vec<i64>,
    pub removed_ids: Vec<i64>,
    pub retained_ids: Vec<i64>,
    pub pack_token_delta: Option<i64>,
    pub pack_delta_available: bool,
}

/// Compute the delta between `current_ids`/`current_tokens` and the prior
/// pack event, if it carries a valid `pack_item_ids` list and a
/// non-negative `pack_tokens` value. Otherwise `pack_delta_available` is
/// `false` and every other field is empty/`None`.
pub fn compute_delta(prior: Option<&UsageEvent>, current_ids: &[i64], current_tokens: u64) -> PackDelta {
    let metadata = codemem_core::Metadata::from_value(
        prior.map(|e| e.metadata.clone()).unwrap_or(serde_json::Value::Null),
    );
    let (Some(prior_ids), Some(prior_tokens)) = (metadata.pack_item_ids(), metadata.pack_tokens()) else {
        return PackDelta::default();
    };

    let prior_set: HashSet<i64> = prior_ids.iter().copied().collect();
    let current_set: HashSet<i64> = current_ids.iter().copied().collect();

    let mut added: Vec<i64> = current_set.difference(&prior_set).copied().collect();
    let mut removed: Vec<i64> = prior_set.difference(&current_set).copied().collect();
    let mut retained: Vec<i64> = current_set.intersection(&prior_set).copied().collect();
    added.sort_unstable();
    removed.sort_unstable();
    retained.sort_unstable();

    PackDelta {
        added_ids: added,
        removed_ids: removed,
        retained_ids: retained,
        pack_token_delta: Some(current_tokens as i64 - prior_tokens as i64),
        pack_delta_available: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prior_event(ids: Vec<i64>, tokens: u64) -> UsageEvent {
        UsageEvent {
            id: 1,
            event: "pack".into(),
            project: Some("proj".into()),
            tokens_read: tokens as i64,
            tokens_saved: 0,
            metadata: json!({ "pack_item_ids": ids, "pack_tokens": tokens }),
            created_at: "2026-01-01T00:00:00+00:00".into(),
        }
    }

    #[test]
    fn no_prior_event_means_unavailable() {
        let delta = compute_delta(None, &[1, 2, 3], 100);
        assert!(!delta.pack_delta_available);
        assert!(delta.added_ids.is_empty());
    }

    #[test]
    fn computes_added_removed_retained_and_token_delta() {
        let prior = prior_event(vec![1, 2, 3], 150);
        let delta = compute_delta(Some(&prior), &[2, 3, 4], 100);
        assert!(delta.pack_delta_available);
        assert_eq!(delta.added_ids, vec![4]);
        assert_eq!(delta.removed_ids, vec![1]);
        assert_eq!(delta.retained_ids, vec![2, 3]);
        assert_eq!(delta.pack_token_delta, Some(-50));
    }

    #[test]
    fn malformed_prior_metadata_is_unavailable() {
        let mut prior = prior_event(vec![1, 2], 100);
        prior.metadata = json!({ "pack_item_ids": [1, true, 2] });
        let delta = compute_delta(Some(&prior), &[1, 2], 50);
        assert!(!delta.pack_delta_available);
    }
}
