//! `build_memory_pack` (§4.5): the full gather → section → dedupe → budget
//! → delta → savings pipeline, plus the rendered `pack_text`.

use codemem_core::MemoryFilters;
use codemem_db::{Database, MemoryItem};
use codemem_search::RetrievalEngine;
use serde::Serialize;

use crate::budget::{fill_budget, BudgetedSection};
use crate::dedup::dedupe_exact;
use crate::delta::{compute_delta, PackDelta};
use crate::savings::{compute_savings, SavingsMetrics};
use crate::section::section_candidates;
use crate::PackResult;

/// One item as it appears in the rendered pack, annotated with its
/// section and its exact-dedup support.
#[derive(Debug, Clone)]
pub struct PackItem {
    pub item: MemoryItem,
    pub section: &'static str,
    pub support_count: usize,
    pub duplicate_ids: Vec<i64>,
}

/// The metrics struct emitted alongside a pack, mirroring the original's
/// `metrics` dict field-for-field for the fields §8 names explicitly, plus
/// additional telemetry the original also carries.
#[derive(Debug, Clone, Serialize)]
pub struct PackMetrics {
    pub pack_item_ids: Vec<i64>,
    pub added_ids: Vec<i64>,
    pub removed_ids: Vec<i64>,
    pub retained_ids: Vec<i64>,
    pub pack_tokens: u64,
    pub pack_token_delta: Option<i64>,
    pub pack_delta_available: bool,
    pub work_tokens_unique: u64,
    pub tokens_saved: u64,
    pub work_source: String,
    pub compression_ratio: Option<f64>,
    pub overhead_tokens: Option<i64>,
    /// Telemetry not named as a testable property in its own right, but
    /// present in the original's metrics surface.
    pub semantic_hits: usize,
    pub exact_dedupe_reduction_percent: f64,
}

#[derive(Debug, Clone)]
pub struct MemoryPack {
    pub context: String,
    pub items: Vec<PackItem>,
    pub pack_text: String,
    pub metrics: PackMetrics,
}

pub async fn build_memory_pack(
    db: &Database,
    engine: &RetrievalEngine,
    context: &str,
    limit: i64,
    token_budget: Option<u64>,
    filters: &MemoryFilters,
    log_usage: bool,
) -> PackResult<MemoryPack> {
    // 1. Gather.
    let outcome = engine.search(context, limit, filters).await?;
    let semantic_hits = outcome.hits.iter().filter(|h| h.semantic_present).count();
    let ranked: Vec<MemoryItem> = outcome.hits.into_iter().map(|h| h.item).collect();
    let candidates_before_dedupe = ranked.len();

    // 2. Section.
    let sections = section_candidates(ranked, context);

    // 3. Exact dedup (per-section; session_summary is naturally exempt
    // since `dedupe_exact` passes it through unchanged).
    let summary_deduped = dedupe_exact(sections.summary.into_iter().collect());
    let timeline_deduped = dedupe_exact(sections.timeline);
    let observations_deduped = dedupe_exact(sections.observations);

    let candidates_after_dedupe =
        summary_deduped.len() + timeline_deduped.len() + observations_deduped.len();
    let exact_dedupe_reduction_percent = if candidates_before_dedupe > 0 {
        100.0 * (1.0 - candidates_after_dedupe as f64 / candidates_before_dedupe as f64)
    } else {
        0.0
    };

    // 4. Token budget, applied across sections in declared order.
    let budgeted_sections = vec![
        ("Summary", summary_deduped.iter().map(|d| d.item.clone()).collect::<Vec<_>>()),
        ("Timeline", timeline_deduped.iter().map(|d| d.item.clone()).collect::<Vec<_>>()),
        ("Observations", observations_deduped.iter().map(|d| d.item.clone()).collect::<Vec<_>>()),
    ];
    let (sections_budgeted, pack_tokens) = fill_budget(budgeted_sections, token_budget);

    let support_by_id: std::collections::HashMap<i64, (usize, Vec<i64>)> = summary_deduped
        .iter()
        .chain(timeline_deduped.iter())
        .chain(observations_deduped.iter())
        .map(|d| (d.item.id, (d.support_count, d.duplicate_ids.clone())))
        .collect();

    let items = render_items(sections_budgeted, &support_by_id);
    let pack_item_ids: Vec<i64> = items.iter().map(|p| p.item.id).collect();
    let pack_text = render_pack_text(&items);

    // 5. Delta accounting against the project's most recent pack event.
    let project = filters.project.clone().unwrap_or_default();
    let prior = db.most_recent_pack_event(&project).await?;
    let PackDelta { added_ids, removed_ids, retained_ids, pack_token_delta, pack_delta_available } =
        compute_delta(prior.as_ref(), &pack_item_ids, pack_tokens);

    // 6. Savings metrics.
    let packed_items: Vec<MemoryItem> = items.iter().map(|p| p.item.clone()).collect();
    let SavingsMetrics { work_tokens_unique, tokens_saved, work_source, compression_ratio, overhead_tokens } =
        compute_savings(&packed_items, pack_tokens);

    let metrics = PackMetrics {
        pack_item_ids,
        added_ids,
        removed_ids,
        retained_ids,
        pack_tokens,
        pack_token_delta,
        pack_delta_available,
        work_tokens_unique,
        tokens_saved,
        work_source,
        compression_ratio,
        overhead_tokens,
        semantic_hits,
        exact_dedupe_reduction_percent,
    };

    // 7. Usage event logging.
    if log_usage {
        let metadata = serde_json::to_value(&metrics).unwrap_or(serde_json::json!({}));
        db.record_usage_event("pack", Some(&project), pack_tokens as i64, tokens_saved as i64, metadata)
            .await?;
    }

    Ok(MemoryPack { context: context.to_string(), items, pack_text, metrics })
}

fn render_items(
    sections: Vec<BudgetedSection>,
    support_by_id: &std::collections::HashMap<i64, (usize, Vec<i64>)>,
) -> Vec<PackItem> {
    let mut out = Vec::new();
    for section in sections {
        for item in section.items {
            let (support_count, duplicate_ids) =
                support_by_id.get(&item.id).cloned().unwrap_or((1, Vec::new()));
            out.push(PackItem { item, section: section.title, support_count, duplicate_ids });
        }
    }
    out
}

fn render_pack_text(items: &[PackItem]) -> String {
    let mut sections: Vec<(&'static str, Vec<&PackItem>)> = vec![
        ("Summary", Vec::new()),
        ("Timeline", Vec::new()),
        ("Observations", Vec::new()),
    ];
    for item in items {
        if let Some((_, bucket)) = sections.iter_mut().find(|(title, _)| *title == item.section) {
            bucket.push(item);
        }
    }

    let mut out = String::new();
    for (title, bucket) in sections {
        if bucket.is_empty() {
            continue;
        }
        out.push_str(&format!("## {title}\n\n"));
        for item in bucket {
            out.push_str(&format!("- [{}] {}\n", item.item.kind, item.item.title));
            if !item.item.body_text.is_empty() {
                out.push_str(&format!("  {}\n", item.item.body_text));
            }
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemem_search::{backfill_tags_text, DisabledEmbeddings, SearchIndex};
    use serde_json::json;
    use std::sync::Arc;

    async fn seeded() -> (Database, RetrievalEngine) {
        let db = Database::new_in_memory().await.unwrap();
        let index = Arc::new(SearchIndex::open_in_ram().unwrap());

        let mut ids = Vec::new();
        ids.push(
            db.remember("s1", "session_summary", "Session summary", "Worked on auth", 1.0, json!({}), None, "proj", "local")
                .await
                .unwrap(),
        );
        for i in 0..5 {
            ids.push(
                db.remember(
                    "s1", "decision", &format!("Decision {i}"), &format!("Body {i}"), 1.0, json!({}), None,
                    "proj", "local",
                )
                .await
                .unwrap(),
            );
        }
        backfill_tags_text(&db, &index, &ids).await.unwrap();

        let engine = RetrievalEngine::new(db.clone(), index, Arc::new(DisabledEmbeddings));
        (db, engine)
    }

    #[tokio::test]
    async fn builds_a_pack_with_required_sections() {
        let (db, engine) = seeded().await;
        let pack = build_memory_pack(&db, &engine, "auth decision", 20, None, &MemoryFilters::default(), false)
            .await
            .unwrap();
        assert!(pack.items.iter().any(|i| i.section == "Summary"));
        assert!(pack.metrics.pack_item_ids.len() <= 6);
        assert!(!pack.pack_text.is_empty());
    }

    #[tokio::test]
    async fn logs_usage_event_when_requested() {
        let (db, engine) = seeded().await;
        let filters = MemoryFilters::default().with_project("proj");
        build_memory_pack(&db, &engine, "auth", 20, None, &filters, true).await.unwrap();
        let event = db.most_recent_pack_event("proj").await.unwrap();
        assert!(event.is_some());
    }

    #[tokio::test]
    async fn no_prior_pack_means_delta_unavailable() {
        let (db, engine) = seeded().await;
        let filters = MemoryFilters::default().with_project("proj");
        let pack = build_memory_pack(&db, &engine, "auth", 20, None, &filters, false).await.unwrap();
        assert!(!pack.metrics.pack_delta_available);
    }

    #[tokio::test]
    async fn second_pack_reports_delta_against_first() {
        let (db, engine) = seeded().await;
        let filters = MemoryFilters::default().with_project("proj");
        build_memory_pack(&db, &engine, "auth", 20, None, &filters, true).await.unwrap();
        let second = build_memory_pack(&db, &engine, "auth", 20, None, &filters, true).await.unwrap();
        assert!(second.metrics.pack_delta_available);
    }
}
