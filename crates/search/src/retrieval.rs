//! The retrieval engine (C4, §4.4): hybrid search over full-text, semantic,
//! and fuzzy candidates, plus the timeline view around an anchor item.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use codemem_core::{kind_bonus, MemoryFilters, MemoryLike};
use codemem_db::{Database, MemoryItem};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::Value;
use tantivy::TantivyDocument;

use crate::candidate::{Candidate, CandidateSource};
use crate::classify::{query_looks_like_recall, query_looks_like_tasks};
use crate::embeddings::{cosine_similarity, EmbeddingProvider};
use crate::index::SearchIndex;
use crate::SearchResult;

/// `semantic_present_bonus`: the additive score given to a candidate that
/// was also surfaced by semantic search, on top of its own stage score.
/// Not specified numerically; chosen small relative to the kind bonus range
/// (0.05-0.25) so it nudges ties rather than dominating ranking.
const SEMANTIC_PRESENT_BONUS: f64 = 0.08;

/// Minimum `strsim::jaro_winkler` similarity for a fuzzy candidate to be
/// considered a match at all, rather than noise.
const FUZZY_MIN_SIMILARITY: f64 = 0.72;

const MAX_FUZZY_SCAN: i64 = 500;

/// One ranked hit returned from `search`/`search_index`.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub item: MemoryItem,
    pub score: f64,
    pub source: CandidateSource,
    pub semantic_present: bool,
}

/// The outcome of a `search` call: ranked hits plus which ranking mode was
/// selected by the query classifiers (§4.4).
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    pub task_biased: bool,
    pub recall_biased: bool,
}

/// The anchor item a timeline view was built around, plus its position in
/// the surrounding window.
#[derive(Debug, Clone)]
pub struct TimelineAnchor {
    pub item: MemoryItem,
    pub before: Vec<MemoryItem>,
    pub after: Vec<MemoryItem>,
}

pub struct RetrievalEngine {
    db: Database,
    index: Arc<SearchIndex>,
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl RetrievalEngine {
    pub fn new(db: Database, index: Arc<SearchIndex>, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self { db, index, embeddings }
    }

    /// The full hybrid search surface: merges full-text, semantic, and
    /// fuzzy candidates, then reranks with kind/recency/semantic bonuses.
    pub async fn search(
        &self,
        query: &str,
        limit: i64,
        filters: &MemoryFilters,
    ) -> SearchResult<SearchOutcome> {
        let task_biased = query_looks_like_tasks(query);
        let recall_biased = query_looks_like_recall(query);

        let fts = self.full_text_search(query, limit.max(20), filters).await?;
        let semantic = self.semantic_search(query, limit.max(20), filters).await?;
        let fuzzy = if fts.is_empty() && semantic.is_empty() {
            self.fuzzy_search(query, limit.max(20), filters).await?
        } else {
            Vec::new()
        };

        let merged = merge_ranked_results(fts, semantic, fuzzy);
        let recency_days = if task_biased {
            codemem_core::TASK_RECENCY_DAYS
        } else {
            codemem_core::RECALL_RECENCY_DAYS
        };
        let mut ranked = rerank_hybrid(merged, recency_days);
        ranked.truncate(limit.max(0) as usize);

        let hits = ranked
            .into_iter()
            .map(|c| SearchHit {
                score: hybrid_score(&c, recency_days),
                source: c.source,
                semantic_present: c.semantic_present,
                item: c.item,
            })
            .collect();

        Ok(SearchOutcome { hits, task_biased, recall_biased })
    }

    /// A compact variant of `search` used when callers only need ids and
    /// scores (the tool surface's `search_index` operation) — same pipeline,
    /// thinner result.
    pub async fn search_index(
        &self,
        query: &str,
        limit: i64,
        filters: &MemoryFilters,
    ) -> SearchResult<Vec<(i64, f64)>> {
        let outcome = self.search(query, limit, filters).await?;
        Ok(outcome.hits.into_iter().map(|h| (h.item.id, h.score)).collect())
    }

    /// A window of items immediately before/after an anchor, ordered by
    /// `created_at`, matching §4.4's timeline view. The anchor is resolved
    /// either by direct id (`memory_id`) or by running `search` and taking
    /// its top hit (`query`).
    pub async fn timeline(
        &self,
        query: Option<&str>,
        memory_id: Option<i64>,
        depth_before: i64,
        depth_after: i64,
        filters: &MemoryFilters,
    ) -> SearchResult<Option<TimelineAnchor>> {
        let anchor_id = match memory_id {
            Some(id) => Some(id),
            None => match query {
                Some(q) => {
                    let outcome = self.search(q, 1, filters).await?;
                    outcome.hits.into_iter().next().map(|h| h.item.id)
                }
                None => None,
            },
        };

        let Some(anchor_id) = anchor_id else { return Ok(None) };
        let Some(anchor) = self.db.get(anchor_id).await? else { return Ok(None) };

        let neighborhood = self
            .db
            .recent((depth_before + depth_after + 1).max(1) * 4, filters)
            .await
            .unwrap_or_default();

        // `recent` orders newest-first; split the neighborhood around the
        // anchor's position by comparing `created_at`.
        let mut before: Vec<MemoryItem> = neighborhood
            .iter()
            .filter(|i| i.id != anchor.id && i.created_at < anchor.created_at)
            .cloned()
            .collect();
        before.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        before.truncate(depth_before.max(0) as usize);

        let mut after: Vec<MemoryItem> = neighborhood
            .iter()
            .filter(|i| i.id != anchor.id && i.created_at > anchor.created_at)
            .cloned()
            .collect();
        after.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        after.truncate(depth_after.max(0) as usize);

        Ok(Some(TimelineAnchor { item: anchor, before, after }))
    }

    async fn full_text_search(
        &self,
        query: &str,
        limit: i64,
        filters: &MemoryFilters,
    ) -> SearchResult<Vec<Candidate>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let searcher = self.index.reader.searcher();
        let parser = QueryParser::for_index(
            &self.index.index,
            vec![self.index.title_field, self.index.body_field, self.index.tags_field],
        );
        let parsed = match parser.parse_query(query) {
            Ok(q) => q,
            Err(_) => return Ok(Vec::new()),
        };
        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(limit.max(1) as usize))?;

        let mut ids = Vec::with_capacity(top_docs.len());
        let mut scores = HashMap::new();
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(id) = doc
                .get_first(self.index.id_field)
                .and_then(|v| v.as_u64())
            {
                ids.push(id as i64);
                scores.insert(id as i64, score as f64);
            }
        }

        let items = self.db.get_many(&ids).await?;
        let max_score = scores.values().cloned().fold(0.0_f64, f64::max).max(1.0);
        Ok(items
            .into_iter()
            .filter(|item| filters.project.as_ref().map_or(true, |p| codemem_core::filters::project_matches(&item.project, p)))
            .map(|item| {
                let normalized = scores.get(&item.id).copied().unwrap_or(0.0) / max_score;
                Candidate::new(item, normalized, CandidateSource::FullText)
            })
            .collect())
    }

    async fn semantic_search(
        &self,
        query: &str,
        limit: i64,
        filters: &MemoryFilters,
    ) -> SearchResult<Vec<Candidate>> {
        if !self.embeddings.is_enabled() {
            return Ok(Vec::new());
        }
        let Some(query_vec) = self.embeddings.embed(query).await else {
            return Ok(Vec::new());
        };

        let recent = self.db.recent(MAX_FUZZY_SCAN, filters).await?;
        let mut scored: Vec<(MemoryItem, f64)> = Vec::new();
        for item in recent {
            let text = format!("{} {}", item.title, item.body_text);
            if let Some(item_vec) = self.embeddings.embed(&text).await {
                let sim = cosine_similarity(&query_vec, &item_vec) as f64;
                if sim > 0.0 {
                    scored.push((item, sim));
                }
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit.max(0) as usize);
        Ok(scored
            .into_iter()
            .map(|(item, score)| Candidate::new(item, score, CandidateSource::Semantic))
            .collect())
    }

    async fn fuzzy_search(
        &self,
        query: &str,
        limit: i64,
        filters: &MemoryFilters,
    ) -> SearchResult<Vec<Candidate>> {
        let recent = self.db.recent(MAX_FUZZY_SCAN, filters).await?;
        let lowered_query = query.to_ascii_lowercase();
        let mut scored: Vec<(MemoryItem, f64)> = recent
            .into_iter()
            .filter_map(|item| {
                let title_sim = strsim::jaro_winkler(&lowered_query, &item.title.to_ascii_lowercase());
                let tags_sim = strsim::jaro_winkler(&lowered_query, &item.tags_text.to_ascii_lowercase());
                let sim = title_sim.max(tags_sim);
                (sim >= FUZZY_MIN_SIMILARITY).then_some((item, sim))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit.max(0) as usize);
        Ok(scored
            .into_iter()
            .map(|(item, score)| Candidate::new(item, score, CandidateSource::Fuzzy))
            .collect())
    }
}

/// Combine full-text, semantic, and fuzzy candidate lists into one
/// deduplicated set, keeping the highest base score seen per id and marking
/// `semantic_present` when any stage found it via semantic search.
fn merge_ranked_results(
    fts: Vec<Candidate>,
    semantic: Vec<Candidate>,
    fuzzy: Vec<Candidate>,
) -> Vec<Candidate> {
    let mut by_id: HashMap<i64, Candidate> = HashMap::new();
    for candidate in fts.into_iter().chain(fuzzy) {
        by_id
            .entry(candidate.id())
            .and_modify(|existing| {
                if candidate.base_score > existing.base_score {
                    existing.base_score = candidate.base_score;
                    existing.source = candidate.source;
                }
            })
            .or_insert(candidate);
    }
    for candidate in semantic {
        by_id
            .entry(candidate.id())
            .and_modify(|existing| {
                existing.semantic_present = true;
                if candidate.base_score > existing.base_score {
                    existing.base_score = candidate.base_score;
                }
            })
            .or_insert(candidate);
    }
    by_id.into_values().collect()
}

fn recency_decay(created_at: &str, window_days: f64) -> f64 {
    let Ok(created) = chrono::DateTime::parse_from_rfc3339(created_at) else { return 0.0 };
    let age_days = (Utc::now() - created.with_timezone(&Utc)).num_seconds() as f64 / 86_400.0;
    if age_days <= 0.0 {
        return 1.0;
    }
    (1.0 - age_days / window_days).clamp(0.0, 1.0)
}

fn hybrid_score(candidate: &Candidate, recency_window_days: f64) -> f64 {
    let mut score = candidate.base_score;
    score += kind_bonus(Some(candidate.kind()));
    score += recency_decay(candidate.created_at(), recency_window_days) * 0.15;
    if candidate.semantic_present {
        score += SEMANTIC_PRESENT_BONUS;
    }
    score
}

/// Rerank merged candidates by the full hybrid score, highest first. Ties
/// break by `created_at` descending, then by id ascending (§4.4, §8).
fn rerank_hybrid(candidates: Vec<Candidate>, recency_window_days: f64) -> Vec<Candidate> {
    let mut scored: Vec<(f64, Candidate)> = candidates
        .into_iter()
        .map(|c| (hybrid_score(&c, recency_window_days), c))
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.created_at().cmp(a.1.created_at()))
            .then_with(|| a.1.id().cmp(&b.1.id()))
    });
    scored.into_iter().map(|(_, c)| c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::DisabledEmbeddings;
    use crate::indexer::backfill_tags_text;
    use serde_json::json;

    async fn seeded_engine() -> (RetrievalEngine, Database, Arc<SearchIndex>) {
        let db = Database::new_in_memory().await.unwrap();
        let index = Arc::new(SearchIndex::open_in_ram().unwrap());

        let id1 = db
            .remember("s1", "decision", "Use SQLite for storage", "Embedded, zero config", 1.0, json!({}), None, "proj", "local")
            .await
            .unwrap();
        let id2 = db
            .remember("s1", "note", "Unrelated note about coffee", "Just a note", 1.0, json!({}), None, "proj", "local")
            .await
            .unwrap();
        backfill_tags_text(&db, &index, &[id1, id2]).await.unwrap();

        let engine = RetrievalEngine::new(db.clone(), index.clone(), Arc::new(DisabledEmbeddings));
        (engine, db, index)
    }

    #[tokio::test]
    async fn full_text_search_ranks_relevant_item_first() {
        let (engine, _db, _index) = seeded_engine().await;
        let outcome = engine.search("SQLite storage", 10, &MemoryFilters::default()).await.unwrap();
        assert!(!outcome.hits.is_empty());
        assert_eq!(outcome.hits[0].item.title, "Use SQLite for storage");
    }

    #[tokio::test]
    async fn classifies_task_biased_queries() {
        let (engine, _db, _index) = seeded_engine().await;
        let outcome = engine.search("what's left on my todo list", 10, &MemoryFilters::default()).await.unwrap();
        assert!(outcome.task_biased);
        assert!(!outcome.recall_biased);
    }

    #[tokio::test]
    async fn timeline_resolves_anchor_by_id() {
        let (engine, db, _index) = seeded_engine().await;
        let items = db.recent(10, &MemoryFilters::default()).await.unwrap();
        let anchor_id = items.last().unwrap().id;
        let timeline = engine.timeline(None, Some(anchor_id), 2, 2, &MemoryFilters::default()).await.unwrap();
        assert!(timeline.is_some());
        assert_eq!(timeline.unwrap().item.id, anchor_id);
    }

    #[test]
    fn recency_decay_is_one_for_future_or_present_timestamps() {
        let now = Utc::now().to_rfc3339();
        assert_eq!(recency_decay(&now, 21.0), 1.0);
    }

    #[test]
    fn recency_decay_clamps_to_zero_for_very_old_items() {
        let ancient = "2000-01-01T00:00:00Z";
        assert_eq!(recency_decay(ancient, 21.0), 0.0);
    }

    #[test]
    fn merge_ranked_results_dedupes_and_marks_semantic_present() {
        let db_item = MemoryItem {
            id: 1,
            session_id: "s".into(),
            kind: "note".into(),
            title: "t".into(),
            body_text: "b".into(),
            confidence: 1.0,
            tags_text: "".into(),
            created_at: Utc::now().to_rfc3339(),
            updated_at: Utc::now().to_rfc3339(),
            active: true,
            metadata: json!({}),
            import_key: None,
            project: "p".into(),
        };
        let fts = vec![Candidate::new(db_item.clone(), 0.5, CandidateSource::FullText)];
        let semantic = vec![Candidate::new(db_item.clone(), 0.9, CandidateSource::Semantic)];
        let merged = merge_ranked_results(fts, semantic, Vec::new());
        assert_eq!(merged.len(), 1);
        assert!(merged[0].semantic_present);
        assert_eq!(merged[0].base_score, 0.9);
    }
}
