//! `MemoryService` (§6 tool surface): the facade an MCP bridge calls into.
//! Each method is a thin composition of the per-crate operations this
//! workspace already exposes — this module owns no retrieval, ranking, or
//! persistence logic of its own.

use std::path::Path;
use std::sync::Arc;

use codemem_core::MemoryFilters;
use codemem_db::{
    Database, DbResult, MemoryItem, RawEventsConfig, ReliabilityMetrics, Session,
};
use codemem_ingest::{AutoFlusher, Classifier, FlushContext, IngestResult};
use codemem_pack::{build_memory_pack, MemoryPack, PackResult};
use codemem_search::{
    backfill_tags_text, backfill_vectors, DisabledEmbeddings, EmbeddingProvider, RetrievalEngine,
    SearchIndex, SearchOutcome, SearchResult, TimelineAnchor,
};
use serde_json::Value;

use crate::expand::{expand, ExpandOutcome};

/// A static description of the memory kinds and filter grammar a caller can
/// use, for the `schema` tool operation — an MCP bridge's one-time
/// capability introspection rather than a per-call data shape.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MemorySchema {
    pub kinds: Vec<&'static str>,
    pub filters: Vec<&'static str>,
}

/// The outcome of a `learn` call: a raw event was recorded and (if an auto
/// flusher is wired up) the session's debounce timer was kicked.
#[derive(Debug, Clone, PartialEq)]
pub struct LearnOutcome {
    pub outcome: codemem_db::IngestOutcome,
}

/// Wires together the per-crate operations into the plain async surface an
/// MCP bridge calls. Owns no state beyond the handles it was built from —
/// `codemem-server`'s `daemon` module is what actually drives the
/// background flusher/sweeper/sync loops this facade's `learn` hooks into.
#[derive(Clone)]
pub struct MemoryService {
    db: Database,
    engine: Arc<RetrievalEngine>,
    index: Arc<SearchIndex>,
    embeddings: Arc<dyn EmbeddingProvider>,
    device_id: String,
    default_project: Option<String>,
    auto_flusher: Option<Arc<AutoFlusher>>,
}

impl MemoryService {
    /// Build a service around an already-open database, with a fresh
    /// in-process search index rebuilt from whatever is currently active.
    /// Embeddings are disabled unless `with_embeddings` is called.
    pub async fn new(db: Database, index_path: Option<&Path>, device_id: impl Into<String>) -> SearchResult<Self> {
        let index = match index_path {
            Some(path) => SearchIndex::open(path)?,
            None => SearchIndex::open_in_ram()?,
        };
        let index = Arc::new(index);
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(DisabledEmbeddings);
        let engine = Arc::new(RetrievalEngine::new(db.clone(), index.clone(), embeddings.clone()));
        Ok(Self {
            db,
            engine,
            index,
            embeddings,
            device_id: device_id.into(),
            default_project: None,
            auto_flusher: None,
        })
    }

    pub fn with_default_project(mut self, project: Option<String>) -> Self {
        self.default_project = project;
        self
    }

    pub fn with_embeddings(mut self, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        self.engine = Arc::new(RetrievalEngine::new(self.db.clone(), self.index.clone(), embeddings.clone()));
        self.embeddings = embeddings;
        self
    }

    /// Wire a debounced auto-flusher in for `learn` to notify on each raw
    /// event (§4.9's edge notifying the pipeline of session activity).
    pub fn with_auto_flusher(mut self, classifier: Arc<dyn Classifier>, raw_events: &RawEventsConfig) -> Self {
        let device_id = self.device_id.clone();
        self.auto_flusher =
            Some(Arc::new(AutoFlusher::new(Arc::new(self.db.clone()), classifier, device_id, raw_events.debounce)));
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn engine(&self) -> &RetrievalEngine {
        &self.engine
    }

    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    fn resolve_project<'a>(&'a self, project: Option<&'a str>) -> Option<&'a str> {
        project.or(self.default_project.as_deref())
    }

    // -- C2: session lifecycle & memory item writer --------------------

    pub async fn start_session(
        &self,
        cwd: Option<&str>,
        project: Option<&str>,
        user: Option<&str>,
        tool_version: Option<&str>,
        git_remote: Option<&str>,
        git_branch: Option<&str>,
        metadata: Value,
    ) -> DbResult<String> {
        let project = self.resolve_project(project).unwrap_or_default();
        self.db
            .start_session(cwd, project, user, tool_version, git_remote, git_branch, metadata, &self.device_id)
            .await
    }

    pub async fn end_session(&self, session_id: &str) -> DbResult<bool> {
        self.db.end_session(session_id, &self.device_id).await
    }

    pub async fn get_session(&self, session_id: &str) -> DbResult<Option<Session>> {
        self.db.get_session(session_id).await
    }

    /// Store a memory item, then backfill its derived `tags_text` and
    /// (if enabled) its embedding vector so search sees it immediately.
    pub async fn remember(
        &self,
        session_id: &str,
        kind: &str,
        title: &str,
        body: &str,
        confidence: f64,
        metadata: Value,
        import_key: Option<&str>,
        project: Option<&str>,
    ) -> SearchResult<i64> {
        let project = self.resolve_project(project).unwrap_or_default();
        let id = self
            .db
            .remember(session_id, kind, title, body, confidence, metadata, import_key, project, &self.device_id)
            .await?;
        backfill_tags_text(&self.db, &self.index, &[id]).await?;
        backfill_vectors(&self.db, self.embeddings.as_ref(), &[id]).await?;
        Ok(id)
    }

    pub async fn forget(&self, id: i64) -> DbResult<bool> {
        let forgotten = self.db.forget(id, &self.device_id).await?;
        if forgotten {
            self.index.delete_item(id).ok();
        }
        Ok(forgotten)
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<MemoryItem>> {
        self.db.get(id).await
    }

    pub async fn get_many(&self, ids: &[i64]) -> DbResult<Vec<MemoryItem>> {
        self.db.get_many(ids).await
    }

    pub async fn recent(&self, limit: i64, filters: &MemoryFilters) -> DbResult<Vec<MemoryItem>> {
        self.db.recent(limit, filters).await
    }

    // -- C4: retrieval engine -------------------------------------------

    pub async fn search(&self, query: &str, limit: i64, filters: &MemoryFilters) -> SearchResult<SearchOutcome> {
        self.engine.search(query, limit, filters).await
    }

    pub async fn search_index(&self, query: &str, limit: i64, filters: &MemoryFilters) -> SearchResult<Vec<(i64, f64)>> {
        self.engine.search_index(query, limit, filters).await
    }

    pub async fn timeline(
        &self,
        query: Option<&str>,
        memory_id: Option<i64>,
        depth_before: i64,
        depth_after: i64,
        filters: &MemoryFilters,
    ) -> SearchResult<Option<TimelineAnchor>> {
        self.engine.timeline(query, memory_id, depth_before, depth_after, filters).await
    }

    /// `expand` (§6): resolve caller ids into items, bucketing failures by
    /// §7 error code. Scoped to `project` (falling back to the service's
    /// default) when given.
    pub async fn expand(&self, raw_ids: &[Value], project: Option<&str>) -> DbResult<ExpandOutcome> {
        let project = self.resolve_project(project);
        expand(&self.db, raw_ids, project).await
    }

    // -- C5: pack builder -------------------------------------------------

    pub async fn pack(
        &self,
        context: &str,
        limit: i64,
        token_budget: Option<u64>,
        filters: &MemoryFilters,
        log_usage: bool,
    ) -> PackResult<MemoryPack> {
        build_memory_pack(&self.db, &self.engine, context, limit, token_budget, filters, log_usage).await
    }

    // -- C9: raw-event ingestion edge -------------------------------------

    /// `learn` (§6, §4.9): append one raw tool/session event, then notify
    /// the auto-flusher of activity on its session so the debounced flush
    /// timer is (re)started. A no-op notify when no auto-flusher is wired
    /// (e.g. auto-flush disabled by configuration).
    pub async fn learn(
        &self,
        session_id: &str,
        event_id: &str,
        event_type: &str,
        payload: Value,
        ts_wall_ms: i64,
        ts_mono_ms: i64,
        context: FlushContext,
    ) -> IngestResult<LearnOutcome> {
        let outcome = self
            .db
            .record_raw_event(session_id, event_id, event_type, payload, ts_wall_ms, ts_mono_ms)
            .await?;
        if let Some(flusher) = &self.auto_flusher {
            flusher.note_activity(session_id, context).await;
        }
        Ok(LearnOutcome { outcome })
    }

    pub async fn reliability_metrics(&self, window_hours: i64) -> DbResult<ReliabilityMetrics> {
        self.db.reliability_metrics(window_hours).await
    }

    /// `schema` (§6): a static capability description, not derived from
    /// live data — the memory kind vocabulary and filter grammar rarely
    /// change and cost nothing to report.
    pub fn schema(&self) -> MemorySchema {
        MemorySchema {
            kinds: codemem_core::ALLOWED_MEMORY_KINDS.iter().map(|k| k.as_str()).collect(),
            filters: vec!["kind", "session_id", "since", "project"],
        }
    }
}
