//! The external classifier boundary (§4.9): turns a batch of raw events for
//! one session into a single typed memory. No classifier implementation
//! ships here — like `EmbeddingProvider` in `codemem-search`, this is a
//! trait seam a caller plugs a real provider into; `flush_raw_events`
//! degrades identically whether that provider is absent or erroring.

use async_trait::async_trait;
use codemem_db::RawEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One classified memory, shaped to flow straight into
/// `Database::remember` once the flush step picks a `project`/`session_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifiedMemory {
    pub category: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub narrative: String,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl ClassifiedMemory {
    /// `body_text` for `Database::remember`: narrative plus bullet facts,
    /// matching the shape the retrieval/pack crates expect for free text.
    pub fn body_text(&self) -> String {
        if self.facts.is_empty() {
            return self.narrative.clone();
        }
        let mut body = self.narrative.clone();
        body.push_str("\n\n");
        for fact in &self.facts {
            body.push_str("- ");
            body.push_str(fact);
            body.push('\n');
        }
        body
    }

    /// Metadata to persist alongside the memory item: caller-supplied
    /// extras plus the file lists and concepts, so `pack`/`section`
    /// ranking heuristics (tag overlap, discovery grouping) have something
    /// to work with.
    pub fn merged_metadata(&self) -> Value {
        let mut metadata = self.metadata.clone().unwrap_or_else(|| Value::Object(Default::default()));
        if let Value::Object(map) = &mut metadata {
            if !self.concepts.is_empty() {
                map.entry("concepts").or_insert_with(|| Value::from(self.concepts.clone()));
            }
            if !self.files_read.is_empty() {
                map.entry("files_read").or_insert_with(|| Value::from(self.files_read.clone()));
            }
            if !self.files_modified.is_empty() {
                map.entry("files_modified").or_insert_with(|| Value::from(self.files_modified.clone()));
            }
        }
        metadata
    }
}

/// Mirrors the original's `ObserverAuthError`: a classifier call that
/// failed because its credentials are bad, distinct from a transient or
/// malformed-input failure. The sweeper treats this specially — it freezes
/// all further flush work for a cooldown window rather than retrying every
/// tick (§4.9).
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier auth error: {0}")]
    Auth(String),

    #[error("classifier error: {0}")]
    Other(String),
}

/// A classifier call site's context: the opencode session plus whatever
/// working-directory/project hints the caller already knows (the auto
/// flusher and sweeper both pass `None` for these, per the original, and
/// let the classifier infer them from the event payloads themselves).
#[derive(Debug, Clone, Default)]
pub struct FlushContext {
    pub cwd: Option<String>,
    pub project: Option<String>,
    pub started_at: Option<String>,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        opencode_session_id: &str,
        events: &[RawEvent],
        context: &FlushContext,
    ) -> Result<ClassifiedMemory, ClassifierError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_text_appends_facts_as_bullets() {
        let memory = ClassifiedMemory {
            category: "decision".to_string(),
            title: "t".to_string(),
            subtitle: None,
            narrative: "chose X".to_string(),
            facts: vec!["reason one".to_string(), "reason two".to_string()],
            concepts: vec![],
            files_read: vec![],
            files_modified: vec![],
            confidence: 0.9,
            metadata: None,
        };
        assert_eq!(memory.body_text(), "chose X\n\n- reason one\n- reason two\n");
    }

    #[test]
    fn body_text_with_no_facts_is_just_the_narrative() {
        let memory = ClassifiedMemory {
            category: "note".to_string(),
            title: "t".to_string(),
            subtitle: None,
            narrative: "plain note".to_string(),
            facts: vec![],
            concepts: vec![],
            files_read: vec![],
            files_modified: vec![],
            confidence: 1.0,
            metadata: None,
        };
        assert_eq!(memory.body_text(), "plain note");
    }

    #[test]
    fn merged_metadata_folds_in_files_and_concepts() {
        let memory = ClassifiedMemory {
            category: "bugfix".to_string(),
            title: "t".to_string(),
            subtitle: None,
            narrative: "fixed it".to_string(),
            facts: vec![],
            concepts: vec!["retry logic".to_string()],
            files_read: vec!["src/lib.rs".to_string()],
            files_modified: vec!["src/main.rs".to_string()],
            confidence: 0.8,
            metadata: Some(serde_json::json!({"discovery_group": "memory:1"})),
        };
        let merged = memory.merged_metadata();
        assert_eq!(merged["discovery_group"], "memory:1");
        assert_eq!(merged["concepts"], serde_json::json!(["retry logic"]));
        assert_eq!(merged["files_modified"], serde_json::json!(["src/main.rs"]));
    }
}
