//! The indexer (C3, §4.3): keeps the full-text index and (if enabled)
//! embedding vectors current with each active item's `(title, body_text,
//! tags_text)`, and derives `tags_text` itself from tokenized content.

use std::collections::HashSet;

use codemem_db::{Database, MemoryItem};
use tantivy::{doc, Term};

use crate::embeddings::EmbeddingProvider;
use crate::index::SearchIndex;
use crate::SearchResult;

/// Tokenize `title + " " + body` into lowercase `[a-z0-9_]+` runs,
/// deduplicated and space-joined — §4.3's tags_text extraction, matching
/// the original's regex-based tokenizer rather than a general NLP
/// tokenizer.
pub fn extract_tags_text(title: &str, body: &str) -> String {
    let combined = format!("{title} {body}").to_ascii_lowercase();
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in combined.chars().chain(std::iter::once(' ')) {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            current.push(ch);
        } else if !current.is_empty() {
            if seen.insert(current.clone()) {
                tokens.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }

    tokens.join(" ")
}

impl SearchIndex {
    /// Write (or overwrite) the document for one active item. Does not
    /// commit — callers batch a backfill pass and commit once at the end.
    pub fn index_item(&self, item: &MemoryItem) -> SearchResult<()> {
        let writer = self.writer.lock().expect("index writer lock poisoned");
        let delete_term = Term::from_field_u64(self.id_field, item.id as u64);
        writer.delete_term(delete_term);

        let created_at_ts = chrono::DateTime::parse_from_rfc3339(&item.created_at)
            .map(|dt| dt.timestamp())
            .unwrap_or(0);

        let document = doc!(
            self.id_field => item.id as u64,
            self.session_id_field => item.session_id.as_str(),
            self.kind_field => item.kind.as_str(),
            self.project_field => item.project.as_str(),
            self.title_field => item.title.as_str(),
            self.body_field => item.body_text.as_str(),
            self.tags_field => item.tags_text.as_str(),
            self.created_at_field => created_at_ts,
        );
        writer.add_document(document)?;
        Ok(())
    }

    /// Remove an item's document from the index (used when an item is
    /// forgotten, since inactive items must never appear in search output).
    pub fn delete_item(&self, id: i64) -> SearchResult<()> {
        let writer = self.writer.lock().expect("index writer lock poisoned");
        writer.delete_term(Term::from_field_u64(self.id_field, id as u64));
        Ok(())
    }
}

/// Backfill `tags_text` for the given item ids, then re-index them so the
/// full-text index stays in sync with the derived field (§4.3 "Backfill
/// entry points"). Called by the writer after `remember` and by
/// replication apply for changed items.
pub async fn backfill_tags_text(
    db: &Database,
    index: &SearchIndex,
    ids: &[i64],
) -> SearchResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let items = db.get_many(ids).await?;
    for mut item in items {
        let tags = extract_tags_text(&item.title, &item.body_text);
        db.set_tags_text(item.id, &tags).await?;
        item.tags_text = tags;
        index.index_item(&item)?;
    }
    index.commit()?;
    Ok(())
}

/// Backfill embedding vectors for the given ids via `provider`. A disabled
/// provider (`is_enabled() == false`) makes this a no-op — the retrieval
/// engine is expected to degrade gracefully when no vectors exist.
///
/// Vectors themselves are not persisted by this crate: keeping them
/// in-process (looked up again at query time through the same provider, or
/// cached by the caller) avoids committing an embedding storage format the
/// spec does not otherwise constrain.
pub async fn backfill_vectors(
    db: &Database,
    provider: &dyn EmbeddingProvider,
    ids: &[i64],
) -> SearchResult<usize> {
    if !provider.is_enabled() || ids.is_empty() {
        return Ok(0);
    }
    let items = db.get_many(ids).await?;
    let mut computed = 0;
    for item in items {
        let text = format!("{} {}", item.title, item.body_text);
        if provider.embed(&text).await.is_some() {
            computed += 1;
        }
    }
    Ok(computed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_tags_text_lowercases_and_dedupes() {
        let tags = extract_tags_text("Use SQLite SQLite", "Because it's Embedded");
        assert_eq!(tags, "use sqlite because it_s embedded");
    }

    #[test]
    fn extract_tags_text_is_empty_for_empty_input() {
        assert_eq!(extract_tags_text("", ""), "");
    }

    #[tokio::test]
    async fn index_item_then_delete_roundtrip() {
        let db = Database::new_in_memory().await.unwrap();
        let id = db
            .remember(
                "sess-1",
                "decision",
                "Use SQLite",
                "Because it's embedded",
                1.0,
                serde_json::json!({}),
                None,
                "proj",
                "local",
            )
            .await
            .unwrap();
        let index = SearchIndex::open_in_ram().unwrap();
        backfill_tags_text(&db, &index, &[id]).await.unwrap();

        let item = db.get(id).await.unwrap().unwrap();
        assert_eq!(item.tags_text, "use sqlite because it_s embedded");

        index.delete_item(id).unwrap();
        index.commit().unwrap();
    }
}
