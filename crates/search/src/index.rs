//! The Tantivy-backed full-text index over memory items (§4.3).
//!
//! Schema mirrors `claude-view-search::build_schema`'s approach (untokenized
//! `STRING` fields for exact-match qualifiers, `TEXT` for BM25-scored
//! content) scaled down to what §3's memory item actually carries: no
//! per-message role/turn/skill facets, just `{id, session_id, kind, project,
//! title, body, tags, created_at}`.

use std::path::Path;
use std::sync::Mutex;

use tantivy::schema::{Field, Schema, FAST, INDEXED, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};

use crate::SearchResult;

/// Bump when the schema shape changes; a mismatch on disk triggers a
/// from-scratch rebuild, matching the teacher's `schema_version` file.
pub const SEARCH_SCHEMA_VERSION: u32 = 1;

pub fn build_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_u64_field("id", FAST | STORED | INDEXED);
    builder.add_text_field("session_id", STRING | STORED);
    builder.add_text_field("kind", STRING | STORED);
    builder.add_text_field("project", STRING | STORED);
    builder.add_text_field("title", TEXT | STORED);
    builder.add_text_field("body", TEXT | STORED);
    builder.add_text_field("tags", TEXT | STORED);
    builder.add_i64_field("created_at_ts", FAST | STORED | INDEXED);
    builder.build()
}

/// The full-text index, with pre-resolved field handles (teacher idiom: a
/// `Mutex<IndexWriter>` since `IndexWriter` needs `&mut self`, a reader that
/// reloads itself on commit).
pub struct SearchIndex {
    pub index: Index,
    pub reader: IndexReader,
    pub writer: Mutex<IndexWriter>,
    pub schema: Schema,

    pub(crate) id_field: Field,
    pub(crate) session_id_field: Field,
    pub(crate) kind_field: Field,
    pub(crate) project_field: Field,
    pub(crate) title_field: Field,
    pub(crate) body_field: Field,
    pub(crate) tags_field: Field,
    pub(crate) created_at_field: Field,
}

impl SearchIndex {
    /// Open or create the on-disk index at `path`, rebuilding from scratch
    /// if the schema version on disk does not match.
    pub fn open(path: &Path) -> SearchResult<Self> {
        std::fs::create_dir_all(path)?;

        let version_path = path.join("schema_version");
        let needs_rebuild = match std::fs::read_to_string(&version_path) {
            Ok(v) => v.trim().parse::<u32>().unwrap_or(0) != SEARCH_SCHEMA_VERSION,
            Err(_) => false,
        };

        if needs_rebuild {
            tracing::info!(path = %path.display(), "search schema version mismatch, rebuilding index");
            if let Ok(entries) = std::fs::read_dir(path) {
                for entry in entries.flatten() {
                    let p = entry.path();
                    if p.file_name().map(|n| n != "schema_version").unwrap_or(false) {
                        if p.is_dir() {
                            let _ = std::fs::remove_dir_all(&p);
                        } else {
                            let _ = std::fs::remove_file(&p);
                        }
                    }
                }
            }
        }

        let schema = build_schema();
        let index = match Index::open_in_dir(path) {
            Ok(idx) => idx,
            Err(_) => Index::create_in_dir(path, schema.clone())?,
        };
        let _ = std::fs::write(&version_path, format!("{SEARCH_SCHEMA_VERSION}"));

        Self::from_index(index, schema)
    }

    /// An in-RAM index, used for tests and for nodes that disable durable
    /// search persistence.
    pub fn open_in_ram() -> SearchResult<Self> {
        let schema = build_schema();
        let index = Index::create_in_ram(schema.clone());
        Self::from_index(index, schema)
    }

    fn from_index(index: Index, schema: Schema) -> SearchResult<Self> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let writer = index.writer(30_000_000)?;

        Ok(Self {
            id_field: schema.get_field("id").expect("schema has id"),
            session_id_field: schema.get_field("session_id").expect("schema has session_id"),
            kind_field: schema.get_field("kind").expect("schema has kind"),
            project_field: schema.get_field("project").expect("schema has project"),
            title_field: schema.get_field("title").expect("schema has title"),
            body_field: schema.get_field("body").expect("schema has body"),
            tags_field: schema.get_field("tags").expect("schema has tags"),
            created_at_field: schema.get_field("created_at_ts").expect("schema has created_at_ts"),
            index,
            reader,
            writer: Mutex::new(writer),
            schema,
        })
    }

    pub fn commit(&self) -> SearchResult<()> {
        let mut writer = self.writer.lock().expect("index writer lock poisoned");
        writer.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_has_expected_fields() {
        let schema = build_schema();
        for name in ["id", "session_id", "kind", "project", "title", "body", "tags", "created_at_ts"] {
            assert!(schema.get_field(name).is_ok(), "missing field {name}");
        }
    }

    #[test]
    fn open_in_ram_succeeds() {
        let idx = SearchIndex::open_in_ram().expect("in-ram index");
        assert_eq!(idx.schema.fields().count(), 8);
    }

    #[test]
    fn rebuilds_on_schema_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("schema_version"), "999").unwrap();
        let idx = SearchIndex::open(dir.path()).unwrap();
        assert_eq!(idx.schema.fields().count(), 8);
        let on_disk = std::fs::read_to_string(dir.path().join("schema_version")).unwrap();
        assert_eq!(on_disk.trim(), SEARCH_SCHEMA_VERSION.to_string());
    }
}
