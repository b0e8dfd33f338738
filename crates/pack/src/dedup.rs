//! Exact deduplication (§4.5 step 3): items sharing a canonical
//! `(kind, normalized_title, normalized_body)` key collapse into one, with
//! the first occurrence kept and later ones tracked as duplicates.

use codemem_db::MemoryItem;

/// Collapse whitespace runs to a single space and lowercase, for
/// dedup-key comparison only (never written back to the stored title/body).
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase()
}

fn canonical_key(item: &MemoryItem) -> (String, String, String) {
    (item.kind.clone(), normalize(&item.title), normalize(&item.body_text))
}

/// One surviving item after exact dedup, with its duplicate ids attached.
#[derive(Debug, Clone)]
pub struct DedupedItem {
    pub item: MemoryItem,
    pub support_count: usize,
    pub duplicate_ids: Vec<i64>,
}

/// Dedupe `items` in place, preserving the input's relative order for
/// survivors. `session_summary` items are exempt and always pass through
/// unchanged (§4.5: "session_summary is exempt").
pub fn dedupe_exact(items: Vec<MemoryItem>) -> Vec<DedupedItem> {
    let mut order: Vec<(String, String, String)> = Vec::new();
    let mut groups: std::collections::HashMap<(String, String, String), (MemoryItem, Vec<i64>)> =
        std::collections::HashMap::new();
    let mut exempt: Vec<DedupedItem> = Vec::new();

    for item in items {
        if item.kind == "session_summary" {
            exempt.push(DedupedItem { item, support_count: 1, duplicate_ids: Vec::new() });
            continue;
        }
        let key = canonical_key(&item);
        match groups.get_mut(&key) {
            Some((_, dupes)) => dupes.push(item.id),
            None => {
                order.push(key.clone());
                groups.insert(key, (item, Vec::new()));
            }
        }
    }

    let mut result = exempt;
    for key in order {
        let (item, mut duplicate_ids) = groups.remove(&key).expect("key was just inserted");
        duplicate_ids.sort_unstable();
        result.push(DedupedItem { support_count: 1 + duplicate_ids.len(), item, duplicate_ids });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: i64, kind: &str, title: &str, body: &str) -> MemoryItem {
        MemoryItem {
            id,
            session_id: "s".into(),
            kind: kind.into(),
            title: title.into(),
            body_text: body.into(),
            confidence: 1.0,
            tags_text: String::new(),
            created_at: "2026-01-01T00:00:00+00:00".into(),
            updated_at: "2026-01-01T00:00:00+00:00".into(),
            active: true,
            metadata: json!({}),
            import_key: None,
            project: "proj".into(),
        }
    }

    #[test]
    fn collapses_whitespace_and_case_differences() {
        let items = vec![
            item(1, "note", "Hello   World", "Body text"),
            item(2, "note", "hello world", "  body   text "),
        ];
        let deduped = dedupe_exact(items);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].support_count, 2);
        assert_eq!(deduped[0].duplicate_ids, vec![2]);
        assert_eq!(deduped[0].item.id, 1);
    }

    #[test]
    fn session_summary_is_exempt_even_if_duplicated() {
        let items = vec![
            item(1, "session_summary", "Summary", "Body"),
            item(2, "session_summary", "Summary", "Body"),
        ];
        let deduped = dedupe_exact(items);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn distinct_kinds_never_collapse() {
        let items = vec![item(1, "decision", "Same", "Same"), item(2, "note", "Same", "Same")];
        let deduped = dedupe_exact(items);
        assert_eq!(deduped.len(), 2);
    }
}
