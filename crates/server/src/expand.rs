//! `expand` (§6 tool surface, §8 scenario 1): resolve a caller-supplied list
//! of ids into memory items, preserving input order after deduplication and
//! reporting non-fatal failures bucketed by §7's error codes.

use codemem_core::{ToolError, ToolErrorCode};
use codemem_db::{Database, MemoryItem};
use serde_json::Value;

/// The outcome of one `expand` call. `anchors` preserves the caller's input
/// order (first occurrence wins on duplicates); `missing_ids` combines
/// not-found and project-mismatch ids, also in caller order; `errors`
/// buckets every reported code, omitting codes with nothing to report.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandOutcome {
    pub anchors: Vec<MemoryItem>,
    pub missing_ids: Vec<String>,
    pub errors: Vec<ToolError>,
}

/// Stringify a rejected raw id the way the original does: Python's
/// `str(True)`/`str(False)` capitalizes booleans, so a JSON `true` is
/// reported as `"True"` rather than `"true"`.
fn stringify_invalid(value: &Value) -> String {
    match value {
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A valid id is a positive integer, accepted either as a JSON number or as
/// an all-digit string (§9: coercion rejects booleans, floats, negatives,
/// and non-digit strings).
fn coerce_positive_id(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .filter(|i| *i > 0)
            .ok_or_else(|| stringify_invalid(value)),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse::<i64>().ok().filter(|i| *i > 0).ok_or_else(|| stringify_invalid(value))
        }
        other => Err(stringify_invalid(other)),
    }
}

/// Resolve `raw_ids` against the store, scoped to `project` when given.
pub async fn expand(
    db: &Database,
    raw_ids: &[Value],
    project: Option<&str>,
) -> Result<ExpandOutcome, codemem_db::DbError> {
    let mut invalid: Vec<String> = Vec::new();
    let mut ordered_ids: Vec<i64> = Vec::new();
    for raw in raw_ids {
        match coerce_positive_id(raw) {
            Ok(id) => {
                if !ordered_ids.contains(&id) {
                    ordered_ids.push(id);
                }
            }
            Err(rejected) => invalid.push(rejected),
        }
    }

    let items = db.get_many(&ordered_ids).await?;

    let mut anchors = Vec::new();
    let mut missing_ids = Vec::new();
    let mut not_found: Vec<String> = Vec::new();
    let mut project_mismatch: Vec<String> = Vec::new();

    for id in &ordered_ids {
        match items.iter().find(|item| item.id == *id) {
            None => {
                not_found.push(id.to_string());
                missing_ids.push(id.to_string());
            }
            Some(item) => {
                if let Some(project) = project {
                    if !codemem_core::filters::project_matches(&item.project, project) {
                        project_mismatch.push(id.to_string());
                        missing_ids.push(id.to_string());
                        continue;
                    }
                }
                anchors.push(item.clone());
            }
        }
    }

    let mut errors = Vec::new();
    if !invalid.is_empty() {
        errors.push(ToolError::new(ToolErrorCode::InvalidArgument, invalid));
    }
    if !not_found.is_empty() {
        errors.push(ToolError::new(ToolErrorCode::NotFound, not_found));
    }
    if !project_mismatch.is_empty() {
        errors.push(ToolError::new(ToolErrorCode::ProjectMismatch, project_mismatch));
    }

    Ok(ExpandOutcome { anchors, missing_ids, errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn matches_the_documented_scenario() {
        let db = Database::new_in_memory().await.unwrap();
        let a2 = db.remember("s", "note", "A2", "b", 1.0, json!({}), None, "project-a", "local").await.unwrap();
        let a1 = db.remember("s", "note", "A1", "b", 1.0, json!({}), None, "project-a", "local").await.unwrap();
        let b1 = db.remember("s", "note", "B1", "b", 1.0, json!({}), None, "project-b", "local").await.unwrap();
        let missing_id = 999_999_i64;

        let raw_ids = vec![
            json!(a2),
            json!(a1),
            json!(a2),
            json!(b1),
            json!(missing_id),
            json!("bad"),
            json!(true),
        ];

        let outcome = expand(&db, &raw_ids, Some("project-a")).await.unwrap();

        assert_eq!(outcome.anchors.iter().map(|i| i.id).collect::<Vec<_>>(), vec![a2, a1]);
        assert_eq!(outcome.missing_ids, vec![b1.to_string(), missing_id.to_string()]);

        let invalid = outcome
            .errors
            .iter()
            .find(|e| e.code == ToolErrorCode::InvalidArgument)
            .expect("invalid argument bucket");
        assert_eq!(invalid.ids, vec!["bad".to_string(), "True".to_string()]);

        let not_found = outcome
            .errors
            .iter()
            .find(|e| e.code == ToolErrorCode::NotFound)
            .expect("not found bucket");
        assert_eq!(not_found.ids, vec![missing_id.to_string()]);

        let project_mismatch = outcome
            .errors
            .iter()
            .find(|e| e.code == ToolErrorCode::ProjectMismatch)
            .expect("project mismatch bucket");
        assert_eq!(project_mismatch.ids, vec![b1.to_string()]);
    }

    #[tokio::test]
    async fn no_project_scope_means_no_mismatches() {
        let db = Database::new_in_memory().await.unwrap();
        let id = db.remember("s", "note", "t", "b", 1.0, json!({}), None, "any-project", "local").await.unwrap();
        let outcome = expand(&db, &[json!(id)], None).await.unwrap();
        assert_eq!(outcome.anchors.len(), 1);
        assert!(outcome.missing_ids.is_empty());
        assert!(outcome.errors.is_empty());
    }
}
