//! The retrieval filter grammar (§4.4): `{kind, session_id, since, project}`.

use chrono::{DateTime, Utc};

/// Filters applied across search, timeline, recent, and pack queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryFilters {
    pub kind: Option<String>,
    pub session_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub project: Option<String>,
}

impl MemoryFilters {
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }
}

/// Normalize a path-like project string to forward slashes, as the matching
/// rule in §4.4 requires before basename/suffix comparison.
pub fn normalize_project_path(raw: &str) -> String {
    raw.replace('\\', "/")
}

/// The basename of a normalized project path (the final `/`-separated
/// component, or the whole string if there is none).
pub fn project_basename(raw: &str) -> String {
    let normalized = normalize_project_path(raw);
    normalized
        .rsplit('/')
        .next()
        .unwrap_or(&normalized)
        .to_string()
}

/// §4.4 project matching: basename equality OR suffix `/basename`, after
/// backslash normalization on both sides.
pub fn project_matches(stored_project: &str, requested: &str) -> bool {
    let stored = normalize_project_path(stored_project);
    let requested = normalize_project_path(requested);
    if stored == requested {
        return true;
    }
    let requested_basename = project_basename(&requested);
    stored == requested_basename || stored.ends_with(&format!("/{requested_basename}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_exact_and_basename() {
        assert!(project_matches("/home/user/project-a", "/home/user/project-a"));
        assert!(project_matches("/home/user/project-a", "project-a"));
        assert!(project_matches("project-a", "/other/path/project-a"));
        assert!(!project_matches("project-a", "project-b"));
    }

    #[test]
    fn normalizes_backslashes_before_matching() {
        assert!(project_matches(r"C:\repos\project-a", "project-a"));
        assert!(project_matches(r"C:\repos\project-a", r"other\project-a"));
    }
}
