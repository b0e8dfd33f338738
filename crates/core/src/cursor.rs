//! The replication cursor: `"{created_at}|{op_id}"`, lexicographically
//! ordered (§3 Data model, §8 invariant "new cursor contains `|` and is
//! strictly greater than prior").

use std::fmt;

/// An opaque, lexicographically-sortable position in the replication log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(String);

impl Cursor {
    /// Build a cursor from a `created_at` (RFC3339) and an `op_id` (ULID).
    pub fn compute(created_at: &str, op_id: &str) -> Self {
        Cursor(format!("{created_at}|{op_id}"))
    }

    /// Parse a cursor from its wire representation. Returns `None` if the
    /// value does not contain the required `|` separator.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || !raw.contains('|') {
            return None;
        }
        Some(Cursor(raw.to_string()))
    }

    /// The cursor's wire/storage representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` iff `candidate` is a well-formed cursor strictly greater than
    /// `self` (or `self` is absent). Mirrors `sync_pass._cursor_advances`.
    pub fn advances_from(current: Option<&Cursor>, candidate: Option<&str>) -> bool {
        let Some(candidate) = candidate else { return false };
        let Some(candidate) = Cursor::parse(candidate) else { return false };
        match current {
            None => true,
            Some(current) => candidate > *current,
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Cursor> for String {
    fn from(c: Cursor) -> Self {
        c.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_joins_with_pipe() {
        let c = Cursor::compute("2026-01-01T00:00:00Z", "01J000");
        assert_eq!(c.as_str(), "2026-01-01T00:00:00Z|01J000");
    }

    #[test]
    fn parse_rejects_missing_pipe() {
        assert!(Cursor::parse("no-pipe-here").is_none());
        assert!(Cursor::parse("").is_none());
    }

    #[test]
    fn advances_from_none_is_true_for_any_valid_cursor() {
        assert!(Cursor::advances_from(None, Some("a|b")));
        assert!(!Cursor::advances_from(None, Some("no-pipe")));
        assert!(!Cursor::advances_from(None, None));
    }

    #[test]
    fn advances_from_requires_strict_increase() {
        let current = Cursor::compute("2026-01-01T00:00:00Z", "a");
        assert!(Cursor::advances_from(
            Some(&current),
            Some("2026-01-02T00:00:00Z|a")
        ));
        assert!(!Cursor::advances_from(
            Some(&current),
            Some("2026-01-01T00:00:00Z|a")
        ));
        assert!(!Cursor::advances_from(
            Some(&current),
            Some("2025-01-01T00:00:00Z|z")
        ));
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = Cursor::compute("2026-01-01T00:00:00Z", "01J000");
        let b = Cursor::compute("2026-01-01T00:00:01Z", "01J000");
        assert!(a < b);
    }
}
