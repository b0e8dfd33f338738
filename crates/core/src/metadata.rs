//! Tagged coercion over free-form metadata maps.
//!
//! §9 "Dynamic maps → tagged configuration": metadata blobs
//! (`discovery_tokens`, `discovery_source`, `discovery_group`,
//! `pack_item_ids`, ...) are parsed through explicit coercion that rejects
//! booleans, floats, negatives, and non-digit strings rather than silently
//! truncating them. Unknown keys are never errors — `Metadata` is a thin
//! wrapper over a JSON object with named accessors, not a schema.

use serde_json::Value;

/// A metadata map, as stored on memory items, replication op payloads, and
/// pack events. Wraps a JSON object; unknown keys pass through untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata(pub serde_json::Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Metadata(serde_json::Map::new())
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Metadata(map),
            _ => Metadata::new(),
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// `discovery_tokens`: a non-negative integer, or absent. Booleans,
    /// floats, and negative numbers are rejected (return `None`), matching
    /// `_coerce_non_negative_int` / the inline checks in `packs.py`.
    pub fn discovery_tokens(&self) -> Option<u64> {
        coerce_non_negative_int(self.0.get("discovery_tokens"))
    }

    /// `discovery_source`: `"usage"` or `"estimate"`; any other value (or
    /// absence) is treated as `"estimate"` by callers.
    pub fn discovery_source(&self) -> Option<&str> {
        self.0.get("discovery_source").and_then(Value::as_str)
    }

    /// `discovery_group`: a non-empty trimmed string, or `None` if absent /
    /// blank (callers fall back to `"memory:{id}"`).
    pub fn discovery_group(&self) -> Option<String> {
        self.0
            .get("discovery_group")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// `pack_item_ids`: a list that coerces entirely to non-negative,
    /// deduplicated integers, or `None` if the list is absent, malformed, or
    /// contains anything that doesn't coerce cleanly (booleans included).
    /// Mirrors `_coerce_pack_item_ids`.
    pub fn pack_item_ids(&self) -> Option<Vec<i64>> {
        let arr = self.0.get("pack_item_ids")?.as_array()?;
        let mut out = Vec::with_capacity(arr.len());
        let mut seen = std::collections::HashSet::new();
        for v in arr {
            let id = coerce_int_strict(v)?;
            if id <= 0 {
                continue;
            }
            if seen.insert(id) {
                out.push(id);
            }
        }
        Some(out)
    }

    /// `pack_tokens`: a non-negative integer, or `None`.
    pub fn pack_tokens(&self) -> Option<u64> {
        coerce_non_negative_int(self.0.get("pack_tokens"))
    }
}

/// Strict integer coercion: rejects booleans and non-integral floats,
/// matching the Python `isinstance(raw, bool)` guard ahead of `int(raw)`.
fn coerce_int_strict(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(_) => None,
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn coerce_non_negative_int(value: Option<&Value>) -> Option<u64> {
    let value = value?;
    let parsed = coerce_int_strict(value)?;
    if parsed < 0 {
        None
    } else {
        Some(parsed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_bool_float_negative_for_discovery_tokens() {
        let m = Metadata::from_value(json!({"discovery_tokens": true}));
        assert_eq!(m.discovery_tokens(), None);
        let m = Metadata::from_value(json!({"discovery_tokens": -5}));
        assert_eq!(m.discovery_tokens(), None);
        let m = Metadata::from_value(json!({"discovery_tokens": "abc"}));
        assert_eq!(m.discovery_tokens(), None);
        let m = Metadata::from_value(json!({"discovery_tokens": 42}));
        assert_eq!(m.discovery_tokens(), Some(42));
    }

    #[test]
    fn pack_item_ids_rejects_any_malformed_entry() {
        let m = Metadata::from_value(json!({"pack_item_ids": [1, 2, true]}));
        assert_eq!(m.pack_item_ids(), None);
        let m = Metadata::from_value(json!({"pack_item_ids": [3, 1, 3, -1]}));
        assert_eq!(m.pack_item_ids(), Some(vec![3, 1]));
    }

    #[test]
    fn discovery_group_trims_and_falls_back() {
        let m = Metadata::from_value(json!({"discovery_group": "  grp  "}));
        assert_eq!(m.discovery_group(), Some("grp".to_string()));
        let m = Metadata::from_value(json!({"discovery_group": "   "}));
        assert_eq!(m.discovery_group(), None);
        let m = Metadata::new();
        assert_eq!(m.discovery_group(), None);
    }

    #[test]
    fn unknown_keys_pass_through() {
        let m = Metadata::from_value(json!({"discovery_tokens": 5, "custom": "value"}));
        assert_eq!(m.get("custom").and_then(Value::as_str), Some("value"));
    }
}
