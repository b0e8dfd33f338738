//! §9 "Polymorphic item shapes": pack and retrieval code accept both a
//! persisted row and a synthesized (semantic/fuzzy) candidate through one
//! set of accessors, modeled as a capability trait rather than inheritance.

use serde_json::Value;

/// Uniform read access to a memory item, regardless of whether it came
/// straight from the database or was synthesized by a ranking stage.
pub trait MemoryLike {
    fn id(&self) -> i64;
    fn kind(&self) -> &str;
    fn title(&self) -> &str;
    fn body(&self) -> &str;
    fn tags_text(&self) -> &str;
    fn created_at(&self) -> &str;
    fn confidence(&self) -> f64;
    fn metadata(&self) -> &Value;
    fn project(&self) -> &str;
    fn session_id(&self) -> &str;
}
