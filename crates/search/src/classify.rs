//! §4.4 `_query_looks_like_tasks` / `_query_looks_like_recall`: pure
//! predicates over the query string that switch the engine into a
//! task-biased or recall-biased ranking mode. Ported as keyword heuristics
//! per SPEC_FULL's reading of the original intent — no external model, just
//! substring matches on a fixed keyword set.

const TASK_KEYWORDS: &[&str] =
    &["todo", "to-do", "to do", "task", "pending", "next step", "action item", "backlog"];

const RECALL_KEYWORDS: &[&str] = &[
    "remember",
    "recall",
    "what did",
    "what was",
    "context",
    "earlier",
    "last time",
    "previously",
];

/// `true` iff the query reads as a request for outstanding work.
pub fn query_looks_like_tasks(query: &str) -> bool {
    let lowered = query.to_ascii_lowercase();
    TASK_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

/// `true` iff the query reads as a request to recall prior context.
pub fn query_looks_like_recall(query: &str) -> bool {
    let lowered = query.to_ascii_lowercase();
    RECALL_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_task_queries() {
        assert!(query_looks_like_tasks("what's on my TODO list"));
        assert!(query_looks_like_tasks("pending action items"));
        assert!(!query_looks_like_tasks("how does the ranking pipeline work"));
    }

    #[test]
    fn detects_recall_queries() {
        assert!(query_looks_like_recall("remember what we decided about auth"));
        assert!(query_looks_like_recall("What did I say earlier about caching?"));
        assert!(!query_looks_like_recall("fix the login bug"));
    }

    #[test]
    fn classifiers_are_case_insensitive_and_pure() {
        let q = "Remember the TODO from yesterday";
        assert!(query_looks_like_tasks(q));
        assert!(query_looks_like_recall(q));
        // calling twice gives the same answer — no hidden state
        assert_eq!(query_looks_like_tasks(q), query_looks_like_tasks(q));
    }
}
