//! Token budgeting (§4.5 step 4): greedily fill Summary → Timeline →
//! Observations, stopping mid-section only once a prior section already
//! contributed something.

use codemem_db::MemoryItem;

/// A rough token count: about 4 characters per token, matching the
/// original's `estimate_tokens` heuristic (no tokenizer dependency for a
/// number used only as a soft budget signal).
pub fn estimate_tokens(text: &str) -> u64 {
    ((text.chars().count() as f64) / 4.0).ceil() as u64
}

pub fn item_tokens(item: &MemoryItem) -> u64 {
    estimate_tokens(&format!("{} {}", item.title, item.body_text))
}

#[derive(Debug, Clone)]
pub struct BudgetedSection {
    pub title: &'static str,
    pub items: Vec<MemoryItem>,
}

/// Fill `sections` (in declared order) under an optional `token_budget`,
/// returning the budgeted sections plus the total token count actually
/// used. Required section titles are always emitted, possibly empty.
pub fn fill_budget(
    sections: Vec<(&'static str, Vec<MemoryItem>)>,
    token_budget: Option<u64>,
) -> (Vec<BudgetedSection>, u64) {
    let mut total = 0u64;
    let mut any_prior_has_items = false;
    let mut out = Vec::with_capacity(sections.len());

    for (title, candidates) in sections {
        let mut kept = Vec::new();
        for item in candidates {
            if let Some(budget) = token_budget {
                let cost = item_tokens(&item);
                if total + cost > budget && any_prior_has_items {
                    break;
                }
                total += cost;
            } else {
                total += item_tokens(&item);
            }
            kept.push(item);
        }
        if !kept.is_empty() {
            any_prior_has_items = true;
        }
        out.push(BudgetedSection { title, items: kept });
    }

    (out, total)
}
