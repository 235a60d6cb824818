//! Token budget enforcement.
//!
//! Candidate context is modeled as weighted fragments. When the total
//! exceeds the budget, fragments are dropped from the lowest-weight end
//! first, oldest first within a weight. The lowest-priority survivor may
//! be tail-truncated instead of dropped when partial inclusion still
//! leaves room. Non-removable fragments are never touched; if they alone
//! exceed the budget the fit fails rather than silently truncating the
//! user's own message.

use crate::token::estimate_tokens;
use keepsake_core::BudgetError;

/// A unit of candidate context text with its trimming annotations.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub text: String,
    /// Higher weight = kept longer.
    pub weight: i64,
    /// Non-removable fragments survive every fit or fail it.
    pub removable: bool,
    /// Insertion order; lower = older. Drop ties break oldest-first.
    pub seq: u64,
}

impl Fragment {
    pub fn removable(seq: u64, weight: i64, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            weight,
            removable: true,
            seq,
        }
    }

    /// A fragment the fit may never drop (system text, the user message).
    pub fn pinned(seq: u64, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            weight: i64::MAX,
            removable: false,
            seq,
        }
    }

    pub fn tokens(&self) -> usize {
        estimate_tokens(&self.text)
    }
}

/// The outcome of a successful fit.
#[derive(Debug, Clone)]
pub struct FittedContext {
    /// Surviving fragments in original `seq` order.
    pub fragments: Vec<Fragment>,
    pub total_tokens: usize,
    /// Whether anything was dropped or tail-truncated.
    pub truncated: bool,
}

/// Fit fragments into `budget` tokens.
pub fn fit(fragments: Vec<Fragment>, budget: usize) -> Result<FittedContext, BudgetError> {
    let pinned_tokens: usize = fragments
        .iter()
        .filter(|f| !f.removable)
        .map(Fragment::tokens)
        .sum();
    if pinned_tokens > budget {
        return Err(BudgetError::Exceeded {
            required: pinned_tokens,
            budget,
        });
    }

    let mut kept = fragments;
    let mut total: usize = kept.iter().map(Fragment::tokens).sum();
    let mut truncated = false;

    while total > budget {
        let idx = kept
            .iter()
            .enumerate()
            .filter(|(_, f)| f.removable)
            .min_by_key(|(_, f)| (f.weight, f.seq))
            .map(|(i, _)| i);
        // pinned_tokens <= budget, so a removable fragment exists here
        let Some(idx) = idx else { break };

        let overflow = total - budget;
        let fragment_tokens = kept[idx].tokens();
        if fragment_tokens > overflow {
            // Partial inclusion leaves room: trim the tail instead of
            // dropping a fragment that mostly fits.
            let cut = truncate_to_tokens(&kept[idx].text, fragment_tokens - overflow);
            if !cut.is_empty() {
                kept[idx].text = cut;
                total = kept.iter().map(Fragment::tokens).sum();
                truncated = true;
                break;
            }
        }

        kept.remove(idx);
        total -= fragment_tokens;
        truncated = true;
    }

    kept.sort_by_key(|f| f.seq);
    Ok(FittedContext {
        fragments: kept,
        total_tokens: total,
        truncated,
    })
}

/// Cut text down to at most `max_tokens`, preferring a word boundary.
fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let max_bytes = max_tokens * 4;
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let clipped = &text[..end];
    match clipped.rfind(' ') {
        Some(idx) if idx > 0 => clipped[..idx].trim_end().to_string(),
        _ => clipped.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of_tokens(tokens: usize) -> String {
        // "word " is 5 bytes; build text that estimates to ~tokens
        "abc ".repeat(tokens).trim_end().to_string()
    }

    #[test]
    fn under_budget_passes_through() {
        let fragments = vec![
            Fragment::removable(0, 10, "first fragment"),
            Fragment::pinned(1, "user message"),
        ];
        let fitted = fit(fragments, 1000).unwrap();
        assert_eq!(fitted.fragments.len(), 2);
        assert!(!fitted.truncated);
    }

    #[test]
    fn lowest_weight_dropped_first() {
        let fragments = vec![
            Fragment::removable(0, 5, text_of_tokens(40)),
            Fragment::removable(1, 20, text_of_tokens(40)),
            Fragment::pinned(2, text_of_tokens(10)),
        ];
        let fitted = fit(fragments, 55).unwrap();
        assert!(fitted.truncated);
        assert!(fitted.total_tokens <= 55);
        // the weight-20 fragment survives intact
        assert!(fitted.fragments.iter().any(|f| f.weight == 20));
    }

    #[test]
    fn oldest_dropped_first_within_equal_weight() {
        let fragments = vec![
            Fragment::removable(0, 10, text_of_tokens(40)),
            Fragment::removable(1, 10, text_of_tokens(40)),
            Fragment::pinned(2, text_of_tokens(5)),
        ];
        let fitted = fit(fragments, 45).unwrap();
        assert!(fitted.total_tokens <= 45);
        // seq 0 went first; seq 1 survives intact
        assert!(fitted.fragments.iter().any(|f| f.seq == 1));
        assert!(!fitted.fragments.iter().any(|f| f.seq == 0));
    }

    #[test]
    fn pinned_overflow_fails_instead_of_truncating() {
        let fragments = vec![
            Fragment::pinned(0, text_of_tokens(600)),
            Fragment::removable(1, 10, text_of_tokens(100)),
        ];
        let err = fit(fragments, 500).unwrap_err();
        match err {
            BudgetError::Exceeded { required, budget } => {
                assert!(required > 500);
                assert_eq!(budget, 500);
            }
        }
    }

    #[test]
    fn never_exceeds_budget() {
        for budget in [10, 50, 100, 500] {
            let fragments = vec![
                Fragment::removable(0, 1, text_of_tokens(200)),
                Fragment::removable(1, 2, text_of_tokens(200)),
                Fragment::removable(2, 3, text_of_tokens(200)),
                Fragment::pinned(3, text_of_tokens(5)),
            ];
            let fitted = fit(fragments, budget).unwrap();
            assert!(
                fitted.total_tokens <= budget,
                "total {} over budget {}",
                fitted.total_tokens,
                budget
            );
        }
    }

    #[test]
    fn mostly_fitting_fragment_is_trimmed_not_dropped() {
        // One removable fragment a few tokens over: tail-truncate it.
        let fragments = vec![
            Fragment::pinned(0, text_of_tokens(10)),
            Fragment::removable(1, 10, text_of_tokens(100)),
        ];
        let fitted = fit(fragments, 100).unwrap();
        assert!(fitted.truncated);
        assert!(fitted.total_tokens <= 100);
        assert_eq!(fitted.fragments.len(), 2);
        let survivor = fitted.fragments.iter().find(|f| f.seq == 1).unwrap();
        assert!(survivor.tokens() < 100);
        assert!(!survivor.text.is_empty());
    }

    #[test]
    fn output_preserves_seq_order() {
        let fragments = vec![
            Fragment::removable(2, 10, "third"),
            Fragment::removable(0, 10, "first"),
            Fragment::pinned(1, "second"),
        ];
        let fitted = fit(fragments, 1000).unwrap();
        let seqs: Vec<_> = fitted.fragments.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, [0, 1, 2]);
    }

    #[test]
    fn exact_budget_is_not_truncated() {
        let fragments = vec![Fragment::removable(0, 10, "abcdefgh")]; // 2 tokens
        let fitted = fit(fragments, 2).unwrap();
        assert!(!fitted.truncated);
        assert_eq!(fitted.total_tokens, 2);
    }
}
