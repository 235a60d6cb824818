//! Auto-reply decision engine.
//!
//! Answers high-frequency trivial messages from a prioritized rule set
//! without touching the inference runtime. Rules are validated once at
//! load time ([`RuleSet::load`]); evaluation walks them in ascending
//! priority order and consumes the per-(rule, channel) cooldown
//! atomically with the match decision.

mod engine;
mod ruleset;

pub use engine::{Decision, DecisionEngine};
pub use ruleset::RuleSet;
