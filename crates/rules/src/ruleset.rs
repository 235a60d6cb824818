//! Rule compilation and load-time validation.

use keepsake_core::{AutoReplyRule, RuleError};
use regex::Regex;

/// A rule with its trigger compiled. Compilation happens once at load;
/// evaluation never touches the pattern source again.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: AutoReplyRule,
    pub regex: Regex,
}

/// A validated, priority-ordered set of auto-reply rules.
///
/// Construction fails on the first invalid pattern or conflicting pair;
/// a set that loads is guaranteed to evaluate deterministically.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Compile and validate a set of rules.
    ///
    /// Rules are ordered by ascending priority (rule id breaks ties).
    /// Two *enabled* rules that share a priority and have overlapping
    /// triggers are a configuration error, not a runtime coin flip.
    pub fn load(rules: Vec<AutoReplyRule>) -> Result<Self, RuleError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            if rule.id.trim().is_empty() {
                return Err(RuleError::InvalidRule {
                    rule: rule.id,
                    reason: "rule id must not be empty".into(),
                });
            }
            if rule.response_template.trim().is_empty() {
                return Err(RuleError::InvalidRule {
                    rule: rule.id,
                    reason: "response template must not be empty".into(),
                });
            }
            let regex = Regex::new(&rule.trigger_pattern).map_err(|e| RuleError::InvalidPattern {
                rule: rule.id.clone(),
                reason: e.to_string(),
            })?;
            compiled.push(CompiledRule { rule, regex });
        }

        compiled.sort_by(|a, b| {
            (a.rule.priority, a.rule.id.as_str()).cmp(&(b.rule.priority, b.rule.id.as_str()))
        });

        // Sorted by priority, so conflicting pairs are within one run.
        for (i, a) in compiled.iter().enumerate() {
            for b in &compiled[i + 1..] {
                if b.rule.priority != a.rule.priority {
                    break;
                }
                if a.rule.enabled && b.rule.enabled && triggers_overlap(a, b) {
                    return Err(RuleError::Conflict {
                        first: a.rule.id.clone(),
                        second: b.rule.id.clone(),
                        priority: a.rule.priority,
                    });
                }
            }
        }

        Ok(Self { rules: compiled })
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of enabled rules.
    pub fn active_count(&self) -> usize {
        self.rules.iter().filter(|c| c.rule.enabled).count()
    }
}

/// Overlap check: identical patterns, or either regex matching the
/// other's literal core. An approximation, deliberately biased toward
/// rejecting ambiguous configurations at load time.
fn triggers_overlap(a: &CompiledRule, b: &CompiledRule) -> bool {
    let pa = a.rule.trigger_pattern.trim().to_lowercase();
    let pb = b.rule.trigger_pattern.trim().to_lowercase();
    if pa == pb {
        return true;
    }
    let la = literal_core(&a.rule.trigger_pattern);
    let lb = literal_core(&b.rule.trigger_pattern);
    (!lb.is_empty() && a.regex.is_match(&lb)) || (!la.is_empty() && b.regex.is_match(&la))
}

/// Strip a pattern down to the literal text it would match: inline flag
/// groups, anchors, metacharacters, and class escapes are removed.
fn literal_core(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' if chars.peek() == Some(&'?') => {
                // inline flag or non-capturing group prefix: skip to ')'
                for inner in chars.by_ref() {
                    if inner == ')' {
                        break;
                    }
                }
            }
            '\\' => {
                if let Some(next) = chars.next() {
                    // \b, \d, \w etc. are classes, not literals
                    if !next.is_ascii_alphanumeric() {
                        out.push(next);
                    }
                }
            }
            '^' | '$' | '.' | '*' | '+' | '?' | ')' | '[' | ']' | '{' | '}' | '|' => {}
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, pattern: &str, priority: i64) -> AutoReplyRule {
        AutoReplyRule::new(id, pattern, "reply").with_priority(priority)
    }

    #[test]
    fn loads_and_orders_by_priority() {
        let set = RuleSet::load(vec![
            rule("later", "bye", 10),
            rule("first", "hello", 0),
        ])
        .unwrap();
        let ids: Vec<_> = set.rules().iter().map(|c| c.rule.id.as_str()).collect();
        assert_eq!(ids, ["first", "later"]);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = RuleSet::load(vec![rule("bad", "(unclosed", 0)]).unwrap_err();
        assert!(matches!(err, RuleError::InvalidPattern { ref rule, .. } if rule == "bad"));
    }

    #[test]
    fn empty_template_is_rejected() {
        let bad = AutoReplyRule::new("empty", "hello", "  ");
        let err = RuleSet::load(vec![bad]).unwrap_err();
        assert!(matches!(err, RuleError::InvalidRule { ref rule, .. } if rule == "empty"));
    }

    #[test]
    fn identical_patterns_at_same_priority_conflict() {
        let err = RuleSet::load(vec![rule("a", "hello", 0), rule("b", "hello", 0)]).unwrap_err();
        assert!(matches!(
            err,
            RuleError::Conflict { priority: 0, .. }
        ));
    }

    #[test]
    fn anchored_variant_of_same_literal_conflicts() {
        // "(?i)^hello\b" and "hello" both match the message "hello".
        let err = RuleSet::load(vec![
            rule("greet", r"(?i)^hello\b", 0),
            rule("greet2", "hello", 0),
        ])
        .unwrap_err();
        assert!(matches!(err, RuleError::Conflict { .. }));
    }

    #[test]
    fn same_literal_at_distinct_priorities_is_fine() {
        let set = RuleSet::load(vec![rule("a", "hello", 0), rule("b", "hello", 5)]).unwrap();
        assert_eq!(set.rules().len(), 2);
    }

    #[test]
    fn disjoint_literals_at_same_priority_are_fine() {
        let set = RuleSet::load(vec![rule("a", "hello", 0), rule("b", "goodbye", 0)]).unwrap();
        assert_eq!(set.active_count(), 2);
    }

    #[test]
    fn disabled_rules_do_not_conflict() {
        let mut disabled = rule("a", "hello", 0);
        disabled.enabled = false;
        let set = RuleSet::load(vec![disabled, rule("b", "hello", 0)]).unwrap();
        assert_eq!(set.active_count(), 1);
    }

    #[test]
    fn literal_core_strips_metacharacters() {
        assert_eq!(literal_core(r"(?i)^hello\b"), "hello");
        assert_eq!(literal_core(r"good\ morning"), "good morning");
        assert_eq!(literal_core("plain"), "plain");
    }
}
