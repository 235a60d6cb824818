//! Rule evaluation with atomic cooldown consumption.

use crate::ruleset::RuleSet;
use chrono::{DateTime, Utc};
use keepsake_core::Message;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

/// The outcome of evaluating the rule set against a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// A rule fired; `reply` is the rendered response text.
    Match { rule_id: String, reply: String },
    /// No enabled rule matched with its cooldown elapsed.
    NoMatch,
}

impl Decision {
    pub fn matched(&self) -> Option<(&str, &str)> {
        match self {
            Decision::Match { rule_id, reply } => Some((rule_id, reply)),
            Decision::NoMatch => None,
        }
    }
}

/// The auto-reply decision engine.
///
/// Thread-safe. Cooldown state is keyed by (rule id, channel id) and
/// lives only in memory; a restart clears it, which at worst means one
/// extra auto-reply per rule per channel.
pub struct DecisionEngine {
    rules: RuleSet,
    last_fired: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl DecisionEngine {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate the rule set against an inbound message.
    ///
    /// Walks rules in ascending priority order; the first enabled rule
    /// whose trigger matches *and* whose cooldown has elapsed wins. A
    /// matching rule still cooling down does not block lower-priority
    /// rules from firing.
    pub fn evaluate(&self, message: &Message) -> Decision {
        self.evaluate_at(message, Utc::now())
    }

    /// Clock-injected variant of [`evaluate`](Self::evaluate).
    pub fn evaluate_at(&self, message: &Message, now: DateTime<Utc>) -> Decision {
        // One guard across the whole walk: the cooldown check and its
        // consumption must not interleave with another evaluation.
        let mut fired = self.last_fired.lock().unwrap();

        for compiled in self.rules.rules() {
            if !compiled.rule.enabled {
                continue;
            }
            if !compiled.regex.is_match(&message.content) {
                continue;
            }

            let key = (compiled.rule.id.clone(), message.channel_id.0.clone());
            if let Some(last) = fired.get(&key) {
                let elapsed = (now - *last).num_seconds();
                if elapsed < compiled.rule.cooldown_seconds as i64 {
                    debug!(
                        rule = %compiled.rule.id,
                        channel = %message.channel_id,
                        elapsed,
                        cooldown = compiled.rule.cooldown_seconds,
                        "Rule matched but is cooling down"
                    );
                    continue;
                }
            }

            fired.insert(key, now);
            let reply = render_template(&compiled.rule.response_template, message);
            info!(
                rule = %compiled.rule.id,
                channel = %message.channel_id,
                "Auto-reply rule fired"
            );
            return Decision::Match {
                rule_id: compiled.rule.id.clone(),
                reply,
            };
        }

        Decision::NoMatch
    }
}

/// Fill `{author}` and `{channel}` placeholders from the message.
fn render_template(template: &str, message: &Message) -> String {
    template
        .replace("{author}", &message.author_id)
        .replace("{channel}", &message.channel_id.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_core::{AutoReplyRule, InboundEvent};

    fn engine(rules: Vec<AutoReplyRule>) -> DecisionEngine {
        DecisionEngine::new(RuleSet::load(rules).unwrap())
    }

    fn msg(channel: &str, content: &str) -> Message {
        Message::from_event(&InboundEvent::new(channel, "alice", content))
    }

    #[test]
    fn lowest_priority_number_wins() {
        let engine = engine(vec![
            AutoReplyRule::new("generic", "hello", "generic reply").with_priority(10),
            AutoReplyRule::new("specific", r"(?i)^hello\b", "specific reply").with_priority(0),
        ]);
        let decision = engine.evaluate(&msg("general", "hello there"));
        assert_eq!(decision.matched().unwrap().0, "specific");
    }

    #[test]
    fn no_rule_matches() {
        let engine = engine(vec![AutoReplyRule::new("greet", r"(?i)^hello\b", "hi")]);
        assert_eq!(engine.evaluate(&msg("general", "what time is it?")), Decision::NoMatch);
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let mut rule = AutoReplyRule::new("greet", "hello", "hi");
        rule.enabled = false;
        let engine = engine(vec![rule]);
        assert_eq!(engine.evaluate(&msg("general", "hello")), Decision::NoMatch);
    }

    #[test]
    fn template_placeholders_are_rendered() {
        let engine = engine(vec![AutoReplyRule::new(
            "greet",
            "hello",
            "Hi {author}, welcome to {channel}!",
        )]);
        let decision = engine.evaluate(&msg("general", "hello"));
        assert_eq!(decision.matched().unwrap().1, "Hi alice, welcome to general!");
    }

    #[test]
    fn cooldown_blocks_until_elapsed() {
        let engine = engine(vec![
            AutoReplyRule::new("greet", "hello", "hi").with_cooldown(60)
        ]);
        let t0 = Utc::now();
        let message = msg("general", "hello");

        assert!(engine.evaluate_at(&message, t0).matched().is_some());
        // 30s later: still cooling down
        let t30 = t0 + chrono::Duration::seconds(30);
        assert_eq!(engine.evaluate_at(&message, t30), Decision::NoMatch);
        // 60s later: fires again
        let t60 = t0 + chrono::Duration::seconds(60);
        assert!(engine.evaluate_at(&message, t60).matched().is_some());
    }

    #[test]
    fn cooldown_is_per_channel() {
        let engine = engine(vec![
            AutoReplyRule::new("greet", "hello", "hi").with_cooldown(60)
        ]);
        let t0 = Utc::now();
        assert!(engine.evaluate_at(&msg("general", "hello"), t0).matched().is_some());
        // same rule, different channel, inside the cooldown window
        assert!(engine.evaluate_at(&msg("random", "hello"), t0).matched().is_some());
        // same channel again is blocked
        assert_eq!(engine.evaluate_at(&msg("general", "hello"), t0), Decision::NoMatch);
    }

    #[test]
    fn cooling_rule_yields_to_lower_priority_match() {
        let engine = engine(vec![
            AutoReplyRule::new("eager", "hello", "eager reply")
                .with_priority(0)
                .with_cooldown(3600),
            AutoReplyRule::new("backup", "hel+o", "backup reply").with_priority(10),
        ]);
        let t0 = Utc::now();
        let message = msg("general", "hello");

        assert_eq!(engine.evaluate_at(&message, t0).matched().unwrap().0, "eager");
        // eager is cooling down; backup takes over instead of silence
        assert_eq!(engine.evaluate_at(&message, t0).matched().unwrap().0, "backup");
    }

    #[test]
    fn zero_cooldown_always_fires() {
        let engine = engine(vec![AutoReplyRule::new("echo", "ping", "pong")]);
        let t0 = Utc::now();
        let message = msg("general", "ping");
        assert!(engine.evaluate_at(&message, t0).matched().is_some());
        assert!(engine.evaluate_at(&message, t0).matched().is_some());
    }
}
