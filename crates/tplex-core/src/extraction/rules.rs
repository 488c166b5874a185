//! Ordered find/replace rules for OCR-glitch correction and normalization.

use std::borrow::Cow;
use std::time::Instant;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::budget::{elapsed_ms, Degradation, MatchBudget, Stage};
use crate::template::pattern::Replacement;

lazy_static! {
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s{2,}").unwrap();
}

/// One compiled find/replace rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Regex,
    replacement: Replacement,
}

impl Rule {
    pub fn new(pattern: Regex, replacement: Replacement) -> Self {
        Self {
            pattern,
            replacement,
        }
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// Replace every non-overlapping match in `text`.
    pub fn apply<'t>(&self, text: &'t str) -> Cow<'t, str> {
        self.pattern.replace_all(text, &self.replacement)
    }
}

/// Apply `rules` strictly in order; each rule sees the complete output of
/// the previous one.
pub fn apply(text: &str, rules: &[Rule]) -> String {
    rules.iter().fold(text.to_string(), |current, rule| {
        let replaced = match rule.apply(&current) {
            Cow::Owned(s) => Some(s),
            Cow::Borrowed(_) => None,
        };
        replaced.unwrap_or(current)
    })
}

/// Text produced by a [`RuleSet`], with any budget failures met on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub text: String,
    pub degradations: Vec<Degradation>,
}

/// The full normalization of one template: optional whitespace removal and
/// lower-casing, then the replace rules in declared order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    remove_whitespace: bool,
    lowercase: bool,
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            remove_whitespace: false,
            lowercase: false,
            rules,
        }
    }

    /// Remove every run of two or more whitespace characters first.
    pub fn with_remove_whitespace(mut self, enabled: bool) -> Self {
        self.remove_whitespace = enabled;
        self
    }

    /// Lower-case the text before the rules run.
    pub fn with_lowercase(mut self, enabled: bool) -> Self {
        self.lowercase = enabled;
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Normalize `text` without time limits.
    pub fn apply(&self, text: &str) -> String {
        self.apply_within(text, &MatchBudget::unlimited()).text
    }

    /// Normalize `text`, treating rules that run over budget as
    /// non-matching and stopping once the document deadline has passed.
    pub fn apply_within(&self, text: &str, budget: &MatchBudget) -> Normalized {
        let mut degradations = Vec::new();

        let mut current = if self.remove_whitespace {
            WHITESPACE_RUN.replace_all(text, "").into_owned()
        } else {
            text.to_string()
        };
        if self.lowercase {
            current = current.to_lowercase();
        }

        for (index, rule) in self.rules.iter().enumerate() {
            if budget.is_expired() {
                warn!(
                    "Document deadline reached, skipping {} remaining rule(s)",
                    self.rules.len() - index
                );
                degradations.push(Degradation::DeadlineReached {
                    stage: Stage::Normalize,
                });
                break;
            }

            let started = Instant::now();
            let replaced = match rule.apply(&current) {
                Cow::Owned(s) => Some(s),
                Cow::Borrowed(_) => None,
            };

            if budget.overran(started) {
                let elapsed_ms = elapsed_ms(started);
                warn!("Rule #{} exceeded its match budget ({}ms), ignored", index, elapsed_ms);
                degradations.push(Degradation::RuleBudgetExceeded {
                    rule: index,
                    elapsed_ms,
                });
                continue;
            }

            if let Some(next) = replaced {
                debug!("Rule #{} /{}/ rewrote the text", index, rule.pattern.as_str());
                current = next;
            }
        }

        Normalized {
            text: current,
            degradations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::definition::compile_rule;
    use crate::template::pattern::CompileLimits;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn rule(pattern: &str, replacement: &str) -> Rule {
        compile_rule(0, pattern, replacement, &CompileLimits::default()).unwrap()
    }

    #[test]
    fn test_rules_replace_every_occurrence() {
        let rules = [rule(r"(\d)b", "${1}6")];
        assert_eq!(apply("1b 2b 3b", &rules), "16 26 36");
    }

    #[test]
    fn test_non_matching_rule_is_a_no_op() {
        let rules = [rule("xyz", "abc")];
        assert_eq!(apply("Gesamt 150,00", &rules), "Gesamt 150,00");
    }

    #[test]
    fn test_rule_order_is_honored() {
        let decimal = rule(r"(\d+)\.(\d)", r"\1,\2");
        let glitch = rule(r",(\d)L", r",\g<1>6");
        let text = "Betrag 12.5L";

        // Decimal normalization must run first for the glitch rule to see "12,5L".
        let forward = apply(text, &[decimal.clone(), glitch.clone()]);
        let reversed = apply(text, &[glitch, decimal]);

        assert_eq!(forward, "Betrag 12,56");
        assert_eq!(reversed, "Betrag 12,5L");

        let dates = rule(r"(\d{1,2})/(\d{2})/(\d{4})", r"\1.\2.\3");
        let fix_seven = rule(r"\?(\d)\.", r"7\1.");
        let text = "Datum ?1/03/2024";
        assert_eq!(apply(text, &[dates.clone(), fix_seven.clone()]), "Datum 71.03.2024");
        assert_eq!(apply(text, &[fix_seven, dates]), "Datum ?1.03.2024");
    }

    #[test]
    fn test_multiline_non_greedy_and_bounded_repetition() {
        let rules = [rule(r"Lieferant\n((?:.*\n){0,5}?)(\d{4})\n", "Lieferant $2\n$1")];
        let text = "Lieferant\nzeile a\nzeile b\n4844\nEnde";
        assert_eq!(apply(text, &rules), "Lieferant 4844\nzeile a\nzeile b\nEnde");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let set = RuleSet::new(vec![
            rule(r"(\d)\.(\d{3}),", r"\1\2,"),
            rule(r"(\d)\s*EUR", r"\1 EUR"),
        ]);
        let once = set.apply("Gesamt 1.150,00EUR");
        assert_eq!(once, "Gesamt 1150,00 EUR");
        assert_eq!(set.apply(&once), once);
    }

    #[test]
    fn test_whitespace_and_lowercase_run_before_rules() {
        let set = RuleSet::new(vec![rule("gesamtbetrag", "TOTAL")])
            .with_remove_whitespace(true)
            .with_lowercase(true);
        assert_eq!(set.apply("Gesamt  Betrag 5 EUR"), "TOTAL 5 eur");
    }

    #[test]
    fn test_overrun_rule_is_treated_as_non_matching() {
        let set = RuleSet::new(vec![rule("a", "b")]);
        let budget = MatchBudget::new(Some(Duration::ZERO), None);

        let normalized = set.apply_within("aaa", &budget);
        assert_eq!(normalized.text, "aaa");
        assert!(matches!(
            normalized.degradations.as_slice(),
            [Degradation::RuleBudgetExceeded { rule: 0, .. }]
        ));
    }

    #[test]
    fn test_deadline_skips_remaining_rules() {
        let set = RuleSet::new(vec![rule("a", "b"), rule("b", "c")]);
        let budget = MatchBudget::new(None, Some(Duration::ZERO));

        let normalized = set.apply_within("a", &budget);
        assert_eq!(normalized.text, "a");
        assert_eq!(
            normalized.degradations,
            vec![Degradation::DeadlineReached {
                stage: Stage::Normalize
            }]
        );
    }
}
