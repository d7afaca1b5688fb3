//! Multi-pattern matcher compiled from the rule set.
//!
//! A [`RegexSet`] answers "which rules hit this haystack" in one pass; the
//! per-rule regexes are only consulted for rules the set reported, to
//! recover match spans.

use regex::bytes::{Regex, RegexBuilder, RegexSet, RegexSetBuilder};

use super::RuleError;
use crate::models::Rule;

/// Maximum compiled size of the whole set (64 MB). Credential patterns with
/// bounded repetitions produce large automata; the default 10 MB is too low
/// for realistic rule files.
const SET_SIZE_LIMIT: usize = 64 * 1024 * 1024;

/// Per-pattern size limit.
const PATTERN_SIZE_LIMIT: usize = 16 * 1024 * 1024;

/// Compiled rules. Immutable and safe to share between workers.
#[derive(Debug, Clone)]
pub struct RuleSet {
    set: RegexSet,
    patterns: Vec<Regex>,
    ids: Vec<i64>,
}

impl RuleSet {
    /// Compile rules in order. Recompile wholesale when the rule set changes.
    pub fn compile(rules: &[Rule]) -> Result<Self, RuleError> {
        let patterns = rules
            .iter()
            .map(|rule| {
                RegexBuilder::new(&rule.regex)
                    .case_insensitive(true)
                    .unicode(true)
                    .size_limit(PATTERN_SIZE_LIMIT)
                    .build()
                    .map_err(|source| RuleError::Compile {
                        rule_id: rule.id,
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let set = RegexSetBuilder::new(rules.iter().map(|r| r.regex.as_str()))
            .case_insensitive(true)
            .unicode(true)
            .size_limit(SET_SIZE_LIMIT)
            .build()
            .map_err(|e| RuleError::TooLarge(e.to_string()))?;

        Ok(Self {
            set,
            patterns,
            ids: rules.iter().map(|r| r.id).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn rule_ids(&self) -> &[i64] {
        &self.ids
    }

    /// Report every non-empty match as `(rule_id, start, end)` to `on_match`.
    ///
    /// Matches are not deduplicated: several rules may report the same span
    /// and one rule may report several spans.
    pub fn scan<C>(&self, haystack: &[u8], ctx: &mut C, mut on_match: impl FnMut(&mut C, i64, usize, usize)) {
        for index in self.set.matches(haystack).iter() {
            let rule_id = self.ids[index];
            for m in self.patterns[index].find_iter(haystack) {
                if m.start() == m.end() {
                    continue;
                }
                on_match(ctx, rule_id, m.start(), m.end());
            }
        }
    }

    /// Whether any rule matches `haystack` with a non-empty span.
    pub fn is_match(&self, haystack: &[u8]) -> bool {
        let mut hit = false;
        self.scan(haystack, &mut hit, |hit, _, _, _| *hit = true);
        hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: i64, regex: &str) -> Rule {
        Rule {
            id,
            regex: regex.to_string(),
            category: "test".to_string(),
            description: None,
        }
    }

    fn collect(set: &RuleSet, haystack: &str) -> Vec<(i64, usize, usize)> {
        let mut hits = Vec::new();
        set.scan(haystack.as_bytes(), &mut hits, |hits, id, s, e| hits.push((id, s, e)));
        hits
    }

    #[test]
    fn case_insensitive_matches_with_spans() {
        let set = RuleSet::compile(&[rule(7, "password")]).unwrap();
        assert_eq!(collect(&set, "my PassWord here"), vec![(7, 3, 11)]);
    }

    #[test]
    fn several_rules_may_report_the_same_span() {
        let set = RuleSet::compile(&[rule(1, "key"), rule(2, "k.y")]).unwrap();
        let mut hits = collect(&set, "api_key");
        hits.sort();
        assert_eq!(hits, vec![(1, 4, 7), (2, 4, 7)]);
    }

    #[test]
    fn repeated_matches_are_all_reported() {
        let set = RuleSet::compile(&[rule(1, "key")]).unwrap();
        assert_eq!(collect(&set, "key key").len(), 2);
    }

    #[test]
    fn zero_length_matches_are_discarded() {
        let set = RuleSet::compile(&[rule(1, "x*")]).unwrap();
        assert_eq!(collect(&set, "abc"), vec![]);
        assert_eq!(collect(&set, "axxb"), vec![(1, 1, 3)]);
    }

    #[test]
    fn unicode_classes_are_supported() {
        let set = RuleSet::compile(&[rule(1, r"пароль\p{L}*")]).unwrap();
        assert!(set.is_match("ПАРОЛЬный = 1".as_bytes()));
    }

    #[test]
    fn invalid_pattern_names_the_rule() {
        let err = RuleSet::compile(&[rule(1, "ok"), rule(42, "(unclosed")]).unwrap_err();
        match err {
            RuleError::Compile { rule_id, .. } => assert_eq!(rule_id, 42),
            other => panic!("expected Compile, got {other:?}"),
        }
    }

    #[test]
    fn empty_rule_set_matches_nothing() {
        let set = RuleSet::compile(&[]).unwrap();
        assert!(set.is_empty());
        assert!(!set.is_match(b"password"));
    }
}
