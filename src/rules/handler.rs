//! Turns raw matcher hits into discovery records.
//!
//! Every worker owns its own handler, so the matcher callback never shares
//! mutable state across threads.

use std::collections::HashSet;

use super::RuleSet;
use crate::models::{DiscoveryState, NewDiscovery};

/// Where a scanned line came from.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub snippet: &'a str,
    pub file_name: &'a str,
    pub commit_id: &'a str,
    pub line_number: i64,
}

/// Collects discoveries for one worker, one per `(file, commit, line, rule)`.
#[derive(Debug, Default)]
pub struct ResultHandler {
    discoveries: Vec<NewDiscovery>,
    seen: HashSet<(String, String, i64, i64)>,
}

impl ResultHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize a discovery for one match. Returns `false` when the
    /// `(file, commit, line, rule)` tuple was already recorded.
    pub fn handle(&mut self, rule_id: i64, _start: usize, _end: usize, ctx: &MatchContext<'_>) -> bool {
        let key = (
            ctx.file_name.to_string(),
            ctx.commit_id.to_string(),
            ctx.line_number,
            rule_id,
        );
        if !self.seen.insert(key) {
            return false;
        }
        self.discoveries.push(NewDiscovery {
            file_name: ctx.file_name.to_string(),
            commit_id: ctx.commit_id.to_string(),
            line_number: ctx.line_number,
            snippet: ctx.snippet.to_string(),
            rule_id,
            state: DiscoveryState::New,
        });
        true
    }

    /// Run the matcher over `ctx.snippet` and record each hit.
    pub fn scan_line(&mut self, rules: &RuleSet, ctx: &MatchContext<'_>) {
        rules.scan(ctx.snippet.as_bytes(), self, |handler, rule_id, start, end| {
            handler.handle(rule_id, start, end, ctx);
        });
    }

    pub fn len(&self) -> usize {
        self.discoveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.discoveries.is_empty()
    }

    pub fn into_discoveries(self) -> Vec<NewDiscovery> {
        self.discoveries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rule;

    fn rules(patterns: &[(i64, &str)]) -> RuleSet {
        let rules: Vec<Rule> = patterns
            .iter()
            .map(|(id, re)| Rule {
                id: *id,
                regex: re.to_string(),
                category: "password".to_string(),
                description: None,
            })
            .collect();
        RuleSet::compile(&rules).unwrap()
    }

    fn ctx(line: i64, snippet: &str) -> MatchContext<'_> {
        MatchContext {
            snippet,
            file_name: "config.py",
            commit_id: "abc123",
            line_number: line,
        }
    }

    #[test]
    fn one_discovery_per_line_and_rule() {
        let set = rules(&[(1, "pass")]);
        let mut handler = ResultHandler::new();
        handler.scan_line(&set, &ctx(3, "pass = pass  "));
        assert_eq!(handler.len(), 1);

        let found = handler.into_discoveries();
        let d = &found[0];
        assert_eq!(d.line_number, 3);
        assert_eq!(d.rule_id, 1);
        assert_eq!(d.state, DiscoveryState::New);
        assert_eq!(d.snippet, "pass = pass  ");
    }

    #[test]
    fn distinct_rules_on_one_line_are_kept() {
        let set = rules(&[(1, "pass"), (2, "word")]);
        let mut handler = ResultHandler::new();
        handler.scan_line(&set, &ctx(1, "password"));
        let mut ids: Vec<i64> = handler.into_discoveries().iter().map(|d| d.rule_id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn same_rule_on_different_lines_is_kept() {
        let set = rules(&[(1, "pass")]);
        let mut handler = ResultHandler::new();
        handler.scan_line(&set, &ctx(1, "pass"));
        handler.scan_line(&set, &ctx(2, "pass"));
        handler.scan_line(&set, &ctx(2, "pass"));
        assert_eq!(handler.len(), 2);
    }

    #[test]
    fn no_match_records_nothing() {
        let set = rules(&[(1, "secret")]);
        let mut handler = ResultHandler::new();
        handler.scan_line(&set, &ctx(1, "nothing to see"));
        assert!(handler.is_empty());
        assert!(handler.into_discoveries().is_empty());
    }
}
