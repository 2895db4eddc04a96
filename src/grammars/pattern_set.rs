use std::fmt::{Debug, Formatter};

use onig::{RegSet, RegSetLead, RegexOptions, SearchOptions};

use crate::grammars::{GlobalRuleRef, Regex};
use crate::tokenizer::anchors::AnchorActive;

/// What a pattern of the set stands for
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Candidate {
    /// The `match` or `begin` pattern of that rule
    Rule(GlobalRuleRef),
    /// The `end` pattern of the rule at the top of the stack
    End,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PatternSetMatch {
    pub candidate: Candidate,
    pub start: usize,
    pub end: usize,
    pub captures: Vec<Option<(usize, usize)>>,
}

/// All the patterns that can match at a given point, compiled for one anchor combination.
///
/// Searching returns the leftmost match and the first pattern in declaration order wins
/// when several start at the same position.
pub struct PatternSet {
    candidates: Vec<Candidate>,
    regset: Option<RegSet>,
}

impl PatternSet {
    /// Patterns that fail to compile are left out of the set.
    pub fn new<'a>(
        items: impl IntoIterator<Item = (Candidate, &'a Regex)>,
        anchors: AnchorActive,
    ) -> Self {
        let mut candidates = Vec::new();
        let mut patterns = Vec::new();
        for (candidate, regex) in items {
            // also compiles the pattern alone, which logs it if it's invalid
            if regex.compiled(anchors).is_none() {
                continue;
            }
            candidates.push(candidate);
            patterns.push(anchors.replace_anchors(regex.pattern()));
        }

        if patterns.is_empty() {
            return Self {
                candidates,
                regset: None,
            };
        }

        let pattern_strs: Vec<&str> = patterns.iter().map(|p| p.as_ref()).collect();
        let regset =
            match RegSet::with_options(&pattern_strs, RegexOptions::REGEX_OPTION_CAPTURE_GROUP) {
                Ok(regset) => Some(regset),
                Err(err) => {
                    log::warn!(
                        "Failed to compile pattern set with {} patterns: {err}",
                        pattern_strs.len()
                    );
                    None
                }
            };

        Self { candidates, regset }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub(crate) fn find_at(&self, text: &str, pos: usize) -> Option<PatternSetMatch> {
        let regset = self.regset.as_ref()?;

        // We need to specify pos/text.len() because some regex might do lookbehind
        let (pattern_index, captures) = regset.captures_with_options(
            text,
            pos,
            text.len(),
            RegSetLead::Position,
            SearchOptions::SEARCH_OPTION_NONE,
        )?;
        let (start, end) = captures.pos(0)?;

        Some(PatternSetMatch {
            candidate: self.candidates[pattern_index],
            start,
            end,
            captures: (0..captures.len()).map(|i| captures.pos(i)).collect(),
        })
    }
}

impl Debug for PatternSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PatternSet({} patterns)", self.candidates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::{GrammarId, RuleId};

    fn rule(id: u32) -> Candidate {
        Candidate::Rule(GlobalRuleRef {
            grammar: GrammarId(0),
            rule: RuleId(id),
        })
    }

    #[test]
    fn leftmost_match_wins() {
        let a = Regex::new("b".to_owned());
        let b = Regex::new("a".to_owned());
        let set = PatternSet::new([(rule(1), &a), (rule(2), &b)], AnchorActive::None);
        let m = set.find_at("xab\n", 0).unwrap();
        assert_eq!(m.candidate, rule(2));
        assert_eq!((m.start, m.end), (1, 2));
    }

    #[test]
    fn first_declared_wins_ties() {
        let end = Regex::new("ab".to_owned());
        let other = Regex::new("a".to_owned());
        let set = PatternSet::new(
            [(Candidate::End, &end), (rule(1), &other)],
            AnchorActive::None,
        );
        assert_eq!(set.find_at("ab\n", 0).unwrap().candidate, Candidate::End);

        let set = PatternSet::new(
            [(rule(1), &other), (Candidate::End, &end)],
            AnchorActive::None,
        );
        assert_eq!(set.find_at("ab\n", 0).unwrap().candidate, rule(1));
    }

    #[test]
    fn skips_invalid_patterns() {
        let invalid = Regex::new("(oops".to_owned());
        let valid = Regex::new("o+".to_owned());
        let set = PatternSet::new([(rule(1), &invalid), (rule(2), &valid)], AnchorActive::None);
        assert_eq!(set.len(), 1);
        let m = set.find_at("foo\n", 0).unwrap();
        assert_eq!(m.candidate, rule(2));
        assert_eq!(m.captures, vec![Some((1, 3))]);
    }

    #[test]
    fn empty_set_never_matches() {
        let set = PatternSet::new(Vec::<(Candidate, &Regex)>::new(), AnchorActive::AG);
        assert!(set.is_empty());
        assert!(set.find_at("anything\n", 0).is_none());
    }
}
