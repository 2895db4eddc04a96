use std::fmt;

use serde::Serialize;

/// Index of a grammar in the registry
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct GrammarId(pub u16);

impl GrammarId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a rule in its grammar's rule table
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RuleId(pub u32);

impl RuleId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a regex in its grammar's regex table
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RegexId(pub u32);

impl RegexId {
    #[inline]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// The rule holding the grammar top-level patterns is always the first one
pub const ROOT_RULE_ID: RuleId = RuleId(0);

/// A rule is only unique across the registry when paired with its grammar
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize)]
pub struct GlobalRuleRef {
    pub grammar: GrammarId,
    pub rule: RuleId,
}

impl GlobalRuleRef {
    pub fn root(grammar: GrammarId) -> Self {
        Self {
            grammar,
            rule: ROOT_RULE_ID,
        }
    }
}

impl fmt::Debug for GlobalRuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.grammar.0, self.rule.0)
    }
}

/// Byte ranges of each capture group of a match, group 0 being the whole match.
pub type Captures = [Option<(usize, usize)>];

// Same set vscode-textmate escapes before inserting captured text into an end pattern
fn needs_escaping(c: char) -> bool {
    matches!(
        c,
        '-' | '\\'
            | '{'
            | '}'
            | '*'
            | '+'
            | '?'
            | '|'
            | '^'
            | '$'
            | '.'
            | ','
            | '['
            | ']'
            | '('
            | ')'
            | '#'
    ) || c.is_whitespace()
}

pub(crate) fn escape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if needs_escaping(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Calls `f` for every `\N` backreference of the pattern with (byte start, byte end, N).
/// Escaped backslashes are skipped so `\\1` is not a backreference.
fn for_each_backreference(pattern: &str, mut f: impl FnMut(usize, usize, usize)) {
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            i += 1;
            continue;
        }
        let digits_start = i + 1;
        let mut j = digits_start;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > digits_start {
            if let Ok(n) = pattern[digits_start..j].parse::<usize>() {
                f(i, j, n);
            }
            i = j;
        } else {
            // skip the escaped char whatever it is
            i += 2;
        }
    }
}

pub(crate) fn has_backreferences(pattern: &str) -> bool {
    let mut found = false;
    for_each_backreference(pattern, |_, _, _| found = true);
    found
}

/// Replaces `\N` in an end/while pattern with the escaped text the begin pattern captured.
/// Groups that didn't participate in the match are replaced by nothing.
pub(crate) fn resolve_backreferences(pattern: &str, line: &str, captures: &Captures) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut last = 0;
    for_each_backreference(pattern, |start, end, group| {
        out.push_str(&pattern[last..start]);
        if let Some(Some((s, e))) = captures.get(group)
            && let Some(text) = line.get(*s..*e)
        {
            out.push_str(&escape_regex(text));
        }
        last = end;
    });
    out.push_str(&pattern[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_detect_backreferences() {
        assert!(has_backreferences(r"\1"));
        assert!(has_backreferences(r"^\s*\2\b"));
        assert!(!has_backreferences(r"\\1"));
        assert!(!has_backreferences(r"\w+\s"));
    }

    #[test]
    fn can_resolve_backreferences() {
        let line = "<<EOF.x\n";
        let captures = vec![Some((0, 7)), Some((2, 7)), None];
        assert_eq!(
            resolve_backreferences(r"^\1$", line, &captures),
            r"^EOF\.x$"
        );
        assert_eq!(resolve_backreferences(r"\2|\\1", line, &captures), r"|\\1");
        assert_eq!(resolve_backreferences(r"\9", line, &captures), "");
    }

    #[test]
    fn escapes_regex_characters() {
        assert_eq!(escape_regex("a+b (c)"), r"a\+b\ \(c\)");
    }
}
