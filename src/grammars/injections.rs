//! TextMate grammar injection selector parsing and matching.

use std::fmt;
use std::sync::LazyLock;

use onig::Regex;
use serde::Serialize;

use crate::grammars::GlobalRuleRef;
use crate::scope::Scope;

/// Where an injection stands against the rules of the grammar it is injected in when both
/// match at the same position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum InjectionPrecedence {
    /// `L:` prefix, wins ties
    Left = -1,
    Default = 0,
    /// `R:` prefix, loses ties like the default one
    Right = 1,
}

/// Serializable selector matcher that can evaluate against scope stacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SelectorMatcher {
    /// Space separated scopes: each must be found in the stack, in that order
    Path(Vec<Scope>),
    /// All matchers must succeed
    And(Vec<SelectorMatcher>),
    /// Any matcher can succeed (`|` or `,` separated)
    Or(Vec<SelectorMatcher>),
    /// Matcher must NOT succeed (`-` prefix)
    Not(Box<SelectorMatcher>),
}

impl SelectorMatcher {
    pub fn matches(&self, scopes: &[Scope]) -> bool {
        match self {
            SelectorMatcher::Path(path) => {
                if scopes.len() < path.len() {
                    return false;
                }
                let mut remaining = scopes;
                for wanted in path {
                    match remaining.iter().position(|s| wanted.is_prefix_of(s)) {
                        Some(pos) => remaining = &remaining[pos + 1..],
                        None => return false,
                    }
                }
                true
            }
            SelectorMatcher::And(matchers) => matchers.iter().all(|m| m.matches(scopes)),
            SelectorMatcher::Or(matchers) => matchers.iter().any(|m| m.matches(scopes)),
            SelectorMatcher::Not(matcher) => !matcher.matches(scopes),
        }
    }
}

impl SelectorMatcher {
    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorMatcher::And(_) | SelectorMatcher::Or(_) => write!(f, "({self})"),
            SelectorMatcher::Path(path) if path.len() > 1 => write!(f, "({self})"),
            _ => write!(f, "{self}"),
        }
    }
}

impl fmt::Display for SelectorMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorMatcher::Path(path) => {
                for (i, scope) in path.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{scope}")?;
                }
                Ok(())
            }
            SelectorMatcher::And(matchers) => {
                for (i, m) in matchers.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    m.fmt_operand(f)?;
                }
                Ok(())
            }
            SelectorMatcher::Or(matchers) => {
                for (i, m) in matchers.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{m}")?;
                }
                Ok(())
            }
            SelectorMatcher::Not(m) => {
                f.write_str("-")?;
                m.fmt_operand(f)
            }
        }
    }
}

/// A compiled injection selector matcher with priority
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledInjectionMatcher {
    pub matcher: SelectorMatcher,
    pub precedence: InjectionPrecedence,
}

impl CompiledInjectionMatcher {
    pub fn matches(&self, scopes: &[Scope]) -> bool {
        self.matcher.matches(scopes)
    }
}

/// A rule that gets added to the candidates of another grammar wherever its selector matches
/// the current scope path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Injection {
    pub matcher: SelectorMatcher,
    pub precedence: InjectionPrecedence,
    pub rule: GlobalRuleRef,
}

/// Regex for tokenizing injection selectors (same as vscode-textmate except for \* added)
static TOKEN_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"([LR]:|[\w.:][\w*.:\-]*|[,|\-()])").ok());

fn is_identifier(s: &str) -> bool {
    if s.is_empty() || s == "-" {
        return false;
    }

    s.chars().all(|c| {
        c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == ':' || c == '-' || c == '*'
    })
}

fn parse_inner_expression(tokens: &[&str], position: &mut usize) -> Option<SelectorMatcher> {
    let mut out = Vec::new();
    while let Some(m) = parse_conjunction(tokens, position) {
        if !out.contains(&m) {
            out.push(m);
        }
        if *position < tokens.len() && matches!(tokens[*position], "|" | ",") {
            *position += 1;
        } else {
            break;
        }
    }

    match out.len() {
        0 => None,
        1 => out.pop(),
        _ => Some(SelectorMatcher::Or(out)),
    }
}

fn parse_operand(tokens: &[&str], position: &mut usize) -> Option<SelectorMatcher> {
    if *position >= tokens.len() {
        return None;
    }

    match tokens[*position] {
        "-" => {
            *position += 1;
            let negated = parse_operand(tokens, position)?;
            Some(SelectorMatcher::Not(Box::new(negated)))
        }
        "(" => {
            *position += 1;
            let inner = parse_inner_expression(tokens, position);
            if *position < tokens.len() && tokens[*position] == ")" {
                *position += 1;
            }
            // `()` matches everything
            Some(inner.unwrap_or(SelectorMatcher::And(Vec::new())))
        }
        _ => {
            let mut path = Vec::new();

            while *position < tokens.len() && is_identifier(tokens[*position]) {
                let token = tokens[*position];
                // `meta.tag.*.html`: everything after the first wildcard is dropped
                let token = match token.find(".*") {
                    Some(pos) => &token[..pos],
                    None => token,
                };
                path.push(Scope::new(token));
                *position += 1;
            }

            if path.is_empty() {
                None
            } else {
                Some(SelectorMatcher::Path(path))
            }
        }
    }
}

fn parse_conjunction(tokens: &[&str], position: &mut usize) -> Option<SelectorMatcher> {
    let mut matchers = Vec::new();

    while let Some(m) = parse_operand(tokens, position) {
        matchers.push(m);
    }

    match matchers.len() {
        0 => None,
        1 => matchers.pop(),
        _ => Some(SelectorMatcher::And(matchers)),
    }
}

/// Parse injection selector string into compiled matchers
pub fn parse_injection_selector(selector: &str) -> Vec<CompiledInjectionMatcher> {
    let selector = selector.trim();
    let Some(token_regex) = TOKEN_REGEX.as_ref() else {
        return Vec::new();
    };
    if selector.is_empty() {
        return Vec::new();
    }

    let tokens: Vec<_> = token_regex
        .find_iter(selector)
        .map(|(start, end)| &selector[start..end])
        .filter(|t| !t.is_empty())
        .collect();
    let mut position = 0;
    let mut res = Vec::new();

    let mut precedence = InjectionPrecedence::Default;
    while position < tokens.len() {
        match tokens[position] {
            "L:" => {
                precedence = InjectionPrecedence::Left;
                position += 1;
                continue;
            }
            "R:" => {
                precedence = InjectionPrecedence::Right;
                position += 1;
                continue;
            }
            _ => (),
        };

        let Some(matcher) = parse_conjunction(&tokens, &mut position) else {
            break;
        };
        res.push(CompiledInjectionMatcher {
            matcher,
            precedence,
        });
        precedence = InjectionPrecedence::Default;
        if position < tokens.len() && tokens[position] == "," {
            position += 1;
        } else {
            break;
        }
    }

    if res.is_empty() {
        log::warn!("Injection selector {selector:?} has no usable matcher");
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    fn scopes(names: &[&str]) -> Vec<Scope> {
        names.iter().map(|s| Scope::new(s)).collect()
    }

    #[test]
    fn can_parse_priorities() {
        let parsed = parse_injection_selector("L:comment, R:string -string.regexp, source");
        let precedences: Vec<_> = parsed.iter().map(|m| m.precedence).collect();
        assert_eq!(
            precedences,
            vec![
                InjectionPrecedence::Left,
                InjectionPrecedence::Right,
                InjectionPrecedence::Default
            ]
        );
    }

    #[test]
    fn can_parse_grouped_selector() {
        let parsed = parse_injection_selector(
            "L:(meta.script.svelte | meta.style.svelte) (meta.lang.js | meta.lang.javascript) - (meta source)",
        );
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].precedence, InjectionPrecedence::Left);
        assert_snapshot!(
            parsed[0].matcher.to_string(),
            @"(meta.script.svelte | meta.style.svelte) (meta.lang.js | meta.lang.javascript) -(meta source)"
        );
    }

    #[test]
    fn matches_scope_stacks() {
        let cases = vec![
            ("text.html", vec!["text.html.basic", "meta.tag"], true),
            ("text.html -comment", vec!["text.html.basic", "comment.block"], false),
            ("text.html -comment", vec!["text.html.basic", "string"], true),
            ("source.js string", vec!["source.js", "meta.block", "string.quoted"], true),
            ("string source.js", vec!["source.js", "string.quoted"], false),
            ("comment | string", vec!["source", "string"], true),
            (
                "R:text.html - (comment.block, meta.tag.*.*.html)",
                vec!["text.html", "meta.tag.open"],
                false,
            ),
            ("meta.embedded", vec!["source"], false),
        ];

        for (selector, stack, expected) in cases {
            let matchers = parse_injection_selector(selector);
            assert_eq!(matchers.len(), 1, "{selector}");
            assert_eq!(
                matchers[0].matches(&scopes(&stack)),
                expected,
                "{selector} on {stack:?}"
            );
        }
    }

    #[test]
    fn empty_selector_has_no_matcher() {
        assert!(parse_injection_selector("   ").is_empty());
    }
}
