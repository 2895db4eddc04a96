use crate::scope::Scope;

/// Represents a parent scope requirement in a theme selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parent {
    /// Parent scope that can appear anywhere up the scope stack
    /// `Anywhere(source.js)` from "source.js meta.function" - can have scopes between
    Anywhere(Scope),
    /// Parent scope that must be the immediate parent (child combinator `>`)
    /// `Direct(meta.function)` from "meta.function > string" - must be immediate parent
    Direct(Scope),
}

impl Parent {
    fn scope(&self) -> &Scope {
        match self {
            Parent::Anywhere(s) | Parent::Direct(s) => s,
        }
    }
}

/// A parsed theme selector that is used to match against scope stacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeSelector {
    /// The target scope to match (rightmost in the selector string)
    pub target_scope: Scope,
    /// Required parent scopes from right to left of the selector
    pub parent_scopes: Vec<Parent>,
}

/// How precisely a selector describes a scope path.
/// Compared field by field: target depth first, then number of parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    pub target_atoms: usize,
    pub parents: usize,
}

impl ThemeSelector {
    pub fn new(target_scope: Scope, parent_scopes: Vec<Parent>) -> Self {
        Self {
            target_scope,
            parent_scopes,
        }
    }

    pub fn specificity(&self) -> Specificity {
        Specificity {
            target_atoms: self.target_scope.len(),
            parents: self.parent_scopes.len(),
        }
    }

    /// Checks if this selector matches the given scope stack, outermost scope first.
    ///
    /// 1. The target scope must be a prefix of the last scope in the stack
    /// 2. All parent scope requirements must be satisfied walking up the stack
    /// 3. `Parent::Anywhere` can skip intermediate scopes
    /// 4. `Parent::Direct` requires immediate parent relationship
    pub fn matches(&self, scope_stack: &[Scope]) -> bool {
        let Some((last, rest)) = scope_stack.split_last() else {
            return false;
        };
        self.target_scope.is_prefix_of(last) && self.matches_parents(rest.iter().rev())
    }

    /// Checks the parent requirements against the scopes above the target, innermost first.
    pub fn matches_parents<'a>(&self, mut ancestors: impl Iterator<Item = &'a Scope>) -> bool {
        for required_parent in &self.parent_scopes {
            match required_parent {
                Parent::Direct(parent_scope) => match ancestors.next() {
                    Some(scope) if parent_scope.is_prefix_of(scope) => {}
                    _ => return false,
                },
                // consumes the scopes up to and including the match
                Parent::Anywhere(parent_scope) => {
                    if !ancestors.any(|scope| parent_scope.is_prefix_of(scope)) {
                        return false;
                    }
                }
            }
        }

        true
    }
}

impl std::fmt::Display for ThemeSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for parent in self.parent_scopes.iter().rev() {
            write!(f, "{} ", parent.scope())?;
            if matches!(parent, Parent::Direct(_)) {
                write!(f, "> ")?;
            }
        }
        write!(f, "{}", self.target_scope)
    }
}

/// Parses a theme selector string into a structured ThemeSelector.
///
/// # Selector Format
/// - Scopes are separated by whitespace: `"source.js meta.function string"`
/// - Child combinator `>` creates direct parent requirement: `"parent > child"`
/// - Target scope is always the rightmost non-`>` token
///
/// Returns `None` if the selector string is invalid or empty
pub fn parse_selector(input: &str) -> Option<ThemeSelector> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let (last, rest) = parts.split_last()?;
    if *last == ">" {
        return None;
    }
    let target_scope = Scope::new(last);

    let mut parents = Vec::new();
    let mut is_direct = false;
    for part in rest.iter().rev() {
        if *part == ">" {
            is_direct = true;
            continue;
        }
        let parent_scope = Scope::new(part);
        parents.push(if is_direct {
            Parent::Direct(parent_scope)
        } else {
            Parent::Anywhere(parent_scope)
        });
        is_direct = false;
    }

    Some(ThemeSelector::new(target_scope, parents))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selector() {
        let test_cases = vec![
            ("comment", ThemeSelector::new(Scope::new("comment"), vec![])),
            (
                "source.js meta.function string",
                ThemeSelector::new(
                    Scope::new("string"),
                    vec![
                        Parent::Anywhere(Scope::new("meta.function")),
                        Parent::Anywhere(Scope::new("source.js")),
                    ],
                ),
            ),
            (
                "source.js meta.function > string.quoted",
                ThemeSelector::new(
                    Scope::new("string.quoted"),
                    vec![
                        Parent::Direct(Scope::new("meta.function")),
                        Parent::Anywhere(Scope::new("source.js")),
                    ],
                ),
            ),
            (
                "  source > meta   >   string  ",
                ThemeSelector::new(
                    Scope::new("string"),
                    vec![
                        Parent::Direct(Scope::new("meta")),
                        Parent::Direct(Scope::new("source")),
                    ],
                ),
            ),
        ];

        for (input, expected) in test_cases {
            let result = parse_selector(input).unwrap();
            assert_eq!(result, expected, "Mismatch for input: '{}'", input);
        }

        assert!(parse_selector("   ").is_none());
        assert!(parse_selector("string >").is_none());
    }

    #[test]
    fn can_display_selectors() {
        let selector = parse_selector("source.js  meta.function > string").unwrap();
        assert_eq!(selector.to_string(), "source.js meta.function > string");
    }

    fn create_scope_stack(scope_names: &[&str]) -> Vec<Scope> {
        scope_names.iter().map(|name| Scope::new(name)).collect()
    }

    #[test]
    fn test_selector_matches() {
        let test_cases = vec![
            ("comment", vec!["source.js", "comment.line"], true),
            ("comment", vec!["source.js", "string.quoted"], false),
            ("comment", vec!["source.js", "comments"], false),
            (
                "comment.line",
                vec!["source.js", "comment.line.double-slash"],
                true,
            ),
            (
                "source.js string",
                vec!["source.js", "meta.function", "string.quoted"],
                true,
            ),
            (
                "source.js string",
                vec!["source.py", "string.quoted"],
                false,
            ),
            (
                "meta.function > string",
                vec!["source.js", "meta.function", "string.quoted"],
                true,
            ),
            (
                "meta.function > string",
                vec!["source.js", "meta.function", "punctuation", "string.quoted"],
                false,
            ),
            (
                "source > meta > string",
                vec!["source.js", "punctuation", "meta.function", "string.quoted"],
                false,
            ),
            ("comment", vec![], false),
            ("source.js comment", vec!["source.js"], false),
            (
                "source.js meta.function string",
                vec!["source.js", "meta.class", "meta.function", "string.quoted"],
                true,
            ),
        ];

        for (selector_str, scope_names, expected) in test_cases {
            let selector = parse_selector(selector_str)
                .unwrap_or_else(|| panic!("Failed to parse selector: '{}'", selector_str));
            let scope_stack = create_scope_stack(&scope_names);
            assert_eq!(
                selector.matches(&scope_stack),
                expected,
                "Selector '{}' matching scope stack {:?}",
                selector_str,
                scope_names,
            );
        }
    }

    #[test]
    fn deeper_targets_are_more_specific() {
        let string = parse_selector("string").unwrap().specificity();
        let quoted = parse_selector("string.quoted").unwrap().specificity();
        let with_parent = parse_selector("source string").unwrap().specificity();

        assert!(quoted > string);
        assert!(with_parent > string);
        assert!(quoted > with_parent);
    }
}
