use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::mem;

use crate::grammars::common::{Captures, GrammarId, RegexId, RuleId};
use crate::grammars::injections::{Injection, parse_injection_selector};
use crate::grammars::raw::{RawCaptures, RawGrammar, RawRule};
use crate::grammars::regex::Regex;
use crate::grammars::{CompiledInjectionMatcher, GlobalRuleRef};
use crate::metadata::StandardTokenType;
use crate::scope::{Scope, is_scope_prefix};

/// A scope name as written in the grammar: it can contain several space separated scopes and
/// references to the captures of the match (`$1`, `${2:/downcase}`, `${3:/upcase}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeName {
    template: String,
    has_captures: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaseChange {
    Down,
    Up,
}

/// Parses what follows a `$`: (group, case change, bytes consumed)
fn parse_capture_reference(s: &str) -> Option<(usize, Option<CaseChange>, usize)> {
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 {
        return Some((s[..digits].parse().ok()?, None, digits));
    }

    let inner = s.strip_prefix('{')?;
    let digits = inner.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let group = inner[..digits].parse().ok()?;
    let tail = &inner[digits..];
    for (suffix, change) in [(":/downcase}", CaseChange::Down), (":/upcase}", CaseChange::Up)] {
        if tail.starts_with(suffix) {
            return Some((group, Some(change), 1 + digits + suffix.len()));
        }
    }
    None
}

impl ScopeName {
    pub fn new(template: String) -> Self {
        let has_captures = template
            .match_indices('$')
            .any(|(i, _)| parse_capture_reference(&template[i + 1..]).is_some());
        Self {
            template,
            has_captures,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Replaces capture references with the text they captured in `line`.
    /// References to groups that didn't match are kept as is.
    pub fn resolve<'a>(&'a self, line: &str, captures: Option<&Captures>) -> Cow<'a, str> {
        let Some(captures) = captures.filter(|_| self.has_captures) else {
            return Cow::Borrowed(&self.template);
        };

        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(idx) = rest.find('$') {
            out.push_str(&rest[..idx]);
            let after = &rest[idx + 1..];
            let Some((group, change, consumed)) = parse_capture_reference(after) else {
                out.push('$');
                rest = after;
                continue;
            };

            let captured = captures
                .get(group)
                .copied()
                .flatten()
                .and_then(|(s, e)| line.get(s..e));
            match captured {
                Some(text) => {
                    let text = text.trim_start_matches('.');
                    match change {
                        Some(CaseChange::Down) => out.push_str(&text.to_lowercase()),
                        Some(CaseChange::Up) => out.push_str(&text.to_uppercase()),
                        None => out.push_str(text),
                    }
                }
                None => out.push_str(&rest[idx..idx + 1 + consumed]),
            }
            rest = &after[consumed..];
        }
        out.push_str(rest);
        Cow::Owned(out)
    }
}

/// How a capture group is scoped and whether its text is tokenized again with nested patterns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRule {
    pub name: Option<ScopeName>,
    pub content_name: Option<ScopeName>,
    /// Container rule holding the nested patterns of the capture
    pub retokenize: Option<RuleId>,
}

/// per vscode-textmate:
///  Allowed values:
///  * Scope Name, e.g. `source.ts`
///  * Top level scope reference, e.g. `source.ts#entity.name.class`
///  * self, e.g. `$self`
///  * base, e.g. `$base`
///
/// Relative references (`#name`) are resolved when compiling the grammar.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Reference {
    Self_,
    Base,
    Grammar(String),
    GrammarRule(String, String),
}

impl From<&str> for Reference {
    fn from(value: &str) -> Self {
        match value {
            "$self" => Self::Self_,
            "$base" => Self::Base,
            s => match s.split_once('#') {
                Some((scope, rule)) => Self::GrammarRule(scope.to_owned(), rule.to_owned()),
                None => Self::Grammar(s.to_owned()),
            },
        }
    }
}

/// An entry of a rule `patterns`
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PatternRef {
    Rule(RuleId),
    /// Resolved lazily, the target grammar might not be loaded yet
    Reference(Reference),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MatchRule {
    pub name: Option<ScopeName>,
    pub regex: RegexId,
    pub captures: Vec<Option<CaptureRule>>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IncludeOnlyRule {
    pub name: Option<ScopeName>,
    pub content_name: Option<ScopeName>,
    pub patterns: Vec<PatternRef>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BeginEndRule {
    pub name: Option<ScopeName>,
    pub content_name: Option<ScopeName>,
    pub begin: RegexId,
    pub begin_captures: Vec<Option<CaptureRule>>,
    pub end: RegexId,
    pub end_captures: Vec<Option<CaptureRule>>,
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<PatternRef>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BeginWhileRule {
    pub name: Option<ScopeName>,
    pub content_name: Option<ScopeName>,
    pub begin: RegexId,
    pub begin_captures: Vec<Option<CaptureRule>>,
    pub while_: RegexId,
    pub while_captures: Vec<Option<CaptureRule>>,
    pub patterns: Vec<PatternRef>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Rule {
    Match(MatchRule),
    IncludeOnly(IncludeOnlyRule),
    BeginEnd(BeginEndRule),
    BeginWhile(BeginWhileRule),
    Noop,
}

static NOOP_RULE: Rule = Rule::Noop;

impl Rule {
    pub fn name(&self) -> Option<&ScopeName> {
        match self {
            Rule::Match(r) => r.name.as_ref(),
            Rule::IncludeOnly(r) => r.name.as_ref(),
            Rule::BeginEnd(r) => r.name.as_ref(),
            Rule::BeginWhile(r) => r.name.as_ref(),
            Rule::Noop => None,
        }
    }

    pub fn content_name(&self) -> Option<&ScopeName> {
        match self {
            Rule::IncludeOnly(r) => r.content_name.as_ref(),
            Rule::BeginEnd(r) => r.content_name.as_ref(),
            Rule::BeginWhile(r) => r.content_name.as_ref(),
            Rule::Match(_) | Rule::Noop => None,
        }
    }

    pub fn patterns(&self) -> &[PatternRef] {
        match self {
            Rule::IncludeOnly(r) => &r.patterns,
            Rule::BeginEnd(r) => &r.patterns,
            Rule::BeginWhile(r) => &r.patterns,
            Rule::Match(_) | Rule::Noop => &[],
        }
    }
}

/// Language id and token type a scope name implies, independently of its ancestors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct BasicAttributes {
    /// 0 when the scope doesn't switch language
    pub language_id: u8,
    pub token_type: Option<StandardTokenType>,
}

/// Language information given when adding a grammar to the registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrammarConfig {
    pub(crate) language_id: u8,
    pub(crate) embedded_languages: Vec<(Scope, u8)>,
}

impl GrammarConfig {
    pub fn new(language_id: u8) -> Self {
        Self {
            language_id,
            embedded_languages: Vec::new(),
        }
    }

    /// Tokens under `scope` (and its children) get that language id instead of the
    /// grammar one. Language id 0 means "unknown" and is ignored.
    pub fn embedded_language(mut self, scope: &str, language_id: u8) -> Self {
        if language_id != 0 {
            self.embedded_languages.push((Scope::new(scope), language_id));
        }
        self
    }
}

/// A grammar with its rules flattened into a table, ready for tokenization.
pub struct CompiledGrammar {
    pub id: GrammarId,
    pub name: String,
    pub display_name: Option<String>,
    pub scope_name: String,
    pub file_types: Vec<String>,
    pub language_id: u8,
    pub(crate) embedded_languages: Vec<(Scope, u8)>,
    pub(crate) regexes: Vec<Regex>,
    pub(crate) rules: Vec<Rule>,
    /// Top-level repository, what `other.scope#name` includes can reach
    pub(crate) repository: HashMap<String, RuleId>,
    /// From the `injections` key, only used when this grammar is the one tokenizing
    pub(crate) injections: Vec<Injection>,
    /// From `injectionSelector`, when this grammar is injected in the `inject_to` ones
    pub(crate) injection_selector: Vec<CompiledInjectionMatcher>,
    pub inject_to: Vec<String>,
    basic_attributes: papaya::HashMap<Scope, BasicAttributes>,
}

impl CompiledGrammar {
    pub fn from_raw_grammar(raw: RawGrammar, id: GrammarId, config: GrammarConfig) -> Self {
        let name = raw.lookup_name().to_owned();
        let mut compiler = GrammarCompiler::default();
        let mut repositories = Vec::new();

        let root = compiler.reserve();
        debug_assert_eq!(root.0, 0);
        let repository = compiler.push_repository(raw.repository, &mut repositories);
        compiler.compile_rule_into(
            root,
            RawRule {
                name: Some(raw.scope_name.clone()),
                patterns: raw.patterns,
                ..Default::default()
            },
            &mut repositories,
        );

        let mut injections = Vec::new();
        for (selector, raw_rule) in raw.injections {
            let rule = compiler.compile_rule(raw_rule, &mut repositories);
            for m in parse_injection_selector(&selector) {
                injections.push(Injection {
                    matcher: m.matcher,
                    precedence: m.precedence,
                    rule: GlobalRuleRef { grammar: id, rule },
                });
            }
        }

        let injection_selector = raw
            .injection_selector
            .as_deref()
            .map(parse_injection_selector)
            .unwrap_or_default();

        #[cfg(feature = "debug")]
        log::debug!(
            "Compiled grammar {name} ({}): {} rules, {} regexes",
            raw.scope_name,
            compiler.rules.len(),
            compiler.regexes.len()
        );

        Self {
            id,
            name,
            display_name: raw.display_name,
            scope_name: raw.scope_name,
            file_types: raw.file_types,
            language_id: config.language_id,
            embedded_languages: config.embedded_languages,
            regexes: compiler.regexes,
            rules: compiler.rules,
            repository,
            injections,
            injection_selector,
            inject_to: raw.inject_to,
            basic_attributes: papaya::HashMap::new(),
        }
    }

    #[inline]
    pub fn rule(&self, id: RuleId) -> &Rule {
        self.rules.get(id.as_index()).unwrap_or(&NOOP_RULE)
    }

    #[inline]
    pub fn regex(&self, id: RegexId) -> &Regex {
        &self.regexes[id.as_index()]
    }

    /// The regex that starts the rule: `match` or `begin`
    pub fn rule_regex(&self, id: RuleId) -> Option<&Regex> {
        match self.rule(id) {
            Rule::Match(r) => Some(self.regex(r.regex)),
            Rule::BeginEnd(r) => Some(self.regex(r.begin)),
            Rule::BeginWhile(r) => Some(self.regex(r.begin)),
            Rule::IncludeOnly(_) | Rule::Noop => None,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// The top-level repository entry with that name
    pub fn repository_rule(&self, name: &str) -> Option<RuleId> {
        self.repository.get(name).copied()
    }

    pub(crate) fn basic_attributes(&self, scope: &Scope) -> BasicAttributes {
        let cache = self.basic_attributes.pin();
        if let Some(attrs) = cache.get(scope) {
            return *attrs;
        }

        let language_id = self
            .embedded_languages
            .iter()
            .filter(|(prefix, _)| is_scope_prefix(prefix.as_str(), scope.as_str()))
            .max_by_key(|(prefix, _)| prefix.as_str().len())
            .map(|(_, id)| *id)
            .unwrap_or(0);
        let attrs = BasicAttributes {
            language_id,
            token_type: StandardTokenType::from_scope_name(scope.as_str()),
        };
        cache.insert(scope.clone(), attrs);
        attrs
    }
}

impl fmt::Debug for CompiledGrammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGrammar")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("scope_name", &self.scope_name)
            .field("rules", &self.rules.len())
            .field("regexes", &self.regexes.len())
            .field("injections", &self.injections.len())
            .field("inject_to", &self.inject_to)
            .finish()
    }
}

type Repository = HashMap<String, RuleId>;

#[derive(Default)]
struct GrammarCompiler {
    regexes: Vec<Regex>,
    rules: Vec<Rule>,
}

impl GrammarCompiler {
    /// Push a no-op to reserve a rule spot
    fn reserve(&mut self) -> RuleId {
        let id = RuleId(self.rules.len() as u32);
        self.rules.push(Rule::Noop);
        id
    }

    fn add_regex(&mut self, pattern: String) -> RegexId {
        let id = RegexId(self.regexes.len() as u32);
        self.regexes.push(Regex::new(pattern));
        id
    }

    /// Entries get their ids before any of them is compiled so they can refer to each
    /// other, or to themselves.
    fn push_repository(
        &mut self,
        raw_repository: HashMap<String, RawRule>,
        repositories: &mut Vec<Repository>,
    ) -> Repository {
        let mut repository = Repository::new();
        let mut bodies = Vec::with_capacity(raw_repository.len());
        for (name, raw_rule) in raw_repository {
            let id = self.reserve();
            repository.insert(name, id);
            bodies.push((id, raw_rule));
        }

        repositories.push(repository.clone());
        for (id, raw_rule) in bodies {
            self.compile_rule_into(id, raw_rule, repositories);
        }
        repository
    }

    fn compile_rule(&mut self, raw_rule: RawRule, repositories: &mut Vec<Repository>) -> RuleId {
        let id = self.reserve();
        self.compile_rule_into(id, raw_rule, repositories);
        id
    }

    // https://github.com/microsoft/vscode-textmate/blob/f03a6a8790af81372d0e81facae75554ec5e97ef/src/rule.ts#L389-L447
    fn compile_rule_into(
        &mut self,
        id: RuleId,
        mut raw_rule: RawRule,
        repositories: &mut Vec<Repository>,
    ) {
        let has_repository = !raw_rule.repository.is_empty();
        if has_repository {
            self.push_repository(mem::take(&mut raw_rule.repository), repositories);
        }

        let name = raw_rule.name.map(ScopeName::new);
        let content_name = raw_rule.content_name.map(ScopeName::new);

        let rule = if let Some(pat) = raw_rule.match_ {
            Rule::Match(MatchRule {
                name,
                regex: self.add_regex(pat),
                captures: self.compile_captures(raw_rule.captures, repositories),
            })
        } else if let Some(begin) = raw_rule.begin {
            let begin = self.add_regex(begin);
            let captures_or = |specific: RawCaptures| {
                if specific.is_empty() {
                    raw_rule.captures.clone()
                } else {
                    specific
                }
            };
            let begin_captures = captures_or(raw_rule.begin_captures);

            if let Some(while_) = raw_rule.while_ {
                let while_captures = captures_or(raw_rule.while_captures);
                Rule::BeginWhile(BeginWhileRule {
                    name,
                    content_name,
                    begin,
                    begin_captures: self.compile_captures(begin_captures, repositories),
                    while_: self.add_regex(while_),
                    while_captures: self.compile_captures(while_captures, repositories),
                    patterns: self.compile_patterns(raw_rule.patterns, repositories),
                })
            } else {
                let end_captures = captures_or(raw_rule.end_captures);
                // a begin without end never ends
                let end = raw_rule.end.unwrap_or_else(|| "\u{FFFF}".to_owned());
                Rule::BeginEnd(BeginEndRule {
                    name,
                    content_name,
                    begin,
                    begin_captures: self.compile_captures(begin_captures, repositories),
                    end: self.add_regex(end),
                    end_captures: self.compile_captures(end_captures, repositories),
                    apply_end_pattern_last: raw_rule.apply_end_pattern_last,
                    patterns: self.compile_patterns(raw_rule.patterns, repositories),
                })
            }
        } else {
            // vscode-textmate does something funny here:
            // - if patterns are NOT present and includes are, it moves includes to patterns;
            // - however, if patterns ARE present, includes are ignored
            let patterns = if raw_rule.patterns.is_empty()
                && let Some(include) = raw_rule.include
            {
                self.compile_include(&include, repositories)
                    .into_iter()
                    .collect()
            } else {
                self.compile_patterns(raw_rule.patterns, repositories)
            };
            Rule::IncludeOnly(IncludeOnlyRule {
                name,
                content_name,
                patterns,
            })
        };

        if has_repository {
            repositories.pop();
        }
        self.rules[id.as_index()] = rule;
    }

    fn compile_include(
        &mut self,
        include: &str,
        repositories: &[Repository],
    ) -> Option<PatternRef> {
        if let Some(local) = include.strip_prefix('#') {
            let found = repositories
                .iter()
                .rev()
                .find_map(|repository| repository.get(local));
            if found.is_none() {
                log::warn!("Unresolved include {include:?}, ignoring it");
            }
            return found.copied().map(PatternRef::Rule);
        }
        Some(PatternRef::Reference(include.into()))
    }

    fn compile_patterns(
        &mut self,
        raw_rules: Vec<RawRule>,
        repositories: &mut Vec<Repository>,
    ) -> Vec<PatternRef> {
        let mut out = Vec::with_capacity(raw_rules.len());

        for r in raw_rules {
            if let Some(include) = &r.include {
                // vscode ignores other rule contents is there's an include
                // https://github.com/microsoft/vscode-textmate/blob/f03a6a8790af81372d0e81facae75554ec5e97ef/src/rule.ts#L495
                out.extend(self.compile_include(include, repositories));
            } else {
                out.push(PatternRef::Rule(self.compile_rule(r, repositories)));
            }
        }

        out
    }

    fn compile_captures(
        &mut self,
        captures: RawCaptures,
        repositories: &mut Vec<Repository>,
    ) -> Vec<Option<CaptureRule>> {
        let Some(max_capture) = captures.0.keys().max().copied() else {
            return Vec::new();
        };

        // mdc.json syntax has actually a 912 backref
        let mut out: Vec<Option<CaptureRule>> = vec![None; max_capture + 1];
        for (key, mut raw_capture) in captures.0 {
            let retokenize = if raw_capture.patterns.is_empty() {
                None
            } else {
                Some(self.compile_rule(
                    RawRule {
                        patterns: mem::take(&mut raw_capture.patterns),
                        repository: mem::take(&mut raw_capture.repository),
                        ..Default::default()
                    },
                    repositories,
                ))
            };
            out[key] = Some(CaptureRule {
                name: raw_capture.name.map(ScopeName::new),
                content_name: raw_capture.content_name.map(ScopeName::new),
                retokenize,
            });
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(json: &str) -> CompiledGrammar {
        let raw: RawGrammar = serde_json::from_str(json).unwrap();
        CompiledGrammar::from_raw_grammar(raw, GrammarId(0), GrammarConfig::default())
    }

    #[test]
    fn resolves_local_includes_at_compile_time() {
        let grammar = compile(
            r##"{
                "scopeName": "source.test",
                "patterns": [{"include": "#a"}, {"include": "#missing"}, {"include": "$self"}],
                "repository": {
                    "a": {"patterns": [{"include": "#b"}], "repository": {"b": {"match": "inner"}}},
                    "b": {"match": "outer"}
                }
            }"##,
        );

        let root = grammar.rule(RuleId(0));
        assert_eq!(root.patterns().len(), 2);
        assert_eq!(root.patterns()[1], PatternRef::Reference(Reference::Self_));
        let PatternRef::Rule(a) = root.patterns()[0] else {
            panic!("#a should be resolved");
        };
        assert_eq!(grammar.repository_rule("a"), Some(a));
        // the nested repository shadows the top-level one
        let PatternRef::Rule(b) = grammar.rule(a).patterns()[0] else {
            panic!("#b should be resolved");
        };
        assert_eq!(grammar.rule_regex(b).unwrap().pattern(), "inner");
    }

    #[test]
    fn captures_fall_back_to_captures_key() {
        let grammar = compile(
            r##"{
                "scopeName": "source.test",
                "patterns": [{
                    "begin": "(a)", "end": "(b)",
                    "captures": {"1": {"name": "both"}},
                    "endCaptures": {"1": {"name": "end", "patterns": [{"match": "b"}]}}
                }]
            }"##,
        );
        let PatternRef::Rule(id) = grammar.rule(RuleId(0)).patterns()[0] else {
            panic!()
        };
        let Rule::BeginEnd(rule) = grammar.rule(id) else {
            panic!("expected a begin/end rule")
        };
        let begin = rule.begin_captures[1].as_ref().unwrap();
        assert_eq!(begin.name.as_ref().unwrap().as_str(), "both");
        assert!(begin.retokenize.is_none());
        let end = rule.end_captures[1].as_ref().unwrap();
        assert_eq!(end.name.as_ref().unwrap().as_str(), "end");
        assert!(matches!(
            grammar.rule(end.retokenize.unwrap()),
            Rule::IncludeOnly(_)
        ));
    }

    #[test]
    fn parses_references() {
        assert_eq!(Reference::from("$base"), Reference::Base);
        assert_eq!(
            Reference::from("source.js"),
            Reference::Grammar("source.js".to_owned())
        );
        assert_eq!(
            Reference::from("source.js#expr"),
            Reference::GrammarRule("source.js".to_owned(), "expr".to_owned())
        );
    }

    #[test]
    fn can_expand_name_templates() {
        let line = "<div.Foo>";
        let captures = vec![Some((0, 9)), Some((1, 4)), Some((4, 8)), None];
        let cases = [
            ("entity.name.tag.$1", "entity.name.tag.div"),
            ("meta.${2:/downcase}", "meta.foo"),
            ("meta.${1:/upcase} x", "meta.DIV x"),
            ("keep.$3.$x", "keep.$3.$x"),
            ("no.captures", "no.captures"),
        ];

        for (template, expected) in cases {
            let name = ScopeName::new(template.to_owned());
            assert_eq!(
                name.resolve(line, Some(captures.as_slice())),
                expected,
                "{template}"
            );
        }
        let name = ScopeName::new("a.$1".to_owned());
        assert_eq!(name.resolve(line, None), "a.$1");
    }

    #[test]
    fn embedded_languages_use_longest_prefix() {
        let raw: RawGrammar = serde_json::from_str(r#"{"scopeName": "text.html"}"#).unwrap();
        let config = GrammarConfig::new(1)
            .embedded_language("source.js", 2)
            .embedded_language("source.js.regexp", 3)
            .embedded_language("source.css", 0);
        let grammar = CompiledGrammar::from_raw_grammar(raw, GrammarId(0), config);

        let attrs = grammar.basic_attributes(&Scope::new("source.js.regexp.flags"));
        assert_eq!(attrs.language_id, 3);
        let attrs = grammar.basic_attributes(&Scope::new("source.jsx"));
        assert_eq!(attrs.language_id, 0);
        let attrs = grammar.basic_attributes(&Scope::new("string.quoted.js"));
        assert_eq!(attrs.token_type, Some(StandardTokenType::String));
    }
}
