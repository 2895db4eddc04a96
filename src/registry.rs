use std::collections::{HashMap, HashSet};
use std::fmt;
use std::iter;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, TmResult};
use crate::grammars::{
    Candidate, CompiledGrammar, GlobalRuleRef, GrammarConfig, GrammarId, Injection, PatternRef,
    PatternSet, RawGrammar, Reference, Regex, Rule,
};
use crate::scope::Scope;
use crate::themes::CompiledTheme;
use crate::tokenizer::anchors::AnchorActive;
use crate::tokenizer::{
    AttributeSource, BinaryTokenizeLineResult, ScopeCache, ScopeStack, StateStack,
    TokenizeLineResult, TokenizeOptions, Tokenizer,
};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

type ScannerKey = (GrammarId, GlobalRuleRef, AnchorActive);

/// Holds all the grammars and the theme used to compute token metadata.
///
/// Grammars can refer to each other (includes, injections) so they are only usable through
/// the registry: get a [`Grammar`] handle with [`Registry::grammar`] to tokenize.
pub struct Registry {
    /// Makes sure states are only used with the registry that created them
    id: u64,
    // Vector of compiled grammars for ID-based access
    pub(crate) grammars: Vec<CompiledGrammar>,
    // grammar scope name -> grammar ID, this is what grammars use to refer to each other
    grammar_id_by_scope_name: HashMap<String, GrammarId>,
    // grammar name -> grammar ID, this is the name that end user will refer to
    grammar_id_by_name: HashMap<String, GrammarId>,
    theme: CompiledTheme,
    // scope nodes already built, their metadata depends on the theme and grammars
    pub(crate) scope_cache: ScopeCache,
    // (base grammar, rule) -> the rules that can match inside that rule, includes resolved
    patterns: papaya::HashMap<(GrammarId, GlobalRuleRef), Arc<[GlobalRuleRef]>>,
    scanners: papaya::HashMap<ScannerKey, Arc<PatternSet>>,
    injection_scanners: papaya::HashMap<ScannerKey, Arc<PatternSet>>,
    // base grammar -> injections sorted by precedence
    injections: papaya::HashMap<GrammarId, Arc<[Injection]>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            grammars: Vec::new(),
            grammar_id_by_scope_name: HashMap::new(),
            grammar_id_by_name: HashMap::new(),
            theme: CompiledTheme::default(),
            scope_cache: ScopeCache::default(),
            patterns: papaya::HashMap::new(),
            scanners: papaya::HashMap::new(),
            injection_scanners: papaya::HashMap::new(),
            injections: papaya::HashMap::new(),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a grammar with an unknown language id.
    pub fn add_grammar(&mut self, raw_grammar: RawGrammar) -> TmResult<GrammarId> {
        self.add_grammar_with_config(raw_grammar, GrammarConfig::default())
    }

    /// Adds a grammar, replacing any grammar with the same scope name.
    pub fn add_grammar_with_config(
        &mut self,
        raw_grammar: RawGrammar,
        config: GrammarConfig,
    ) -> TmResult<GrammarId> {
        if raw_grammar.scope_name.trim().is_empty() {
            return Err(Error::MissingScopeName(raw_grammar.lookup_name().to_owned()));
        }

        let grammar_id = match self.grammar_id_by_scope_name.get(&raw_grammar.scope_name) {
            Some(id) => *id,
            None => match u16::try_from(self.grammars.len()) {
                Ok(id) => GrammarId(id),
                Err(_) => {
                    return Err(Error::TooManyGrammars {
                        scope_name: raw_grammar.scope_name,
                    });
                }
            },
        };
        let grammar = CompiledGrammar::from_raw_grammar(raw_grammar, grammar_id, config);
        for regex in &grammar.regexes {
            if let Err(err) = regex.validate() {
                log::warn!(
                    "Grammar {} has an invalid regex {:?}: {err}",
                    grammar.scope_name,
                    regex.pattern()
                );
            }
        }

        self.grammar_id_by_scope_name
            .insert(grammar.scope_name.clone(), grammar_id);
        self.grammar_id_by_name
            .insert(grammar.name.clone(), grammar_id);
        if grammar_id.as_index() < self.grammars.len() {
            self.grammars[grammar_id.as_index()] = grammar;
        } else {
            self.grammars.push(grammar);
        }

        // includes and injections might now resolve differently
        self.patterns = papaya::HashMap::new();
        self.scanners = papaya::HashMap::new();
        self.injection_scanners = papaya::HashMap::new();
        self.injections = papaya::HashMap::new();
        self.scope_cache.clear();
        Ok(grammar_id)
    }

    /// Reads the file and add it as a grammar.
    pub fn add_grammar_from_path(&mut self, path: impl AsRef<Path>) -> TmResult<GrammarId> {
        let raw_grammar = RawGrammar::load_from_file(path)?;
        self.add_grammar(raw_grammar)
    }

    /// Adds an alias for the given grammar
    pub fn add_alias(&mut self, grammar_name: &str, alias: &str) {
        if let Some(grammar_id) = self.grammar_id_by_name.get(grammar_name) {
            self.grammar_id_by_name
                .insert(alias.to_string(), *grammar_id);
        }
    }

    /// The theme used for the metadata of tokens. States created before keep the
    /// metadata of the previous theme.
    pub fn set_theme(&mut self, theme: CompiledTheme) {
        self.theme = theme;
        self.scope_cache.clear();
    }

    pub fn theme(&self) -> &CompiledTheme {
        &self.theme
    }

    /// Checks whether the given grammar is available in the registry with its name,
    /// scope name or aliases
    pub fn contains_grammar(&self, name: &str) -> bool {
        self.grammar_id(name).is_some()
    }

    fn grammar_id(&self, name: &str) -> Option<GrammarId> {
        self.grammar_id_by_name
            .get(name)
            .or_else(|| self.grammar_id_by_scope_name.get(name))
            .copied()
    }

    /// Finds a grammar by name, alias or scope name.
    pub fn grammar(&self, name: &str) -> Option<Grammar<'_>> {
        self.grammar_id(name).map(|id| Grammar { registry: self, id })
    }

    /// The grammar returned by [`Registry::add_grammar`].
    pub fn grammar_by_id(&self, id: GrammarId) -> Option<Grammar<'_>> {
        (id.as_index() < self.grammars.len()).then_some(Grammar { registry: self, id })
    }

    /// Same as [`Registry::grammar`] but errors if the grammar is missing.
    pub fn require_grammar(&self, name: &str) -> TmResult<Grammar<'_>> {
        self.grammar(name)
            .ok_or_else(|| Error::GrammarNotFound(name.to_string()))
    }

    pub(crate) fn compiled_grammar(&self, id: GrammarId) -> &CompiledGrammar {
        &self.grammars[id.as_index()]
    }

    fn resolve_reference(
        &self,
        base: GrammarId,
        grammar: GrammarId,
        reference: &Reference,
    ) -> Option<GlobalRuleRef> {
        match reference {
            Reference::Self_ => Some(GlobalRuleRef::root(grammar)),
            Reference::Base => Some(GlobalRuleRef::root(base)),
            Reference::Grammar(scope) => {
                let found = self.grammar_id_by_scope_name.get(scope);
                if found.is_none() {
                    log::warn!("Include of unknown grammar {scope:?}, ignoring it");
                }
                found.map(|id| GlobalRuleRef::root(*id))
            }
            Reference::GrammarRule(scope, name) => {
                let found = self.grammar_id_by_scope_name.get(scope).and_then(|id| {
                    self.compiled_grammar(*id)
                        .repository_rule(name)
                        .map(|rule| GlobalRuleRef { grammar: *id, rule })
                });
                if found.is_none() {
                    log::warn!("Include of unknown rule {scope}#{name}, ignoring it");
                }
                found
            }
        }
    }

    fn collect_rule(
        &self,
        base: GrammarId,
        rule_ref: GlobalRuleRef,
        visited: &mut HashSet<GlobalRuleRef>,
        out: &mut Vec<GlobalRuleRef>,
    ) {
        if !visited.insert(rule_ref) {
            return;
        }
        match self.compiled_grammar(rule_ref.grammar).rule(rule_ref.rule) {
            Rule::Match(_) | Rule::BeginEnd(_) | Rule::BeginWhile(_) => out.push(rule_ref),
            Rule::IncludeOnly(r) => {
                self.collect_patterns(base, rule_ref.grammar, &r.patterns, visited, out);
            }
            Rule::Noop => {}
        }
    }

    fn collect_patterns(
        &self,
        base: GrammarId,
        grammar: GrammarId,
        patterns: &[PatternRef],
        visited: &mut HashSet<GlobalRuleRef>,
        out: &mut Vec<GlobalRuleRef>,
    ) {
        for pattern in patterns {
            let target = match pattern {
                PatternRef::Rule(rule) => GlobalRuleRef {
                    grammar,
                    rule: *rule,
                },
                PatternRef::Reference(reference) => {
                    match self.resolve_reference(base, grammar, reference) {
                        Some(target) => target,
                        None => continue,
                    }
                }
            };
            self.collect_rule(base, target, visited, out);
        }
    }

    /// The rules that can match inside `rule_ref`, in order, with includes flattened.
    /// Computed on first use.
    pub(crate) fn rule_patterns(
        &self,
        base: GrammarId,
        rule_ref: GlobalRuleRef,
    ) -> Arc<[GlobalRuleRef]> {
        let cache = self.patterns.pin();
        if let Some(patterns) = cache.get(&(base, rule_ref)) {
            return patterns.clone();
        }

        let grammar = self.compiled_grammar(rule_ref.grammar);
        let rule = grammar.rule(rule_ref.rule);
        let mut visited = HashSet::new();
        // a begin rule can include itself, a container including itself is a cycle
        if matches!(rule, Rule::IncludeOnly(_)) {
            visited.insert(rule_ref);
        }
        let mut out = Vec::new();
        self.collect_patterns(base, rule_ref.grammar, rule.patterns(), &mut visited, &mut out);

        #[cfg(feature = "debug")]
        log::debug!(
            "[rule_patterns] {rule_ref:?} in {}: {} patterns",
            grammar.scope_name,
            out.len()
        );
        let patterns: Arc<[GlobalRuleRef]> = out.into();
        cache.insert((base, rule_ref), patterns.clone());
        patterns
    }

    fn to_candidates<'a>(
        &'a self,
        rules: &'a [GlobalRuleRef],
    ) -> impl Iterator<Item = (Candidate, &'a Regex)> + 'a {
        rules.iter().filter_map(|r| {
            self.compiled_grammar(r.grammar)
                .rule_regex(r.rule)
                .map(|re| (Candidate::Rule(*r), re))
        })
    }

    /// The patterns to search when `rule_ref` is at the top of the stack: its own patterns
    /// plus its end pattern. Cached unless the end pattern was resolved with backreferences.
    pub(crate) fn rule_scanner(
        &self,
        base: GrammarId,
        rule_ref: GlobalRuleRef,
        resolved_end: Option<&Regex>,
        anchors: AnchorActive,
    ) -> Arc<PatternSet> {
        let grammar = self.compiled_grammar(rule_ref.grammar);
        let rule = grammar.rule(rule_ref.rule);
        // only end patterns are part of the scanner, while patterns are checked separately
        let resolved_end = resolved_end.filter(|_| matches!(rule, Rule::BeginEnd(_)));

        let key = (base, rule_ref, anchors);
        if resolved_end.is_none()
            && let Some(scanner) = self.scanners.pin().get(&key)
        {
            return scanner.clone();
        }

        let patterns = self.rule_patterns(base, rule_ref);
        let rules = self.to_candidates(&patterns);
        let pattern_set = match rule {
            Rule::BeginEnd(r) => {
                let end = (
                    Candidate::End,
                    resolved_end.unwrap_or_else(|| grammar.regex(r.end)),
                );
                if r.apply_end_pattern_last {
                    PatternSet::new(rules.chain(iter::once(end)), anchors)
                } else {
                    PatternSet::new(iter::once(end).chain(rules), anchors)
                }
            }
            _ => PatternSet::new(rules, anchors),
        };

        #[cfg(feature = "debug")]
        log::debug!("[rule_scanner] {rule_ref:?} ({anchors:?}): {pattern_set:?}");
        let pattern_set = Arc::new(pattern_set);
        if resolved_end.is_none() {
            self.scanners.pin().insert(key, pattern_set.clone());
        }
        pattern_set
    }

    /// The patterns of an injected rule, as if it was included where it matches.
    pub(crate) fn injection_scanner(
        &self,
        base: GrammarId,
        rule_ref: GlobalRuleRef,
        anchors: AnchorActive,
    ) -> Arc<PatternSet> {
        let cache = self.injection_scanners.pin();
        let key = (base, rule_ref, anchors);
        if let Some(scanner) = cache.get(&key) {
            return scanner.clone();
        }

        let mut rules = Vec::new();
        self.collect_rule(base, rule_ref, &mut HashSet::new(), &mut rules);
        let pattern_set = Arc::new(PatternSet::new(self.to_candidates(&rules), anchors));
        cache.insert(key, pattern_set.clone());
        pattern_set
    }

    /// Injections applying when tokenizing with `base`: its own `injections` first, then
    /// grammars declaring `injectTo` it. Stable sorted by precedence.
    pub(crate) fn injections(&self, base: GrammarId) -> Arc<[Injection]> {
        let cache = self.injections.pin();
        if let Some(injections) = cache.get(&base) {
            return injections.clone();
        }

        let grammar = self.compiled_grammar(base);
        let mut result = grammar.injections.clone();
        for injector in &self.grammars {
            if !injector.inject_to.contains(&grammar.scope_name) {
                continue;
            }
            // in injector grammars, there should be just a root rule and we inject it all
            for matcher in &injector.injection_selector {
                result.push(Injection {
                    matcher: matcher.matcher.clone(),
                    precedence: matcher.precedence,
                    rule: GlobalRuleRef::root(injector.id),
                });
            }
        }
        result.sort_by_key(|injection| injection.precedence);

        let injections: Arc<[Injection]> = result.into();
        cache.insert(base, injections.clone());
        injections
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.grammars.iter().map(|g| &g.scope_name).collect();
        names.sort();
        f.debug_struct("Registry")
            .field("id", &self.id)
            .field("grammars", &names)
            .field("theme", &self.theme.name)
            .finish()
    }
}

/// A grammar of a registry, what you tokenize lines with.
#[derive(Clone, Copy)]
pub struct Grammar<'r> {
    registry: &'r Registry,
    id: GrammarId,
}

impl<'r> Grammar<'r> {
    pub fn id(&self) -> GrammarId {
        self.id
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn compiled(&self) -> &'r CompiledGrammar {
        self.registry.compiled_grammar(self.id)
    }

    pub fn name(&self) -> &'r str {
        &self.compiled().name
    }

    pub fn scope_name(&self) -> &'r str {
        &self.compiled().scope_name
    }

    /// The state to tokenize the first line of a document with
    pub fn initial_state(&self) -> StateStack {
        let grammar = self.compiled();
        let scopes = ScopeStack::root(
            Scope::new(&grammar.scope_name),
            AttributeSource {
                grammar,
                theme: self.registry.theme(),
                cache: &self.registry.scope_cache,
            },
        );
        StateStack::initial(self.registry.id, self.id, scopes)
    }

    fn check_state(&self, prev: Option<&StateStack>) -> TmResult<StateStack> {
        let Some(prev) = prev else {
            return Ok(self.initial_state());
        };
        if prev.origin() != self.registry.id || prev.root_grammar() != self.id {
            return Err(Error::ForeignState {
                grammar: self.scope_name().to_owned(),
            });
        }
        Ok(prev.clone())
    }

    /// Tokenizes a line without its line terminator. `prev` is the state returned for the
    /// previous line, `None` for the first line of a document.
    pub fn tokenize_line(
        &self,
        line: &str,
        prev: Option<&StateStack>,
    ) -> TmResult<TokenizeLineResult> {
        self.tokenize_line_with_options(line, prev, TokenizeOptions::default())
    }

    pub fn tokenize_line_with_options(
        &self,
        line: &str,
        prev: Option<&StateStack>,
        options: TokenizeOptions,
    ) -> TmResult<TokenizeLineResult> {
        let prev = self.check_state(prev)?;
        Ok(Tokenizer::new(self.registry, self.id, options).tokenize_line(line, prev))
    }

    /// Same as [`Grammar::tokenize_line`] but tokens are `(start, metadata)` pairs.
    pub fn tokenize_line_binary(
        &self,
        line: &str,
        prev: Option<&StateStack>,
    ) -> TmResult<BinaryTokenizeLineResult> {
        self.tokenize_line_binary_with_options(line, prev, TokenizeOptions::default())
    }

    pub fn tokenize_line_binary_with_options(
        &self,
        line: &str,
        prev: Option<&StateStack>,
        options: TokenizeOptions,
    ) -> TmResult<BinaryTokenizeLineResult> {
        let prev = self.check_state(prev)?;
        Ok(Tokenizer::new(self.registry, self.id, options).tokenize_line_binary(line, prev))
    }
}

impl fmt::Debug for Grammar<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grammar")
            .field("id", &self.id)
            .field("scope_name", &self.scope_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> RawGrammar {
        serde_json::from_str(json).unwrap()
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .add_grammar(raw(
                r##"{
                    "name": "Outer",
                    "scopeName": "source.outer",
                    "patterns": [
                        {"include": "#block"},
                        {"include": "source.inner#word"},
                        {"include": "source.missing"}
                    ],
                    "repository": {
                        "block": {"begin": "\\{", "end": "\\}", "patterns": [{"include": "#block"}, {"include": "$self"}]}
                    },
                    "injections": {"R:source.outer": {"patterns": [{"match": "r"}]}}
                }"##,
            ))
            .unwrap();
        registry
            .add_grammar(raw(
                r##"{
                    "scopeName": "source.inner",
                    "repository": {"word": {"match": "\\w+"}},
                    "injectTo": ["source.outer"],
                    "injectionSelector": "L:source.outer"
                }"##,
            ))
            .unwrap();
        registry
    }

    #[test]
    fn flattens_includes_across_grammars() {
        let registry = registry();
        let outer = registry.grammar("Outer").unwrap();
        let root = registry.rule_patterns(outer.id(), GlobalRuleRef::root(outer.id()));
        assert_eq!(root.len(), 2);
        let block = root[0];
        assert!(matches!(
            outer.compiled().rule(block.rule),
            Rule::BeginEnd(_)
        ));
        assert_eq!(root[1].grammar, registry.grammar("source.inner").unwrap().id());

        // the block rule can contain itself
        let inside_block = registry.rule_patterns(outer.id(), block);
        assert_eq!(&inside_block[..], &root[..]);
    }

    #[test]
    fn end_pattern_comes_first() {
        let registry = registry();
        let outer = registry.grammar("source.outer").unwrap();
        let block = registry.rule_patterns(outer.id(), GlobalRuleRef::root(outer.id()))[0];
        let scanner = registry.rule_scanner(outer.id(), block, None, AnchorActive::None);
        assert_eq!(scanner.len(), 3);
        // `}` and a word at the same position: the end wins
        let m = scanner.find_at("}x\n", 0).unwrap();
        assert_eq!(m.candidate, Candidate::End);
    }

    #[test]
    fn injections_are_sorted_by_precedence() {
        let registry = registry();
        let outer = registry.grammar("Outer").unwrap();
        let injections = registry.injections(outer.id());
        let precedences: Vec<_> = injections.iter().map(|i| i.precedence).collect();
        assert_eq!(
            precedences,
            vec![
                crate::grammars::InjectionPrecedence::Left,
                crate::grammars::InjectionPrecedence::Right
            ]
        );
        assert_eq!(
            injections[0].rule,
            GlobalRuleRef::root(registry.grammar("source.inner").unwrap().id())
        );
    }

    #[test]
    fn rejects_grammars_without_scope_name() {
        let mut registry = Registry::new();
        let err = registry.add_grammar(raw(r#"{"name": "nope"}"#)).unwrap_err();
        assert!(matches!(err, Error::MissingScopeName(name) if name == "nope"));
    }

    #[test]
    fn rejects_states_from_other_registries() {
        let a = registry();
        let b = registry();
        let state = a
            .grammar("Outer")
            .unwrap()
            .tokenize_line("x", None)
            .unwrap()
            .rule_stack;
        let err = b
            .grammar("Outer")
            .unwrap()
            .tokenize_line("x", Some(&state))
            .unwrap_err();
        assert!(matches!(err, Error::ForeignState { .. }));

        let inner = a.grammar("source.inner").unwrap();
        assert!(inner.tokenize_line("x", Some(&state)).is_err());
        assert!(a.grammar("Outer").unwrap().tokenize_line("x", Some(&state)).is_ok());
    }

    #[test]
    fn replacing_a_grammar_keeps_its_id() {
        let mut registry = registry();
        let before = registry.grammar("source.inner").unwrap().id();
        let after = registry
            .add_grammar(raw(r#"{"scopeName": "source.inner", "patterns": [{"match": "x"}]}"#))
            .unwrap();
        assert_eq!(before, after);
        assert_eq!(registry.grammars.len(), 2);
    }

    #[test]
    fn grammar_ids_do_not_wrap() {
        let mut registry = Registry::new();
        registry.grammars = (0..=u16::MAX)
            .map(|i| {
                let raw = RawGrammar {
                    scope_name: format!("source.g{i}"),
                    ..Default::default()
                };
                CompiledGrammar::from_raw_grammar(raw, GrammarId(i), GrammarConfig::default())
            })
            .collect();

        let err = registry
            .add_grammar(raw(r#"{"scopeName": "source.extra"}"#))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TooManyGrammars { scope_name } if scope_name == "source.extra"
        ));
        assert_eq!(registry.grammars.len(), usize::from(u16::MAX) + 1);
        assert!(registry.grammar("source.extra").is_none());
    }
}
