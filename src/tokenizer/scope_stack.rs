use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::grammars::CompiledGrammar;
use crate::metadata::{Metadata, StandardTokenType};
use crate::scope::Scope;
use crate::themes::{CompiledTheme, DEFAULT_BACKGROUND_ID, DEFAULT_FOREGROUND_ID, FontStyle};

/// Where the metadata of a new scope comes from: the grammar being tokenized knows the
/// language and token type, the theme knows the style.
#[derive(Clone, Copy)]
pub(crate) struct AttributeSource<'a> {
    pub grammar: &'a CompiledGrammar,
    pub theme: &'a CompiledTheme,
    pub cache: &'a ScopeCache,
}

impl AttributeSource<'_> {
    fn metadata_for(&self, parent: Metadata, scope: &Scope, ancestors: Ancestors<'_>) -> Metadata {
        let mut metadata = parent;
        let attrs = self.grammar.basic_attributes(scope);
        if attrs.language_id != 0 {
            metadata = metadata.with_language_id(attrs.language_id);
        }
        if let Some(token_type) = attrs.token_type {
            metadata = metadata.with_token_type(token_type);
        }
        self.theme
            .match_leaf(scope, ancestors)
            .apply_to_metadata(metadata)
    }
}

/// Below that many entries the cache is never pruned
const MIN_PRUNE_LEN: usize = 4096;

/// Nodes already pushed, keyed by (parent node address, scope name).
///
/// Values are weak: a live child keeps its parent alive, so the address in the key can't
/// belong to another node while the child can be upgraded. Dead entries are dropped once
/// the map doubles in size.
#[derive(Default)]
pub(crate) struct ScopeCache {
    children: papaya::HashMap<(usize, Scope), Weak<ScopeNode>>,
    prune_at: AtomicUsize,
}

impl ScopeCache {
    fn child(
        &self,
        parent: &ScopeStack,
        scope: Scope,
        make: impl FnOnce(Scope) -> ScopeStack,
    ) -> ScopeStack {
        let key = (Arc::as_ptr(&parent.0) as usize, scope);
        let children = self.children.pin();
        if let Some(node) = children.get(&key).and_then(Weak::upgrade) {
            return ScopeStack(node);
        }

        let child = make(key.1.clone());
        children.insert(key, Arc::downgrade(&child.0));
        if children.len() > self.prune_at.load(Ordering::Relaxed).max(MIN_PRUNE_LEN) {
            children.retain(|_, node| node.strong_count() > 0);
            self.prune_at.store(children.len() * 2, Ordering::Relaxed);
        }
        child
    }

    /// Forgets every node, needed when the theme or a grammar changes.
    pub fn clear(&self) {
        self.children.pin().clear();
        self.prune_at.store(0, Ordering::Relaxed);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.children.len()
    }
}

pub(crate) struct ScopeNode {
    parent: Option<ScopeStack>,
    scope: Scope,
    metadata: Metadata,
    depth: usize,
}

impl Drop for ScopeNode {
    // unlinks the parents in a loop: dropping a long list recursively overflows the stack
    fn drop(&mut self) {
        let mut parent = self.parent.take();
        while let Some(ScopeStack(node)) = parent {
            parent = match Arc::into_inner(node) {
                Some(mut node) => node.parent.take(),
                None => None,
            };
        }
    }
}

/// Scopes from a node up to the root, innermost first.
#[derive(Clone)]
pub(crate) struct Ancestors<'a>(Option<&'a ScopeStack>);

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Scope;

    fn next(&mut self) -> Option<&'a Scope> {
        let node = self.0?;
        self.0 = node.parent();
        Some(node.scope())
    }
}

/// A persistent list of scopes, innermost last.
///
/// Pushing creates a new leaf pointing at the existing list so every prefix is shared.
/// Each node knows the metadata of the full path ending at it.
#[derive(Clone)]
pub struct ScopeStack(Arc<ScopeNode>);

impl ScopeStack {
    pub(crate) fn root(scope: Scope, source: AttributeSource<'_>) -> Self {
        let base = Metadata::new(
            source.grammar.language_id,
            StandardTokenType::Other,
            FontStyle::empty(),
            DEFAULT_FOREGROUND_ID,
            DEFAULT_BACKGROUND_ID,
        );
        let metadata = source.metadata_for(base, &scope, Ancestors(None));
        Self(Arc::new(ScopeNode {
            parent: None,
            scope,
            metadata,
            depth: 1,
        }))
    }

    fn push(&self, scope: Scope, source: AttributeSource<'_>) -> Self {
        source.cache.child(self, scope, |scope| {
            let metadata = source.metadata_for(self.0.metadata, &scope, self.ancestors());
            Self(Arc::new(ScopeNode {
                parent: Some(self.clone()),
                scope,
                metadata,
                depth: self.0.depth + 1,
            }))
        })
    }

    /// Pushes every space separated scope of `names`, returns the same list if there are none.
    pub(crate) fn push_attributed(&self, names: Option<&str>, source: AttributeSource<'_>) -> Self {
        let Some(names) = names else {
            return self.clone();
        };
        let mut current = self.clone();
        for name in names.split_whitespace() {
            current = current.push(Scope::new(name), source);
        }
        current
    }

    /// The innermost scope
    pub fn scope(&self) -> &Scope {
        &self.0.scope
    }

    pub fn metadata(&self) -> Metadata {
        self.0.metadata
    }

    pub fn parent(&self) -> Option<&ScopeStack> {
        self.0.parent.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.0.depth
    }

    pub(crate) fn ancestors(&self) -> Ancestors<'_> {
        Ancestors(Some(self))
    }

    /// All the scopes, outermost first
    pub fn generate_scopes(&self) -> Vec<Scope> {
        let mut out: Vec<Scope> = self.ancestors().cloned().collect();
        out.reverse();
        out
    }
}

impl PartialEq for ScopeStack {
    fn eq(&self, other: &Self) -> bool {
        let mut a = self;
        let mut b = other;
        loop {
            if Arc::ptr_eq(&a.0, &b.0) {
                return true;
            }
            if a.0.depth != b.0.depth || a.0.scope != b.0.scope || a.0.metadata != b.0.metadata {
                return false;
            }
            match (a.parent(), b.parent()) {
                (Some(pa), Some(pb)) => {
                    a = pa;
                    b = pb;
                }
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl Eq for ScopeStack {}

impl fmt::Debug for ScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scopes = self.generate_scopes();
        write!(f, "[")?;
        for (i, scope) in scopes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{scope}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::{GrammarConfig, GrammarId, RawGrammar};
    use crate::themes::{Color, Style, StyleModifier, ThemeRule, ThemeType};

    fn grammar() -> CompiledGrammar {
        let raw: RawGrammar = serde_json::from_str(r#"{"scopeName": "source.test"}"#).unwrap();
        CompiledGrammar::from_raw_grammar(
            raw,
            GrammarId(0),
            GrammarConfig::new(4).embedded_language("source.css", 7),
        )
    }

    fn theme() -> CompiledTheme {
        CompiledTheme::from_rules(
            "test",
            ThemeType::Dark,
            Style::default(),
            vec![
                ThemeRule::new(
                    "string",
                    StyleModifier {
                        foreground: Some(Color::rgb(255, 0, 0)),
                        font_style: Some(FontStyle::ITALIC),
                        ..Default::default()
                    },
                ),
                ThemeRule::new(
                    "string.quoted",
                    StyleModifier {
                        foreground: Some(Color::rgb(0, 255, 0)),
                        ..Default::default()
                    },
                ),
            ],
        )
    }

    #[test]
    fn metadata_is_inherited_per_field() {
        let grammar = grammar();
        let theme = theme();
        let cache = ScopeCache::default();
        let source = AttributeSource {
            grammar: &grammar,
            theme: &theme,
            cache: &cache,
        };

        let root = ScopeStack::root(Scope::new("source.test"), source);
        assert_eq!(root.metadata().language_id(), 4);
        assert_eq!(root.metadata().foreground(), DEFAULT_FOREGROUND_ID);

        let string = root.push_attributed(Some("string.quoted.double"), source);
        let red = theme.color_map().iter().position(|c| *c == Color::rgb(255, 0, 0));
        let green = theme.color_map().iter().position(|c| *c == Color::rgb(0, 255, 0));
        assert_eq!(string.metadata().foreground() as usize, green.unwrap());
        assert_ne!(red, green);
        // italic comes from the less specific `string` rule
        assert_eq!(string.metadata().font_style(), FontStyle::ITALIC);
        assert_eq!(string.metadata().token_type(), StandardTokenType::String);

        let css = string.push_attributed(Some("meta.embedded source.css"), source);
        assert_eq!(css.depth(), 4);
        assert_eq!(css.metadata().language_id(), 7);
        assert_eq!(css.metadata().token_type(), StandardTokenType::Other);
        assert_eq!(css.metadata().font_style(), FontStyle::ITALIC);
        assert_eq!(
            css.generate_scopes(),
            vec![
                Scope::new("source.test"),
                Scope::new("string.quoted.double"),
                Scope::new("meta.embedded"),
                Scope::new("source.css"),
            ]
        );
    }

    #[test]
    fn equality_is_structural() {
        let grammar = grammar();
        let theme = CompiledTheme::default();
        let cache = ScopeCache::default();
        let source = AttributeSource {
            grammar: &grammar,
            theme: &theme,
            cache: &cache,
        };

        let root = ScopeStack::root(Scope::new("source.test"), source);
        let a = root.push_attributed(Some("comment.line"), source);
        let b = root.push_attributed(Some("comment.line"), source);
        assert_eq!(a, b);
        assert_ne!(a, root.push_attributed(Some("comment.block"), source));
        assert_eq!(root.push_attributed(None, source), root);
        assert_eq!(root.push_attributed(Some("  "), source), root);
    }

    #[test]
    fn pushing_the_same_scope_twice_reuses_the_node() {
        let grammar = grammar();
        let theme = theme();
        let cache = ScopeCache::default();
        let source = AttributeSource {
            grammar: &grammar,
            theme: &theme,
            cache: &cache,
        };

        let root = ScopeStack::root(Scope::new("source.test"), source);
        let a = root.push_attributed(Some("string.quoted"), source);
        let b = root.push_attributed(Some("string.quoted"), source);
        assert!(Arc::ptr_eq(&a.0, &b.0));
        assert_eq!(cache.len(), 1);

        // a dead node is rebuilt, not resurrected
        drop((a, b));
        let c = root.push_attributed(Some("string.quoted"), source);
        assert_eq!(c.generate_scopes().len(), 2);
        assert_eq!(cache.len(), 1);

        cache.clear();
        let d = root.push_attributed(Some("string.quoted"), source);
        assert!(!Arc::ptr_eq(&c.0, &d.0));
        assert_eq!(c, d);
    }

    #[test]
    fn deep_lists_can_be_built_and_dropped() {
        let grammar = grammar();
        let theme = theme();
        let cache = ScopeCache::default();
        let source = AttributeSource {
            grammar: &grammar,
            theme: &theme,
            cache: &cache,
        };

        let mut stack = ScopeStack::root(Scope::new("source.test"), source);
        for _ in 0..200_000 {
            stack = stack.push_attributed(Some("meta.block string"), source);
        }
        assert_eq!(stack.depth(), 400_001);
        assert_eq!(stack.ancestors().count(), 400_001);
        assert_eq!(stack.metadata().token_type(), StandardTokenType::String);
        assert_eq!(stack.clone(), stack);
        drop(stack);
        cache.clear();
    }
}
