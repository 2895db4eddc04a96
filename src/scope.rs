//! Scope names like "string.quoted.double.js"
//!
//! A scope is a dot-separated list of atoms. Matching in themes and injection selectors
//! is always done atom-wise: `string.quoted` is a prefix of `string.quoted.double` but
//! `string.quo` is not.

use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

/// A single scope name, cheap to clone.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Scope(Arc<str>);

impl Scope {
    /// Create a new scope from a dot-separated string
    pub fn new(s: &str) -> Scope {
        Scope(Arc::from(s.trim()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of atoms in this scope
    pub fn len(&self) -> usize {
        if self.0.is_empty() {
            0
        } else {
            self.0.split('.').count()
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the atoms of the scope
    pub fn atoms(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|a| !a.is_empty())
    }

    /// Check if this scope is an atom-wise prefix of another scope.
    /// The empty scope is a prefix of everything.
    #[inline]
    pub fn is_prefix_of(&self, other: &Scope) -> bool {
        is_scope_prefix(&self.0, &other.0)
    }
}

/// `prefix` matches `scope` if they are equal or if `scope` continues with a `.` right
/// after `prefix`.
#[inline]
pub(crate) fn is_scope_prefix(prefix: &str, scope: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match scope.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope(\"{}\")", self.0)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Scope {
    fn from(value: &str) -> Self {
        Scope::new(value)
    }
}

impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_scope_creation() {
        let scope = Scope::new("source.rust.meta.function");
        assert_eq!(scope.len(), 4);
        assert_eq!(scope.as_str(), "source.rust.meta.function");
        assert_eq!(
            scope.atoms().collect::<Vec<_>>(),
            vec!["source", "rust", "meta", "function"]
        );
    }

    #[test]
    fn test_empty_scope() {
        let scope = Scope::new("  ");
        assert_eq!(scope.len(), 0);
        assert!(scope.is_empty());
        assert!(scope.is_prefix_of(&Scope::new("anything")));
    }

    #[test]
    fn test_prefix_matching() {
        let prefix = Scope::new("source.rust");
        let full = Scope::new("source.rust.meta.function");
        let different = Scope::new("source.javascript");
        let longer_atom = Scope::new("source.rustacean");

        assert!(prefix.is_prefix_of(&full));
        assert!(prefix.is_prefix_of(&prefix));
        assert!(!prefix.is_prefix_of(&different));
        assert!(!prefix.is_prefix_of(&longer_atom));
        assert!(!full.is_prefix_of(&prefix));
    }
}
