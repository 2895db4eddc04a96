use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::TmResult;

/// Capture groups that assign scope names to parts of a match, keyed by group number.
///
/// # Examples
/// ```json
/// {
///   "1": { "name": "entity.name.function.js" },
///   "2": { "name": "meta.parameters.js", "patterns": [{ "include": "#parameter" }] }
/// }
/// ```
///
/// Some grammars use an array instead of an object, the index being the group number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCaptures(pub BTreeMap<usize, RawRule>);

impl RawCaptures {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for RawCaptures {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CapturesVisitor;

        impl<'de> Visitor<'de> for CapturesVisitor {
            type Value = RawCaptures;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map or an array of captures")
            }

            fn visit_map<V>(self, mut map: V) -> Result<RawCaptures, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut out = BTreeMap::new();
                while let Some(key) = map.next_key::<String>()? {
                    match key.parse::<usize>() {
                        Ok(index) => {
                            out.insert(index, map.next_value()?);
                        }
                        Err(_) => {
                            let _: de::IgnoredAny = map.next_value()?;
                        }
                    }
                }
                Ok(RawCaptures(out))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<RawCaptures, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut out = BTreeMap::new();
                let mut index = 0;
                while let Some(rule) = seq.next_element::<RawRule>()? {
                    out.insert(index, rule);
                    index += 1;
                }
                Ok(RawCaptures(out))
            }
        }

        deserializer.deserialize_any(CapturesVisitor)
    }
}

/// `applyEndPatternLast` is either a bool or 0/1 depending on the grammar
fn deserialize_bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrInt {
        Bool(bool),
        Int(i64),
    }

    Ok(match BoolOrInt::deserialize(deserializer)? {
        BoolOrInt::Bool(b) => b,
        BoolOrInt::Int(i) => i != 0,
    })
}

/// Repository entries are usually rules but some grammars use a bare array of patterns
fn deserialize_repository<'de, D>(deserializer: D) -> Result<HashMap<String, RawRule>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RepositoryEntry {
        Patterns(Vec<RawRule>),
        Rule(RawRule),
    }

    let entries = HashMap::<String, RepositoryEntry>::deserialize(deserializer)?;
    Ok(entries
        .into_iter()
        .map(|(name, entry)| {
            let rule = match entry {
                RepositoryEntry::Rule(r) => r,
                RepositoryEntry::Patterns(patterns) => RawRule {
                    patterns,
                    ..Default::default()
                },
            };
            (name, rule)
        })
        .collect())
}

/// Injections keep their declaration order: it breaks ties between injections of the
/// same priority.
fn deserialize_ordered_map<'de, D>(deserializer: D) -> Result<Vec<(String, RawRule)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedVisitor;

    impl<'de> Visitor<'de> for OrderedVisitor {
        type Value = Vec<(String, RawRule)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of injection selectors to rules")
        }

        fn visit_map<V>(self, mut map: V) -> Result<Self::Value, V::Error>
        where
            V: MapAccess<'de>,
        {
            let mut out = Vec::new();
            while let Some((key, value)) = map.next_entry::<String, RawRule>()? {
                out.push((key, value));
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(OrderedVisitor)
}

/// A single rule of a TextMate grammar, in the shape found in the JSON files.
///
/// What kind of rule it is depends on which fields are set:
///
/// - `include` only: a reference to another rule (`#name`, `$self`, `$base`, `source.x`
///   or `source.x#name`)
/// - `match`: a single-line pattern
/// - `begin` + `end`: a region that can span several lines
/// - `begin` + `while`: a region that continues as long as each line matches `while`
/// - only `patterns`: a container of other rules
///
/// # Examples
/// ```json
/// {
///   "name": "string.quoted.double.js",
///   "begin": "\"",
///   "end": "\"",
///   "beginCaptures": { "0": { "name": "punctuation.definition.string.begin.js" } },
///   "patterns": [{ "match": "\\\\.", "name": "constant.character.escape.js" }]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"), default)]
pub struct RawRule {
    pub include: Option<String>,
    /// Can contain several space separated scopes and `$1`/`${1:/downcase}` templates
    pub name: Option<String>,
    pub content_name: Option<String>,
    #[serde(rename(deserialize = "match"))]
    pub match_: Option<String>,
    pub captures: RawCaptures,
    pub begin: Option<String>,
    pub begin_captures: RawCaptures,
    pub end: Option<String>,
    pub end_captures: RawCaptures,
    #[serde(rename(deserialize = "while"))]
    pub while_: Option<String>,
    pub while_captures: RawCaptures,
    pub patterns: Vec<RawRule>,
    #[serde(deserialize_with = "deserialize_repository")]
    pub repository: HashMap<String, RawRule>,
    #[serde(deserialize_with = "deserialize_bool_or_int")]
    pub apply_end_pattern_last: bool,
}

/// Top-level structure representing a complete TextMate grammar
///
/// # Examples
/// ```json
/// {
///   "name": "JavaScript",
///   "scopeName": "source.js",
///   "fileTypes": ["js", "mjs"],
///   "patterns": [{ "include": "#statements" }],
///   "repository": {
///     "statements": { "patterns": [{ "include": "#keywords" }] }
///   },
///   "injections": {
///     "L:comment.block": { "patterns": [{ "include": "#jsdoc" }] }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawGrammar {
    /// Human-readable name of the language, e.g. "JavaScript"
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub file_types: Vec<String>,
    /// Unique identifier for this grammar, e.g. "source.js"
    #[serde(default)]
    pub scope_name: String,
    #[serde(default, deserialize_with = "deserialize_repository")]
    pub repository: HashMap<String, RawRule>,
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    #[serde(default)]
    pub first_line_match: Option<String>,
    /// Injection selector -> rule, applied when this grammar is the one tokenizing
    #[serde(default, deserialize_with = "deserialize_ordered_map")]
    pub injections: Vec<(String, RawRule)>,
    /// Scope names of the grammars this grammar should be injected into
    #[serde(default)]
    pub inject_to: Vec<String>,
    /// Where the injection applies in the grammars listed in `inject_to`
    /// e.g. "L:source.js -comment"
    #[serde(default)]
    pub injection_selector: Option<String>,
}

impl RawGrammar {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> TmResult<Self> {
        let file = File::open(path)?;
        let raw_grammar = serde_json::from_reader(BufReader::new(file))?;
        Ok(raw_grammar)
    }

    /// The name used to look up the grammar: its `name` or its scope name if it has none
    pub fn lookup_name(&self) -> &str {
        if self.name.is_empty() {
            &self.scope_name
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_deserialize_all_rule_shapes() {
        let raw: RawGrammar = serde_json::from_str(
            r##"{
                "name": "Test",
                "scopeName": "source.test",
                "patterns": [
                    {"include": "#strings"},
                    {"match": "(a)(b)", "captures": {"1": {"name": "x"}, "comment": "ignored", "2": {"patterns": [{"include": "$self"}]}}},
                    {"begin": "<", "end": ">", "applyEndPatternLast": 1, "beginCaptures": [{"name": "open"}]},
                    {"begin": "^>", "while": "^>", "applyEndPatternLast": true}
                ],
                "repository": {
                    "strings": {"name": "string", "begin": "\"", "end": "\""},
                    "list": [{"match": "x"}, {"match": "y"}]
                },
                "injections": {
                    "R:string": {"patterns": []},
                    "L:comment": {"patterns": []},
                    "source": {"patterns": []}
                }
            }"##,
        )
        .unwrap();

        assert_eq!(raw.patterns.len(), 4);
        assert_eq!(raw.patterns[0].include.as_deref(), Some("#strings"));
        let captures = &raw.patterns[1].captures.0;
        assert_eq!(captures.len(), 2);
        assert_eq!(captures[&1].name.as_deref(), Some("x"));
        assert_eq!(captures[&2].patterns.len(), 1);
        assert!(raw.patterns[2].apply_end_pattern_last);
        assert_eq!(
            raw.patterns[2].begin_captures.0[&0].name.as_deref(),
            Some("open")
        );
        assert!(raw.patterns[3].apply_end_pattern_last);
        assert_eq!(raw.patterns[3].while_.as_deref(), Some("^>"));
        assert_eq!(raw.repository["list"].patterns.len(), 2);
        assert_eq!(raw.repository["strings"].name.as_deref(), Some("string"));
        let selectors: Vec<_> = raw.injections.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(selectors, vec!["R:string", "L:comment", "source"]);
    }

    #[test]
    fn lookup_name_falls_back_to_scope() {
        let raw: RawGrammar = serde_json::from_str(r#"{"scopeName": "source.x"}"#).unwrap();
        assert_eq!(raw.lookup_name(), "source.x");
    }
}
