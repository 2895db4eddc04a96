mod common;
mod compiled;
mod injections;
mod pattern_set;
mod raw;
mod regex;

pub(crate) use common::resolve_backreferences;
pub use common::{Captures, GlobalRuleRef, GrammarId, ROOT_RULE_ID, RegexId, RuleId};
pub use compiled::{
    BeginEndRule, BeginWhileRule, CaptureRule, CompiledGrammar, GrammarConfig, IncludeOnlyRule,
    MatchRule, PatternRef, Reference, Rule, ScopeName,
};
pub use injections::{
    CompiledInjectionMatcher, Injection, InjectionPrecedence, SelectorMatcher,
    parse_injection_selector,
};
pub use pattern_set::{Candidate, PatternSet, PatternSetMatch};
pub use raw::{RawCaptures, RawGrammar, RawRule};
pub use regex::Regex;
