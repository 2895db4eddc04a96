//! This file replicates the logic of <https://github.com/microsoft/vscode-textmate>

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::Registry;
use crate::grammars::{
    Candidate, CaptureRule, Captures, CompiledGrammar, GlobalRuleRef, GrammarId, Injection,
    InjectionPrecedence, PatternSetMatch, Regex, Rule, resolve_backreferences,
};
use crate::tokenizer::anchors::AnchorActive;
use crate::tokenizer::line_tokens::LineTokens;

pub(crate) mod anchors;
mod line_tokens;
mod scope_stack;
mod stack;

pub use line_tokens::{Token, decode_binary_tokens};
pub(crate) use scope_stack::{AttributeSource, ScopeCache};
pub use scope_stack::ScopeStack;
pub use stack::StateStack;

/// Options for a single `tokenize_line` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenizeOptions {
    pub(crate) time_limit: Option<Duration>,
}

impl TokenizeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop tokenizing a line after that long. The rest of the line becomes a single token
    /// and the result is marked as stopped early.
    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }
}

/// Tokens of a line with the full scope path of each token
#[derive(Debug, Clone)]
pub struct TokenizeLineResult {
    pub tokens: Vec<Token>,
    /// The state to give when tokenizing the next line
    pub rule_stack: StateStack,
    /// The time limit was reached before the end of the line
    pub stopped_early: bool,
}

/// Tokens of a line as `(start offset, metadata)` pairs, adjacent tokens with the
/// same metadata being merged
#[derive(Debug, Clone)]
pub struct BinaryTokenizeLineResult {
    pub tokens: Vec<u32>,
    /// The state to give when tokenizing the next line
    pub rule_stack: StateStack,
    /// The time limit was reached before the end of the line
    pub stopped_early: bool,
}

#[derive(Debug)]
struct WhileCheckResult {
    stack: StateStack,
    pos: usize,
    anchor_position: Option<usize>,
    is_first_line: bool,
}

pub(crate) struct Tokenizer<'r> {
    registry: &'r Registry,
    /// The grammar we started the process with, what `$base` refers to
    base: &'r CompiledGrammar,
    source: AttributeSource<'r>,
    injections: Arc<[Injection]>,
    deadline: Option<Instant>,
}

impl<'r> Tokenizer<'r> {
    pub fn new(
        registry: &'r Registry,
        base_grammar_id: GrammarId,
        options: TokenizeOptions,
    ) -> Self {
        let base = registry.compiled_grammar(base_grammar_id);
        Self {
            registry,
            base,
            source: AttributeSource {
                grammar: base,
                theme: registry.theme(),
                cache: &registry.scope_cache,
            },
            injections: registry.injections(base_grammar_id),
            deadline: options.time_limit.map(|limit| Instant::now() + limit),
        }
    }

    pub fn tokenize_line(self, line: &str, prev: StateStack) -> TokenizeLineResult {
        let (tokens, rule_stack, stopped_early) = self.run(line, prev, false);
        let line_len = line.len() + 1;
        TokenizeLineResult {
            tokens: tokens.into_tokens(rule_stack.content_scopes(), line_len),
            rule_stack: rule_stack.reset_positions(),
            stopped_early,
        }
    }

    pub fn tokenize_line_binary(self, line: &str, prev: StateStack) -> BinaryTokenizeLineResult {
        let (tokens, rule_stack, stopped_early) = self.run(line, prev, true);
        let line_len = line.len() + 1;
        BinaryTokenizeLineResult {
            tokens: tokens.into_binary(rule_stack.content_scopes(), line_len),
            rule_stack: rule_stack.reset_positions(),
            stopped_early,
        }
    }

    fn run(&self, line: &str, prev: StateStack, binary: bool) -> (LineTokens, StateStack, bool) {
        // Always add a new line, some regex expect it
        let line = format!("{line}\n");
        let is_first_line = prev.is_first_line();
        let mut tokens = LineTokens::new(binary);
        let (stack, stopped_early) =
            self.tokenize_string(&line, is_first_line, 0, prev, &mut tokens, true);
        if stopped_early {
            log::warn!(
                "Tokenizing a line of {} bytes with {} took too long, stopped early",
                line.len(),
                self.base.scope_name
            );
        }
        (tokens, stack, stopped_early)
    }

    fn is_over_deadline(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Matches injection patterns at the current position
    /// Returns the precedence of the injection along with its best match
    fn match_injections(
        &self,
        stack: &StateStack,
        line: &str,
        pos: usize,
        anchors: AnchorActive,
    ) -> Option<(InjectionPrecedence, PatternSetMatch)> {
        if self.injections.is_empty() {
            return None;
        }

        let scopes = stack.content_scopes().generate_scopes();
        let mut best_match: Option<(InjectionPrecedence, PatternSetMatch)> = None;

        // already sorted by precedence
        for injection in self.injections.iter() {
            if !injection.matcher.matches(&scopes) {
                continue;
            }
            #[cfg(feature = "debug")]
            log::debug!(
                "Scope stack {scopes:?} matched injection selector {}",
                injection.matcher
            );

            let pattern_set = self
                .registry
                .injection_scanner(self.base.id, injection.rule, anchors);
            let Some(found) = pattern_set.find_at(line, pos) else {
                continue;
            };
            if let Some((_, current_best)) = &best_match
                && found.start >= current_best.start
            {
                continue;
            }
            let is_done = found.start == pos;
            best_match = Some((injection.precedence, found));
            if is_done {
                break;
            }
        }

        best_match
    }

    /// Matches both regular rule patterns and injections, returning the best match
    fn match_rule_or_injections(
        &self,
        stack: &StateStack,
        line: &str,
        pos: usize,
        is_first_line: bool,
        anchor_position: Option<usize>,
    ) -> Option<PatternSetMatch> {
        let anchors = AnchorActive::new(is_first_line, anchor_position, pos);
        let pattern_set =
            self.registry
                .rule_scanner(self.base.id, stack.rule_id(), stack.end_regex(), anchors);
        let regular_match = pattern_set.find_at(line, pos);
        let injection_match = self.match_injections(stack, line, pos, anchors);

        match (regular_match, injection_match) {
            (None, None) => None,
            (Some(regular), None) => Some(regular),
            (None, Some((_, injection))) => Some(injection),
            (Some(regular), Some((precedence, injection))) => {
                if injection.start < regular.start
                    || (injection.start == regular.start
                        && precedence == InjectionPrecedence::Left)
                {
                    Some(injection)
                } else {
                    Some(regular)
                }
            }
        }
    }

    /// Every while rule of the stack, outermost first, needs its while pattern to match
    /// the new line. The first one that doesn't is popped along with everything above it.
    fn check_while_conditions(
        &self,
        stack: StateStack,
        line: &str,
        pos: usize,
        is_first_line: bool,
        tokens: &mut LineTokens,
    ) -> WhileCheckResult {
        let mut result = WhileCheckResult {
            anchor_position: if stack.begin_rule_captured_eol() {
                Some(0)
            } else {
                None
            },
            stack,
            pos,
            is_first_line,
        };

        let mut while_frames = Vec::new();
        let mut node = Some(result.stack.clone());
        while let Some(frame) = node {
            node = frame.pop();
            if matches!(self.rule_of(&frame).1, Rule::BeginWhile(_)) {
                while_frames.push(frame);
            }
        }

        for frame in while_frames.into_iter().rev() {
            let (grammar, rule) = self.rule_of(&frame);
            let Rule::BeginWhile(rule) = rule else {
                continue;
            };
            let while_re = frame
                .end_regex()
                .unwrap_or_else(|| grammar.regex(rule.while_));
            let anchors = AnchorActive::new(
                result.is_first_line,
                result.anchor_position,
                result.pos,
            );

            let Some(captures) = while_re.find_at(line, result.pos, anchors) else {
                #[cfg(feature = "debug")]
                log::debug!(
                    "[check_while_conditions] no match for {:?}, popping",
                    while_re.pattern()
                );
                result.stack = frame.safe_pop();
                break;
            };
            let Some((start, end)) = captures[0] else {
                continue;
            };

            tokens.produce(frame.content_scopes(), start);
            self.handle_captures(
                &frame,
                line,
                result.is_first_line,
                grammar.id,
                &rule.while_captures,
                &captures,
                tokens,
            );
            tokens.produce(frame.content_scopes(), end);
            result.anchor_position = Some(end);
            if end > result.pos {
                result.pos = end;
                result.is_first_line = false;
            }
        }

        result
    }

    fn rule_of(&self, stack: &StateStack) -> (&'r CompiledGrammar, &'r Rule) {
        let rule_ref = stack.rule_id();
        let grammar = self.registry.compiled_grammar(rule_ref.grammar);
        (grammar, grammar.rule(rule_ref.rule))
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_captures(
        &self,
        stack: &StateStack,
        line: &str,
        is_first_line: bool,
        grammar_id: GrammarId,
        rules: &[Option<CaptureRule>],
        captures: &Captures,
        tokens: &mut LineTokens,
    ) {
        if rules.is_empty() {
            return;
        }
        let Some(Some((_, max_end))) = captures.first() else {
            return;
        };

        // (scopes, end_pos)[]
        let mut local_stack: Vec<(ScopeStack, usize)> = Vec::with_capacity(2);

        for (rule, capture) in rules.iter().zip(captures) {
            let (Some(rule), Some((cap_start, cap_end))) = (rule, *capture) else {
                continue;
            };
            // Nothing captured
            if cap_start == cap_end {
                continue;
            }
            if cap_start > *max_end {
                break;
            }

            // pop captures while needed
            while let Some((scopes, end_pos)) = local_stack.last()
                && *end_pos <= cap_start
            {
                tokens.produce(scopes, *end_pos);
                local_stack.pop();
            }

            let base = local_stack
                .last()
                .map(|(scopes, _)| scopes)
                .unwrap_or(stack.content_scopes());
            tokens.produce(base, cap_start);

            if let Some(retokenize) = rule.retokenize {
                let name = rule.name.as_ref().map(|n| n.resolve(line, Some(captures)));
                let name_scopes = stack
                    .content_scopes()
                    .push_attributed(name.as_deref(), self.source);
                let content_name = rule
                    .content_name
                    .as_ref()
                    .map(|n| n.resolve(line, Some(captures)));
                let content_scopes =
                    name_scopes.push_attributed(content_name.as_deref(), self.source);
                let retokenization_stack = stack.push(
                    GlobalRuleRef {
                        grammar: grammar_id,
                        rule: retokenize,
                    },
                    Some(cap_start),
                    None,
                    false,
                    None,
                    name_scopes,
                    content_scopes,
                );

                #[cfg(feature = "debug")]
                log::debug!(
                    "[handle_captures] Retokenizing capture at [{cap_start}..{cap_end}]: {:?}",
                    &line[cap_start..cap_end]
                );
                // the capture's end state is dropped, a missed deadline shows on the next scan
                let (_, _) = self.tokenize_string(
                    &line[..cap_end],
                    is_first_line && cap_start == 0,
                    cap_start,
                    retokenization_stack,
                    tokens,
                    false,
                );
                continue;
            }

            if let Some(name) = &rule.name {
                let name = name.resolve(line, Some(captures));
                let scopes = base.push_attributed(Some(&name), self.source);
                local_stack.push((scopes, cap_end));
            }
        }

        while let Some((scopes, end_pos)) = local_stack.pop() {
            tokens.produce(&scopes, end_pos);
        }
    }

    /// Tokenizes `line` from `pos`, returning the stack at the end and whether we stopped
    /// because of the time limit.
    fn tokenize_string(
        &self,
        line: &str,
        is_first_line: bool,
        pos: usize,
        stack: StateStack,
        tokens: &mut LineTokens,
        check_while_conditions: bool,
    ) -> (StateStack, bool) {
        let mut pos = pos;
        let mut is_first_line = is_first_line;
        let mut stack = stack;
        let mut anchor_position = None;

        // 1. We check if the while pattern is still truthy
        if check_while_conditions {
            let res = self.check_while_conditions(stack, line, pos, is_first_line, tokens);
            stack = res.stack;
            pos = res.pos;
            anchor_position = res.anchor_position;
            is_first_line = res.is_first_line;
        }

        // 2. We check for any matching patterns
        loop {
            if self.is_over_deadline() {
                tokens.produce(stack.content_scopes(), line.len());
                return (stack, true);
            }

            #[cfg(feature = "debug")]
            log::trace!("[tokenize_string] Scanning {pos}: |{:?}|", &line[pos..]);

            let Some(m) =
                self.match_rule_or_injections(&stack, line, pos, is_first_line, anchor_position)
            else {
                #[cfg(feature = "debug")]
                log::debug!("[tokenize_string] no more matches");
                tokens.produce(stack.content_scopes(), line.len());
                return (stack, false);
            };

            #[cfg(feature = "debug")]
            log::debug!(
                "[tokenize_string] Matched {:?} from {} to {} => {:?}",
                m.candidate,
                m.start,
                m.end,
                &line[m.start..m.end]
            );

            // Track whether this match has advanced the position
            let has_advanced = m.end > pos;

            match m.candidate {
                // We matched the `end` for this rule, can only happen for BeginEnd rules
                Candidate::End => {
                    let (grammar, rule) = self.rule_of(&stack);
                    tokens.produce(stack.content_scopes(), m.start);
                    stack = stack.with_content_scopes(stack.name_scopes().clone());
                    if let Rule::BeginEnd(rule) = rule {
                        self.handle_captures(
                            &stack,
                            line,
                            is_first_line,
                            grammar.id,
                            &rule.end_captures,
                            &m.captures,
                            tokens,
                        );
                    }
                    tokens.produce(stack.content_scopes(), m.end);

                    let popped = stack;
                    stack = popped.safe_pop();
                    anchor_position = popped.anchor_pos();

                    // Grammar pushed & popped a rule without advancing
                    // See https://github.com/Microsoft/vscode-textmate/issues/12
                    if !has_advanced && popped.enter_pos() == Some(pos) {
                        #[cfg(feature = "debug")]
                        log::debug!("[tokenize_string] end rule didn't advance, restoring it");
                        stack = popped;
                        tokens.produce(stack.content_scopes(), line.len());
                        return (stack, false);
                    }
                }
                Candidate::Rule(rule_ref) => {
                    let grammar = self.registry.compiled_grammar(rule_ref.grammar);
                    let rule = grammar.rule(rule_ref.rule);
                    tokens.produce(stack.content_scopes(), m.start);

                    let before_push = stack.clone();
                    let name = rule.name().map(|n| n.resolve(line, Some(&m.captures)));
                    let name_scopes = stack
                        .content_scopes()
                        .push_attributed(name.as_deref(), self.source);
                    stack = stack.push(
                        rule_ref,
                        Some(pos),
                        anchor_position,
                        m.end == line.len(),
                        None,
                        name_scopes.clone(),
                        name_scopes.clone(),
                    );

                    let (begin_captures, end_re) = match rule {
                        Rule::BeginEnd(r) => (&r.begin_captures, grammar.regex(r.end)),
                        Rule::BeginWhile(r) => (&r.begin_captures, grammar.regex(r.while_)),
                        Rule::Match(r) => {
                            self.handle_captures(
                                &stack,
                                line,
                                is_first_line,
                                grammar.id,
                                &r.captures,
                                &m.captures,
                                tokens,
                            );
                            tokens.produce(stack.content_scopes(), m.end);
                            // pop rule immediately since it is a MatchRule
                            stack = stack.safe_pop();

                            if !has_advanced {
                                // A zero-width match can't make progress on its own,
                                // move one char forward
                                if let Some(c) = line[pos..].chars().next()
                                    && pos + c.len_utf8() < line.len()
                                {
                                    pos += c.len_utf8();
                                    is_first_line = false;
                                    continue;
                                }
                                tokens.produce(stack.content_scopes(), line.len());
                                return (stack, false);
                            }
                            pos = m.end;
                            is_first_line = false;
                            continue;
                        }
                        Rule::IncludeOnly(_) | Rule::Noop => {
                            log::warn!(
                                "Rule {rule_ref:?} of {} matched without a pattern",
                                grammar.scope_name
                            );
                            stack = before_push;
                            tokens.produce(stack.content_scopes(), line.len());
                            return (stack, false);
                        }
                    };

                    self.handle_captures(
                        &stack,
                        line,
                        is_first_line,
                        grammar.id,
                        begin_captures,
                        &m.captures,
                        tokens,
                    );
                    tokens.produce(stack.content_scopes(), m.end);
                    anchor_position = Some(m.end);

                    let content_name = rule
                        .content_name()
                        .map(|n| n.resolve(line, Some(&m.captures)));
                    let content_scopes =
                        name_scopes.push_attributed(content_name.as_deref(), self.source);
                    stack = stack.with_content_scopes(content_scopes);

                    if end_re.has_backreferences() {
                        let resolved = resolve_backreferences(end_re.pattern(), line, &m.captures);
                        stack = stack.with_end_regex(Regex::new(resolved));
                    }

                    // Grammar pushed the same rule without advancing
                    if !has_advanced && before_push.has_same_rule_as(&stack) {
                        #[cfg(feature = "debug")]
                        log::debug!("[tokenize_string] begin rule didn't advance, popping it");
                        stack = stack.safe_pop();
                        tokens.produce(stack.content_scopes(), line.len());
                        return (stack, false);
                    }
                }
            }

            if has_advanced {
                pos = m.end;
                is_first_line = false;
            }
        }
    }
}
