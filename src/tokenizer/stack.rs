use std::fmt;
use std::sync::Arc;

use crate::grammars::{GlobalRuleRef, GrammarId, Regex};
use crate::scope::Scope;
use crate::tokenizer::scope_stack::ScopeStack;

struct StackFrame {
    parent: Option<StateStack>,
    /// Number of frames, root included
    depth: usize,
    /// Id of the registry that created the state
    origin: u64,
    /// Global rule ref that created this stack element
    rule_ref: GlobalRuleRef,
    /// The position where this rule was entered during current line, for infinite loop
    /// detection. None at beginning of a line
    enter_pos: Option<usize>,
    /// End of the begin match, where `\G` is active
    anchor_pos: Option<usize>,
    /// The begin match consumed the `\n`: the next line starts with an anchor at 0
    begin_rule_captured_eol: bool,
    /// Only set on the initial state, `\A` is active
    first_line: bool,
    /// End/while pattern with the backreferences resolved from the begin captures
    end_regex: Option<Arc<Regex>>,
    /// Scopes applied to begin/end delimiters
    name_scopes: ScopeStack,
    /// Scopes applied to the content between the delimiters
    content_scopes: ScopeStack,
}

impl Drop for StackFrame {
    // same as scope lists: a deep state would overflow the stack if dropped recursively
    fn drop(&mut self) {
        let mut parent = self.parent.take();
        while let Some(StateStack(frame)) = parent {
            parent = match Arc::into_inner(frame) {
                Some(mut frame) => frame.parent.take(),
                None => None,
            };
        }
    }
}

/// Keeps track of nested context as well as how to exit that context.
///
/// A state is immutable and cheap to clone: pushing creates a new frame pointing at the
/// existing ones, so states returned for consecutive lines share most of their frames.
/// Two states are equal if they would tokenize the next line the same way.
#[derive(Clone)]
pub struct StateStack(Arc<StackFrame>);

impl StateStack {
    pub(crate) fn initial(origin: u64, grammar: GrammarId, scopes: ScopeStack) -> Self {
        Self(Arc::new(StackFrame {
            parent: None,
            depth: 1,
            origin,
            rule_ref: GlobalRuleRef::root(grammar),
            enter_pos: None,
            anchor_pos: None,
            begin_rule_captured_eol: false,
            first_line: true,
            end_regex: None,
            name_scopes: scopes.clone(),
            content_scopes: scopes,
        }))
    }

    /// Called when entering a nested context: a begin pattern or match pattern matched
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn push(
        &self,
        rule_ref: GlobalRuleRef,
        enter_pos: Option<usize>,
        anchor_pos: Option<usize>,
        begin_rule_captured_eol: bool,
        end_regex: Option<Arc<Regex>>,
        name_scopes: ScopeStack,
        content_scopes: ScopeStack,
    ) -> Self {
        Self(Arc::new(StackFrame {
            parent: Some(self.clone()),
            depth: self.0.depth + 1,
            origin: self.0.origin,
            rule_ref,
            enter_pos,
            anchor_pos,
            begin_rule_captured_eol,
            first_line: false,
            end_regex,
            name_scopes,
            content_scopes,
        }))
    }

    /// Exits the current context, getting back to the parent. `None` for the root.
    pub fn pop(&self) -> Option<StateStack> {
        self.0.parent.clone()
    }

    /// Pop but never go below root state
    pub fn safe_pop(&self) -> StateStack {
        self.pop().unwrap_or_else(|| self.clone())
    }

    fn with_frame(&self, f: impl FnOnce(&mut StackFrame)) -> Self {
        let frame = &self.0;
        let mut new = StackFrame {
            parent: frame.parent.clone(),
            depth: frame.depth,
            origin: frame.origin,
            rule_ref: frame.rule_ref,
            enter_pos: frame.enter_pos,
            anchor_pos: frame.anchor_pos,
            begin_rule_captured_eol: frame.begin_rule_captured_eol,
            first_line: frame.first_line,
            end_regex: frame.end_regex.clone(),
            name_scopes: frame.name_scopes.clone(),
            content_scopes: frame.content_scopes.clone(),
        };
        f(&mut new);
        Self(Arc::new(new))
    }

    pub(crate) fn with_content_scopes(&self, content_scopes: ScopeStack) -> Self {
        if self.0.content_scopes == content_scopes {
            return self.clone();
        }
        self.with_frame(|f| f.content_scopes = content_scopes)
    }

    pub(crate) fn with_end_regex(&self, end_regex: Regex) -> Self {
        self.with_frame(|f| f.end_regex = Some(Arc::new(end_regex)))
    }

    fn is_line_clean(&self) -> bool {
        self.0.enter_pos.is_none() && self.0.anchor_pos.is_none() && !self.0.first_line
    }

    /// Forgets the positions of the line that was just tokenized. Frames below the
    /// outermost one holding positions are shared with `self`.
    pub(crate) fn reset_positions(&self) -> StateStack {
        let mut frames = Vec::with_capacity(self.0.depth);
        let mut node = Some(self);
        while let Some(n) = node {
            frames.push(n);
            node = n.0.parent.as_ref();
        }
        let Some(outermost) = frames.iter().rposition(|f| !f.is_line_clean()) else {
            return self.clone();
        };

        let mut parent = frames[outermost].0.parent.clone();
        for frame in frames[..=outermost].iter().rev() {
            let below = parent.take();
            parent = Some(frame.with_frame(|f| {
                f.parent = below;
                f.enter_pos = None;
                f.anchor_pos = None;
                f.first_line = false;
            }));
        }
        parent.unwrap_or_else(|| self.clone())
    }

    /// Whether a frame entered at the same position as `other` runs the same rule, which
    /// means pushing `other` didn't make any progress.
    pub(crate) fn has_same_rule_as(&self, other: &StateStack) -> bool {
        let mut node = Some(self);
        while let Some(n) = node
            && n.0.enter_pos == other.0.enter_pos
        {
            if n.0.rule_ref == other.0.rule_ref {
                return true;
            }
            node = n.0.parent.as_ref();
        }
        false
    }

    pub(crate) fn origin(&self) -> u64 {
        self.0.origin
    }

    pub(crate) fn is_first_line(&self) -> bool {
        self.0.first_line
    }

    pub(crate) fn enter_pos(&self) -> Option<usize> {
        self.0.enter_pos
    }

    pub(crate) fn anchor_pos(&self) -> Option<usize> {
        self.0.anchor_pos
    }

    pub(crate) fn begin_rule_captured_eol(&self) -> bool {
        self.0.begin_rule_captured_eol
    }

    pub(crate) fn end_regex(&self) -> Option<&Regex> {
        self.0.end_regex.as_deref()
    }

    /// The grammar the state was created for
    pub fn root_grammar(&self) -> GrammarId {
        let mut node = self;
        while let Some(parent) = &node.0.parent {
            node = parent;
        }
        node.0.rule_ref.grammar
    }

    /// Number of frames, 1 for the initial state
    pub fn depth(&self) -> usize {
        self.0.depth
    }

    /// The rule that pushed the top frame
    pub fn rule_id(&self) -> GlobalRuleRef {
        self.0.rule_ref
    }

    pub fn name_scopes(&self) -> &ScopeStack {
        &self.0.name_scopes
    }

    pub fn content_scopes(&self) -> &ScopeStack {
        &self.0.content_scopes
    }

    /// Scopes the next line starts with, outermost first
    pub fn scopes(&self) -> Vec<Scope> {
        self.0.content_scopes.generate_scopes()
    }
}

impl PartialEq for StateStack {
    fn eq(&self, other: &Self) -> bool {
        let mut a = self;
        let mut b = other;
        loop {
            if Arc::ptr_eq(&a.0, &b.0) {
                return true;
            }
            let (fa, fb) = (&a.0, &b.0);
            if fa.depth != fb.depth
                || fa.rule_ref != fb.rule_ref
                || fa.end_regex.as_ref().map(|r| r.pattern())
                    != fb.end_regex.as_ref().map(|r| r.pattern())
                || fa.content_scopes != fb.content_scopes
            {
                return false;
            }
            match (&fa.parent, &fb.parent) {
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

impl Eq for StateStack {}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "StateStack:")?;

        let mut frames = Vec::with_capacity(self.0.depth);
        let mut node = Some(self);
        while let Some(n) = node {
            frames.push(n);
            node = n.0.parent.as_ref();
        }

        for (depth, frame) in frames.iter().rev().enumerate() {
            let frame = &frame.0;
            let indent = "  ".repeat(depth);
            write!(
                f,
                "{indent}rule={:?}, name={}, content={}",
                frame.rule_ref,
                frame.name_scopes.scope(),
                frame.content_scopes.scope()
            )?;
            if let Some(re) = &frame.end_regex {
                write!(f, ", end_pattern={:?}", re.pattern())?;
            }
            if let Some(pos) = frame.anchor_pos {
                write!(f, ", anchor_pos={pos}")?;
            }
            if let Some(pos) = frame.enter_pos {
                write!(f, ", enter_pos={pos}")?;
            }
            if frame.begin_rule_captured_eol {
                write!(f, ", begin_rule_captured_eol")?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}
