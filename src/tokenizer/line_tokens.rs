use std::ops::Range;

use serde::Serialize;

use crate::metadata::Metadata;
use crate::scope::Scope;
use crate::tokenizer::scope_stack::ScopeStack;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    /// Byte span within the line (start inclusive, end exclusive, 0-based)
    pub span: Range<usize>,
    /// Hierarchical scope names, ordered from outermost to innermost
    /// (e.g., source.js -> string.quoted.double -> punctuation.definition.string).
    pub scopes: Vec<Scope>,
}

#[derive(Debug)]
enum Output {
    Array(Vec<Token>),
    /// Pairs of (start offset, metadata bits)
    Binary(Vec<u32>),
}

/// Accumulates the tokens of a line, making sure we only produce valid ones.
#[derive(Debug)]
pub(crate) struct LineTokens {
    output: Output,
    /// Position up to which tokens have been generated (start of next token to be produced).
    /// `None` only while re-emitting the whole line in `finalize`.
    last_end: Option<usize>,
}

impl LineTokens {
    pub fn new(binary: bool) -> Self {
        let output = if binary {
            Output::Binary(Vec::new())
        } else {
            Output::Array(Vec::new())
        };
        Self {
            output,
            last_end: Some(0),
        }
    }

    pub fn produce(&mut self, scopes: &ScopeStack, end: usize) {
        // Skip empty tokens (can happen with zero-width matches)
        if let Some(last_end) = self.last_end
            && last_end >= end
        {
            return;
        }
        let start = self.last_end.unwrap_or(0);

        #[cfg(feature = "debug")]
        log::trace!("[produce]: [{start}..{end}] {scopes:?}");

        match &mut self.output {
            Output::Array(tokens) => tokens.push(Token {
                span: start..end,
                scopes: scopes.generate_scopes(),
            }),
            Output::Binary(tokens) => {
                let metadata = scopes.metadata().bits();
                // only adjacent tokens with the same metadata get merged
                if tokens.last() != Some(&metadata) {
                    tokens.push(start as u32);
                    tokens.push(metadata);
                }
            }
        }
        self.last_end = Some(end);
    }

    fn last_start(&self) -> Option<usize> {
        match &self.output {
            Output::Array(tokens) => tokens.last().map(|t| t.span.start),
            Output::Binary(tokens) => tokens.len().checked_sub(2).map(|i| tokens[i] as usize),
        }
    }

    fn pop(&mut self) {
        match &mut self.output {
            Output::Array(tokens) => {
                tokens.pop();
            }
            Output::Binary(tokens) => tokens.truncate(tokens.len().saturating_sub(2)),
        }
    }

    fn is_empty(&self) -> bool {
        match &self.output {
            Output::Array(tokens) => tokens.is_empty(),
            Output::Binary(tokens) => tokens.is_empty(),
        }
    }

    /// Removes the token of the `\n` we added and makes sure the line is covered.
    /// `line_len` includes that `\n`.
    fn finalize(&mut self, scopes: &ScopeStack, line_len: usize) {
        if self.last_start() == Some(line_len - 1) {
            self.pop();
        }

        if self.is_empty() {
            self.last_end = None;
            self.produce(scopes, line_len);
        }
    }

    pub fn into_tokens(mut self, scopes: &ScopeStack, line_len: usize) -> Vec<Token> {
        self.finalize(scopes, line_len);
        let Output::Array(mut tokens) = self.output else {
            return Vec::new();
        };
        // the real line doesn't have the `\n`
        for token in &mut tokens {
            token.span.end = token.span.end.min(line_len - 1);
            token.span.start = token.span.start.min(token.span.end);
        }
        tokens
    }

    pub fn into_binary(mut self, scopes: &ScopeStack, line_len: usize) -> Vec<u32> {
        self.finalize(scopes, line_len);
        match self.output {
            Output::Binary(tokens) => tokens,
            Output::Array(_) => Vec::new(),
        }
    }
}

/// Expands binary tokens back into spans, the end of a token being the start of the next one.
pub fn decode_binary_tokens(tokens: &[u32], line_len: usize) -> Vec<(Range<usize>, Metadata)> {
    let mut out = Vec::with_capacity(tokens.len() / 2);
    for (i, pair) in tokens.chunks_exact(2).enumerate() {
        let start = pair[0] as usize;
        let end = tokens
            .get((i + 1) * 2)
            .map(|s| *s as usize)
            .unwrap_or(line_len);
        out.push((start..end.max(start), Metadata::from_bits(pair[1])));
    }
    out
}
