//! A document kept tokenized across edits.
//!
//! Lines are tokenized lazily, when their tokens are asked for. After an edit, tokenization
//! resumes from the edited line and stops as soon as a line ends in the same state as before:
//! the lines after it can't change. Listeners are told which lines got new tokens.

use std::fmt;
use std::ops::Range;

use crate::error::{Error, TmResult};
use crate::registry::Grammar;
use crate::tokenizer::{StateStack, Token, TokenizeOptions};

/// Lines whose tokens were (re)computed, sorted and non-overlapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokensChanged {
    pub ranges: Vec<Range<usize>>,
}

/// Returned by [`DocumentModel::add_listener`] to remove the listener later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<'r> = Box<dyn FnMut(&TokensChanged) + 'r>;

#[derive(Debug, Clone)]
struct Line {
    text: String,
    tokens: Vec<Token>,
    /// State at the end of the line, from the last time it was tokenized
    end_state: Option<StateStack>,
    /// Edited since it was last tokenized
    dirty: bool,
}

impl Line {
    fn new(text: String) -> Self {
        Self {
            text,
            tokens: Vec::new(),
            end_state: None,
            dirty: true,
        }
    }
}

pub struct DocumentModel<'r> {
    grammar: Grammar<'r>,
    options: TokenizeOptions,
    lines: Vec<Line>,
    /// Every line before that one has up to date tokens
    valid_until: usize,
    listeners: Vec<(ListenerId, Listener<'r>)>,
    next_listener_id: u64,
}

impl<'r> DocumentModel<'r> {
    /// `\n` and `\r\n` both separate lines.
    pub fn new(grammar: Grammar<'r>, text: &str) -> Self {
        let lines = text
            .split('\n')
            .map(|l| Line::new(l.strip_suffix('\r').unwrap_or(l).to_owned()))
            .collect();
        Self {
            grammar,
            options: TokenizeOptions::default(),
            lines,
            valid_until: 0,
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    /// Options used for every line tokenized from now on
    pub fn with_options(mut self, options: TokenizeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn grammar(&self) -> Grammar<'r> {
        self.grammar
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn line_text(&self, index: usize) -> TmResult<&str> {
        self.check_index(index)?;
        Ok(&self.lines[index].text)
    }

    fn check_index(&self, index: usize) -> TmResult<()> {
        if index >= self.lines.len() {
            return Err(Error::LineOutOfRange {
                index,
                len: self.lines.len(),
            });
        }
        Ok(())
    }

    /// Tokens of that line, tokenizing what is needed first.
    pub fn line_tokens(&mut self, index: usize) -> TmResult<&[Token]> {
        self.force_tokenization(index)?;
        Ok(&self.lines[index].tokens)
    }

    /// State at the end of that line, tokenizing what is needed first.
    pub fn line_state(&mut self, index: usize) -> TmResult<&StateStack> {
        self.force_tokenization(index)?;
        self.lines[index]
            .end_state
            .as_ref()
            .ok_or(Error::LineOutOfRange {
                index,
                len: self.lines.len(),
            })
    }

    pub fn set_line(&mut self, index: usize, text: &str) -> TmResult<()> {
        self.check_index(index)?;
        let line = &mut self.lines[index];
        line.text = text.to_owned();
        line.dirty = true;
        self.invalidate_from(index);
        Ok(())
    }

    /// Inserts a line before `index`, `index` can be the line count to append.
    pub fn insert_line(&mut self, index: usize, text: &str) -> TmResult<()> {
        if index > self.lines.len() {
            return Err(Error::LineOutOfRange {
                index,
                len: self.lines.len(),
            });
        }
        self.lines.insert(index, Line::new(text.to_owned()));
        self.invalidate_from(index);
        Ok(())
    }

    pub fn remove_line(&mut self, index: usize) -> TmResult<()> {
        self.check_index(index)?;
        self.lines.remove(index);
        self.invalidate_from(index);
        Ok(())
    }

    fn invalidate_from(&mut self, index: usize) {
        self.valid_until = self.valid_until.min(index);
    }

    /// Makes sure every line up to `index` included has up to date tokens, notifying the
    /// listeners of the lines that were tokenized.
    pub fn force_tokenization(&mut self, index: usize) -> TmResult<()> {
        self.check_index(index)?;
        let mut changed: Vec<Range<usize>> = Vec::new();

        while self.valid_until <= index {
            let i = self.valid_until;
            let prev = match i {
                0 => None,
                _ => self.lines[i - 1].end_state.clone(),
            };
            let result = self
                .grammar
                .tokenize_line_with_options(&self.lines[i].text, prev.as_ref(), self.options)?;

            let line = &mut self.lines[i];
            let stable = line.end_state.as_ref() == Some(&result.rule_stack);
            line.tokens = result.tokens;
            line.end_state = Some(result.rule_stack);
            line.dirty = false;

            match changed.last_mut() {
                Some(range) if range.end == i => range.end = i + 1,
                _ => changed.push(i..i + 1),
            }

            self.valid_until = if stable {
                // the following lines start from the same state as before, they only need
                // tokenizing again if they were edited themselves
                self.lines[i + 1..]
                    .iter()
                    .position(|l| l.dirty)
                    .map(|pos| i + 1 + pos)
                    .unwrap_or(self.lines.len())
            } else {
                i + 1
            };
        }

        if !changed.is_empty() {
            #[cfg(feature = "debug")]
            log::debug!("[force_tokenization] retokenized lines {changed:?}");
            self.emit(&TokensChanged { ranges: changed });
        }
        Ok(())
    }

    /// Tokenizes the whole document
    pub fn tokenize_all(&mut self) -> TmResult<()> {
        match self.lines.len() {
            0 => Ok(()),
            len => self.force_tokenization(len - 1),
        }
    }

    pub fn add_listener(&mut self, listener: impl FnMut(&TokensChanged) + 'r) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns whether the listener was registered
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let len = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != len
    }

    fn emit(&mut self, event: &TokensChanged) {
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
    }
}

impl fmt::Debug for DocumentModel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentModel")
            .field("grammar", &self.grammar)
            .field("lines", &self.lines.len())
            .field("valid_until", &self.valid_until)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
