use std::fmt;
use std::sync::OnceLock;

use onig::{Region, RegexOptions, SearchOptions, Syntax};

use crate::grammars::common::has_backreferences;
use crate::tokenizer::anchors::{AnchorActive, has_anchors};

/// A regex as written in the grammar, compiled lazily at runtime.
///
/// Patterns using `\A` or `\G` get one compiled version per anchor combination since
/// inactive anchors are rewritten before compilation.
pub struct Regex {
    pattern: String,
    has_backrefs: bool,
    has_anchors: bool,
    compiled: [OnceLock<Option<onig::Regex>>; 4],
}

impl Clone for Regex {
    fn clone(&self) -> Self {
        // Create a new regex with the same pattern but fresh lazy compilation
        Regex::new(self.pattern.clone())
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl PartialEq for Regex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for Regex {}

impl Regex {
    pub fn new(pattern: String) -> Self {
        Self {
            has_backrefs: has_backreferences(&pattern),
            has_anchors: has_anchors(&pattern),
            pattern,
            compiled: Default::default(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn has_backreferences(&self) -> bool {
        self.has_backrefs
    }

    /// The compiled regex for those anchors, `None` if the pattern is invalid.
    pub(crate) fn compiled(&self, anchors: AnchorActive) -> Option<&onig::Regex> {
        let slot = if self.has_anchors {
            anchors.as_index()
        } else {
            0
        };
        self.compiled[slot]
            .get_or_init(|| {
                let pattern = anchors.replace_anchors(&self.pattern);
                match onig::Regex::with_options(
                    &pattern,
                    RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
                    Syntax::default(),
                ) {
                    Ok(re) => Some(re),
                    Err(err) => {
                        log::warn!("Skipping invalid regex {:?}: {err}", self.pattern);
                        None
                    }
                }
            })
            .as_ref()
    }

    /// Validate that this regex pattern compiles successfully
    pub fn validate(&self) -> Result<(), onig::Error> {
        onig::Regex::with_options(
            &self.pattern,
            RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
            Syntax::default(),
        )
        .map(|_| ())
    }

    /// Searches from `pos` to the end of `text` and returns the byte ranges of all the
    /// groups. The full text is given to the engine so lookbehinds see what is before `pos`.
    pub(crate) fn find_at(
        &self,
        text: &str,
        pos: usize,
        anchors: AnchorActive,
    ) -> Option<Vec<Option<(usize, usize)>>> {
        let re = self.compiled(anchors)?;
        let mut region = Region::new();
        re.search_with_options(
            text,
            pos,
            text.len(),
            SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region),
        )?;
        let captures: Vec<_> = (0..region.len()).map(|i| region.pos(i)).collect();
        if captures.first().copied().flatten().is_none() {
            return None;
        }
        Some(captures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_matches_with_captures() {
        let re = Regex::new(r"(\w+)\s*(=)?".to_owned());
        let caps = re.find_at("let x = 1\n", 3, AnchorActive::None).unwrap();
        assert_eq!(caps[0], Some((4, 7)));
        assert_eq!(caps[1], Some((4, 5)));
        assert_eq!(caps[2], Some((6, 7)));
    }

    #[test]
    fn lookbehind_sees_text_before_pos() {
        let re = Regex::new(r"(?<=\.)\w+".to_owned());
        let caps = re.find_at("a.b\n", 2, AnchorActive::None).unwrap();
        assert_eq!(caps[0], Some((2, 3)));
    }

    #[test]
    fn inactive_anchors_do_not_match() {
        let re = Regex::new(r"\Gfoo".to_owned());
        assert!(re.find_at("xfoo\n", 1, AnchorActive::G).is_some());
        assert!(re.find_at("xfoo\n", 1, AnchorActive::None).is_none());
    }

    #[test]
    fn invalid_patterns_are_skipped() {
        let re = Regex::new("(unclosed".to_owned());
        assert!(re.validate().is_err());
        assert!(re.find_at("unclosed", 0, AnchorActive::None).is_none());
    }
}
