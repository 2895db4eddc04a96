use std::fmt;
use std::io;

pub(crate) type TmResult<T> = Result<T, Error>;

/// Errors that can occur when loading grammars/themes or tokenizing
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar or theme file
    Io(io::Error),

    /// JSON parsing failed when loading a grammar or a theme.
    Json(serde_json::Error),

    /// An invalid hex color was encountered.
    /// Can only happen when loading a theme.
    #[allow(missing_docs)]
    InvalidHexColor { value: String, reason: String },

    /// A grammar was not found in the registry.
    GrammarNotFound(String),

    /// A grammar is missing its `scopeName`.
    MissingScopeName(String),

    /// The registry already holds as many grammars as a grammar id can address.
    TooManyGrammars {
        /// The scope name of the grammar that could not be added
        scope_name: String,
    },

    /// A document line index was past the end of the document.
    LineOutOfRange {
        /// The requested line
        index: usize,
        /// How many lines the document has
        len: usize,
    },

    /// The state passed to the tokenizer was not produced by this registry and grammar.
    /// This is a caller bug: states are only valid with the grammar that created them.
    ForeignState {
        /// The scope name of the grammar asked to tokenize
        grammar: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            Error::InvalidHexColor { value, reason } => {
                write!(f, "invalid hex color '{}': {}", value, reason)
            }
            Error::GrammarNotFound(name) => write!(f, "grammar '{}' not found", name),
            Error::MissingScopeName(name) => {
                write!(f, "grammar '{}' does not declare a scopeName", name)
            }
            Error::TooManyGrammars { scope_name } => write!(
                f,
                "cannot add grammar '{}': the registry is full",
                scope_name
            ),
            Error::LineOutOfRange { index, len } => {
                write!(f, "line {} is out of range for a document of {} lines", index, len)
            }
            Error::ForeignState { grammar } => write!(
                f,
                "state passed to grammar '{}' was produced by another grammar or registry",
                grammar
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::InvalidHexColor { .. }
            | Error::GrammarNotFound(_)
            | Error::MissingScopeName(_)
            | Error::TooManyGrammars { .. }
            | Error::LineOutOfRange { .. }
            | Error::ForeignState { .. } => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}
