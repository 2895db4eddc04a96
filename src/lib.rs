mod error;
mod metadata;
mod model;
mod registry;
mod scope;

pub mod grammars;
pub mod themes;
mod tokenizer;

pub use error::Error;
pub use metadata::{MAX_COLOR_ID, Metadata, StandardTokenType};
pub use model::{DocumentModel, ListenerId, TokensChanged};
pub use registry::{Grammar, Registry};
pub use scope::Scope;
pub use themes::{Color, CompiledTheme, FontStyle, Style, ThemeRule};
pub use tokenizer::{
    BinaryTokenizeLineResult, ScopeStack, StateStack, Token, TokenizeLineResult,
    TokenizeOptions, decode_binary_tokens,
};
