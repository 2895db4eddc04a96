mod color;
mod compiled;
mod font_style;
mod raw;
mod selector;

pub use color::Color;
pub use compiled::{
    CompiledTheme, CompiledThemeRule, DEFAULT_BACKGROUND_ID, DEFAULT_FOREGROUND_ID, NO_COLOR_ID,
    Style, StyleModifier, ThemeRule, ThemeType,
};
pub use font_style::FontStyle;
pub use raw::{Colors, RawTheme, TokenColorRule, TokenColorSettings};
pub use selector::{Parent, Specificity, ThemeSelector, parse_selector};
