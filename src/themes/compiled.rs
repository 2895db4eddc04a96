use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TmResult;
use crate::metadata::{MAX_COLOR_ID, Metadata};
use crate::scope::Scope;
use crate::themes::Color;
use crate::themes::font_style::FontStyle;
use crate::themes::raw::{RawTheme, TokenColorSettings};
use crate::themes::selector::{Specificity, ThemeSelector, parse_selector};

/// Color id used in metadata for "no color set"
pub const NO_COLOR_ID: u16 = 0;
/// Color id of the theme default foreground
pub const DEFAULT_FOREGROUND_ID: u16 = 1;
/// Color id of the theme default background
pub const DEFAULT_BACKGROUND_ID: u16 = 2;

/// A complete style with foreground, background colors and font styling
///
/// This is the runtime representation that always has concrete values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct Style {
    pub foreground: Color,
    pub background: Color,
    pub font_style: FontStyle,
}

impl Default for Style {
    fn default() -> Style {
        Style {
            foreground: Color::BLACK,
            background: Color::WHITE,
            font_style: FontStyle::empty(),
        }
    }
}

/// A style modifier with optional values
///
/// This represents theme entries where colors and font styles are optional: only the set
/// attributes override what a less specific rule or the default style gave.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct StyleModifier {
    pub foreground: Option<Color>,
    pub background: Option<Color>,
    pub font_style: Option<FontStyle>,
}

impl StyleModifier {
    pub fn apply_to(&self, style: &Style) -> Style {
        Style {
            foreground: self.foreground.unwrap_or(style.foreground),
            background: self.background.unwrap_or(style.background),
            font_style: self.font_style.unwrap_or(style.font_style),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.foreground.is_none() && self.background.is_none() && self.font_style.is_none()
    }
}

impl TryFrom<&TokenColorSettings> for StyleModifier {
    type Error = crate::Error;

    fn try_from(settings: &TokenColorSettings) -> Result<Self, Self::Error> {
        Ok(Self {
            foreground: settings.foreground().map(Color::from_hex).transpose()?,
            background: settings.background().map(Color::from_hex).transpose()?,
            font_style: settings.font_style.as_deref().map(FontStyle::from_theme_str),
        })
    }
}

/// One (selector, style) pair as handed over by whatever parsed the theme source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThemeRule {
    /// e.g. `"source.js meta.function > string"`
    pub selector: String,
    pub style: StyleModifier,
}

impl ThemeRule {
    pub fn new(selector: impl Into<String>, style: StyleModifier) -> Self {
        Self {
            selector: selector.into(),
            style,
        }
    }
}

/// Theme type for determining fallback colors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ThemeType {
    Light,
    #[default]
    Dark,
}

impl ThemeType {
    // (fg, bg)
    pub fn default_colors(&self) -> (Color, Color) {
        match self {
            ThemeType::Light => (Color::rgb(0x00, 0x00, 0x00), Color::rgb(0xFF, 0xFF, 0xFF)),
            ThemeType::Dark => (Color::rgb(0xD4, 0xD4, 0xD4), Color::rgb(0x1E, 0x1E, 0x1E)),
        }
    }

    pub fn from_theme_str(s: &str) -> ThemeType {
        if s.eq_ignore_ascii_case("light") {
            ThemeType::Light
        } else {
            ThemeType::Dark
        }
    }
}

/// The part of a style a rule (or a set of rules) sets, with colors as ids of the
/// theme color map.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub(crate) struct LeafStyle {
    pub foreground: Option<u16>,
    pub background: Option<u16>,
    pub font_style: Option<FontStyle>,
}

impl LeafStyle {
    fn override_with(&mut self, other: &LeafStyle) {
        if other.foreground.is_some() {
            self.foreground = other.foreground;
        }
        if other.background.is_some() {
            self.background = other.background;
        }
        if other.font_style.is_some() {
            self.font_style = other.font_style;
        }
    }

    /// Applies the set attributes on top of existing metadata.
    pub fn apply_to_metadata(&self, metadata: Metadata) -> Metadata {
        let mut metadata = metadata;
        if let Some(font_style) = self.font_style {
            metadata = metadata.with_font_style(font_style);
        }
        if let Some(fg) = self.foreground {
            metadata = metadata.with_foreground(fg);
        }
        if let Some(bg) = self.background {
            metadata = metadata.with_background(bg);
        }
        metadata
    }
}

/// Compiled theme rule for efficient matching
#[derive(Debug, Clone)]
pub struct CompiledThemeRule {
    pub selector: ThemeSelector,
    pub style_modifier: StyleModifier,
    leaf: LeafStyle,
    /// Position in the theme, later rules win over earlier ones of the same specificity
    index: usize,
}

impl CompiledThemeRule {
    fn rank(&self) -> (Specificity, usize) {
        (self.selector.specificity(), self.index)
    }
}

/// Compiled theme: resolves scope paths to styles.
///
/// Rules are kept sorted from least to most specific so applying every matching rule in
/// order lets the most specific one win for each attribute it sets.
pub struct CompiledTheme {
    pub name: String,
    pub theme_type: ThemeType,
    /// Default style for tokens with no specific rules
    pub default_style: Style,
    rules: Vec<CompiledThemeRule>,
    /// Color id -> color. Id 0 is unused, 1 and 2 are the default fg/bg.
    color_map: Vec<Color>,
    /// Scope name -> rules whose target matches it, least specific first
    candidates: papaya::HashMap<Scope, Arc<[usize]>>,
}

impl CompiledTheme {
    /// Builds a theme from an ordered list of rules. Rules whose selector can't be parsed
    /// are skipped.
    pub fn from_rules(
        name: impl Into<String>,
        theme_type: ThemeType,
        default_style: Style,
        rules: Vec<ThemeRule>,
    ) -> Self {
        let name = name.into();
        let mut color_map = vec![
            default_style.foreground,
            default_style.foreground,
            default_style.background,
        ];
        let mut color_ids: HashMap<Color, u16> = HashMap::new();
        let mut intern = |color: Color| -> Option<u16> {
            if let Some(id) = color_ids.get(&color) {
                return Some(*id);
            }
            let id = color_map.len() as u16;
            if id > MAX_COLOR_ID {
                log::warn!(
                    "Theme {name:?} uses more than {MAX_COLOR_ID} colors, ignoring {color:?}"
                );
                return None;
            }
            color_map.push(color);
            color_ids.insert(color, id);
            Some(id)
        };

        let mut compiled = Vec::with_capacity(rules.len());
        for (index, rule) in rules.into_iter().enumerate() {
            let Some(selector) = parse_selector(&rule.selector) else {
                log::warn!("Ignoring invalid theme selector {:?}", rule.selector);
                continue;
            };
            let leaf = LeafStyle {
                foreground: rule.style.foreground.and_then(&mut intern),
                background: rule.style.background.and_then(&mut intern),
                font_style: rule.style.font_style,
            };
            compiled.push(CompiledThemeRule {
                selector,
                style_modifier: rule.style,
                leaf,
                index,
            });
        }
        // stable: equal ranks keep theme order
        compiled.sort_by_key(|r| r.rank());

        CompiledTheme {
            name,
            theme_type,
            default_style,
            rules: compiled,
            color_map,
            candidates: papaya::HashMap::new(),
        }
    }

    pub fn from_raw_theme(raw_theme: RawTheme) -> TmResult<Self> {
        let theme_type = raw_theme
            .type_
            .as_deref()
            .map(ThemeType::from_theme_str)
            .unwrap_or_default();

        let (fg, bg) = theme_type.default_colors();
        let mut default_style = Style {
            foreground: fg,
            background: bg,
            font_style: FontStyle::empty(),
        };
        if let Some(fg) = &raw_theme.colors.foreground {
            default_style.foreground = Color::from_hex(fg)?;
        }
        if let Some(bg) = &raw_theme.colors.background {
            default_style.background = Color::from_hex(bg)?;
        }

        let mut rules = Vec::new();
        for token_rule in &raw_theme.token_colors {
            let style = StyleModifier::try_from(&token_rule.settings)?;
            let mut selectors = token_rule.selectors().peekable();
            // A rule without scope sets the theme defaults
            if selectors.peek().is_none() {
                default_style = style.apply_to(&default_style);
                continue;
            }
            for selector in selectors {
                rules.push(ThemeRule::new(selector, style));
            }
        }

        Ok(Self::from_rules(
            raw_theme.name,
            theme_type,
            default_style,
            rules,
        ))
    }

    /// Rules sorted from least to most specific
    pub fn rules(&self) -> &[CompiledThemeRule] {
        &self.rules
    }

    pub fn color_map(&self) -> &[Color] {
        &self.color_map
    }

    /// Returns the color for an id found in metadata, `None` for the "not set" id
    pub fn color(&self, id: u16) -> Option<Color> {
        if id == NO_COLOR_ID {
            return None;
        }
        self.color_map.get(id as usize).copied()
    }

    /// What the rules matching `scope` set, given the scopes above it (innermost first).
    ///
    /// Only the rules whose target matches are memoized, per scope name: parent
    /// requirements are checked against `ancestors` every time.
    pub(crate) fn match_leaf<'a>(
        &self,
        scope: &Scope,
        ancestors: impl Iterator<Item = &'a Scope> + Clone,
    ) -> LeafStyle {
        let cache = self.candidates.pin();
        let candidates = cache.get_or_insert_with(scope.clone(), || {
            self.rules
                .iter()
                .enumerate()
                .filter(|(_, rule)| rule.selector.target_scope.is_prefix_of(scope))
                .map(|(i, _)| i)
                .collect()
        });

        let mut leaf = LeafStyle::default();
        for rule in candidates.iter().map(|&i| &self.rules[i]) {
            if rule.selector.matches_parents(ancestors.clone()) {
                leaf.override_with(&rule.leaf);
            }
        }
        leaf
    }

    /// Resolves the style of a scope path, root scope first.
    ///
    /// Every level of the path gets the attributes of the rules matching it, so a scope
    /// inherits from its ancestors whatever its own rules don't set.
    pub fn resolve(&self, path: &[Scope]) -> Style {
        let mut style = self.default_style;
        for (i, scope) in path.iter().enumerate() {
            let leaf = self.match_leaf(scope, path[..i].iter().rev());
            if let Some(fg) = leaf.foreground.and_then(|id| self.color(id)) {
                style.foreground = fg;
            }
            if let Some(bg) = leaf.background.and_then(|id| self.color(id)) {
                style.background = bg;
            }
            if let Some(font_style) = leaf.font_style {
                style.font_style = font_style;
            }
        }
        style
    }

    /// Turns token metadata back into a concrete style
    pub fn style_for_metadata(&self, metadata: Metadata) -> Style {
        Style {
            foreground: self
                .color(metadata.foreground())
                .unwrap_or(self.default_style.foreground),
            background: self
                .color(metadata.background())
                .unwrap_or(self.default_style.background),
            font_style: metadata.font_style(),
        }
    }
}

impl Default for CompiledTheme {
    /// A theme without rules: everything gets the dark fallback colors
    fn default() -> Self {
        let (foreground, background) = ThemeType::Dark.default_colors();
        CompiledTheme::from_rules(
            "default",
            ThemeType::Dark,
            Style {
                foreground,
                background,
                font_style: FontStyle::empty(),
            },
            Vec::new(),
        )
    }
}

impl Clone for CompiledTheme {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            theme_type: self.theme_type,
            default_style: self.default_style,
            rules: self.rules.clone(),
            color_map: self.color_map.clone(),
            candidates: papaya::HashMap::new(),
        }
    }
}

impl fmt::Debug for CompiledTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTheme")
            .field("name", &self.name)
            .field("theme_type", &self.theme_type)
            .field("default_style", &self.default_style)
            .field("rules", &self.rules.len())
            .field("colors", &self.color_map.len())
            .finish()
    }
}
