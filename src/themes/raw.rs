use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::TmResult;
use crate::themes::compiled::CompiledTheme;

/// Token color settings from VSCode theme JSON
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TokenColorSettings {
    foreground: Option<String>,
    background: Option<String>,
    #[serde(rename = "fontStyle")]
    pub font_style: Option<String>,
}

impl TokenColorSettings {
    pub fn foreground(&self) -> Option<&str> {
        self.foreground.as_deref().filter(|s| *s != "inherit")
    }

    pub fn background(&self) -> Option<&str> {
        self.background.as_deref().filter(|s| *s != "inherit")
    }
}

/// `scope` is either a single string or an array of strings
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn deserialize_string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(scope) => vec![scope],
        OneOrMany::Many(scopes) => scopes,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Colors {
    pub foreground: Option<String>,
    pub background: Option<String>,
}

// Some themes have it as editor.foreground/background some don't have the editor. prefix
impl<'de> Deserialize<'de> for Colors {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ColorsVisitor;

        impl<'de> Visitor<'de> for ColorsVisitor {
            type Value = Colors;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("struct Colors")
            }

            fn visit_map<V>(self, mut map: V) -> Result<Colors, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut colors = Colors::default();

                while let Some(key) = map.next_key::<String>()? {
                    let slot = match key.as_str() {
                        "foreground" | "editor.foreground" => &mut colors.foreground,
                        "background" | "editor.background" => &mut colors.background,
                        _ => {
                            let _: de::IgnoredAny = map.next_value()?;
                            continue;
                        }
                    };
                    if slot.is_none() {
                        *slot = Some(map.next_value()?);
                    } else {
                        let _: de::IgnoredAny = map.next_value()?;
                    }
                }

                Ok(colors)
            }
        }

        deserializer.deserialize_map(ColorsVisitor)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenColorRule {
    #[serde(deserialize_with = "deserialize_string_or_vec", default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub settings: TokenColorSettings,
}

impl TokenColorRule {
    /// All the selectors of that rule: array entries and comma separated lists are both
    /// accepted.
    pub fn selectors(&self) -> impl Iterator<Item = &str> {
        self.scope
            .iter()
            .flat_map(|s| s.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Raw theme loaded from a JSON theme file
#[derive(Debug, Clone, Deserialize)]
pub struct RawTheme {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    #[serde(default)]
    pub colors: Colors,
    /// Token color rules for syntax highlighting
    #[serde(rename = "tokenColors", alias = "settings", default)]
    pub token_colors: Vec<TokenColorRule>,
}

impl RawTheme {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> TmResult<Self> {
        let file = File::open(path)?;
        let theme = serde_json::from_reader(BufReader::new(file))?;
        Ok(theme)
    }

    /// Compile this raw theme into a theme usable by the tokenizer
    pub fn compile(self) -> TmResult<CompiledTheme> {
        CompiledTheme::from_raw_theme(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_deserialize_vscode_theme() {
        let raw: RawTheme = serde_json::from_str(
            r##"{
                "name": "test",
                "type": "light",
                "colors": {"editor.foreground": "#111111", "editor.background": "#EEEEEE", "foo": 1},
                "tokenColors": [
                    {"settings": {"foreground": "#222222"}},
                    {"scope": "comment, string.quoted", "settings": {"fontStyle": "italic"}},
                    {"scope": ["keyword", "storage"], "settings": {"foreground": "inherit"}}
                ]
            }"##,
        )
        .unwrap();

        assert_eq!(raw.colors.foreground.as_deref(), Some("#111111"));
        assert_eq!(raw.colors.background.as_deref(), Some("#EEEEEE"));
        assert_eq!(raw.token_colors.len(), 3);
        assert!(raw.token_colors[0].selectors().next().is_none());
        assert_eq!(
            raw.token_colors[1].selectors().collect::<Vec<_>>(),
            vec!["comment", "string.quoted"]
        );
        assert_eq!(raw.token_colors[2].settings.foreground(), None);
    }
}
