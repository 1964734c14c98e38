use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::TintaResult;

/// The `settings` of a theme rule, colors being hex strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"), default)]
pub struct RawThemeSettings {
    pub font_style: Option<String>,
    pub foreground: Option<String>,
    pub background: Option<String>,
}

/// `scope` can be a comma separated string or an array
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawScope {
    Selector(String),
    List(Vec<String>),
}

impl<'de> Deserialize<'de> for RawScope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ScopeVisitor;

        impl<'de> Visitor<'de> for ScopeVisitor {
            type Value = RawScope;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("string or array of strings")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(RawScope::Selector(value.to_owned()))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut vec = Vec::new();
                while let Some(item) = seq.next_element::<String>()? {
                    vec.push(item);
                }
                Ok(RawScope::List(vec))
            }
        }

        deserializer.deserialize_any(ScopeVisitor)
    }
}

/// One entry of a theme's `settings` (or `tokenColors`).
/// An entry without a scope sets the theme defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RawThemeSetting {
    pub name: Option<String>,
    pub scope: Option<RawScope>,
    pub settings: Option<RawThemeSettings>,
}

/// The editor colors of a VS Code theme. Only the default foreground/background are used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawThemeColors {
    pub foreground: Option<String>,
    pub background: Option<String>,
}

// Some themes have it as editor.foreground/background some don't have the editor. prefix
impl<'de> Deserialize<'de> for RawThemeColors {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ColorsVisitor;

        impl<'de> Visitor<'de> for ColorsVisitor {
            type Value = RawThemeColors;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of editor colors")
            }

            fn visit_map<V>(self, mut map: V) -> Result<RawThemeColors, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut colors = RawThemeColors::default();

                while let Some(key) = map.next_key::<String>()? {
                    let slot = match key.as_str() {
                        "foreground" | "editor.foreground" => &mut colors.foreground,
                        "background" | "editor.background" => &mut colors.background,
                        _ => {
                            let _: de::IgnoredAny = map.next_value()?;
                            continue;
                        }
                    };
                    // first one wins
                    if slot.is_none() {
                        *slot = map.next_value()?;
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

/// A theme as found in `.tmTheme` converted to JSON or VS Code theme files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RawTheme {
    pub name: Option<String>,
    #[serde(alias = "tokenColors")]
    pub settings: Vec<RawThemeSetting>,
    pub colors: Option<RawThemeColors>,
}

impl RawTheme {
    pub fn from_json_str(json: &str) -> TintaResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
