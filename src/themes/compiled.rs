use std::cmp::Ordering;

use crate::error::TintaResult;
use crate::scope::ScopeStack;
use crate::themes::FontStyle;
use crate::themes::color::ColorMap;
use crate::themes::raw::{RawTheme, RawThemeSetting, RawThemeSettings};
use crate::themes::selector::{ParsedThemeRule, parse_theme, scope_path_matches_parent_scopes};
use crate::themes::trie::{ThemeTrieElement, ThemeTrieElementRule};

/// The style a theme gives to a scope path, colors being [`ColorMap`] ids.
/// A `None` font style and 0 colors mean the theme doesn't set them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StyleAttributes {
    pub font_style: Option<FontStyle>,
    pub foreground_id: u16,
    pub background_id: u16,
}

/// Where the tokenizer gets styles from while pushing scopes.
pub trait ThemeProvider: Send + Sync {
    /// The style of the innermost scope of `scope_path`, if any theme rule applies
    fn theme_match(&self, scope_path: &ScopeStack) -> Option<StyleAttributes>;

    /// The style of the root scope
    fn defaults(&self) -> StyleAttributes;
}

/// A theme resolved into a trie of scope segments.
#[derive(Debug)]
pub struct Theme {
    color_map: ColorMap,
    defaults: StyleAttributes,
    root: ThemeTrieElement,
    cached_match_root: papaya::HashMap<String, Vec<ThemeTrieElementRule>>,
}

impl Theme {
    /// `color_map` is a fixed palette: every color used by the theme has to be in it.
    /// Id 0 is reserved for "no color", so `palette[i]` gets the id `i + 1` and
    /// [`Theme::get_color_map`] is the palette shifted by one.
    /// Without it, colors get ids in order of appearance.
    pub fn create_from_raw_theme(
        source: &RawTheme,
        color_map: Option<Vec<String>>,
    ) -> TintaResult<Self> {
        // the editor colors are the first defaults, scope-less settings override them
        let editor_defaults = source.colors.as_ref().map(|colors| RawThemeSetting {
            settings: Some(RawThemeSettings {
                foreground: colors.foreground.clone(),
                background: colors.background.clone(),
                font_style: None,
            }),
            ..Default::default()
        });
        let rules = match editor_defaults {
            Some(defaults) => {
                let mut with_defaults = RawTheme {
                    settings: Vec::with_capacity(source.settings.len() + 1),
                    ..Default::default()
                };
                with_defaults.settings.push(defaults);
                with_defaults.settings.extend(source.settings.iter().cloned());
                parse_theme(&with_defaults)
            }
            None => parse_theme(source),
        };
        Self::create_from_parsed_theme(rules, color_map)
    }

    pub fn create_from_parsed_theme(
        mut rules: Vec<ParsedThemeRule>,
        color_map: Option<Vec<String>>,
    ) -> TintaResult<Self> {
        rules.sort_by(|a, b| {
            a.scope
                .cmp(&b.scope)
                .then_with(|| cmp_parent_scopes(&a.parent_scopes, &b.parent_scopes))
                .then_with(|| a.index.cmp(&b.index))
        });

        let mut default_font_style = FontStyle::empty();
        let mut default_foreground = "#000000".to_owned();
        let mut default_background = "#ffffff".to_owned();
        let scoped = rules.iter().take_while(|r| r.scope.is_empty()).count();
        for incoming in rules.drain(..scoped) {
            if let Some(font_style) = incoming.font_style {
                default_font_style = font_style;
            }
            if let Some(foreground) = incoming.foreground {
                default_foreground = foreground;
            }
            if let Some(background) = incoming.background {
                default_background = background;
            }
        }

        let mut color_map = ColorMap::new(color_map);
        let defaults = StyleAttributes {
            font_style: Some(default_font_style),
            foreground_id: color_map.get_id(Some(default_foreground.as_str()))?,
            background_id: color_map.get_id(Some(default_background.as_str()))?,
        };

        let mut root = ThemeTrieElement::new(
            ThemeTrieElementRule::new(0, Vec::new(), None, 0, 0),
            Vec::new(),
        );
        for rule in rules {
            let foreground = color_map.get_id(rule.foreground.as_deref())?;
            let background = color_map.get_id(rule.background.as_deref())?;
            root.insert(
                0,
                &rule.scope,
                &rule.parent_scopes,
                rule.font_style,
                foreground,
                background,
            );
        }

        Ok(Self {
            color_map,
            defaults,
            root,
            cached_match_root: papaya::HashMap::new(),
        })
    }

    /// Every color of the theme, indexed by id
    pub fn get_color_map(&self) -> &[String] {
        self.color_map.colors()
    }

    pub fn get_defaults(&self) -> StyleAttributes {
        self.defaults
    }

    /// The style of the innermost scope of the path: the most specific rule for that scope
    /// whose parent scopes match the rest of the path. `None` means the root path.
    pub fn match_scope_path(&self, scope_path: Option<&ScopeStack>) -> Option<StyleAttributes> {
        let Some(scope_path) = scope_path else {
            return Some(self.defaults);
        };
        let cache = self.cached_match_root.pin();
        let rules = cache.get_or_insert_with(scope_path.scope_name().to_owned(), || {
            self.root.match_scope(scope_path.scope_name())
        });
        rules
            .iter()
            .find(|rule| scope_path_matches_parent_scopes(scope_path.parent(), &rule.parent_scopes))
            .map(|rule| StyleAttributes {
                font_style: rule.font_style,
                foreground_id: rule.foreground,
                background_id: rule.background,
            })
    }
}

impl Default for Theme {
    /// No rules, black on white
    fn default() -> Self {
        let mut color_map = ColorMap::new(None);
        let defaults = StyleAttributes {
            font_style: Some(FontStyle::empty()),
            foreground_id: color_map.get_or_insert("#000000").unwrap_or(0),
            background_id: color_map.get_or_insert("#ffffff").unwrap_or(0),
        };
        Self {
            color_map,
            defaults,
            root: ThemeTrieElement::new(
                ThemeTrieElementRule::new(0, Vec::new(), None, 0, 0),
                Vec::new(),
            ),
            cached_match_root: papaya::HashMap::new(),
        }
    }
}

impl ThemeProvider for Theme {
    fn theme_match(&self, scope_path: &ScopeStack) -> Option<StyleAttributes> {
        self.match_scope_path(Some(scope_path))
    }

    fn defaults(&self) -> StyleAttributes {
        self.defaults
    }
}

/// Shorter lists first, then element by element
fn cmp_parent_scopes(a: &[String], b: &[String]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn theme(json: &str) -> Theme {
        Theme::create_from_raw_theme(&RawTheme::from_json_str(json).unwrap(), None).unwrap()
    }

    fn style(theme: &Theme, path: &[&str]) -> Option<StyleAttributes> {
        theme.match_scope_path(ScopeStack::from_segments(path).as_deref())
    }

    #[test]
    fn resolves_defaults() {
        let theme = theme(
            r##"{ "settings": [
                { "settings": { "foreground": "#f8f8f2", "background": "#272822" } },
                { "scope": "", "settings": { "fontStyle": "italic" } }
            ] }"##,
        );
        assert_eq!(
            theme.get_defaults(),
            StyleAttributes {
                font_style: Some(FontStyle::ITALIC),
                foreground_id: 1,
                background_id: 2
            }
        );
        assert_eq!(theme.get_color_map(), &["", "#F8F8F2", "#272822"]);
        assert_eq!(style(&theme, &[]), Some(theme.get_defaults()));
    }

    #[test]
    fn editor_colors_are_defaults() {
        let theme = theme(
            r##"{
                "colors": { "editor.foreground": "#111111", "editor.background": "#222222" },
                "tokenColors": [{ "settings": { "background": "#333333" } }]
            }"##,
        );
        let defaults = theme.get_defaults();
        assert_eq!(theme.get_color_map()[defaults.foreground_id as usize], "#111111");
        assert_eq!(theme.get_color_map()[defaults.background_id as usize], "#333333");
    }

    #[test]
    fn matches_most_specific_rule() {
        let theme = theme(
            r##"{ "settings": [
                { "scope": "string", "settings": { "foreground": "#ff0000" } },
                { "scope": "string.quoted", "settings": { "fontStyle": "bold" } },
                { "scope": "source.js string", "settings": { "foreground": "#00ff00" } },
                { "scope": "meta.tag > string", "settings": { "foreground": "#0000ff" } }
            ] }"##,
        );
        let red = theme.color_map.colors().iter().position(|c| c == "#FF0000").unwrap() as u16;
        let green = theme.color_map.colors().iter().position(|c| c == "#00FF00").unwrap() as u16;
        let blue = theme.color_map.colors().iter().position(|c| c == "#0000FF").unwrap() as u16;

        let s = style(&theme, &["source.ts", "string.quoted.double"]).unwrap();
        assert_eq!(s.foreground_id, red);
        assert_eq!(s.font_style, Some(FontStyle::BOLD));

        // a deeper scope match beats parent qualifiers
        let s = style(&theme, &["source.js", "string.quoted.double"]).unwrap();
        assert_eq!(s.foreground_id, red);
        assert_eq!(s.font_style, Some(FontStyle::BOLD));

        let s = style(&theme, &["source.js", "string.unquoted"]).unwrap();
        assert_eq!(s.foreground_id, green);
        assert_eq!(s.font_style, None);

        let s = style(&theme, &["source.ts", "meta.tag", "string"]).unwrap();
        assert_eq!(s.foreground_id, blue);
        let s = style(&theme, &["source.ts", "meta.tag", "meta.attr", "string"]).unwrap();
        assert_eq!(s.foreground_id, red);

        // nothing set for this scope
        let s = style(&theme, &["source.ts", "keyword"]).unwrap();
        assert_eq!(s, StyleAttributes::default());
    }

    #[test]
    fn frozen_color_map_errors_on_unknown_colors() {
        let raw = RawTheme::from_json_str(
            r##"{ "settings": [{ "scope": "string", "settings": { "foreground": "#abcdef" } }] }"##,
        )
        .unwrap();
        let palette = vec!["#000000".to_owned(), "#FFFFFF".to_owned()];
        assert!(Theme::create_from_raw_theme(&raw, Some(palette.clone())).is_err());
        let mut palette = palette;
        palette.push("#ABCDEF".to_owned());
        let theme = Theme::create_from_raw_theme(&raw, Some(palette.clone())).unwrap();
        assert_eq!(theme.get_color_map().len(), 4);

        // palette[i] is id i + 1, id 0 being unset
        let s = style(&theme, &["source", "string"]).unwrap();
        assert_eq!(s.foreground_id, 3);
        assert_eq!(theme.get_color_map()[1..], palette[..]);
    }
}
