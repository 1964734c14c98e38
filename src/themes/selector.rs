use crate::scope::ScopeStack;
use crate::themes::FontStyle;
use crate::themes::color::is_valid_hex_color;
use crate::themes::raw::{RawScope, RawTheme};

/// A theme rule for a single scope selector, eg `"source.js > string.quoted"` becomes
/// scope `string.quoted` with parent scopes `[">", "source.js"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedThemeRule {
    /// The innermost scope, the last segment of the selector
    pub scope: String,
    /// The other segments, innermost first. Empty if there were none.
    pub parent_scopes: Vec<String>,
    /// Position of the setting in the theme, to keep the theme order on ties
    pub index: usize,
    /// `None` when the setting doesn't mention a font style
    pub font_style: Option<FontStyle>,
    pub foreground: Option<String>,
    pub background: Option<String>,
}

/// Flattens the theme settings into one rule per scope selector.
pub fn parse_theme(source: &RawTheme) -> Vec<ParsedThemeRule> {
    let mut result = Vec::new();

    for (index, entry) in source.settings.iter().enumerate() {
        let Some(settings) = &entry.settings else {
            continue;
        };

        let scopes: Vec<&str> = match &entry.scope {
            Some(RawScope::Selector(selector)) => selector.trim_matches(',').split(',').collect(),
            Some(RawScope::List(list)) => list.iter().map(String::as_str).collect(),
            None => vec![""],
        };

        let font_style = settings.font_style.as_deref().map(FontStyle::from_str);
        let foreground = settings
            .foreground
            .as_deref()
            .filter(|c| is_valid_hex_color(c))
            .map(str::to_owned);
        let background = settings
            .background
            .as_deref()
            .filter(|c| is_valid_hex_color(c))
            .map(str::to_owned);

        for scope in scopes {
            let mut segments: Vec<&str> = scope.trim().split(' ').collect();
            let scope = segments.pop().unwrap_or_default();
            segments.reverse();

            result.push(ParsedThemeRule {
                scope: scope.to_owned(),
                parent_scopes: segments.into_iter().map(str::to_owned).collect(),
                index,
                font_style,
                foreground: foreground.clone(),
                background: background.clone(),
            });
        }
    }

    result
}

/// `scope_name` is `pattern` or starts with `pattern` followed by a dot
pub(crate) fn matches_scope(scope_name: &str, pattern: &str) -> bool {
    scope_name
        .strip_prefix(pattern)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

/// Checks the parent scopes of a theme rule, innermost first, against a scope path.
/// Each parent can be anywhere above the previous one, unless preceded by `>` in which
/// case it must be directly above it.
pub(crate) fn scope_path_matches_parent_scopes(
    scope_path: Option<&ScopeStack>,
    parent_scopes: &[String],
) -> bool {
    let mut scope_path = scope_path;
    let mut index = 0;

    while index < parent_scopes.len() {
        let mut scope_pattern = parent_scopes[index].as_str();
        let mut must_match = false;
        if scope_pattern == ">" {
            if index == parent_scopes.len() - 1 {
                return false;
            }
            index += 1;
            scope_pattern = &parent_scopes[index];
            must_match = true;
        }

        loop {
            let Some(current) = scope_path else {
                return false;
            };
            if matches_scope(current.scope_name(), scope_pattern) {
                break;
            }
            if must_match {
                return false;
            }
            scope_path = current.parent();
        }

        scope_path = scope_path.and_then(|s| s.parent());
        index += 1;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::themes::raw::{RawThemeSetting, RawThemeSettings};

    fn path(segments: &[&str]) -> std::sync::Arc<ScopeStack> {
        ScopeStack::from_segments(segments).unwrap()
    }

    fn parents(p: &[&str]) -> Vec<String> {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_theme_settings() {
        let theme = RawTheme {
            settings: vec![
                RawThemeSetting {
                    scope: Some(RawScope::Selector(",source.js string, comment,".to_owned())),
                    settings: Some(RawThemeSettings {
                        font_style: Some("italic bold".to_owned()),
                        foreground: Some("#ff0000".to_owned()),
                        background: Some("inherit".to_owned()),
                    }),
                    ..Default::default()
                },
                RawThemeSetting {
                    scope: Some(RawScope::Selector("no.settings".to_owned())),
                    settings: None,
                    ..Default::default()
                },
                RawThemeSetting {
                    settings: Some(RawThemeSettings::default()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let rules = parse_theme(&theme);

        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].scope, "string");
        assert_eq!(rules[0].parent_scopes, parents(&["source.js"]));
        assert_eq!(rules[0].font_style, Some(FontStyle::from_bits(0b11)));
        assert_eq!(rules[0].foreground.as_deref(), Some("#ff0000"));
        assert_eq!(rules[0].background, None);
        assert_eq!(rules[1].scope, "comment");
        assert!(rules[1].parent_scopes.is_empty());
        assert_eq!(rules[2].scope, "");
        assert_eq!(rules[2].index, 2);
        assert_eq!(rules[2].font_style, None);
    }

    #[test]
    fn parent_selectors_are_reversed() {
        let theme = RawTheme {
            settings: vec![RawThemeSetting {
                scope: Some(RawScope::List(vec!["a > b c".to_owned()])),
                settings: Some(RawThemeSettings::default()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let rules = parse_theme(&theme);
        assert_eq!(rules[0].scope, "c");
        assert_eq!(rules[0].parent_scopes, parents(&["b", ">", "a"]));
    }

    #[test]
    fn matches_scope_on_dot_boundaries() {
        assert!(matches_scope("string.quoted", "string"));
        assert!(matches_scope("string", "string"));
        assert!(!matches_scope("strings", "string"));
        assert!(!matches_scope("string", "string.quoted"));
    }

    #[test]
    fn matches_parent_scopes() {
        let p = path(&["source.js", "meta.function", "meta.block"]);
        let cases: Vec<(&[&str], bool)> = vec![
            (&[], true),
            (&["meta.block"], true),
            (&["source"], true),
            (&["meta.function", "source.js"], true),
            (&["source.js", "meta.function"], false),
            (&[">", "meta.block"], true),
            (&[">", "meta.function"], false),
            (&["meta.block", ">", "meta.function"], true),
            (&["meta.block", ">", "source.js"], false),
            (&["meta.block", ">"], false),
            (&["source.ts"], false),
        ];
        for (parent_scopes, expected) in cases {
            assert_eq!(
                scope_path_matches_parent_scopes(Some(&p), &parents(parent_scopes)),
                expected,
                "parents {parent_scopes:?}"
            );
        }
        assert!(!scope_path_matches_parent_scopes(None, &parents(&["source"])));
        assert!(scope_path_matches_parent_scopes(None, &[]));
    }
}
