use std::collections::HashMap;
use std::sync::LazyLock;

use onig::Regex;

use crate::grammars::regex::escape_regex_characters;
use crate::token_attributes::StandardTokenType;

static STANDARD_TOKEN_TYPE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(comment|string|regex|meta\.embedded)\b").expect("Invalid token type regex")
});

/// What a scope name alone says about a token: the embedded language it belongs to
/// (0 when it doesn't start an embedded language) and its standard token type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicScopeAttributes {
    pub language_id: u8,
    pub token_type: Option<StandardTokenType>,
}

/// Maps scope names to [`BasicScopeAttributes`], caching the result per scope name.
pub struct BasicScopeAttributesProvider {
    default_attributes: BasicScopeAttributes,
    embedded_languages: HashMap<String, u8>,
    /// `^((scope1)|(scope2))($|\.)`, longest scopes tried first
    embedded_languages_regex: Option<Regex>,
    cache: papaya::HashMap<String, BasicScopeAttributes>,
}

impl BasicScopeAttributesProvider {
    pub fn new(initial_language_id: u8, embedded_languages: HashMap<String, u8>) -> Self {
        Self {
            default_attributes: BasicScopeAttributes {
                language_id: initial_language_id,
                token_type: None,
            },
            embedded_languages_regex: build_embedded_languages_regex(&embedded_languages),
            embedded_languages,
            cache: papaya::HashMap::new(),
        }
    }

    /// The attributes of the root scope of the grammar
    pub fn default_attributes(&self) -> BasicScopeAttributes {
        self.default_attributes
    }

    pub fn basic_scope_attributes(&self, scope_name: &str) -> BasicScopeAttributes {
        let cache = self.cache.pin();
        *cache.get_or_insert_with(scope_name.to_owned(), || BasicScopeAttributes {
            language_id: self.scope_to_language(scope_name),
            token_type: to_standard_token_type(scope_name),
        })
    }

    fn scope_to_language(&self, scope_name: &str) -> u8 {
        let Some(regex) = &self.embedded_languages_regex else {
            return 0;
        };
        regex
            .captures(scope_name)
            .and_then(|caps| caps.at(1).map(str::to_owned))
            .and_then(|scope| self.embedded_languages.get(&scope).copied())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for BasicScopeAttributesProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicScopeAttributesProvider")
            .field("default_attributes", &self.default_attributes)
            .field("embedded_languages", &self.embedded_languages)
            .finish()
    }
}

fn build_embedded_languages_regex(embedded_languages: &HashMap<String, u8>) -> Option<Regex> {
    if embedded_languages.is_empty() {
        return None;
    }
    let mut scopes: Vec<String> = embedded_languages
        .keys()
        .map(|s| escape_regex_characters(s))
        .collect();
    scopes.sort_unstable();
    scopes.reverse();
    let alternatives = scopes
        .iter()
        .map(|s| format!("({s})"))
        .collect::<Vec<_>>()
        .join("|");
    let source = format!(r"^(({alternatives}))($|\.)");
    match Regex::new(&source) {
        Ok(re) => Some(re),
        Err(err) => {
            log::warn!("Embedded languages regex `{source}` failed to compile: {err}");
            None
        }
    }
}

fn to_standard_token_type(scope_name: &str) -> Option<StandardTokenType> {
    let caps = STANDARD_TOKEN_TYPE_REGEX.captures(scope_name)?;
    match caps.at(1)? {
        "comment" => Some(StandardTokenType::Comment),
        "string" => Some(StandardTokenType::String),
        "regex" => Some(StandardTokenType::RegEx),
        "meta.embedded" => Some(StandardTokenType::Other),
        _ => None,
    }
}
