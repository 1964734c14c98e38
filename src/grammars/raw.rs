use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::TintaResult;
use crate::grammars::RuleId;

/// The compiled rule id of a raw rule, assigned the first time the rule is compiled.
///
/// Cloning gives an empty slot: a cloned grammar compiles into its own rule arena.
#[derive(Default)]
pub struct RuleIdSlot(OnceLock<RuleId>);

impl RuleIdSlot {
    pub(crate) fn get(&self) -> Option<RuleId> {
        self.0.get().copied()
    }

    /// Returns false if an id had already been assigned
    pub(crate) fn assign(&self, id: RuleId) -> bool {
        self.0.set(id).is_ok()
    }
}

impl Clone for RuleIdSlot {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl fmt::Debug for RuleIdSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(id) => write!(f, "{id:?}"),
            None => f.write_str("not compiled"),
        }
    }
}

/// Capture groups, keyed by group number.
///
/// # Examples
/// ```json
/// {
///   "1": { "name": "entity.name.function.js" },
///   "2": { "name": "punctuation.definition.parameters.begin.js" }
/// }
/// ```
///
/// Keys that are not numbers are ignored. An array is accepted too, the position being
/// the group number.
#[derive(Debug, Clone, Default)]
pub struct RawCaptures(pub BTreeMap<usize, RawRule>);

impl RawCaptures {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for RawCaptures {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CapturesVisitor;

        impl<'de> Visitor<'de> for CapturesVisitor {
            type Value = RawCaptures;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map or an array of captures")
            }

            fn visit_map<V>(self, mut map: V) -> Result<RawCaptures, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut captures = BTreeMap::new();
                while let Some(key) = map.next_key::<String>()? {
                    match key.trim().parse::<usize>() {
                        Ok(index) => {
                            captures.insert(index, map.next_value()?);
                        }
                        Err(_) => {
                            let _: de::IgnoredAny = map.next_value()?;
                        }
                    }
                }
                Ok(RawCaptures(captures))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<RawCaptures, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut captures = BTreeMap::new();
                let mut index = 0;
                while let Some(rule) = seq.next_element()? {
                    captures.insert(index, rule);
                    index += 1;
                }
                Ok(RawCaptures(captures))
            }
        }

        deserializer.deserialize_any(CapturesVisitor)
    }
}

/// Named rules that `#name` includes resolve against.
pub type RawRepository = BTreeMap<String, RawRule>;

/// `applyEndPatternLast` shows up both as a boolean and as 0/1 in the wild
fn deserialize_bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct BoolOrIntVisitor;

    impl Visitor<'_> for BoolOrIntVisitor {
        type Value = bool;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a boolean or an integer")
        }

        fn visit_bool<E: de::Error>(self, value: bool) -> Result<bool, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<bool, E> {
            Ok(value != 0)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<bool, E> {
            Ok(value != 0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<bool, E> {
            Ok(false)
        }
    }

    deserializer.deserialize_any(BoolOrIntVisitor)
}

/// A single grammar rule. Which fields are present decides what it compiles to:
///
/// - `match`: a single regex, eg keywords
/// - `begin` + `end`: a region such as a string or a block comment
/// - `begin` + `while`: a region that continues while each line matches, eg markdown quotes
/// - otherwise a list of `patterns` (or a lone `include`)
///
/// # Examples
/// ```json
/// {
///   "name": "string.quoted.double.js",
///   "begin": "\"",
///   "end": "\"",
///   "beginCaptures": {
///     "0": { "name": "punctuation.definition.string.begin.js" }
///   },
///   "patterns": [
///     { "match": "\\\\.", "name": "constant.character.escape.js" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"), default)]
pub struct RawRule {
    #[serde(skip)]
    pub(crate) id: RuleIdSlot,
    /// - "#name": a repository entry of the current grammar
    /// - "source.lang": another grammar's root patterns
    /// - "source.lang#name": a repository entry in another grammar
    /// - "$self": the current grammar's root patterns
    /// - "$base": the root patterns of the grammar we started tokenizing with
    pub include: Option<String>,
    pub name: Option<String>,
    pub content_name: Option<String>,
    #[serde(rename(deserialize = "match"))]
    pub match_: Option<String>,
    pub captures: Option<RawCaptures>,
    pub begin: Option<String>,
    pub begin_captures: Option<RawCaptures>,
    pub end: Option<String>,
    pub end_captures: Option<RawCaptures>,
    #[serde(rename(deserialize = "while"))]
    pub while_: Option<String>,
    pub while_captures: Option<RawCaptures>,
    pub patterns: Option<Vec<RawRule>>,
    pub repository: Option<RawRepository>,
    #[serde(deserialize_with = "deserialize_bool_or_int")]
    pub apply_end_pattern_last: bool,
}

/// Top-level structure of a `.tmLanguage.json` grammar.
///
/// # Examples
/// ```json
/// {
///   "name": "JavaScript",
///   "scopeName": "source.js",
///   "patterns": [
///     { "include": "#statements" }
///   ],
///   "repository": {
///     "statements": {
///       "patterns": [{ "include": "#keywords" }]
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"), default)]
pub struct RawGrammar {
    /// Unique identifier for this grammar's scope
    /// Example: "source.js", "text.html.markdown"
    pub scope_name: String,
    /// Human-readable name of the language
    pub name: Option<String>,
    /// Root patterns
    pub patterns: Vec<RawRule>,
    /// Named rules that can be referenced by includes
    pub repository: RawRepository,
    /// Rules injected into this grammar, keyed by scope selector
    pub injections: BTreeMap<String, RawRule>,
    /// Makes this grammar an injection grammar: where its patterns are injected when it
    /// is listed as an injection of the grammar being tokenized.
    /// Example: "L:text.html.markdown -comment"
    pub injection_selector: Option<String>,
    /// The scopes this grammar should be injected into
    pub inject_to: Vec<String>,
    pub file_types: Vec<String>,
    pub first_line_match: Option<String>,
}

impl RawGrammar {
    /// Parses a grammar from its JSON form.
    pub fn from_json_str(json: &str) -> TintaResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The rule standing for the grammar itself when including `$self` or its scope name.
    pub(crate) fn self_rule(&self) -> RawRule {
        RawRule {
            name: Some(self.scope_name.clone()),
            patterns: Some(self.patterns.clone()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_deserialize_grammar() {
        let grammar = RawGrammar::from_json_str(
            r##"{
                "name": "Test",
                "scopeName": "source.test",
                "patterns": [
                    { "include": "#string" },
                    { "match": "\\d+", "name": "constant.numeric", "captures": { "0": { "name": "x" } } }
                ],
                "repository": {
                    "string": {
                        "begin": "\"", "end": "\"", "name": "string.quoted",
                        "applyEndPatternLast": 1,
                        "beginCaptures": { "0": { "name": "punctuation" }, "comment": "ignored" }
                    }
                },
                "injections": { "L:source.test -comment": { "patterns": [] } }
            }"##,
        )
        .unwrap();

        assert_eq!(grammar.scope_name, "source.test");
        assert_eq!(grammar.patterns.len(), 2);
        assert_eq!(grammar.patterns[0].include.as_deref(), Some("#string"));
        assert_eq!(grammar.patterns[1].match_.as_deref(), Some("\\d+"));
        let string = &grammar.repository["string"];
        assert!(string.apply_end_pattern_last);
        assert_eq!(string.begin_captures.as_ref().unwrap().0.len(), 1);
        assert_eq!(grammar.injections.len(), 1);
    }

    #[test]
    fn apply_end_pattern_last_accepts_booleans() {
        let rule: RawRule =
            serde_json::from_str(r#"{ "begin": "a", "end": "b", "applyEndPatternLast": true }"#)
                .unwrap();
        assert!(rule.apply_end_pattern_last);
        let rule: RawRule =
            serde_json::from_str(r#"{ "begin": "a", "end": "b", "applyEndPatternLast": 0 }"#)
                .unwrap();
        assert!(!rule.apply_end_pattern_last);
    }

    #[test]
    fn captures_can_be_an_array() {
        let rule: RawRule =
            serde_json::from_str(r#"{ "match": "(a)", "captures": [{ "name": "all" }, { "name": "a" }] }"#)
                .unwrap();
        let captures = rule.captures.unwrap();
        assert_eq!(captures.0[&1].name.as_deref(), Some("a"));
    }

    #[test]
    fn cloning_resets_compiled_id() {
        let rule = RawRule::default();
        assert!(rule.id.assign(RuleId(3)));
        assert!(!rule.id.assign(RuleId(4)));
        assert_eq!(rule.id.get(), Some(RuleId(3)));
        assert_eq!(rule.clone().id.get(), None);
    }
}
