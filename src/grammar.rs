use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::RegexEngine;
use crate::error::{Error, TintaResult};
use crate::grammars::{
    BasicScopeAttributes, BasicScopeAttributesProvider, Injection, PreparedGrammar, Rule,
    RuleArena, RuleFactory, RuleId,
};
use crate::registry::GrammarRepository;
use crate::selector::create_matchers;
use crate::themes::ThemeProvider;
use crate::token_attributes::{EncodedTokenAttributes, StandardTokenType};
use crate::tokenizer::{
    AttributedScopeStack, BalancedBracketSelectors, LineTokens, StateStack, Token,
    TokenTypeMatcher, TokenizeStringResult, Tokenizer,
};

/// Options applied when building a [`Grammar`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrammarConfiguration {
    pub(crate) initial_language_id: u8,
    pub(crate) embedded_languages: HashMap<String, u8>,
    pub(crate) token_types: Vec<(String, StandardTokenType)>,
    pub(crate) balanced_bracket_selectors: Vec<String>,
    pub(crate) unbalanced_bracket_selectors: Vec<String>,
}

impl GrammarConfiguration {
    /// `initial_language_id` is the language id of every token not inside an embedded
    /// language.
    pub fn new(initial_language_id: u8) -> Self {
        Self {
            initial_language_id,
            ..Default::default()
        }
    }

    /// Tokens inside `scope_name` (or one of its sub-scopes) get `language_id`
    pub fn embedded_language(mut self, scope_name: &str, language_id: u8) -> Self {
        self.embedded_languages
            .insert(scope_name.to_owned(), language_id);
        self
    }

    /// Forces the token type of the tokens matching `selector`. Later selectors win.
    pub fn token_type(mut self, selector: &str, token_type: StandardTokenType) -> Self {
        self.token_types.push((selector.to_owned(), token_type));
        self
    }

    pub fn balanced_bracket_selectors(mut self, selectors: Vec<String>) -> Self {
        self.balanced_bracket_selectors = selectors;
        self
    }

    pub fn unbalanced_bracket_selectors(mut self, selectors: Vec<String>) -> Self {
        self.unbalanced_bracket_selectors = selectors;
        self
    }
}

/// Tokens of one line along with the state to tokenize the next one.
#[derive(Debug, Clone)]
pub struct TokenizeLineResult {
    pub tokens: Vec<Token>,
    pub rule_stack: Arc<StateStack>,
    /// The time limit was hit: the tokens only cover the line up to where we stopped and
    /// the stack is where we stopped
    pub stopped_early: bool,
}

/// Like [`TokenizeLineResult`] but with tokens as pairs of `u32`: the start offset and the
/// [`EncodedTokenAttributes`] of every token.
#[derive(Debug, Clone)]
pub struct TokenizeLineResult2 {
    pub tokens: Vec<u32>,
    pub rule_stack: Arc<StateStack>,
    pub stopped_early: bool,
}

/// A grammar compiled for one root scope, along with the grammars it includes and the
/// grammars injected into it.
///
/// All the rules are compiled when the grammar is created, the regexes are compiled the
/// first time they are needed. A grammar can be shared between threads.
pub struct Grammar {
    scope_name: String,
    root_id: RuleId,
    rules: RuleArena,
    injections: Vec<Injection>,
    engine: Arc<dyn RegexEngine>,
    basic_attributes: BasicScopeAttributesProvider,
    theme_provider: Arc<dyn ThemeProvider>,
    token_type_matchers: Vec<TokenTypeMatcher>,
    balanced_bracket_selectors: BalancedBracketSelectors,
}

impl Grammar {
    /// Compiles the grammar for `scope_name`. External grammars it includes are looked up
    /// in `repository` and skipped if missing.
    pub fn new(
        scope_name: &str,
        repository: &dyn GrammarRepository,
        configuration: GrammarConfiguration,
        theme_provider: Arc<dyn ThemeProvider>,
        engine: Arc<dyn RegexEngine>,
    ) -> TintaResult<Self> {
        let raw = repository
            .lookup(scope_name)
            .ok_or_else(|| Error::GrammarNotFound(scope_name.to_owned()))?;

        let mut factory = RuleFactory::new(Arc::new(PreparedGrammar::new(&raw)), repository);
        let root_id = factory.compile_root();
        let injections = factory.collect_injections();
        let rules = factory.finish();

        let mut token_type_matchers = Vec::new();
        for (selector, token_type) in &configuration.token_types {
            for matcher in create_matchers(selector) {
                token_type_matchers.push(TokenTypeMatcher {
                    matcher: matcher.matcher,
                    token_type: *token_type,
                });
            }
        }

        log::debug!(
            "Compiled grammar {scope_name}: {} rules, {} injections",
            rules.len(),
            injections.len()
        );

        Ok(Self {
            scope_name: scope_name.to_owned(),
            root_id,
            rules,
            injections,
            engine,
            basic_attributes: BasicScopeAttributesProvider::new(
                configuration.initial_language_id,
                configuration.embedded_languages,
            ),
            theme_provider,
            token_type_matchers,
            balanced_bracket_selectors: BalancedBracketSelectors::new(
                &configuration.balanced_bracket_selectors,
                &configuration.unbalanced_bracket_selectors,
            ),
        })
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn root_id(&self) -> RuleId {
        self.root_id
    }

    pub fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id)
    }

    /// Injections of the grammar itself and from injection grammars, by priority
    pub fn injections(&self) -> &[Injection] {
        &self.injections
    }

    pub(crate) fn rules(&self) -> &RuleArena {
        &self.rules
    }

    pub(crate) fn engine(&self) -> &dyn RegexEngine {
        self.engine.as_ref()
    }

    pub(crate) fn theme_provider(&self) -> &dyn ThemeProvider {
        self.theme_provider.as_ref()
    }

    pub(crate) fn basic_scope_attributes(&self, scope_name: &str) -> BasicScopeAttributes {
        self.basic_attributes.basic_scope_attributes(scope_name)
    }

    /// The stack of the first line: the root rule with the theme defaults
    fn initial_state(&self) -> Arc<StateStack> {
        let default_style = self.theme_provider.defaults();
        let basic_attributes = self.basic_attributes.default_attributes();
        let default_metadata = EncodedTokenAttributes::default().set(
            basic_attributes.language_id,
            basic_attributes.token_type,
            None,
            default_style.font_style,
            default_style.foreground_id,
            default_style.background_id,
        );

        let root_name = self.rules.get(self.root_id).and_then(|r| r.name("", &[]));
        let scopes = match root_name {
            Some(name) => {
                AttributedScopeStack::create_root_and_look_up_scope_name(&name, default_metadata, self)
            }
            None => AttributedScopeStack::create_root("unknown", default_metadata),
        };
        StateStack::new_root(self.root_id, scopes)
    }

    fn tokenize(
        &self,
        line_text: &str,
        prev_state: Option<&Arc<StateStack>>,
        tokens: &mut LineTokens,
        time_limit: Option<Duration>,
    ) -> (usize, TokenizeStringResult) {
        let (stack, is_first_line) = match prev_state {
            Some(prev) => (prev.reset(), false),
            None => (self.initial_state(), true),
        };

        // Always add a new line, some regex expect it
        let line = format!("{line_text}\n");
        let result = Tokenizer::new(self, &line).tokenize_string(
            is_first_line,
            0,
            stack,
            tokens,
            true,
            time_limit,
        );
        (line.len(), result)
    }

    /// Tokenizes one line, `prev_state` being the `rule_stack` of the previous line or
    /// `None` for the first line of a document. `line_text` shouldn't contain a `\n`.
    ///
    /// Every token carries the scopes that apply to it, root first. Offsets are bytes.
    pub fn tokenize_line(
        &self,
        line_text: &str,
        prev_state: Option<&Arc<StateStack>>,
        time_limit: Option<Duration>,
    ) -> TokenizeLineResult {
        let mut tokens = LineTokens::new(
            false,
            &self.token_type_matchers,
            Some(&self.balanced_bracket_selectors),
        );
        let (line_len, result) = self.tokenize(line_text, prev_state, &mut tokens, time_limit);
        TokenizeLineResult {
            tokens: tokens.get_result(&result.stack, line_len),
            rule_stack: result.stack,
            stopped_early: result.stopped_early,
        }
    }

    /// Same as [`Grammar::tokenize_line`] but the tokens are the encoded attributes with
    /// the theme applied. Consecutive tokens with the same attributes are merged.
    pub fn tokenize_line2(
        &self,
        line_text: &str,
        prev_state: Option<&Arc<StateStack>>,
        time_limit: Option<Duration>,
    ) -> TokenizeLineResult2 {
        let mut tokens = LineTokens::new(
            true,
            &self.token_type_matchers,
            Some(&self.balanced_bracket_selectors),
        );
        let (line_len, result) = self.tokenize(line_text, prev_state, &mut tokens, time_limit);
        TokenizeLineResult2 {
            tokens: tokens.get_binary_result(&result.stack, line_len),
            rule_stack: result.stack,
            stopped_early: result.stopped_early,
        }
    }

    /// Drops every compiled regex. They are compiled again if the grammar is used.
    pub fn dispose(&self) {
        for rule in self.rules.iter() {
            rule.dispose();
        }
    }
}

impl fmt::Debug for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grammar")
            .field("scope_name", &self.scope_name)
            .field("root_id", &self.root_id)
            .field("rules", &self.rules.len())
            .field("injections", &self.injections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::RawGrammar;
    use crate::registry::Registry;
    use crate::themes::{RawTheme, Theme};

    fn format_tokens(lines: &[&str], lines_tokens: &[Vec<Token>]) -> String {
        let mut out = String::new();
        for (line_idx, (line, tokens)) in lines.iter().zip(lines_tokens).enumerate() {
            for (token_idx, token) in tokens.iter().enumerate() {
                out.push_str(&format!(
                    "{}: '{}' (line {})\n",
                    token_idx,
                    &line[token.span.clone()],
                    line_idx
                ));
                for scope in &token.scopes {
                    out.push_str(&format!("  - {scope}\n"));
                }
            }
        }
        out
    }

    fn tokenize_lines(grammar: &Grammar, lines: &[&str]) -> Vec<Vec<Token>> {
        let mut stack = None;
        let mut out = Vec::new();
        for line in lines {
            let result = grammar.tokenize_line(line, stack.as_ref(), None);
            out.push(result.tokens);
            stack = Some(result.rule_stack);
        }
        out
    }

    fn load(grammars: &[&str], scope_name: &str) -> Arc<Grammar> {
        let mut registry = Registry::new(Theme::default());
        for grammar in grammars {
            registry.add_grammar(RawGrammar::from_json_str(grammar).unwrap());
        }
        registry
            .load_grammar(scope_name, GrammarConfiguration::default())
            .unwrap()
    }

    const STRINGS: &str = r#"{
        "scopeName": "source.test",
        "patterns": [
            { "match": "\\b(let)\\s+(\\w+)", "captures": {
                "1": { "name": "keyword.other" },
                "2": { "name": "variable.name" }
            } },
            { "begin": "\"", "end": "\"", "name": "string.quoted.double",
              "beginCaptures": { "0": { "name": "punctuation.definition.string.begin" } },
              "endCaptures": { "0": { "name": "punctuation.definition.string.end" } },
              "patterns": [{ "match": "\\\\.", "name": "constant.character.escape" }] }
        ]
    }"#;

    #[test]
    fn can_tokenize_captures_and_strings() {
        let grammar = load(&[STRINGS], "source.test");
        let lines = ["let x = \"a\\nb", "c\";"];
        let out = format_tokens(&lines, &tokenize_lines(&grammar, &lines));
        insta::assert_snapshot!(out, @r#"
        0: 'let' (line 0)
          - source.test
          - keyword.other
        1: ' ' (line 0)
          - source.test
        2: 'x' (line 0)
          - source.test
          - variable.name
        3: ' = ' (line 0)
          - source.test
        4: '"' (line 0)
          - source.test
          - string.quoted.double
          - punctuation.definition.string.begin
        5: 'a' (line 0)
          - source.test
          - string.quoted.double
        6: '\n' (line 0)
          - source.test
          - string.quoted.double
          - constant.character.escape
        7: 'b' (line 0)
          - source.test
          - string.quoted.double
        0: 'c' (line 1)
          - source.test
          - string.quoted.double
        1: '"' (line 1)
          - source.test
          - string.quoted.double
          - punctuation.definition.string.end
        2: ';' (line 1)
          - source.test
        "#);
    }

    #[test]
    fn retokenizes_captures_with_patterns() {
        let grammar = load(
            &[r#"{
                "scopeName": "source.test",
                "patterns": [{
                    "match": "(\\w+)\\((.*)\\)",
                    "captures": {
                        "1": { "name": "entity.name.function" },
                        "2": { "name": "meta.arguments", "patterns": [
                            { "match": "\\d+", "name": "constant.numeric" }
                        ] }
                    }
                }]
            }"#],
            "source.test",
        );
        let lines = ["f(1, 22)"];
        let out = format_tokens(&lines, &tokenize_lines(&grammar, &lines));
        insta::assert_snapshot!(out, @r"
        0: 'f' (line 0)
          - source.test
          - entity.name.function
        1: '(' (line 0)
          - source.test
        2: '1' (line 0)
          - source.test
          - meta.arguments
          - constant.numeric
        3: ', ' (line 0)
          - source.test
          - meta.arguments
        4: '22' (line 0)
          - source.test
          - meta.arguments
          - constant.numeric
        5: ')' (line 0)
          - source.test
        ");
    }

    #[test]
    fn applies_theme_and_configuration_to_binary_tokens() {
        let theme = Theme::create_from_raw_theme(
            &RawTheme::from_json_str(
                r##"{ "settings": [
                    { "settings": { "foreground": "#111111", "background": "#222222" } },
                    { "scope": "keyword", "settings": { "foreground": "#ff0000", "fontStyle": "bold" } }
                ] }"##,
            )
            .unwrap(),
            None,
        )
        .unwrap();
        let mut registry = Registry::new(theme);
        registry.add_grammar(RawGrammar::from_json_str(STRINGS).unwrap());
        let grammar = registry
            .load_grammar(
                "source.test",
                GrammarConfiguration::new(3).token_type("variable", StandardTokenType::Comment),
            )
            .unwrap();

        let result = grammar.tokenize_line2("let x", None, None);
        let colors = registry.color_map();
        let pairs: Vec<(u32, EncodedTokenAttributes)> = result
            .tokens
            .chunks(2)
            .map(|c| (c[0], EncodedTokenAttributes(c[1])))
            .collect();
        assert_eq!(pairs.len(), 3);

        let (start, keyword) = pairs[0];
        assert_eq!(start, 0);
        assert_eq!(keyword.language_id(), 3);
        assert_eq!(colors[keyword.foreground() as usize], "#FF0000");
        assert_eq!(colors[keyword.background() as usize], "#222222");
        assert_eq!(keyword.font_style(), crate::themes::FontStyle::BOLD);

        let (start, space) = pairs[1];
        assert_eq!(start, 3);
        assert_eq!(colors[space.foreground() as usize], "#111111");
        assert_eq!(space.token_type(), StandardTokenType::Other);

        let (start, variable) = pairs[2];
        assert_eq!(start, 4);
        assert_eq!(variable.token_type(), StandardTokenType::Comment);
    }

    #[test]
    fn dispose_keeps_the_grammar_usable() {
        let grammar = load(&[STRINGS], "source.test");
        let before = grammar.tokenize_line("let x", None, None);
        grammar.dispose();
        let after = grammar.tokenize_line("let x", None, None);
        assert_eq!(before.tokens, after.tokens);
        assert_eq!(before.rule_stack, after.rule_stack);
    }
}
