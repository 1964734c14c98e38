use std::ops::Range;
use std::sync::Arc;

use crate::selector::{Matcher, create_matchers};
use crate::token_attributes::{EncodedTokenAttributes, StandardTokenType};
use crate::tokenizer::stack::{AttributedScopeStack, StateStack};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Byte span within the line (start inclusive, end exclusive, 0-based)
    pub span: Range<usize>,
    /// Scope names, ordered from outermost to innermost
    /// (e.g., source.js -> string.quoted.double -> punctuation.definition.string).
    pub scopes: Vec<String>,
}

/// Forces the token type of the tokens whose scopes match `matcher`
#[derive(Debug, Clone)]
pub(crate) struct TokenTypeMatcher {
    pub matcher: Matcher,
    pub token_type: StandardTokenType,
}

/// Which tokens contain brackets that should be matched by an editor.
///
/// `*` as a balanced selector means every token unless an unbalanced selector excludes it.
#[derive(Debug, Clone, Default)]
pub struct BalancedBracketSelectors {
    balanced: Vec<Matcher>,
    unbalanced: Vec<Matcher>,
    allow_any: bool,
}

impl BalancedBracketSelectors {
    pub fn new<S: AsRef<str>>(balanced_selectors: &[S], unbalanced_selectors: &[S]) -> Self {
        let mut allow_any = false;
        let mut balanced = Vec::new();
        for selector in balanced_selectors {
            let selector = selector.as_ref();
            if selector == "*" {
                allow_any = true;
                continue;
            }
            balanced.extend(create_matchers(selector).into_iter().map(|m| m.matcher));
        }
        let unbalanced = unbalanced_selectors
            .iter()
            .flat_map(|s| create_matchers(s.as_ref()))
            .map(|m| m.matcher)
            .collect();

        Self {
            balanced,
            unbalanced,
            allow_any,
        }
    }

    pub fn matches_always(&self) -> bool {
        self.allow_any && self.unbalanced.is_empty()
    }

    pub fn matches_never(&self) -> bool {
        self.balanced.is_empty() && !self.allow_any
    }

    pub fn matches<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        if self.unbalanced.iter().any(|m| m.matches_scopes(scopes)) {
            return false;
        }
        if self.balanced.iter().any(|m| m.matches_scopes(scopes)) {
            return true;
        }
        self.allow_any
    }
}

/// Collects the tokens of a line as the tokenizer advances. Every `produce` call closes
/// the token going from the previous call to `end_pos`, empty tokens are skipped.
#[derive(Debug)]
pub(crate) struct LineTokens<'a> {
    emit_binary_tokens: bool,
    tokens: Vec<Token>,
    /// Pairs of (start offset, metadata), consecutive tokens with the same metadata merged
    binary_tokens: Vec<u32>,
    /// Position up to which tokens have been generated
    /// (start of next token to be produced)
    last_end_pos: usize,
    token_type_overrides: &'a [TokenTypeMatcher],
    balanced_bracket_selectors: Option<&'a BalancedBracketSelectors>,
}

impl<'a> LineTokens<'a> {
    pub fn new(
        emit_binary_tokens: bool,
        token_type_overrides: &'a [TokenTypeMatcher],
        balanced_bracket_selectors: Option<&'a BalancedBracketSelectors>,
    ) -> Self {
        Self {
            emit_binary_tokens,
            tokens: Vec::new(),
            binary_tokens: Vec::new(),
            last_end_pos: 0,
            token_type_overrides,
            balanced_bracket_selectors,
        }
    }

    pub fn produce(&mut self, stack: &StateStack, end_pos: usize) {
        self.produce_from_scopes(stack.content_name_scopes_list(), end_pos);
    }

    pub fn produce_from_scopes(&mut self, scopes: &Arc<AttributedScopeStack>, end_pos: usize) {
        // Skip empty tokens (can happen with zero-width matches)
        if self.last_end_pos >= end_pos {
            return;
        }

        #[cfg(feature = "debug")]
        log::debug!(
            "[produce]: [{}..{end_pos}] {}",
            self.last_end_pos,
            scopes.scope_path()
        );

        if self.emit_binary_tokens {
            let metadata = self.binary_metadata(scopes);
            if self.binary_tokens.last() == Some(&metadata.0) {
                self.last_end_pos = end_pos;
                return;
            }
            self.binary_tokens.push(self.last_end_pos as u32);
            self.binary_tokens.push(metadata.0);
            self.last_end_pos = end_pos;
            return;
        }

        self.tokens.push(Token {
            span: self.last_end_pos..end_pos,
            scopes: scopes.scope_names().into_iter().map(str::to_owned).collect(),
        });
        self.last_end_pos = end_pos;
    }

    fn binary_metadata(&self, scopes: &AttributedScopeStack) -> EncodedTokenAttributes {
        let mut metadata = scopes.token_attributes();
        let mut contains_balanced_brackets = self
            .balanced_bracket_selectors
            .is_some_and(|s| s.matches_always());

        let selectors_undecided = self
            .balanced_bracket_selectors
            .is_some_and(|s| !s.matches_always() && !s.matches_never());
        if !self.token_type_overrides.is_empty() || selectors_undecided {
            let scope_names = scopes.scope_names();
            for token_type in self.token_type_overrides {
                if token_type.matcher.matches_scopes(&scope_names) {
                    metadata = metadata.set(0, Some(token_type.token_type), None, None, 0, 0);
                }
            }
            if let Some(selectors) = self.balanced_bracket_selectors {
                contains_balanced_brackets = selectors.matches(&scope_names);
            }
        }

        if contains_balanced_brackets {
            metadata = metadata.set(0, None, Some(true), None, 0, 0);
        }
        metadata
    }

    /// The tokens of the line, `line_len` including the `\n` added for tokenization.
    ///
    /// The token starting on the added `\n` is dropped and the last token is clamped to the
    /// original line. A line without tokens gets a single one spanning all of it.
    pub fn get_result(&mut self, stack: &StateStack, line_len: usize) -> Vec<Token> {
        if let Some(token) = self.tokens.last()
            && token.span.start + 1 == line_len
        {
            self.tokens.pop();
        }

        if self.tokens.is_empty() {
            self.last_end_pos = 0;
            self.produce(stack, line_len);
        }

        let text_len = line_len.saturating_sub(1);
        if let Some(token) = self.tokens.last_mut()
            && token.span.end > text_len
        {
            token.span.end = text_len;
            token.span.start = token.span.start.min(text_len);
        }

        std::mem::take(&mut self.tokens)
    }

    /// The binary tokens of the line: pairs of start offset and metadata
    pub fn get_binary_result(&mut self, stack: &StateStack, line_len: usize) -> Vec<u32> {
        let len = self.binary_tokens.len();
        if len >= 2 && self.binary_tokens[len - 2] as usize + 1 == line_len {
            self.binary_tokens.truncate(len - 2);
        }

        if self.binary_tokens.is_empty() {
            self.last_end_pos = 0;
            self.produce(stack, line_len);
        }

        std::mem::take(&mut self.binary_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::RuleId;

    fn stack(scope: &str, attributes: u32) -> Arc<StateStack> {
        StateStack::new_root(
            RuleId(0),
            AttributedScopeStack::create_root(scope, EncodedTokenAttributes(attributes)),
        )
    }

    #[test]
    fn skips_empty_tokens() {
        let state = stack("source.test", 0);
        let mut tokens = LineTokens::new(false, &[], None);
        tokens.produce(&state, 0);
        tokens.produce(&state, 3);
        tokens.produce(&state, 3);
        tokens.produce(&state, 5);
        let result = tokens.get_result(&state, 6);
        let spans: Vec<_> = result.iter().map(|t| t.span.clone()).collect();
        assert_eq!(spans, vec![0..3, 3..5]);
    }

    #[test]
    fn drops_newline_token_and_clamps() {
        let state = stack("source.test", 0);
        let mut tokens = LineTokens::new(false, &[], None);
        tokens.produce(&state, 2);
        tokens.produce(&state, 4);
        let result = tokens.get_result(&state, 4);
        assert_eq!(result.last().unwrap().span, 2..3);

        let mut tokens = LineTokens::new(false, &[], None);
        tokens.produce(&state, 3);
        tokens.produce(&state, 4);
        let result = tokens.get_result(&state, 4);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].span, 0..3);
    }

    #[test]
    fn empty_line_gets_one_token() {
        let state = stack("source.test", 0);
        let mut tokens = LineTokens::new(false, &[], None);
        let result = tokens.get_result(&state, 1);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].span, 0..0);
        assert_eq!(result[0].scopes, vec!["source.test".to_owned()]);
    }

    #[test]
    fn merges_binary_tokens_with_same_metadata() {
        let a = stack("source.test", 1);
        let b = stack("source.test", 2);
        let mut tokens = LineTokens::new(true, &[], None);
        tokens.produce(&a, 2);
        tokens.produce(&a, 4);
        tokens.produce(&b, 6);
        tokens.produce(&a, 8);
        let result = tokens.get_binary_result(&a, 9);
        assert_eq!(result, vec![0, 1, 4, 2, 6, 1]);
    }

    #[test]
    fn balanced_bracket_selectors() {
        let any = BalancedBracketSelectors::new(&["*"], &[]);
        assert!(any.matches_always());
        let none = BalancedBracketSelectors::new::<&str>(&[], &[]);
        assert!(none.matches_never());

        let selectors = BalancedBracketSelectors::new(&["*"], &["string", "comment"]);
        assert!(!selectors.matches_always());
        assert!(!selectors.matches_never());
        assert!(selectors.matches(&["source.js", "meta.block"]));
        assert!(!selectors.matches(&["source.js", "string.quoted"]));

        let selectors = BalancedBracketSelectors::new(&["meta.brace"], &[]);
        assert!(selectors.matches(&["source.js", "meta.brace.round"]));
        assert!(!selectors.matches(&["source.js"]));
    }

    #[test]
    fn token_type_overrides_and_brackets_in_binary_tokens() {
        let overrides = vec![TokenTypeMatcher {
            matcher: create_matchers("string").remove(0).matcher,
            token_type: StandardTokenType::String,
        }];
        let selectors = BalancedBracketSelectors::new(&["*"], &["string"]);
        let mut tokens = LineTokens::new(true, &overrides, Some(&selectors));

        let plain = stack("source.test", 0);
        let string = stack("string.quoted", 0);
        tokens.produce(&plain, 1);
        tokens.produce(&string, 2);
        let result = tokens.get_binary_result(&plain, 3);

        let first = EncodedTokenAttributes(result[1]);
        assert!(first.contains_balanced_brackets());
        assert_eq!(first.token_type(), StandardTokenType::Other);
        let second = EncodedTokenAttributes(result[3]);
        assert!(!second.contains_balanced_brackets());
        assert_eq!(second.token_type(), StandardTokenType::String);
    }
}
