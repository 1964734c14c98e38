//! Scope selector parsing and matching.
//!
//! Selectors are used by grammar injections, token type overrides and balanced bracket
//! configuration, eg `L:(meta.script.svelte | meta.style.svelte) - (meta source)`.

use std::sync::LazyLock;

use onig::Regex;

/// Regex splitting a selector into tokens (priority markers, identifiers and operators)
static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([LR]:|[\w\.:][\w\.:\-]*|[\,\|\-\(\)])").expect("Invalid selector regex")
});

/// A boolean predicate over something scope-like, built from a selector expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// A run of identifiers, handed to the name predicate as a whole
    Names(Vec<String>),
    /// All matchers must succeed (juxtaposition)
    And(Vec<Matcher>),
    /// Any matcher can succeed (`|` or `,` inside parentheses)
    Or(Vec<Matcher>),
    /// Matcher must NOT succeed (`-` prefix)
    Not(Box<Matcher>),
    /// Malformed operand: a negation with nothing to negate, or a negated negation
    Never,
}

impl Matcher {
    /// Evaluates the matcher, short-circuiting `And`/`Or` left to right.
    pub fn matches<T: ?Sized, F>(&self, input: &T, matches_name: &F) -> bool
    where
        F: Fn(&[String], &T) -> bool,
    {
        match self {
            Matcher::Names(identifiers) => matches_name(identifiers, input),
            Matcher::And(matchers) => matchers.iter().all(|m| m.matches(input, matches_name)),
            Matcher::Or(matchers) => matchers.iter().any(|m| m.matches(input, matches_name)),
            Matcher::Not(inner) => !inner.matches(input, matches_name),
            Matcher::Never => false,
        }
    }

    /// Shorthand for [`Matcher::matches`] with [`name_matcher`] over a list of scope names.
    pub fn matches_scopes<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        self.matches(scopes, &|identifiers: &[String], scopes: &[S]| {
            name_matcher(identifiers, scopes)
        })
    }
}

/// One top-level alternative of a selector with its priority:
/// -1 for `L:`, 1 for `R:` and 0 otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatcherWithPriority {
    pub matcher: Matcher,
    pub priority: i8,
}

/// Returns whether `scope_name` is `prefix` or starts with `prefix` followed by a dot.
pub(crate) fn scopes_are_matching(scope_name: &str, prefix: &str) -> bool {
    if scope_name.is_empty() {
        return false;
    }
    if scope_name == prefix {
        return true;
    }
    scope_name.len() > prefix.len()
        && scope_name.starts_with(prefix)
        && scope_name.as_bytes()[prefix.len()] == b'.'
}

/// The standard name predicate: every identifier has to match a scope, in order.
pub fn name_matcher<S: AsRef<str>>(identifiers: &[String], scopes: &[S]) -> bool {
    if scopes.len() < identifiers.len() {
        return false;
    }

    let mut last_index = 0;
    identifiers.iter().all(|identifier| {
        for (i, scope) in scopes.iter().enumerate().skip(last_index) {
            if scopes_are_matching(scope.as_ref(), identifier) {
                last_index = i + 1;
                return true;
            }
        }
        false
    })
}

fn is_identifier(token: &str) -> bool {
    token
        .chars()
        .any(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == ':')
}

struct Parser<'a> {
    tokens: Vec<&'a str>,
    position: usize,
    selector: &'a str,
}

impl<'a> Parser<'a> {
    fn new(selector: &'a str) -> Self {
        let tokens = TOKEN_REGEX
            .find_iter(selector)
            .map(|(start, end)| &selector[start..end])
            .collect();
        Self {
            tokens,
            position: 0,
            selector,
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.position).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn parse_operand(&mut self) -> Option<Matcher> {
        match self.peek()? {
            "-" => {
                self.advance();
                if self.peek() == Some("-") {
                    log::warn!(
                        "Negated negation in scope selector `{}`, it will never match",
                        self.selector
                    );
                    // consume the inner operand so parsing resumes after it
                    self.parse_operand();
                    return Some(Matcher::Never);
                }
                match self.parse_operand() {
                    Some(inner) => Some(Matcher::Not(Box::new(inner))),
                    None => Some(Matcher::Never),
                }
            }
            "(" => {
                self.advance();
                let inner = self.parse_inner_expression();
                if self.peek() == Some(")") {
                    self.advance();
                }
                Some(inner)
            }
            token if is_identifier(token) => {
                let mut identifiers = Vec::new();
                while let Some(token) = self.peek().filter(|t| is_identifier(t)) {
                    identifiers.push(token.to_owned());
                    self.advance();
                }
                Some(Matcher::Names(identifiers))
            }
            _ => None,
        }
    }

    fn parse_conjunction(&mut self) -> Matcher {
        let mut matchers = Vec::new();
        while let Some(m) = self.parse_operand() {
            matchers.push(m);
        }
        if matchers.len() == 1 {
            matchers.pop().unwrap_or(Matcher::Never)
        } else {
            Matcher::And(matchers)
        }
    }

    fn parse_inner_expression(&mut self) -> Matcher {
        let mut matchers = Vec::new();
        loop {
            matchers.push(self.parse_conjunction());
            if matches!(self.peek(), Some("|" | ",")) {
                while matches!(self.peek(), Some("|" | ",")) {
                    self.advance();
                }
            } else {
                break;
            }
        }
        if matchers.len() == 1 {
            matchers.pop().unwrap_or(Matcher::Never)
        } else {
            Matcher::Or(matchers)
        }
    }
}

/// Parses a selector into its comma separated alternatives.
///
/// Unknown priority markers such as `X:` are logged and the alternative gets priority 0.
pub fn create_matchers(selector: &str) -> Vec<MatcherWithPriority> {
    let mut parser = Parser::new(selector);
    let mut results = Vec::new();

    while let Some(token) = parser.peek() {
        let mut priority = 0;
        if token.len() == 2 && token.ends_with(':') {
            match token {
                "R:" => priority = 1,
                "L:" => priority = -1,
                _ => log::warn!("Unknown priority {token} in scope selector `{selector}`"),
            }
            parser.advance();
        }

        let matcher = parser.parse_conjunction();
        results.push(MatcherWithPriority { matcher, priority });
        if parser.peek() != Some(",") {
            break;
        }
        parser.advance();
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_debug_snapshot;

    fn matches(selector: &str, scopes: &[&str]) -> bool {
        let matchers = create_matchers(selector);
        matchers.iter().any(|m| m.matcher.matches_scopes(scopes))
    }

    #[test]
    fn conjunction_requires_all_identifiers() {
        assert!(matches("bar foo", &["bar", "foo"]));
        assert!(!matches("bar foo", &["foo"]));
        assert!(!matches("bar foo", &["bar"]));
        assert!(!matches("bar foo", &["baz"]));
    }

    #[test]
    fn comma_and_pipe_are_disjunctions() {
        assert!(matches("bar, foo", &["foo"]));
        assert!(matches("bar, foo", &["bar"]));
        assert!(!matches("bar, foo", &["baz"]));
        assert!(matches("(bar | foo)", &["foo"]));
        assert!(!matches("(bar | foo)", &["baz"]));
    }

    #[test]
    fn negation() {
        assert!(matches("- foo", &["bar"]));
        assert!(!matches("- foo", &["foo"]));
        assert!(matches("bar - foo", &["bar"]));
        assert!(!matches("bar - foo", &["bar", "foo"]));
        assert!(matches("text.html - (comment | string)", &["text.html", "meta.tag"]));
        assert!(!matches(
            "text.html - (comment | string)",
            &["text.html", "string.quoted"]
        ));
    }

    #[test]
    fn negated_negation_never_matches() {
        assert!(!matches("- - foo", &["foo"]));
        assert!(!matches("- - foo", &["bar"]));
        assert!(!matches("- - foo", &[]));
    }

    #[test]
    fn dangling_negation_never_matches() {
        assert!(!matches("foo -", &["foo"]));
    }

    #[test]
    fn precedence_of_operators() {
        // juxtaposition binds tighter than `,`
        assert!(matches("a b, c", &["c"]));
        assert!(!matches("a b, c", &["a"]));
        // `-` binds tighter than juxtaposition
        assert!(matches("a - b c", &["a", "c"]));
        assert!(!matches("a - b c", &["a", "b", "c"]));
    }

    #[test]
    fn prefix_matching_respects_dot_boundaries() {
        assert!(matches("source.js", &["source.js.embedded"]));
        assert!(!matches("source.js", &["source.jsx"]));
        assert!(matches("source", &["source.js"]));
    }

    #[test]
    fn identifiers_must_match_in_order() {
        assert!(matches("source string", &["source.js", "meta.block", "string.quoted"]));
        assert!(!matches("string source", &["source.js", "string.quoted"]));
    }

    #[test]
    fn priorities() {
        let priorities: Vec<_> = create_matchers("L:text.html, R:source, comment, X:foo")
            .into_iter()
            .map(|m| m.priority)
            .collect();
        assert_eq!(priorities, vec![-1, 1, 0, 0]);
    }

    #[test]
    fn empty_selector_has_no_matchers() {
        assert!(create_matchers("").is_empty());
        assert!(create_matchers("   ").is_empty());
    }

    #[test]
    fn parses_real_world_selectors() {
        assert_debug_snapshot!(
            create_matchers("L:(meta.script.svelte | meta.style.svelte) - (meta source)"),
            @r#"
        [
            MatcherWithPriority {
                matcher: And(
                    [
                        Or(
                            [
                                Names(
                                    [
                                        "meta.script.svelte",
                                    ],
                                ),
                                Names(
                                    [
                                        "meta.style.svelte",
                                    ],
                                ),
                            ],
                        ),
                        Not(
                            Names(
                                [
                                    "meta",
                                    "source",
                                ],
                            ),
                        ),
                    ],
                ),
                priority: -1,
            },
        ]
        "#
        );
    }
}
