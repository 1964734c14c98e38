//! A TextMate grammar tokenizer producing the same scopes and token attributes as
//! [vscode-textmate](https://github.com/microsoft/vscode-textmate).
//!
//! ```no_run
//! use tinta::{GrammarConfiguration, RawGrammar, Registry, Theme};
//!
//! let mut registry = Registry::new(Theme::default());
//! registry.add_grammar(RawGrammar::from_json_str(r#"{
//!     "scopeName": "source.numbers",
//!     "patterns": [{ "match": "\\d+", "name": "constant.numeric" }]
//! }"#)?);
//! let grammar = registry.load_grammar("source.numbers", GrammarConfiguration::default())?;
//!
//! let mut state = None;
//! for line in "a 1\nb 22".lines() {
//!     let result = grammar.tokenize_line(line, state.as_ref(), None);
//!     for token in &result.tokens {
//!         println!("{:?} {:?}", &line[token.span.clone()], token.scopes);
//!     }
//!     state = Some(result.rule_stack);
//! }
//! # Ok::<(), tinta::Error>(())
//! ```
mod error;
mod grammar;
mod registry;
mod scope;
mod tokenizer;

pub mod engine;
pub mod grammars;
pub mod selector;
pub mod themes;
pub mod token_attributes;

pub use engine::{OnigEngine, RegexEngine, ScanMatch, Scanner};
pub use error::Error;
pub use grammar::{Grammar, GrammarConfiguration, TokenizeLineResult, TokenizeLineResult2};
pub use grammars::{RawGrammar, RawRule};
pub use registry::{GrammarLoader, GrammarRepository, Registry};
pub use scope::ScopeStack;
pub use themes::{ColorMap, FontStyle, RawTheme, StyleAttributes, Theme, ThemeProvider};
pub use token_attributes::{EncodedTokenAttributes, StandardTokenType};
pub use tokenizer::{AttributedScopeStack, BalancedBracketSelectors, StateStack, Token};
