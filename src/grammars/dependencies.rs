//! Finding which grammars a grammar needs before it can be compiled.
use std::collections::HashSet;

use crate::error::{Error, TintaResult};
use crate::grammars::compiled::Reference;
use crate::grammars::raw::{RawGrammar, RawRepository, RawRule};
use crate::registry::GrammarRepository;

/// A rule in some grammar that an include points to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AbsoluteRuleReference {
    /// The `$self` of a grammar
    TopLevel(String),
    /// An entry in the top level repository of a grammar
    TopLevelRepository(String, String),
}

impl AbsoluteRuleReference {
    pub fn scope_name(&self) -> &str {
        match self {
            AbsoluteRuleReference::TopLevel(scope) => scope,
            AbsoluteRuleReference::TopLevelRepository(scope, _) => scope,
        }
    }

    fn key(&self) -> String {
        match self {
            AbsoluteRuleReference::TopLevel(scope) => scope.clone(),
            AbsoluteRuleReference::TopLevelRepository(scope, rule) => format!("{scope}#{rule}"),
        }
    }
}

/// The references found while walking some rules, in discovery order and without duplicates.
#[derive(Default)]
struct ExternalReferenceCollector {
    references: Vec<AbsoluteRuleReference>,
    seen_references: HashSet<String>,
    visited_rules: HashSet<*const RawRule>,
}

impl ExternalReferenceCollector {
    fn add(&mut self, reference: AbsoluteRuleReference) {
        if self.seen_references.insert(reference.key()) {
            self.references.push(reference);
        }
    }
}

#[derive(Clone)]
struct Context<'g> {
    base_grammar: &'g RawGrammar,
    self_grammar: &'g RawGrammar,
    /// innermost last
    repositories: Vec<&'g RawRepository>,
}

impl<'g> Context<'g> {
    fn lookup(&self, name: &str) -> Option<&'g RawRule> {
        self.repositories.iter().rev().find_map(|r| r.get(name))
    }
}

/// Walks include references breadth first, starting from one grammar.
///
/// Each call to [`ScopeDependencyProcessor::process_queue`] handles the current queue and
/// fills it with the references that weren't seen yet. Callers make the grammars in the
/// queue available before processing it, until the queue is empty.
#[derive(Debug)]
pub struct ScopeDependencyProcessor {
    initial_scope_name: String,
    seen_full_scope_requests: HashSet<String>,
    seen_partial_scope_requests: HashSet<String>,
    queue: Vec<AbsoluteRuleReference>,
}

impl ScopeDependencyProcessor {
    pub fn new(initial_scope_name: &str) -> Self {
        Self {
            initial_scope_name: initial_scope_name.to_owned(),
            seen_full_scope_requests: HashSet::from([initial_scope_name.to_owned()]),
            seen_partial_scope_requests: HashSet::new(),
            queue: vec![AbsoluteRuleReference::TopLevel(initial_scope_name.to_owned())],
        }
    }

    pub fn queue(&self) -> &[AbsoluteRuleReference] {
        &self.queue
    }

    pub fn process_queue(&mut self, repository: &dyn GrammarRepository) -> TintaResult<()> {
        let queue = std::mem::take(&mut self.queue);
        let grammars: Vec<_> = queue
            .iter()
            .map(|reference| (reference, repository.lookup(reference.scope_name())))
            .collect();
        let base_grammar = repository.lookup(&self.initial_scope_name);

        let mut collector = ExternalReferenceCollector::default();
        for (reference, self_grammar) in &grammars {
            let Some(self_grammar) = self_grammar else {
                if reference.scope_name() == self.initial_scope_name {
                    return Err(Error::GrammarNotFound(self.initial_scope_name.clone()));
                }
                #[cfg(feature = "debug")]
                log::debug!("[process_queue] no grammar for {}", reference.key());
                continue;
            };
            let Some(base_grammar) = &base_grammar else {
                return Err(Error::GrammarNotFound(self.initial_scope_name.clone()));
            };

            let context = Context {
                base_grammar,
                self_grammar,
                repositories: vec![&self_grammar.repository],
            };
            match reference {
                AbsoluteRuleReference::TopLevel(_) => {
                    collect_in_top_level_rule(context, &mut collector);
                }
                AbsoluteRuleReference::TopLevelRepository(_, rule_name) => {
                    collect_in_top_level_repository_rule(rule_name, &context, &mut collector);
                }
            }

            for injection in repository.injections(reference.scope_name()) {
                collector.add(AbsoluteRuleReference::TopLevel(injection));
            }
        }

        for reference in collector.references {
            if self.seen_full_scope_requests.contains(reference.scope_name()) {
                continue;
            }
            match &reference {
                AbsoluteRuleReference::TopLevel(scope) => {
                    self.seen_full_scope_requests.insert(scope.clone());
                }
                AbsoluteRuleReference::TopLevelRepository(..) => {
                    if !self.seen_partial_scope_requests.insert(reference.key()) {
                        continue;
                    }
                }
            }
            self.queue.push(reference);
        }

        Ok(())
    }
}

fn collect_in_top_level_rule<'g>(
    context: Context<'g>,
    collector: &mut ExternalReferenceCollector,
) {
    let context = Context {
        repositories: vec![&context.self_grammar.repository],
        ..context
    };
    collect_in_rules(context.self_grammar.patterns.iter(), &context, collector);
    collect_in_rules(context.self_grammar.injections.values(), &context, collector);
}

fn collect_in_top_level_repository_rule<'g>(
    rule_name: &str,
    context: &Context<'g>,
    collector: &mut ExternalReferenceCollector,
) {
    if let Some(rule) = context.lookup(rule_name) {
        collect_in_rules(std::iter::once(rule), context, collector);
    }
}

fn collect_in_rules<'g>(
    rules: impl Iterator<Item = &'g RawRule>,
    context: &Context<'g>,
    collector: &mut ExternalReferenceCollector,
) {
    for rule in rules {
        if !collector.visited_rules.insert(rule as *const RawRule) {
            continue;
        }

        let mut pattern_context = context.clone();
        if let Some(repository) = &rule.repository {
            pattern_context.repositories.push(repository);
        }

        if let Some(patterns) = &rule.patterns {
            collect_in_rules(patterns.iter(), &pattern_context, collector);
        }
        // captures can have patterns of their own
        for captures in [
            &rule.captures,
            &rule.begin_captures,
            &rule.end_captures,
            &rule.while_captures,
        ]
        .into_iter()
        .flatten()
        {
            collect_in_rules(captures.0.values(), &pattern_context, collector);
        }

        let Some(include) = rule.include.as_deref().filter(|i| !i.is_empty()) else {
            continue;
        };
        let (scope_name, rule_name) = match Reference::from(include) {
            Reference::Base => {
                let base = Context {
                    self_grammar: context.base_grammar,
                    ..context.clone()
                };
                collect_in_top_level_rule(base, collector);
                continue;
            }
            Reference::Self_ => {
                collect_in_top_level_rule(context.clone(), collector);
                continue;
            }
            Reference::Relative(rule_name) => {
                collect_in_top_level_repository_rule(&rule_name, &pattern_context, collector);
                continue;
            }
            Reference::TopLevel(scope_name) => (scope_name, None),
            Reference::TopLevelRepository(scope_name, rule_name) => (scope_name, Some(rule_name)),
        };

        // grammars we are already walking don't need to be requested
        let local_grammar = if scope_name == context.self_grammar.scope_name {
            Some(context.self_grammar)
        } else if scope_name == context.base_grammar.scope_name {
            Some(context.base_grammar)
        } else {
            None
        };
        match (local_grammar, rule_name) {
            (Some(self_grammar), Some(rule_name)) => {
                let local = Context {
                    self_grammar,
                    ..pattern_context.clone()
                };
                collect_in_top_level_repository_rule(&rule_name, &local, collector);
            }
            (Some(self_grammar), None) => {
                let local = Context {
                    self_grammar,
                    ..pattern_context.clone()
                };
                collect_in_top_level_rule(local, collector);
            }
            (None, Some(rule_name)) => {
                collector.add(AbsoluteRuleReference::TopLevelRepository(scope_name, rule_name));
            }
            (None, None) => collector.add(AbsoluteRuleReference::TopLevel(scope_name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::themes::Theme;

    fn registry(grammars: &[&str]) -> Registry {
        let mut registry = Registry::new(Theme::default());
        for grammar in grammars {
            registry.add_grammar(RawGrammar::from_json_str(grammar).unwrap());
        }
        registry
    }

    #[test]
    fn missing_initial_grammar_is_an_error() {
        let registry = registry(&[]);
        let mut processor = ScopeDependencyProcessor::new("source.nope");
        let err = processor.process_queue(&registry).unwrap_err();
        assert!(matches!(err, Error::GrammarNotFound(s) if s == "source.nope"));
    }

    #[test]
    fn walks_dependencies_breadth_first() {
        let registry = registry(&[
            r##"{
                "scopeName": "text.html",
                "patterns": [
                    { "include": "#script" },
                    { "begin": "<style>", "end": "</style>", "patterns": [{ "include": "source.css" }] }
                ],
                "repository": {
                    "script": { "patterns": [{ "include": "source.js#expression" }] }
                }
            }"##,
            r##"{
                "scopeName": "source.js",
                "patterns": [],
                "repository": {
                    "expression": { "patterns": [{ "include": "source.regexp" }] }
                }
            }"##,
            r#"{ "scopeName": "source.css", "patterns": [{ "include": "source.missing" }] }"#,
        ]);
        let mut processor = ScopeDependencyProcessor::new("text.html");

        processor.process_queue(&registry).unwrap();
        assert_eq!(
            processor.queue(),
            &[
                AbsoluteRuleReference::TopLevelRepository("source.js".into(), "expression".into()),
                AbsoluteRuleReference::TopLevel("source.css".into()),
            ]
        );

        processor.process_queue(&registry).unwrap();
        assert_eq!(
            processor.queue(),
            &[
                AbsoluteRuleReference::TopLevel("source.regexp".into()),
                AbsoluteRuleReference::TopLevel("source.missing".into()),
            ]
        );

        // neither exists, which is fine
        processor.process_queue(&registry).unwrap();
        assert!(processor.queue().is_empty());

        let mut seen: Vec<_> = processor
            .seen_full_scope_requests
            .iter()
            .map(String::as_str)
            .collect();
        seen.sort_unstable();
        assert_eq!(
            seen,
            vec!["source.css", "source.missing", "source.regexp", "text.html"]
        );
    }

    #[test]
    fn finds_references_in_captures_and_injections() {
        let mut registry = registry(&[r#"{
            "scopeName": "source.md",
            "patterns": [
                { "match": "`(.*)`", "captures": { "1": { "patterns": [{ "include": "source.code" }] } } }
            ]
        }"#]);
        registry.add_grammar(
            RawGrammar::from_json_str(
                r#"{ "scopeName": "inject.todo", "injectTo": ["source.md"], "patterns": [] }"#,
            )
            .unwrap(),
        );
        let mut processor = ScopeDependencyProcessor::new("source.md");
        processor.process_queue(&registry).unwrap();
        assert_eq!(
            processor.queue(),
            &[
                AbsoluteRuleReference::TopLevel("source.code".into()),
                AbsoluteRuleReference::TopLevel("inject.todo".into()),
            ]
        );
    }
}
