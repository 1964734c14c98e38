use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, Range};
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};

use crate::engine::RegexEngine;
use crate::grammars::raw::{RawCaptures, RawGrammar, RawRepository, RawRule};
use crate::grammars::regex::{
    CompiledRule, RegExpSource, RegExpSourceList, has_captures, replace_captures,
};
use crate::registry::GrammarRepository;
use crate::selector::{Matcher, create_matchers};

#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub u32);

impl RuleId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl Deref for RuleId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            END_RULE_ID => f.write_str("RuleId(end)"),
            WHILE_RULE_ID => f.write_str("RuleId(while)"),
            RuleId(id) => write!(f, "RuleId({id})"),
        }
    }
}

/// Marks the end pattern of a begin/end rule in a compiled pattern list.
/// Never stored in the rule arena.
pub const END_RULE_ID: RuleId = RuleId(u32::MAX);
/// Marks the while pattern of a begin/while rule in a compiled pattern list.
/// Never stored in the rule arena.
pub const WHILE_RULE_ID: RuleId = RuleId(u32::MAX - 1);

/// per vscode-textmate:
///  Allowed values:
///  * Scope Name, e.g. `source.ts`
///  * Top level scope reference, e.g. `source.ts#entity.name.class`
///  * Relative scope reference, e.g. `#entity.name.class`
///  * self, e.g. `$self`
///  * base, e.g. `$base`
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Reference {
    Base,
    Self_,
    Relative(String),
    TopLevel(String),
    TopLevelRepository(String, String),
}

impl From<&str> for Reference {
    fn from(value: &str) -> Self {
        match value {
            "$base" => Self::Base,
            "$self" => Self::Self_,
            s => match s.split_once('#') {
                None => Self::TopLevel(s.to_owned()),
                Some(("", rule)) => Self::Relative(rule.to_owned()),
                Some((scope, rule)) => Self::TopLevelRepository(scope.to_owned(), rule.to_owned()),
            },
        }
    }
}

/// A `name` or `contentName`, possibly referencing captures like `entity.name.$1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleName {
    template: String,
    is_capturing: bool,
}

impl RuleName {
    fn new(template: &str) -> Self {
        Self {
            template: template.to_owned(),
            is_capturing: has_captures(template),
        }
    }

    pub fn resolve<'a>(&'a self, line: &str, captures: &[Option<Range<usize>>]) -> Cow<'a, str> {
        if self.is_capturing {
            Cow::Owned(replace_captures(&self.template, line, captures))
        } else {
            Cow::Borrowed(&self.template)
        }
    }
}

/// The pattern list of a rule, built the first time the rule is scanned with.
#[derive(Default)]
pub(crate) struct PatternCache(Mutex<Option<RegExpSourceList>>);

impl PatternCache {
    fn with<R>(
        &self,
        init: impl FnOnce() -> RegExpSourceList,
        f: impl FnOnce(&mut RegExpSourceList) -> R,
    ) -> R {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(guard.get_or_insert_with(init))
    }

    fn clear(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl fmt::Debug for PatternCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(list) => write!(f, "PatternCache({} patterns)", list.len()),
            None => f.write_str("PatternCache(empty)"),
        }
    }
}

#[derive(Debug)]
pub struct MatchRule {
    pub id: RuleId,
    pub name: Option<RuleName>,
    pub regex: RegExpSource,
    pub captures: Vec<Option<RuleId>>,
    cached: PatternCache,
}

#[derive(Debug)]
pub struct IncludeOnlyRule {
    pub id: RuleId,
    pub name: Option<RuleName>,
    pub content_name: Option<RuleName>,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
    cached: PatternCache,
}

#[derive(Debug)]
pub struct BeginEndRule {
    pub id: RuleId,
    pub name: Option<RuleName>,
    pub content_name: Option<RuleName>,
    pub begin: RegExpSource,
    pub begin_captures: Vec<Option<RuleId>>,
    pub end: RegExpSource,
    pub end_captures: Vec<Option<RuleId>>,
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
    cached: PatternCache,
}

impl BeginEndRule {
    pub fn end_has_back_references(&self) -> bool {
        self.end.has_back_references()
    }
}

#[derive(Debug)]
pub struct BeginWhileRule {
    pub id: RuleId,
    pub name: Option<RuleName>,
    pub content_name: Option<RuleName>,
    pub begin: RegExpSource,
    pub begin_captures: Vec<Option<RuleId>>,
    pub while_: RegExpSource,
    pub while_captures: Vec<Option<RuleId>>,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
    cached: PatternCache,
    cached_while: PatternCache,
}

impl BeginWhileRule {
    pub fn while_has_back_references(&self) -> bool {
        self.while_.has_back_references()
    }

    /// The scanner holding only the while pattern, with `while_source` being the pattern
    /// after backreferences have been resolved.
    pub fn compile_while_ag(
        &self,
        engine: &dyn RegexEngine,
        while_source: Option<&str>,
        allow_a: bool,
        allow_g: bool,
    ) -> Arc<CompiledRule> {
        self.cached_while.with(
            || {
                let mut list = RegExpSourceList::default();
                list.push(self.while_.clone());
                list
            },
            |list| {
                if self.while_has_back_references() {
                    list.set_source(0, while_source.unwrap_or("\u{FFFF}"));
                }
                list.compile_ag(engine, allow_a, allow_g)
            },
        )
    }
}

#[derive(Debug)]
pub struct CaptureRule {
    pub id: RuleId,
    pub name: Option<RuleName>,
    pub content_name: Option<RuleName>,
    /// Captured text is tokenized again with this rule
    pub retokenize_captured_with_rule_id: Option<RuleId>,
}

#[derive(Debug)]
pub enum Rule {
    Match(MatchRule),
    IncludeOnly(IncludeOnlyRule),
    BeginEnd(BeginEndRule),
    BeginWhile(BeginWhileRule),
    Capture(CaptureRule),
}

impl Rule {
    pub fn id(&self) -> RuleId {
        match self {
            Rule::Match(r) => r.id,
            Rule::IncludeOnly(r) => r.id,
            Rule::BeginEnd(r) => r.id,
            Rule::BeginWhile(r) => r.id,
            Rule::Capture(r) => r.id,
        }
    }

    fn raw_name(&self) -> Option<&RuleName> {
        match self {
            Rule::Match(r) => r.name.as_ref(),
            Rule::IncludeOnly(r) => r.name.as_ref(),
            Rule::BeginEnd(r) => r.name.as_ref(),
            Rule::BeginWhile(r) => r.name.as_ref(),
            Rule::Capture(r) => r.name.as_ref(),
        }
    }

    fn raw_content_name(&self) -> Option<&RuleName> {
        match self {
            Rule::Match(_) => None,
            Rule::IncludeOnly(r) => r.content_name.as_ref(),
            Rule::BeginEnd(r) => r.content_name.as_ref(),
            Rule::BeginWhile(r) => r.content_name.as_ref(),
            Rule::Capture(r) => r.content_name.as_ref(),
        }
    }

    /// The scope name(s) of the rule with capture references resolved against `line`
    pub fn name<'a>(
        &'a self,
        line: &str,
        captures: &[Option<Range<usize>>],
    ) -> Option<Cow<'a, str>> {
        self.raw_name().map(|n| n.resolve(line, captures))
    }

    pub fn content_name<'a>(
        &'a self,
        line: &str,
        captures: &[Option<Range<usize>>],
    ) -> Option<Cow<'a, str>> {
        self.raw_content_name().map(|n| n.resolve(line, captures))
    }

    /// A rule whose includes all failed to resolve: it contributes nothing when included
    fn has_missing_patterns_and_is_empty(&self) -> bool {
        match self {
            Rule::IncludeOnly(r) => r.has_missing_patterns && r.patterns.is_empty(),
            Rule::BeginEnd(r) => r.has_missing_patterns && r.patterns.is_empty(),
            Rule::BeginWhile(r) => r.has_missing_patterns && r.patterns.is_empty(),
            Rule::Match(_) | Rule::Capture(_) => false,
        }
    }

    /// Adds the patterns that can start this rule. Include-only rules are flattened,
    /// `visiting` stops cycles between them.
    fn collect_patterns(
        &self,
        rules: &RuleArena,
        out: &mut RegExpSourceList,
        visiting: &mut Vec<RuleId>,
    ) {
        match self {
            Rule::Match(r) => out.push(r.regex.clone()),
            Rule::BeginEnd(r) => out.push(r.begin.clone()),
            Rule::BeginWhile(r) => out.push(r.begin.clone()),
            Rule::IncludeOnly(r) => {
                if visiting.contains(&r.id) {
                    return;
                }
                visiting.push(r.id);
                collect_children(&r.patterns, rules, out, visiting);
                visiting.pop();
            }
            Rule::Capture(_) => (),
        }
    }

    /// The scanner to use while this rule is the active one.
    ///
    /// `end_source` is the end pattern of a begin/end rule with its backreferences resolved.
    pub fn compile_ag(
        &self,
        rules: &RuleArena,
        engine: &dyn RegexEngine,
        end_source: Option<&str>,
        allow_a: bool,
        allow_g: bool,
    ) -> Arc<CompiledRule> {
        match self {
            Rule::Match(r) => r.cached.with(
                || {
                    let mut list = RegExpSourceList::default();
                    list.push(r.regex.clone());
                    list
                },
                |list| list.compile_ag(engine, allow_a, allow_g),
            ),
            Rule::IncludeOnly(r) => r.cached.with(
                || {
                    let mut list = RegExpSourceList::default();
                    let mut visiting = vec![r.id];
                    collect_children(&r.patterns, rules, &mut list, &mut visiting);
                    list
                },
                |list| list.compile_ag(engine, allow_a, allow_g),
            ),
            Rule::BeginEnd(r) => r.cached.with(
                || {
                    let mut list = RegExpSourceList::default();
                    collect_children(&r.patterns, rules, &mut list, &mut Vec::new());
                    if r.apply_end_pattern_last {
                        list.push(r.end.clone());
                    } else {
                        list.unshift(r.end.clone());
                    }
                    list
                },
                |list| {
                    if r.end_has_back_references() {
                        let index = if r.apply_end_pattern_last {
                            list.len() - 1
                        } else {
                            0
                        };
                        list.set_source(index, end_source.unwrap_or(r.end.source()));
                    }
                    list.compile_ag(engine, allow_a, allow_g)
                },
            ),
            Rule::BeginWhile(r) => r.cached.with(
                || {
                    let mut list = RegExpSourceList::default();
                    collect_children(&r.patterns, rules, &mut list, &mut Vec::new());
                    list
                },
                |list| list.compile_ag(engine, allow_a, allow_g),
            ),
            Rule::Capture(r) => {
                log::warn!("Capture rule {:?} can't be scanned with", r.id);
                RegExpSourceList::default().compile(engine)
            }
        }
    }

    /// Drops every compiled scanner held by this rule
    pub fn dispose(&self) {
        match self {
            Rule::Match(r) => r.cached.clear(),
            Rule::IncludeOnly(r) => r.cached.clear(),
            Rule::BeginEnd(r) => r.cached.clear(),
            Rule::BeginWhile(r) => {
                r.cached.clear();
                r.cached_while.clear();
            }
            Rule::Capture(_) => (),
        }
    }
}

fn collect_children(
    patterns: &[RuleId],
    rules: &RuleArena,
    out: &mut RegExpSourceList,
    visiting: &mut Vec<RuleId>,
) {
    for id in patterns {
        if let Some(rule) = rules.get(*id) {
            rule.collect_patterns(rules, out, visiting);
        }
    }
}

/// All the compiled rules of a grammar, indexed by [`RuleId`].
#[derive(Debug, Default)]
pub struct RuleArena {
    rules: Vec<Option<Rule>>,
}

impl RuleArena {
    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.index())?.as_ref()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().flatten()
    }
}

/// A grammar-wide rule tried alongside the active rule's patterns when its selector
/// matches the current scopes.
#[derive(Debug, Clone)]
pub struct Injection {
    pub debug_selector: String,
    pub matcher: Matcher,
    /// -1 for `L:`, 1 for `R:`, 0 otherwise
    pub priority: i8,
    pub rule_id: RuleId,
}

/// A raw grammar along with its synthesized `$self` rule.
#[derive(Debug)]
pub(crate) struct PreparedGrammar {
    pub scope_name: String,
    pub self_rule: RawRule,
    pub repository: RawRepository,
    pub injections: Vec<(String, RawRule)>,
    pub injection_selector: Option<String>,
}

impl PreparedGrammar {
    pub fn new(raw: &RawGrammar) -> Self {
        Self {
            scope_name: raw.scope_name.clone(),
            self_rule: raw.self_rule(),
            repository: raw.repository.clone(),
            injections: raw
                .injections
                .iter()
                .map(|(selector, rule)| (selector.clone(), rule.clone()))
                .collect(),
            injection_selector: raw.injection_selector.clone(),
        }
    }
}

/// The repositories visible from a rule: its own, then the enclosing ones.
struct RepositoryScope<'r> {
    entries: Option<&'r RawRepository>,
    parent: Option<Rc<RepositoryScope<'r>>>,
    self_rule: &'r RawRule,
    base_rule: &'r RawRule,
}

impl<'r> RepositoryScope<'r> {
    fn root(grammar: &'r PreparedGrammar, base_rule: &'r RawRule) -> Rc<Self> {
        Rc::new(Self {
            entries: Some(&grammar.repository),
            parent: None,
            self_rule: &grammar.self_rule,
            base_rule,
        })
    }

    fn nested(parent: &Rc<Self>, entries: &'r RawRepository) -> Rc<Self> {
        Rc::new(Self {
            entries: Some(entries),
            parent: Some(Rc::clone(parent)),
            self_rule: parent.self_rule,
            base_rule: parent.base_rule,
        })
    }

    fn lookup(&self, name: &str) -> Option<&'r RawRule> {
        match name {
            "$self" => Some(self.self_rule),
            "$base" => Some(self.base_rule),
            _ => self
                .entries
                .and_then(|e| e.get(name))
                .or_else(|| self.parent.as_ref().and_then(|p| p.lookup(name))),
        }
    }
}

/// Compiles raw rules into the rule arena, giving each raw rule an id the first time
/// it is seen.
pub(crate) struct RuleFactory<'a> {
    rules: Vec<Option<Rule>>,
    grammar_repository: &'a dyn GrammarRepository,
    base: Arc<PreparedGrammar>,
    externals: HashMap<String, Arc<PreparedGrammar>>,
}

impl<'a> RuleFactory<'a> {
    pub fn new(base: Arc<PreparedGrammar>, grammar_repository: &'a dyn GrammarRepository) -> Self {
        Self {
            rules: Vec::new(),
            grammar_repository,
            base,
            externals: HashMap::new(),
        }
    }

    fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.index())?.as_ref()
    }

    /// Reserves the next id; the slot is filled once the rule and its children are compiled
    fn register(&mut self) -> RuleId {
        let id = RuleId(self.rules.len() as u32);
        self.rules.push(None);
        id
    }

    fn external_grammar(&mut self, scope_name: &str) -> Option<Arc<PreparedGrammar>> {
        if scope_name == self.base.scope_name {
            return Some(Arc::clone(&self.base));
        }
        if let Some(grammar) = self.externals.get(scope_name) {
            return Some(Arc::clone(grammar));
        }
        let raw = self.grammar_repository.lookup(scope_name)?;
        let grammar = Arc::new(PreparedGrammar::new(&raw));
        self.externals
            .insert(scope_name.to_owned(), Arc::clone(&grammar));
        Some(grammar)
    }

    /// Compiles the `$self` rule of the base grammar
    pub fn compile_root(&mut self) -> RuleId {
        let base = Arc::clone(&self.base);
        let scope = RepositoryScope::root(&base, &base.self_rule);
        self.compiled_rule_id(&base.self_rule, &scope)
    }

    /// The injections of the base grammar followed by the injection grammars registered
    /// for its scope, sorted by priority.
    pub fn collect_injections(&mut self) -> Vec<Injection> {
        let base = Arc::clone(&self.base);
        let scope = RepositoryScope::root(&base, &base.self_rule);
        let mut injections = Vec::new();

        for (selector, rule) in &base.injections {
            let rule_id = self.compiled_rule_id(rule, &scope);
            push_injections(&mut injections, selector, rule_id);
        }

        for injection_scope in self.grammar_repository.injections(&base.scope_name) {
            let Some(grammar) = self.external_grammar(&injection_scope) else {
                continue;
            };
            let Some(selector) = grammar.injection_selector.as_deref() else {
                continue;
            };
            let grammar_scope = RepositoryScope::root(&grammar, &base.self_rule);
            let rule_id = self.compiled_rule_id(&grammar.self_rule, &grammar_scope);
            push_injections(&mut injections, selector, rule_id);
        }

        injections.sort_by_key(|i| i.priority);
        injections
    }

    pub fn finish(self) -> RuleArena {
        RuleArena { rules: self.rules }
    }

    fn compiled_rule_id<'r>(&mut self, raw: &'r RawRule, repository: &Rc<RepositoryScope<'r>>) -> RuleId {
        if let Some(id) = raw.id.get() {
            return id;
        }
        let id = self.register();
        raw.id.assign(id);

        let repository = match &raw.repository {
            Some(entries) => RepositoryScope::nested(repository, entries),
            None => Rc::clone(repository),
        };
        let name = raw.name.as_deref().map(RuleName::new);
        let content_name = raw.content_name.as_deref().map(RuleName::new);

        let rule = if let Some(pattern) = raw.match_.as_deref().filter(|m| !m.is_empty()) {
            Rule::Match(MatchRule {
                id,
                name,
                regex: RegExpSource::new(pattern, id),
                captures: self.compile_captures(raw.captures.as_ref(), &repository),
                cached: PatternCache::default(),
            })
        } else if let Some(begin) = raw.begin.as_deref() {
            if let Some(while_) = raw.while_.as_deref().filter(|w| !w.is_empty()) {
                let begin_captures = self.compile_captures(
                    raw.begin_captures.as_ref().or(raw.captures.as_ref()),
                    &repository,
                );
                let while_captures = self.compile_captures(
                    raw.while_captures.as_ref().or(raw.captures.as_ref()),
                    &repository,
                );
                let (patterns, has_missing_patterns) =
                    self.compile_patterns(raw.patterns.as_deref(), &repository);
                Rule::BeginWhile(BeginWhileRule {
                    id,
                    name,
                    content_name,
                    begin: RegExpSource::new(begin, id),
                    begin_captures,
                    while_: RegExpSource::new(while_, WHILE_RULE_ID),
                    while_captures,
                    patterns,
                    has_missing_patterns,
                    cached: PatternCache::default(),
                    cached_while: PatternCache::default(),
                })
            } else {
                let begin_captures = self.compile_captures(
                    raw.begin_captures.as_ref().or(raw.captures.as_ref()),
                    &repository,
                );
                let end_captures = self.compile_captures(
                    raw.end_captures.as_ref().or(raw.captures.as_ref()),
                    &repository,
                );
                let (patterns, has_missing_patterns) =
                    self.compile_patterns(raw.patterns.as_deref(), &repository);
                // a begin without an end never ends
                let end = raw
                    .end
                    .as_deref()
                    .filter(|e| !e.is_empty())
                    .unwrap_or("\u{FFFF}");
                Rule::BeginEnd(BeginEndRule {
                    id,
                    name,
                    content_name,
                    begin: RegExpSource::new(begin, id),
                    begin_captures,
                    end: RegExpSource::new(end, END_RULE_ID),
                    end_captures,
                    apply_end_pattern_last: raw.apply_end_pattern_last,
                    patterns,
                    has_missing_patterns,
                    cached: PatternCache::default(),
                })
            }
        } else {
            // a lone include is a one-element pattern list, but `patterns` wins if both are set
            let include_only;
            let patterns = match (&raw.patterns, raw.include.as_deref()) {
                (None, Some(include)) if !include.is_empty() => {
                    include_only = [RawRule {
                        include: Some(include.to_owned()),
                        ..Default::default()
                    }];
                    Some(&include_only[..])
                }
                (patterns, _) => patterns.as_deref(),
            };
            let (patterns, has_missing_patterns) = self.compile_patterns(patterns, &repository);
            Rule::IncludeOnly(IncludeOnlyRule {
                id,
                name,
                content_name,
                patterns,
                has_missing_patterns,
                cached: PatternCache::default(),
            })
        };

        self.rules[id.index()] = Some(rule);
        id
    }

    fn compile_captures<'r>(
        &mut self,
        captures: Option<&'r RawCaptures>,
        repository: &Rc<RepositoryScope<'r>>,
    ) -> Vec<Option<RuleId>> {
        let Some(max_capture) = captures.and_then(|c| c.0.keys().next_back().copied()) else {
            return Vec::new();
        };
        let Some(captures) = captures else {
            return Vec::new();
        };

        let mut out = vec![None; max_capture + 1];
        for (&index, capture) in &captures.0 {
            let retokenize_captured_with_rule_id = capture
                .patterns
                .is_some()
                .then(|| self.compiled_rule_id(capture, repository));
            let id = self.register();
            self.rules[id.index()] = Some(Rule::Capture(CaptureRule {
                id,
                name: capture.name.as_deref().map(RuleName::new),
                content_name: capture.content_name.as_deref().map(RuleName::new),
                retokenize_captured_with_rule_id,
            }));
            out[index] = Some(id);
        }
        out
    }

    /// Returns the ids of the resolved patterns and whether some could not be resolved
    fn compile_patterns<'r>(
        &mut self,
        patterns: Option<&'r [RawRule]>,
        repository: &Rc<RepositoryScope<'r>>,
    ) -> (Vec<RuleId>, bool) {
        let patterns = patterns.unwrap_or_default();
        let mut out = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let rule_id = match pattern.include.as_deref().filter(|i| !i.is_empty()) {
                Some(include) => self.resolve_include(include, repository),
                None => Some(self.compiled_rule_id(pattern, repository)),
            };
            let Some(rule_id) = rule_id else {
                #[cfg(feature = "debug")]
                log::debug!("[compile_patterns] unresolved include {:?}", pattern.include);
                continue;
            };
            if self
                .rule(rule_id)
                .is_some_and(|r| r.has_missing_patterns_and_is_empty())
            {
                continue;
            }
            out.push(rule_id);
        }

        let has_missing_patterns = out.len() != patterns.len();
        (out, has_missing_patterns)
    }

    fn resolve_include<'r>(
        &mut self,
        include: &str,
        repository: &Rc<RepositoryScope<'r>>,
    ) -> Option<RuleId> {
        let (scope_name, rule_name) = match Reference::from(include) {
            Reference::Base | Reference::Self_ => {
                let rule = repository.lookup(include)?;
                return Some(self.compiled_rule_id(rule, repository));
            }
            Reference::Relative(name) => {
                let rule = repository.lookup(&name)?;
                return Some(self.compiled_rule_id(rule, repository));
            }
            Reference::TopLevel(scope_name) => (scope_name, None),
            Reference::TopLevelRepository(scope_name, rule_name) => (scope_name, Some(rule_name)),
        };

        let grammar = self.external_grammar(&scope_name)?;
        let external = RepositoryScope::root(&grammar, repository.base_rule);
        let rule = match rule_name {
            Some(name) => external.entries.and_then(|e| e.get(&name))?,
            None => &grammar.self_rule,
        };
        Some(self.compiled_rule_id(rule, &external))
    }
}

fn push_injections(out: &mut Vec<Injection>, selector: &str, rule_id: RuleId) {
    for matcher in create_matchers(selector) {
        out.push(Injection {
            debug_selector: selector.to_owned(),
            matcher: matcher.matcher,
            priority: matcher.priority,
            rule_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::themes::Theme;

    fn compile(json: &str, others: &[&str]) -> (RuleId, RuleArena, Vec<Injection>) {
        let mut registry = Registry::new(Theme::default());
        for other in others {
            registry.add_grammar(RawGrammar::from_json_str(other).unwrap());
        }
        let raw = RawGrammar::from_json_str(json).unwrap();
        let base = Arc::new(PreparedGrammar::new(&raw));
        let mut factory = RuleFactory::new(base, &registry);
        let root = factory.compile_root();
        let injections = factory.collect_injections();
        (root, factory.finish(), injections)
    }

    #[test]
    fn parses_references() {
        assert_eq!(Reference::from("$self"), Reference::Self_);
        assert_eq!(Reference::from("$base"), Reference::Base);
        assert_eq!(Reference::from("#foo"), Reference::Relative("foo".to_owned()));
        assert_eq!(Reference::from("source.js"), Reference::TopLevel("source.js".to_owned()));
        assert_eq!(
            Reference::from("source.js#foo"),
            Reference::TopLevelRepository("source.js".to_owned(), "foo".to_owned())
        );
    }

    #[test]
    fn assigns_ids_in_registration_order() {
        let (root, rules, _) = compile(
            r##"{
                "scopeName": "source.test",
                "patterns": [
                    { "match": "a", "name": "a", "captures": { "0": { "name": "cap" } } },
                    { "begin": "b", "end": "c", "patterns": [{ "include": "#num" }] },
                    { "include": "#num" }
                ],
                "repository": { "num": { "match": "\\d", "name": "num" } }
            }"##,
            &[],
        );
        assert_eq!(root, RuleId(0));
        // root, match a, its capture, begin/end, num (compiled once)
        assert_eq!(rules.len(), 5);
        let Some(Rule::IncludeOnly(root_rule)) = rules.get(root) else {
            panic!("root should be an include only rule");
        };
        assert_eq!(root_rule.patterns, vec![RuleId(1), RuleId(3), RuleId(4)]);
        assert!(matches!(rules.get(RuleId(2)), Some(Rule::Capture(_))));
        let Some(Rule::BeginEnd(begin_end)) = rules.get(RuleId(3)) else {
            panic!("expected a begin/end rule");
        };
        assert_eq!(begin_end.patterns, vec![RuleId(4)]);
    }

    #[test]
    fn unresolved_includes_are_dropped() {
        let (root, rules, _) = compile(
            r##"{
                "scopeName": "source.test",
                "patterns": [
                    { "include": "#missing" },
                    { "include": "#only_missing" },
                    { "include": "source.unknown" },
                    { "match": "x" }
                ],
                "repository": {
                    "only_missing": { "patterns": [{ "include": "#nope" }] }
                }
            }"##,
            &[],
        );
        let Some(Rule::IncludeOnly(root_rule)) = rules.get(root) else {
            panic!("root should be an include only rule");
        };
        assert_eq!(root_rule.patterns.len(), 1);
        assert!(root_rule.has_missing_patterns);
        assert!(matches!(rules.get(root_rule.patterns[0]), Some(Rule::Match(_))));
    }

    #[test]
    fn nested_repositories_shadow_outer_ones() {
        let (root, rules, _) = compile(
            r##"{
                "scopeName": "source.test",
                "patterns": [{ "include": "#block" }, { "include": "#item" }],
                "repository": {
                    "item": { "match": "outer", "name": "outer" },
                    "block": {
                        "patterns": [{ "include": "#item" }],
                        "repository": { "item": { "match": "inner", "name": "inner" } }
                    }
                }
            }"##,
            &[],
        );
        let rule_names: Vec<_> = rules
            .iter()
            .filter_map(|r| match r {
                Rule::Match(m) => Some(m.regex.source().to_owned()),
                _ => None,
            })
            .collect();
        assert_eq!(rule_names, vec!["inner", "outer"]);
        assert!(rules.get(root).is_some());
    }

    #[test]
    fn resolves_external_grammars() {
        let (root, rules, _) = compile(
            r#"{
                "scopeName": "source.test",
                "patterns": [{ "include": "source.other" }, { "include": "source.other#thing" }]
            }"#,
            &[r##"{
                "scopeName": "source.other",
                "patterns": [{ "include": "#thing" }, { "include": "$base" }],
                "repository": { "thing": { "match": "thing" } }
            }"##],
        );
        let Some(Rule::IncludeOnly(root_rule)) = rules.get(root) else {
            panic!("root should be an include only rule");
        };
        assert_eq!(root_rule.patterns.len(), 2);
        let Some(Rule::IncludeOnly(other)) = rules.get(root_rule.patterns[0]) else {
            panic!("external $self should be an include only rule");
        };
        // `$base` from the external grammar is our root
        assert_eq!(other.patterns[1], root);
        assert_eq!(other.patterns[0], root_rule.patterns[1]);
    }

    #[test]
    fn begin_without_end_never_ends() {
        let (_, rules, _) = compile(
            r#"{ "scopeName": "source.test", "patterns": [{ "begin": "a" }] }"#,
            &[],
        );
        let Some(Rule::BeginEnd(rule)) = rules.get(RuleId(1)) else {
            panic!("expected a begin/end rule");
        };
        assert_eq!(rule.end.source(), "\u{FFFF}");
    }

    #[test]
    fn collects_injections_sorted_by_priority() {
        let (_, _, injections) = compile(
            r#"{
                "scopeName": "source.test",
                "patterns": [],
                "injections": {
                    "R:source.test": { "match": "r" },
                    "L:source.test": { "match": "l" },
                    "source.test": { "match": "n" }
                }
            }"#,
            &[],
        );
        let priorities: Vec<_> = injections.iter().map(|i| i.priority).collect();
        assert_eq!(priorities, vec![-1, 0, 1]);
    }
}
