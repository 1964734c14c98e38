use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::engine::{OnigEngine, RegexEngine};
use crate::error::TintaResult;
use crate::grammar::{Grammar, GrammarConfiguration};
use crate::grammars::{RawGrammar, ScopeDependencyProcessor};
use crate::scope::ScopeStack;
use crate::themes::{RawTheme, StyleAttributes, Theme, ThemeProvider};

/// Where grammars come from when compiling a grammar that includes other grammars.
pub trait GrammarRepository {
    fn lookup(&self, scope_name: &str) -> Option<Arc<RawGrammar>>;

    /// The scope names of the grammars injected into `scope_name`
    fn injections(&self, scope_name: &str) -> Vec<String>;
}

/// Called with a scope name when a grammar needs one that wasn't added yet
pub type GrammarLoader = Box<dyn Fn(&str) -> Option<RawGrammar> + Send + Sync>;

/// The theme of a registry. Grammars keep a handle to it so changing the theme of the
/// registry applies to the lines tokenized afterwards.
#[derive(Debug)]
struct SharedTheme(RwLock<Arc<Theme>>);

impl SharedTheme {
    fn current(&self) -> Arc<Theme> {
        Arc::clone(&self.0.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn replace(&self, theme: Theme) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(theme);
    }
}

impl ThemeProvider for SharedTheme {
    fn theme_match(&self, scope_path: &ScopeStack) -> Option<StyleAttributes> {
        self.current().match_scope_path(Some(scope_path))
    }

    fn defaults(&self) -> StyleAttributes {
        self.current().get_defaults()
    }
}

/// Holds the raw grammars and the theme, and compiles grammars on demand.
///
/// Compiled grammars are cached by scope name: the configuration given the first time a
/// grammar is loaded is the one it keeps.
pub struct Registry {
    raw_grammars: HashMap<String, Arc<RawGrammar>>,
    /// target scope name -> scope names of the grammars injected into it
    injection_grammars: HashMap<String, Vec<String>>,
    grammars: HashMap<String, Arc<Grammar>>,
    theme: Arc<SharedTheme>,
    engine: Arc<dyn RegexEngine>,
    loader: Option<GrammarLoader>,
}

impl Registry {
    pub fn new(theme: Theme) -> Self {
        Self {
            raw_grammars: HashMap::new(),
            injection_grammars: HashMap::new(),
            grammars: HashMap::new(),
            theme: Arc::new(SharedTheme(RwLock::new(Arc::new(theme)))),
            engine: Arc::new(OnigEngine),
            loader: None,
        }
    }

    /// Uses another regex engine for the grammars loaded from now on
    pub fn with_regex_engine(mut self, engine: Arc<dyn RegexEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Sets the function used to get grammars that were not added beforehand
    pub fn set_grammar_loader(&mut self, loader: GrammarLoader) {
        self.loader = Some(loader);
    }

    /// Adds or replaces the grammar for its scope name. If the grammar has `injectTo`, it
    /// gets injected in those scopes.
    ///
    /// Grammars already loaded are not affected.
    pub fn add_grammar(&mut self, raw_grammar: RawGrammar) {
        for target in &raw_grammar.inject_to {
            let injected = self.injection_grammars.entry(target.clone()).or_default();
            if !injected.contains(&raw_grammar.scope_name) {
                injected.push(raw_grammar.scope_name.clone());
            }
        }
        self.raw_grammars
            .insert(raw_grammar.scope_name.clone(), Arc::new(raw_grammar));
    }

    pub fn contains_grammar(&self, scope_name: &str) -> bool {
        self.raw_grammars.contains_key(scope_name)
    }

    /// Replaces the theme, loaded grammars included.
    /// `color_map` is an optional fixed palette, see [`Theme::create_from_raw_theme`].
    pub fn set_theme(
        &mut self,
        raw_theme: &RawTheme,
        color_map: Option<Vec<String>>,
    ) -> TintaResult<()> {
        let theme = Theme::create_from_raw_theme(raw_theme, color_map)?;
        self.theme.replace(theme);
        Ok(())
    }

    pub fn theme(&self) -> Arc<Theme> {
        self.theme.current()
    }

    /// The colors of the current theme, indexed by the ids used in token attributes
    pub fn color_map(&self) -> Vec<String> {
        self.theme.current().get_color_map().to_vec()
    }

    fn ensure_loaded(&mut self, scope_name: &str) {
        if self.raw_grammars.contains_key(scope_name) {
            return;
        }
        let Some(loader) = &self.loader else {
            return;
        };
        match loader(scope_name) {
            Some(raw_grammar) => self.add_grammar(raw_grammar),
            None => log::debug!("No grammar found for {scope_name}"),
        }
    }

    /// Compiles the grammar for `scope_name` along with everything it depends on, loading
    /// missing grammars with the grammar loader if there is one.
    pub fn load_grammar(
        &mut self,
        scope_name: &str,
        configuration: GrammarConfiguration,
    ) -> TintaResult<Arc<Grammar>> {
        if let Some(grammar) = self.grammars.get(scope_name) {
            return Ok(Arc::clone(grammar));
        }

        let mut processor = ScopeDependencyProcessor::new(scope_name);
        while !processor.queue().is_empty() {
            let pending: Vec<String> = processor
                .queue()
                .iter()
                .map(|r| r.scope_name().to_owned())
                .collect();
            for scope in pending {
                self.ensure_loaded(&scope);
            }
            processor.process_queue(&*self)?;
        }

        let theme: Arc<dyn ThemeProvider> = self.theme.clone();
        let grammar = Arc::new(Grammar::new(
            scope_name,
            &*self,
            configuration,
            theme,
            Arc::clone(&self.engine),
        )?);
        self.grammars
            .insert(scope_name.to_owned(), Arc::clone(&grammar));
        Ok(grammar)
    }

    /// Drops the compiled regexes of every loaded grammar and forgets them
    pub fn dispose(&mut self) {
        for grammar in self.grammars.values() {
            grammar.dispose();
        }
        self.grammars.clear();
    }
}

impl GrammarRepository for Registry {
    fn lookup(&self, scope_name: &str) -> Option<Arc<RawGrammar>> {
        self.raw_grammars.get(scope_name).cloned()
    }

    fn injections(&self, scope_name: &str) -> Vec<String> {
        self.injection_grammars
            .get(scope_name)
            .cloned()
            .unwrap_or_default()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut scopes: Vec<_> = self.raw_grammars.keys().collect();
        scopes.sort();
        f.debug_struct("Registry")
            .field("grammars", &scopes)
            .field("injection_grammars", &self.injection_grammars)
            .field("has_loader", &self.loader.is_some())
            .finish()
    }
}
