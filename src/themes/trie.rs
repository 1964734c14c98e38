use std::cmp::Ordering;
use std::collections::HashMap;

use crate::themes::FontStyle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeTrieElementRule {
    /// How many scope segments the rule matched, more is more specific
    pub scope_depth: usize,
    /// Innermost first, empty for the main rule of a node
    pub parent_scopes: Vec<String>,
    pub font_style: Option<FontStyle>,
    pub foreground: u16,
    pub background: u16,
}

impl ThemeTrieElementRule {
    pub fn new(
        scope_depth: usize,
        parent_scopes: Vec<String>,
        font_style: Option<FontStyle>,
        foreground: u16,
        background: u16,
    ) -> Self {
        Self {
            scope_depth,
            parent_scopes,
            font_style,
            foreground,
            background,
        }
    }

    fn accept_overwrite(
        &mut self,
        scope_depth: usize,
        font_style: Option<FontStyle>,
        foreground: u16,
        background: u16,
    ) {
        if self.scope_depth > scope_depth {
            log::warn!(
                "Theme rule at depth {scope_depth} overwriting a deeper one ({})",
                self.scope_depth
            );
        } else {
            self.scope_depth = scope_depth;
        }
        if font_style.is_some() {
            self.font_style = font_style;
        }
        if foreground != 0 {
            self.foreground = foreground;
        }
        if background != 0 {
            self.background = background;
        }
    }

    fn qualifiers(&self) -> impl Iterator<Item = &str> {
        self.parent_scopes
            .iter()
            .map(String::as_str)
            .filter(|s| *s != ">")
    }
}

/// Most specific first: deeper scope match, then more parent qualifiers, then longer
/// qualifiers from the innermost one
fn cmp_by_specificity(a: &ThemeTrieElementRule, b: &ThemeTrieElementRule) -> Ordering {
    b.scope_depth
        .cmp(&a.scope_depth)
        .then_with(|| b.qualifiers().count().cmp(&a.qualifiers().count()))
        .then_with(|| {
            a.qualifiers()
                .zip(b.qualifiers())
                .map(|(a, b)| b.len().cmp(&a.len()))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        })
}

/// A node of the theme trie, keyed by scope segment: `string.quoted` lives at
/// `root -> string -> quoted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeTrieElement {
    main_rule: ThemeTrieElementRule,
    rules_with_parent_scopes: Vec<ThemeTrieElementRule>,
    children: HashMap<String, ThemeTrieElement>,
}

impl ThemeTrieElement {
    pub fn new(
        main_rule: ThemeTrieElementRule,
        rules_with_parent_scopes: Vec<ThemeTrieElementRule>,
    ) -> Self {
        Self {
            main_rule,
            rules_with_parent_scopes,
            children: HashMap::new(),
        }
    }

    /// The rules that apply to `scope`, most specific first. The caller picks the first one
    /// whose parent scopes match.
    pub fn match_scope(&self, scope: &str) -> Vec<ThemeTrieElementRule> {
        if !scope.is_empty() {
            let (head, tail) = scope.split_once('.').unwrap_or((scope, ""));
            if let Some(child) = self.children.get(head) {
                return child.match_scope(tail);
            }
        }

        let mut rules = self.rules_with_parent_scopes.clone();
        rules.push(self.main_rule.clone());
        rules.sort_by(cmp_by_specificity);
        rules
    }

    pub fn insert(
        &mut self,
        scope_depth: usize,
        scope: &str,
        parent_scopes: &[String],
        font_style: Option<FontStyle>,
        foreground: u16,
        background: u16,
    ) {
        if scope.is_empty() {
            self.insert_here(scope_depth, parent_scopes, font_style, foreground, background);
            return;
        }

        let (head, tail) = scope.split_once('.').unwrap_or((scope, ""));
        let main_rule = &self.main_rule;
        let rules_with_parent_scopes = &self.rules_with_parent_scopes;
        // a new child starts with what applies to its parent
        let child = self.children.entry(head.to_owned()).or_insert_with(|| {
            ThemeTrieElement::new(main_rule.clone(), rules_with_parent_scopes.clone())
        });
        child.insert(
            scope_depth + 1,
            tail,
            parent_scopes,
            font_style,
            foreground,
            background,
        );
    }

    fn insert_here(
        &mut self,
        scope_depth: usize,
        parent_scopes: &[String],
        font_style: Option<FontStyle>,
        foreground: u16,
        background: u16,
    ) {
        if parent_scopes.is_empty() {
            self.main_rule
                .accept_overwrite(scope_depth, font_style, foreground, background);
            return;
        }

        if let Some(rule) = self
            .rules_with_parent_scopes
            .iter_mut()
            .find(|r| r.parent_scopes == parent_scopes)
        {
            rule.accept_overwrite(scope_depth, font_style, foreground, background);
            return;
        }

        // unset values are inherited from the main rule
        self.rules_with_parent_scopes.push(ThemeTrieElementRule::new(
            scope_depth,
            parent_scopes.to_vec(),
            font_style.or(self.main_rule.font_style),
            if foreground == 0 {
                self.main_rule.foreground
            } else {
                foreground
            },
            if background == 0 {
                self.main_rule.background
            } else {
                background
            },
        ));
    }
}
