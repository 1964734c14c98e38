use std::fmt;
use std::sync::Arc;

use crate::grammar::Grammar;
use crate::grammars::{BasicScopeAttributes, RuleId};
use crate::scope::ScopeStack;
use crate::themes::StyleAttributes;
use crate::token_attributes::EncodedTokenAttributes;

/// A scope path along with the token attributes resolved for it.
///
/// Attributes are merged when pushing: a scope only overrides what it (or the theme rule
/// matching it) sets, everything else comes from the parent.
#[derive(PartialEq, Eq)]
pub struct AttributedScopeStack {
    parent: Option<Arc<AttributedScopeStack>>,
    scope_path: Arc<ScopeStack>,
    token_attributes: EncodedTokenAttributes,
}

fn merge_attributes(
    existing: EncodedTokenAttributes,
    basic_scope_attributes: BasicScopeAttributes,
    style_attributes: Option<StyleAttributes>,
) -> EncodedTokenAttributes {
    let style = style_attributes.unwrap_or_default();
    existing.set(
        basic_scope_attributes.language_id,
        basic_scope_attributes.token_type,
        None,
        style.font_style,
        style.foreground_id,
        style.background_id,
    )
}

impl AttributedScopeStack {
    pub fn create_root(scope_name: &str, token_attributes: EncodedTokenAttributes) -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            scope_path: ScopeStack::new(None, scope_name),
            token_attributes,
        })
    }

    /// The root scope of a grammar, styled by the theme
    pub(crate) fn create_root_and_look_up_scope_name(
        scope_name: &str,
        token_attributes: EncodedTokenAttributes,
        grammar: &Grammar,
    ) -> Arc<Self> {
        let basic_attributes = grammar.basic_scope_attributes(scope_name);
        let scope_path = ScopeStack::new(None, scope_name);
        let root_style = grammar.theme_provider().theme_match(&scope_path);
        Arc::new(Self {
            parent: None,
            token_attributes: merge_attributes(token_attributes, basic_attributes, root_style),
            scope_path,
        })
    }

    pub fn scope_name(&self) -> &str {
        self.scope_path.scope_name()
    }

    pub fn scope_path(&self) -> &Arc<ScopeStack> {
        &self.scope_path
    }

    pub fn token_attributes(&self) -> EncodedTokenAttributes {
        self.token_attributes
    }

    pub fn parent(&self) -> Option<&Arc<AttributedScopeStack>> {
        self.parent.as_ref()
    }

    /// Root first
    pub fn scope_names(&self) -> Vec<&str> {
        self.scope_path.segments()
    }

    /// Pushes each space separated scope of `scope_path`. `None` returns the same stack.
    pub(crate) fn push_attributed(
        self: &Arc<Self>,
        scope_path: Option<&str>,
        grammar: &Grammar,
    ) -> Arc<Self> {
        let Some(scope_path) = scope_path else {
            return Arc::clone(self);
        };
        let mut result = Arc::clone(self);
        for scope_name in scope_path.split(' ').filter(|s| !s.is_empty()) {
            result = result.push_one(scope_name, grammar);
        }
        result
    }

    fn push_one(self: &Arc<Self>, scope_name: &str, grammar: &Grammar) -> Arc<Self> {
        let basic_attributes = grammar.basic_scope_attributes(scope_name);
        let scope_path = self.scope_path.push(scope_name);
        let style = grammar.theme_provider().theme_match(&scope_path);
        Arc::new(Self {
            parent: Some(Arc::clone(self)),
            token_attributes: merge_attributes(self.token_attributes, basic_attributes, style),
            scope_path,
        })
    }

    /// Same scope names and attributes all the way to the root
    pub fn equals(a: &AttributedScopeStack, b: &AttributedScopeStack) -> bool {
        let mut a = Some(a);
        let mut b = Some(b);
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if std::ptr::eq(x, y) {
                        return true;
                    }
                    if x.scope_name() != y.scope_name() || x.token_attributes != y.token_attributes {
                        return false;
                    }
                    a = x.parent.as_deref();
                    b = y.parent.as_deref();
                }
                _ => return false,
            }
        }
    }
}

impl fmt::Debug for AttributedScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.scope_path, self.token_attributes)
    }
}

/// Where we are in the grammar at the end of a line: the rules entered and not exited yet.
///
/// Immutable, each push allocates a new element pointing to its parent so states of
/// previous lines stay valid and can be used to restart tokenization from any line.
pub struct StateStack {
    parent: Option<Arc<StateStack>>,
    rule_id: RuleId,
    /// Where the rule was pushed in the current line, `None` once we are past that line
    enter_pos: Option<usize>,
    /// Where the last match of the parent ended when the rule was pushed, `None` once we
    /// are past that line
    anchor_pos: Option<usize>,
    /// The begin match ended at the end of the line, `\G` can then match at the start of
    /// the next one
    begin_rule_captured_eol: bool,
    /// The end/while pattern with backreferences resolved from the begin captures
    end_rule: Option<String>,
    /// Scopes of the rule `name`, used for the begin/end delimiters
    name_scopes_list: Arc<AttributedScopeStack>,
    /// Scopes of the rule `name` and `contentName`, used for what's inside
    content_name_scopes_list: Arc<AttributedScopeStack>,
    /// Number of elements in the stack, the root being 1
    depth: usize,
}

impl StateStack {
    pub(crate) fn new_root(rule_id: RuleId, scopes: Arc<AttributedScopeStack>) -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            rule_id,
            enter_pos: None,
            anchor_pos: None,
            begin_rule_captured_eol: false,
            end_rule: None,
            name_scopes_list: Arc::clone(&scopes),
            content_name_scopes_list: scopes,
            depth: 1,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn with_parent(
        parent: Option<Arc<StateStack>>,
        rule_id: RuleId,
        enter_pos: Option<usize>,
        anchor_pos: Option<usize>,
        begin_rule_captured_eol: bool,
        end_rule: Option<String>,
        name_scopes_list: Arc<AttributedScopeStack>,
        content_name_scopes_list: Arc<AttributedScopeStack>,
    ) -> Arc<Self> {
        let depth = parent.as_ref().map_or(1, |p| p.depth + 1);
        Arc::new(Self {
            parent,
            rule_id,
            enter_pos,
            anchor_pos,
            begin_rule_captured_eol,
            end_rule,
            name_scopes_list,
            content_name_scopes_list,
            depth,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn push(
        self: &Arc<Self>,
        rule_id: RuleId,
        enter_pos: Option<usize>,
        anchor_pos: Option<usize>,
        begin_rule_captured_eol: bool,
        end_rule: Option<String>,
        name_scopes_list: Arc<AttributedScopeStack>,
        content_name_scopes_list: Arc<AttributedScopeStack>,
    ) -> Arc<Self> {
        Self::with_parent(
            Some(Arc::clone(self)),
            rule_id,
            enter_pos,
            anchor_pos,
            begin_rule_captured_eol,
            end_rule,
            name_scopes_list,
            content_name_scopes_list,
        )
    }

    /// The parent, `None` for the root
    pub fn pop(&self) -> Option<Arc<StateStack>> {
        self.parent.clone()
    }

    /// Like [`StateStack::pop`] but stays on the root
    pub fn safe_pop(self: &Arc<Self>) -> Arc<Self> {
        self.parent.clone().unwrap_or_else(|| Arc::clone(self))
    }

    pub fn parent(&self) -> Option<&Arc<StateStack>> {
        self.parent.as_ref()
    }

    pub fn rule_id(&self) -> RuleId {
        self.rule_id
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn enter_pos(&self) -> Option<usize> {
        self.enter_pos
    }

    pub fn anchor_pos(&self) -> Option<usize> {
        self.anchor_pos
    }

    pub fn begin_rule_captured_eol(&self) -> bool {
        self.begin_rule_captured_eol
    }

    pub fn end_rule(&self) -> Option<&str> {
        self.end_rule.as_deref()
    }

    pub fn name_scopes_list(&self) -> &Arc<AttributedScopeStack> {
        &self.name_scopes_list
    }

    pub fn content_name_scopes_list(&self) -> &Arc<AttributedScopeStack> {
        &self.content_name_scopes_list
    }

    /// Replaces the top element with one using `content_name_scopes_list`
    pub fn with_content_name_scopes_list(
        self: &Arc<Self>,
        content_name_scopes_list: Arc<AttributedScopeStack>,
    ) -> Arc<Self> {
        if Arc::ptr_eq(&self.content_name_scopes_list, &content_name_scopes_list) {
            return Arc::clone(self);
        }
        Self::with_parent(
            self.parent.clone(),
            self.rule_id,
            self.enter_pos,
            self.anchor_pos,
            self.begin_rule_captured_eol,
            self.end_rule.clone(),
            Arc::clone(&self.name_scopes_list),
            content_name_scopes_list,
        )
    }

    /// Replaces the top element with one using `end_rule`
    pub fn with_end_rule(self: &Arc<Self>, end_rule: String) -> Arc<Self> {
        if self.end_rule.as_deref() == Some(end_rule.as_str()) {
            return Arc::clone(self);
        }
        Self::with_parent(
            self.parent.clone(),
            self.rule_id,
            self.enter_pos,
            self.anchor_pos,
            self.begin_rule_captured_eol,
            Some(end_rule),
            Arc::clone(&self.name_scopes_list),
            Arc::clone(&self.content_name_scopes_list),
        )
    }

    /// Whether one of the elements entered at the same position as `other` is for the same
    /// rule, which means we went in a circle.
    pub fn has_same_rule_as(&self, other: &StateStack) -> bool {
        let mut el = Some(self);
        while let Some(current) = el {
            if current.enter_pos != other.enter_pos {
                break;
            }
            if current.rule_id == other.rule_id {
                return true;
            }
            el = current.parent.as_deref();
        }
        false
    }

    fn is_reset(&self) -> bool {
        let mut el = Some(self);
        while let Some(current) = el {
            if current.enter_pos.is_some() || current.anchor_pos.is_some() {
                return false;
            }
            el = current.parent.as_deref();
        }
        true
    }

    /// The same stack with positions cleared, positions only make sense for the line
    /// they were recorded on.
    pub fn reset(self: &Arc<Self>) -> Arc<Self> {
        if self.is_reset() {
            return Arc::clone(self);
        }
        let parent = self.parent.as_ref().map(|p| p.reset());
        Self::with_parent(
            parent,
            self.rule_id,
            None,
            None,
            self.begin_rule_captured_eol,
            self.end_rule.clone(),
            Arc::clone(&self.name_scopes_list),
            Arc::clone(&self.content_name_scopes_list),
        )
    }

    fn structural_equals(a: &StateStack, b: &StateStack) -> bool {
        let mut a = Some(a);
        let mut b = Some(b);
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if std::ptr::eq(x, y) {
                        return true;
                    }
                    if x.depth != y.depth || x.rule_id != y.rule_id || x.end_rule != y.end_rule {
                        return false;
                    }
                    a = x.parent.as_deref();
                    b = y.parent.as_deref();
                }
                _ => return false,
            }
        }
    }
}

impl PartialEq for StateStack {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        StateStack::structural_equals(self, other)
            && AttributedScopeStack::equals(
                &self.content_name_scopes_list,
                &other.content_name_scopes_list,
            )
    }
}

impl Eq for StateStack {}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut frames = Vec::with_capacity(self.depth);
        let mut el = Some(self);
        while let Some(current) = el {
            frames.push(current);
            el = current.parent.as_deref();
        }

        writeln!(f, "StateStack:")?;
        for (depth, frame) in frames.iter().rev().enumerate() {
            let indent = "  ".repeat(depth);
            write!(
                f,
                "{indent}rule={:?}, content=[{}]",
                frame.rule_id, frame.content_name_scopes_list.scope_path
            )?;
            if let Some(end_rule) = &frame.end_rule {
                write!(f, ", end_rule=\"{end_rule}\"")?;
            }
            write!(f, ", anchor_pos={:?}", frame.anchor_pos)?;
            if let Some(enter_pos) = frame.enter_pos
                && frame.anchor_pos != Some(enter_pos)
            {
                write!(f, ", enter_pos={enter_pos}")?;
            }
            writeln!(
                f,
                ", begin_rule_captured_eol={}",
                frame.begin_rule_captured_eol
            )?;
        }
        Ok(())
    }
}
