use std::borrow::Cow;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::engine::{RegexEngine, Scanner};
use crate::grammars::RuleId;
use crate::grammars::anchors::{AnchorActive, AnchorCache};

/// Escapes characters that have a meaning in a regex so `value` matches literally.
pub(crate) fn escape_regex_characters(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(
            c,
            '-' | '\\'
                | '{'
                | '}'
                | '*'
                | '+'
                | '?'
                | '|'
                | '^'
                | '$'
                | '.'
                | ','
                | '['
                | ']'
                | '('
                | ')'
                | '#'
        ) || c.is_whitespace()
        {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn captured_text<'a>(line: &'a str, captures: &[Option<Range<usize>>], index: usize) -> Option<&'a str> {
    let range = captures.get(index)?.clone()?;
    line.get(range)
}

/// Number made of the ASCII digits at the start of `s`, and how many bytes they take
fn leading_number(s: &str) -> Option<(usize, usize)> {
    let len = s.bytes().take_while(|b| b.is_ascii_digit()).count();
    if len == 0 {
        return None;
    }
    s[..len].parse().ok().map(|n| (n, len))
}

/// Whether a `name`/`contentName` refers to captures with `$1` or `${1:/downcase}`
pub(crate) fn has_captures(template: &str) -> bool {
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        rest = &rest[pos + 1..];
        if leading_number(rest).is_some() || parse_capture_command(rest).is_some() {
            return true;
        }
    }
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureCommand {
    Downcase,
    Upcase,
}

/// Parses `{N:/downcase}` or `{N:/upcase}`, returning the group, the command and the length
fn parse_capture_command(s: &str) -> Option<(usize, CaptureCommand, usize)> {
    let inner = s.strip_prefix('{')?;
    let (index, digits) = leading_number(inner)?;
    let rest = inner[digits..].strip_prefix(":/")?;
    let (command, name_len) = if rest.starts_with("downcase}") {
        (CaptureCommand::Downcase, "downcase}".len())
    } else if rest.starts_with("upcase}") {
        (CaptureCommand::Upcase, "upcase}".len())
    } else {
        return None;
    };
    Some((index, command, 1 + digits + 2 + name_len))
}

/// Substitutes `$N`, `${N:/downcase}` and `${N:/upcase}` with the captured text.
/// Leading dots of the captured text are removed so it can't create empty scope segments.
/// References to groups that don't exist are left as is.
pub(crate) fn replace_captures(
    template: &str,
    line: &str,
    captures: &[Option<Range<usize>>],
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (index, command, consumed) = if let Some((index, len)) = leading_number(after) {
            (index, None, len)
        } else if let Some((index, command, len)) = parse_capture_command(after) {
            (index, Some(command), len)
        } else {
            out.push('$');
            rest = after;
            continue;
        };

        if index < captures.len() {
            let text = captured_text(line, captures, index).unwrap_or("");
            let text = text.trim_start_matches('.');
            match command {
                Some(CaptureCommand::Downcase) => out.push_str(&text.to_lowercase()),
                Some(CaptureCommand::Upcase) => out.push_str(&text.to_uppercase()),
                None => out.push_str(text),
            }
        } else {
            out.push('$');
            out.push_str(&after[..consumed]);
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}

/// A pattern of a rule along with what we need to know about its anchors and backreferences.
#[derive(Clone, PartialEq, Eq)]
pub struct RegExpSource {
    source: String,
    pub(crate) rule_id: RuleId,
    has_anchor: bool,
    has_back_references: bool,
    anchor_cache: Option<AnchorCache>,
}

impl RegExpSource {
    /// `\z` is rewritten to `$(?!\n)(?<!\n)` since every line we scan ends with a `\n`
    pub fn new(pattern: &str, rule_id: RuleId) -> Self {
        let mut source = String::with_capacity(pattern.len());
        let mut has_anchor = false;
        let mut chars = pattern.chars();

        while let Some(ch) = chars.next() {
            if ch != '\\' {
                source.push(ch);
                continue;
            }
            match chars.next() {
                Some('z') => source.push_str("$(?!\\n)(?<!\\n)"),
                Some(next) => {
                    if next == 'A' || next == 'G' {
                        has_anchor = true;
                    }
                    source.push('\\');
                    source.push(next);
                }
                None => source.push('\\'),
            }
        }

        let anchor_cache = has_anchor.then(|| AnchorCache::new(&source));
        let has_back_references = has_back_references(&source);

        Self {
            source,
            rule_id,
            has_anchor,
            has_back_references,
            anchor_cache,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn has_anchor(&self) -> bool {
        self.has_anchor
    }

    pub fn has_back_references(&self) -> bool {
        self.has_back_references
    }

    /// Only rebuilds the anchor variants if the text actually changed
    pub fn set_source(&mut self, source: &str) {
        if self.source == source {
            return;
        }
        self.source = source.to_owned();
        if self.has_anchor {
            self.anchor_cache = Some(AnchorCache::new(&self.source));
        }
    }

    /// Replaces each `\N` with the escaped text of group N of a previous match, eg
    /// to find the closing delimiter of a heredoc.
    pub fn resolve_back_references(
        &self,
        line: &str,
        captures: &[Option<Range<usize>>],
    ) -> String {
        let mut out = String::with_capacity(self.source.len());
        let mut rest = self.source.as_str();

        while let Some(pos) = rest.find('\\') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            match leading_number(after) {
                Some((index, len)) => {
                    out.push_str(&escape_regex_characters(
                        captured_text(line, captures, index).unwrap_or(""),
                    ));
                    rest = &after[len..];
                }
                None => {
                    out.push('\\');
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        out
    }

    pub fn resolve_anchors(&self, anchor: AnchorActive) -> Cow<'_, str> {
        match &self.anchor_cache {
            Some(cache) => Cow::Borrowed(cache.resolve(anchor)),
            None => Cow::Borrowed(&self.source),
        }
    }
}

fn has_back_references(source: &str) -> bool {
    source
        .as_bytes()
        .windows(2)
        .any(|w| w[0] == b'\\' && w[1].is_ascii_digit())
}

impl fmt::Debug for RegExpSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} -> {}", self.rule_id, self.source)
    }
}

/// What a [`CompiledRule`] found: the rule behind the matching pattern and the groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub rule_id: RuleId,
    pub captures: Vec<Option<Range<usize>>>,
}

impl RuleMatch {
    pub fn start(&self) -> usize {
        self.captures
            .first()
            .and_then(|c| c.as_ref())
            .map_or(0, |c| c.start)
    }

    pub fn end(&self) -> usize {
        self.captures
            .first()
            .and_then(|c| c.as_ref())
            .map_or(0, |c| c.end)
    }
}

/// A scanner over a list of patterns, each mapped back to the rule it comes from.
pub struct CompiledRule {
    scanner: Box<dyn Scanner>,
    rules: Vec<RuleId>,
}

impl CompiledRule {
    fn new(engine: &dyn RegexEngine, patterns: &[Cow<'_, str>], rules: Vec<RuleId>) -> Self {
        let patterns: Vec<&str> = patterns.iter().map(|p| p.as_ref()).collect();
        Self {
            scanner: engine.create_scanner(&patterns),
            rules,
        }
    }

    pub fn find_next_match(&self, text: &str, start: usize) -> Option<RuleMatch> {
        let found = self.scanner.find_next_match(text, start)?;
        let rule_id = *self.rules.get(found.index)?;
        Some(RuleMatch {
            rule_id,
            captures: found.captures,
        })
    }
}

impl fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRule")
            .field("rules", &self.rules)
            .finish()
    }
}

/// The ordered patterns a rule scans for, with scanners compiled on demand and cached
/// per anchor variant. Changing a pattern drops every cached scanner.
#[derive(Debug, Default)]
pub struct RegExpSourceList {
    items: Vec<RegExpSource>,
    has_anchors: bool,
    cached: Option<Arc<CompiledRule>>,
    anchor_cache: [Option<Arc<CompiledRule>>; 4],
}

impl RegExpSourceList {
    pub fn push(&mut self, item: RegExpSource) {
        self.has_anchors = self.has_anchors || item.has_anchor();
        self.items.push(item);
    }

    pub fn unshift(&mut self, item: RegExpSource) {
        self.has_anchors = self.has_anchors || item.has_anchor();
        self.items.insert(0, item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn set_source(&mut self, index: usize, source: &str) {
        let Some(item) = self.items.get_mut(index) else {
            return;
        };
        if item.source() != source {
            item.set_source(source);
            self.dispose_caches();
        }
    }

    pub fn dispose_caches(&mut self) {
        self.cached = None;
        self.anchor_cache = Default::default();
    }

    pub fn compile(&mut self, engine: &dyn RegexEngine) -> Arc<CompiledRule> {
        let items = &self.items;
        self.cached
            .get_or_insert_with(|| {
                let patterns: Vec<_> = items.iter().map(|e| Cow::Borrowed(e.source())).collect();
                Arc::new(CompiledRule::new(
                    engine,
                    &patterns,
                    items.iter().map(|e| e.rule_id).collect(),
                ))
            })
            .clone()
    }

    pub fn compile_ag(
        &mut self,
        engine: &dyn RegexEngine,
        allow_a: bool,
        allow_g: bool,
    ) -> Arc<CompiledRule> {
        if !self.has_anchors {
            return self.compile(engine);
        }

        let anchor = AnchorActive::new(allow_a, allow_g);
        let items = &self.items;
        self.anchor_cache[anchor.index()]
            .get_or_insert_with(|| {
                let patterns: Vec<_> = items.iter().map(|e| e.resolve_anchors(anchor)).collect();
                Arc::new(CompiledRule::new(
                    engine,
                    &patterns,
                    items.iter().map(|e| e.rule_id).collect(),
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OnigEngine;
    use crate::grammars::END_RULE_ID;

    #[test]
    fn rewrites_end_of_string_anchor() {
        let source = RegExpSource::new("foo\\z", RuleId(1));
        assert_eq!(source.source(), "foo$(?!\\n)(?<!\\n)");
        assert!(!source.has_anchor());
    }

    #[test]
    fn detects_anchors_and_backreferences() {
        assert!(RegExpSource::new("\\Gfoo", RuleId(1)).has_anchor());
        assert!(RegExpSource::new("\\Afoo", RuleId(1)).has_anchor());
        assert!(!RegExpSource::new("\\\\G", RuleId(1)).has_anchor());
        assert!(RegExpSource::new("</\\1>", RuleId(1)).has_back_references());
        assert!(!RegExpSource::new("\\d+", RuleId(1)).has_back_references());
    }

    #[test]
    fn resolves_back_references_with_escaped_text() {
        let source = RegExpSource::new("^\\1\\2$", END_RULE_ID);
        let line = "<<a.b";
        let captures = vec![Some(0..5), Some(0..2), Some(2..5)];
        assert_eq!(source.resolve_back_references(line, &captures), "^<<a\\.b$");

        // missing groups resolve to nothing
        let captures = vec![Some(0..5), None];
        assert_eq!(source.resolve_back_references(line, &captures), "^$");
    }

    #[test]
    fn escapes_regex_characters() {
        assert_eq!(escape_regex_characters("a.b*c"), "a\\.b\\*c");
        assert_eq!(escape_regex_characters("(x) y"), "\\(x\\)\\ y");
        assert_eq!(escape_regex_characters("abc"), "abc");
    }

    #[test]
    fn capture_templates() {
        let line = "function Foo";
        let captures = vec![Some(0..12), Some(0..8), Some(9..12)];
        assert!(has_captures("entity.name.$2"));
        assert!(has_captures("${1:/upcase}"));
        assert!(!has_captures("entity.name"));
        assert!(!has_captures("cost$"));

        assert_eq!(replace_captures("entity.name.$2", line, &captures), "entity.name.Foo");
        assert_eq!(
            replace_captures("x.${2:/downcase}.${1:/upcase}", line, &captures),
            "x.foo.FUNCTION"
        );
        // out of range references are kept
        assert_eq!(replace_captures("x.$5", line, &captures), "x.$5");
        assert_eq!(replace_captures("a$b", line, &captures), "a$b");
    }

    #[test]
    fn captured_text_loses_leading_dots() {
        let line = "..md";
        let captures = vec![Some(0..4)];
        assert_eq!(replace_captures("source.$0", line, &captures), "source.md");
    }

    #[test]
    fn set_source_drops_cached_scanners() {
        let engine = OnigEngine;
        let mut list = RegExpSourceList::default();
        list.push(RegExpSource::new("a", RuleId(1)));
        list.push(RegExpSource::new("\u{FFFF}", END_RULE_ID));

        let first = list.compile(&engine);
        assert!(Arc::ptr_eq(&first, &list.compile(&engine)));
        assert_eq!(first.find_next_match("xb", 0), None);

        list.set_source(1, "b");
        let second = list.compile(&engine);
        assert!(!Arc::ptr_eq(&first, &second));
        let m = second.find_next_match("xb", 0).unwrap();
        assert_eq!(m.rule_id, END_RULE_ID);
        assert_eq!((m.start(), m.end()), (1, 2));

        // same text, cache kept
        list.set_source(1, "b");
        assert!(Arc::ptr_eq(&second, &list.compile(&engine)));
    }

    #[test]
    fn compile_ag_uses_anchor_variants() {
        let engine = OnigEngine;
        let mut list = RegExpSourceList::default();
        list.push(RegExpSource::new("\\Gb", RuleId(7)));

        assert!(list.compile_ag(&engine, false, false).find_next_match("ab", 1).is_none());
        let m = list.compile_ag(&engine, false, true).find_next_match("ab", 1).unwrap();
        assert_eq!(m.rule_id, RuleId(7));
    }
}
