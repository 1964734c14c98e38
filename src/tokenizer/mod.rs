//! This file replicates the logic of <https://github.com/microsoft/vscode-textmate>
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::grammar::Grammar;
use crate::grammars::{END_RULE_ID, RuleId, RuleMatch, Rule, WHILE_RULE_ID};

mod line_tokens;
mod stack;

pub use line_tokens::{BalancedBracketSelectors, Token};
pub(crate) use line_tokens::{LineTokens, TokenTypeMatcher};
pub use stack::{AttributedScopeStack, StateStack};

/// Where a line tokenization ended
#[derive(Debug)]
pub(crate) struct TokenizeStringResult {
    pub stack: Arc<StateStack>,
    /// The time limit was hit before reaching the end of the line
    pub stopped_early: bool,
}

/// What the while conditions left us with before scanning the rest of the line
struct WhileCheckResult {
    stack: Arc<StateStack>,
    line_pos: usize,
    anchor_position: Option<usize>,
    is_first_line: bool,
}

/// A match from the active rule or from an injection
struct ScanResult {
    found: RuleMatch,
    /// Only set by `L:` injections, which win ties against the active rule
    priority_match: bool,
}

/// Tokenizes a line with one grammar. The line is expected to end with `\n`
/// (except for captures being tokenized again, which are substrings of the line).
pub(crate) struct Tokenizer<'g> {
    grammar: &'g Grammar,
    line: &'g str,
}

impl<'g> Tokenizer<'g> {
    pub fn new(grammar: &'g Grammar, line: &'g str) -> Self {
        Self { grammar, line }
    }

    fn rule(&self, id: RuleId) -> Option<&'g Rule> {
        self.grammar.rules().get(id)
    }

    /// Scans for the rule patterns (and end pattern for begin/end rules) from `pos`.
    fn scan_rule(
        &self,
        rule: &Rule,
        end_rule: Option<&str>,
        pos: usize,
        is_first_line: bool,
        anchor_position: Option<usize>,
    ) -> Option<RuleMatch> {
        let compiled = rule.compile_ag(
            self.grammar.rules(),
            self.grammar.engine(),
            end_rule,
            is_first_line,
            anchor_position == Some(pos),
        );
        compiled.find_next_match(self.line, pos)
    }

    /// Matches injection patterns at the current position.
    /// The earliest match wins, the first injection in priority order winning ties.
    fn match_injections(
        &self,
        stack: &StateStack,
        pos: usize,
        is_first_line: bool,
        anchor_position: Option<usize>,
    ) -> Option<ScanResult> {
        let injections = self.grammar.injections();
        let scopes = stack.content_name_scopes_list().scope_names();
        let mut best: Option<ScanResult> = None;

        for injection in injections {
            if !injection.matcher.matches_scopes(&scopes) {
                continue;
            }
            let Some(rule) = self.rule(injection.rule_id) else {
                continue;
            };
            let Some(found) = self.scan_rule(rule, None, pos, is_first_line, anchor_position)
            else {
                continue;
            };
            if let Some(current) = &best
                && found.start() >= current.found.start()
            {
                continue;
            }

            #[cfg(feature = "debug")]
            log::debug!(
                "[match_injections] {} matched at {}",
                injection.debug_selector,
                found.start()
            );
            let is_done = found.start() == pos;
            best = Some(ScanResult {
                found,
                priority_match: injection.priority == -1,
            });
            if is_done {
                break;
            }
        }

        best
    }

    /// Matches both regular rule patterns and injections, returning the best match.
    /// An injection wins if it matches earlier, or at the same position with `L:` priority.
    fn match_rule_or_injections(
        &self,
        stack: &StateStack,
        pos: usize,
        is_first_line: bool,
        anchor_position: Option<usize>,
    ) -> Option<RuleMatch> {
        let regular = self.rule(stack.rule_id()).and_then(|rule| {
            self.scan_rule(rule, stack.end_rule(), pos, is_first_line, anchor_position)
        });

        if self.grammar.injections().is_empty() {
            return regular;
        }

        let injection = self.match_injections(stack, pos, is_first_line, anchor_position);
        match (regular, injection) {
            (None, None) => None,
            (Some(regular), None) => Some(regular),
            (None, Some(injection)) => Some(injection.found),
            (Some(regular), Some(injection)) => {
                let match_score = regular.start();
                let injection_score = injection.found.start();
                if injection_score < match_score
                    || (injection.priority_match && injection_score == match_score)
                {
                    Some(injection.found)
                } else {
                    Some(regular)
                }
            }
        }
    }

    /// Checks every while rule on the stack, outermost first. The first one that doesn't
    /// match anymore is popped along with everything above it.
    fn check_while_conditions(
        &self,
        stack: Arc<StateStack>,
        mut line_pos: usize,
        mut is_first_line: bool,
        tokens: &mut LineTokens,
    ) -> WhileCheckResult {
        let mut anchor_position = if stack.begin_rule_captured_eol() {
            Some(0)
        } else {
            None
        };

        let mut while_rules = Vec::new();
        let mut node = Some(Arc::clone(&stack));
        while let Some(current) = node {
            if let Some(Rule::BeginWhile(rule)) = self.rule(current.rule_id()) {
                while_rules.push((rule, Arc::clone(&current)));
            }
            node = current.pop();
        }

        if while_rules.is_empty() {
            #[cfg(feature = "debug")]
            log::debug!("[check_while_conditions] no while conditions active:\n  {stack:?}");
            return WhileCheckResult {
                stack,
                line_pos,
                anchor_position,
                is_first_line,
            };
        }

        let mut stack = stack;
        while let Some((rule, while_stack)) = while_rules.pop() {
            let compiled = rule.compile_while_ag(
                self.grammar.engine(),
                while_stack.end_rule(),
                is_first_line,
                anchor_position == Some(line_pos),
            );
            let found = compiled.find_next_match(self.line, line_pos);

            #[cfg(feature = "debug")]
            log::debug!(
                "[check_while_conditions] while rule {:?} at {line_pos}: {:?}",
                rule.id,
                found.as_ref().map(|m| m.start()..m.end())
            );

            let Some(found) = found.filter(|m| m.rule_id == WHILE_RULE_ID) else {
                stack = while_stack.safe_pop();
                break;
            };

            if !found.captures.is_empty() {
                tokens.produce(&while_stack, found.start());
                self.handle_captures(
                    &while_stack,
                    is_first_line,
                    &rule.while_captures,
                    &found.captures,
                    tokens,
                );
                tokens.produce(&while_stack, found.end());
                anchor_position = Some(found.end());
                if found.end() > line_pos {
                    line_pos = found.end();
                    is_first_line = false;
                }
            }
        }

        WhileCheckResult {
            stack,
            line_pos,
            anchor_position,
            is_first_line,
        }
    }

    /// Produces the tokens for the capture groups of a match. Captures nest: a capture
    /// fully contained in a previous one gets its scopes pushed on top of it.
    fn handle_captures(
        &self,
        stack: &Arc<StateStack>,
        is_first_line: bool,
        rule_captures: &[Option<RuleId>],
        captures: &[Option<Range<usize>>],
        tokens: &mut LineTokens,
    ) {
        if rule_captures.is_empty() {
            return;
        }

        // (scopes, end_pos)[]
        let mut local_stack: Vec<(Arc<AttributedScopeStack>, usize)> = Vec::with_capacity(2);
        let max_end = captures
            .first()
            .and_then(|c| c.as_ref())
            .map_or(0, |c| c.end);

        for (rule_id, capture) in rule_captures.iter().zip(captures) {
            let (Some(rule_id), Some(capture)) = (rule_id, capture) else {
                continue;
            };
            // Nothing captured
            if capture.is_empty() {
                continue;
            }
            if capture.start > max_end {
                break;
            }
            let Some(rule) = self.rule(*rule_id) else {
                continue;
            };
            let Rule::Capture(capture_rule) = rule else {
                continue;
            };

            // pop captures while needed
            while let Some((scopes, end_pos)) = local_stack.last()
                && *end_pos <= capture.start
            {
                tokens.produce_from_scopes(scopes, *end_pos);
                local_stack.pop();
            }

            match local_stack.last() {
                Some((scopes, _)) => tokens.produce_from_scopes(scopes, capture.start),
                None => tokens.produce(stack, capture.start),
            }

            if let Some(retokenize_with) = capture_rule.retokenize_captured_with_rule_id {
                let name = rule.name(self.line, captures);
                let name_scopes_list = stack
                    .content_name_scopes_list()
                    .push_attributed(name.as_deref(), self.grammar);
                let content_name = rule.content_name(self.line, captures);
                let content_name_scopes_list =
                    name_scopes_list.push_attributed(content_name.as_deref(), self.grammar);
                let retokenization_stack = stack.push(
                    retokenize_with,
                    Some(capture.start),
                    None,
                    false,
                    None,
                    name_scopes_list,
                    content_name_scopes_list,
                );

                #[cfg(feature = "debug")]
                log::debug!(
                    "[handle_captures] Retokenizing capture at [{}..{}]: {:?}",
                    capture.start,
                    capture.end,
                    &self.line[capture.start..capture.end]
                );
                let substring = &self.line[..capture.end];
                Tokenizer::new(self.grammar, substring).tokenize_string(
                    is_first_line && capture.start == 0,
                    capture.start,
                    retokenization_stack,
                    tokens,
                    false,
                    None,
                );
                continue;
            }

            if let Some(name) = rule.name(self.line, captures) {
                let base = match local_stack.last() {
                    Some((scopes, _)) => scopes,
                    None => stack.content_name_scopes_list(),
                };
                let scopes = base.push_attributed(Some(name.as_ref()), self.grammar);
                local_stack.push((scopes, capture.end));
            }
        }

        while let Some((scopes, end_pos)) = local_stack.pop() {
            tokens.produce_from_scopes(&scopes, end_pos);
        }
    }

    /// Tokenizes from `line_pos` to the end of the line, returning the stack at the end.
    ///
    /// A grammar that matches without advancing would loop forever, this is detected in
    /// four places and ends the line early:
    /// - an end pattern popping the rule pushed at the same position without consuming
    ///   anything: the rule stays pushed
    /// - a begin/end or begin/while rule pushed on top of an identical one at the same
    ///   position without consuming anything: it is popped again
    /// - a match rule not consuming anything: the stack is popped once more
    /// - the stack element to pop being the root
    pub fn tokenize_string(
        &self,
        is_first_line: bool,
        line_pos: usize,
        stack: Arc<StateStack>,
        tokens: &mut LineTokens,
        check_while_conditions: bool,
        time_limit: Option<Duration>,
    ) -> TokenizeStringResult {
        let line_len = self.line.len();
        let mut stack = stack;
        let mut pos = line_pos;
        let mut is_first_line = is_first_line;
        let mut anchor_position = None;

        // 1. We check if the while pattern is still truthy
        if check_while_conditions {
            let while_res = self.check_while_conditions(stack, pos, is_first_line, tokens);
            stack = while_res.stack;
            pos = while_res.line_pos;
            is_first_line = while_res.is_first_line;
            anchor_position = while_res.anchor_position;
        }

        // 2. We check for any matching patterns
        let start = Instant::now();
        loop {
            if let Some(limit) = time_limit
                && start.elapsed() >= limit
            {
                #[cfg(feature = "debug")]
                log::debug!("[tokenize_string] time limit hit at {pos}");
                // the rest of the line keeps the scopes we stopped with
                tokens.produce(&stack, self.line.len());
                return TokenizeStringResult {
                    stack,
                    stopped_early: true,
                };
            }

            #[cfg(feature = "debug")]
            log::trace!("[tokenize_string] Scanning {pos}: |{:?}|", &self.line[pos..]);

            let Some(m) = self.match_rule_or_injections(&stack, pos, is_first_line, anchor_position)
            else {
                #[cfg(feature = "debug")]
                log::debug!("[tokenize_string] no more matches");
                // No more matches - emit final token and stop
                tokens.produce(&stack, line_len);
                break;
            };

            #[cfg(feature = "debug")]
            log::debug!(
                "[tokenize_string] Matched rule: {:?} from pos {} to {} => {:?}",
                m.rule_id,
                m.start(),
                m.end(),
                &self.line[m.start()..m.end()]
            );

            // Track whether this match has advanced the position
            let has_advanced = m.end() > pos;

            if m.rule_id == END_RULE_ID {
                // We matched the `end` for this rule, can only happen for BeginEnd rules
                let end_captures: &[Option<RuleId>] = match self.rule(stack.rule_id()) {
                    Some(Rule::BeginEnd(rule)) => &rule.end_captures,
                    _ => &[],
                };
                tokens.produce(&stack, m.start());
                stack = stack.with_content_name_scopes_list(Arc::clone(stack.name_scopes_list()));
                self.handle_captures(&stack, is_first_line, end_captures, &m.captures, tokens);
                tokens.produce(&stack, m.end());

                // Pop to parent state and update anchor position
                let popped = stack;
                match popped.pop() {
                    Some(parent) => {
                        stack = parent;
                        anchor_position = popped.anchor_pos();

                        // Grammar pushed & popped a rule without advancing - infinite loop
                        // protection. See https://github.com/Microsoft/vscode-textmate/issues/12
                        if !has_advanced && popped.enter_pos() == Some(pos) {
                            // Restore the popped frame to keep the rule active
                            #[cfg(feature = "debug")]
                            log::warn!("[tokenize_string] end rule didn't advance, stopping");
                            stack = popped;
                            tokens.produce(&stack, line_len);
                            break;
                        }
                    }
                    None => {
                        // the root is never popped
                        log::warn!("End pattern matched on the root rule, ignoring the pop");
                        stack = popped;
                        if !has_advanced {
                            tokens.produce(&stack, line_len);
                            break;
                        }
                    }
                }
            } else {
                let Some(rule) = self.rule(m.rule_id) else {
                    log::warn!("Matched unknown rule {:?}, stopping the line", m.rule_id);
                    tokens.produce(&stack, line_len);
                    break;
                };
                tokens.produce(&stack, m.start());
                let before_push = Arc::clone(&stack);
                let name = rule.name(self.line, &m.captures);
                let name_scopes_list = stack
                    .content_name_scopes_list()
                    .push_attributed(name.as_deref(), self.grammar);
                stack = stack.push(
                    m.rule_id,
                    Some(pos),
                    anchor_position,
                    m.end() == line_len,
                    None,
                    Arc::clone(&name_scopes_list),
                    Arc::clone(&name_scopes_list),
                );

                let begin = match rule {
                    Rule::BeginEnd(r) => Some((
                        &r.begin_captures,
                        r.end_has_back_references().then_some(&r.end),
                    )),
                    Rule::BeginWhile(r) => Some((
                        &r.begin_captures,
                        r.while_has_back_references().then_some(&r.while_),
                    )),
                    _ => None,
                };

                if let Some((begin_captures, back_referenced)) = begin {
                    #[cfg(feature = "debug")]
                    log::debug!(
                        "[tokenize_string] Pushing begin rule={:?}",
                        name.as_deref().unwrap_or("No name")
                    );
                    self.handle_captures(&stack, is_first_line, begin_captures, &m.captures, tokens);
                    tokens.produce(&stack, m.end());
                    anchor_position = Some(m.end());

                    let content_name = rule.content_name(self.line, &m.captures);
                    let content_name_scopes_list =
                        name_scopes_list.push_attributed(content_name.as_deref(), self.grammar);
                    stack = stack.with_content_name_scopes_list(content_name_scopes_list);

                    if let Some(source) = back_referenced {
                        stack = stack
                            .with_end_rule(source.resolve_back_references(self.line, &m.captures));
                    }

                    if !has_advanced && before_push.has_same_rule_as(&stack) {
                        #[cfg(feature = "debug")]
                        log::warn!("[tokenize_string] begin rule didn't advance, stopping");
                        stack = stack.safe_pop();
                        tokens.produce(&stack, line_len);
                        break;
                    }
                } else {
                    let match_captures: &[Option<RuleId>] = match rule {
                        Rule::Match(r) => &r.captures,
                        _ => &[],
                    };
                    #[cfg(feature = "debug")]
                    log::debug!(
                        "[tokenize_string] Matched '{}'",
                        name.as_deref().unwrap_or_default()
                    );
                    self.handle_captures(&stack, is_first_line, match_captures, &m.captures, tokens);
                    tokens.produce(&stack, m.end());
                    // pop rule immediately since it is a MatchRule
                    stack = stack.safe_pop();

                    // Protection: grammar is not advancing, nor is it pushing/popping
                    if !has_advanced {
                        #[cfg(feature = "debug")]
                        log::warn!("Match rule didn't advance, safe_pop and stop");
                        stack = stack.safe_pop();
                        tokens.produce(&stack, line_len);
                        break;
                    }
                }
            }

            if m.end() > pos {
                // advance
                pos = m.end();
                is_first_line = false;
            }
        }

        TokenizeStringResult {
            stack,
            stopped_early: false,
        }
    }
}
