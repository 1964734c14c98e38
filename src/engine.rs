//! The regex engine boundary and its Oniguruma implementation.
//!
//! All offsets are byte offsets in the searched `&str`.
use std::fmt;
use std::ops::Range;
use std::sync::{Mutex, PoisonError};

use onig::{Regex, RegexOptions, Region, SearchOptions, Syntax};

/// The result of a scanner search: which pattern matched and its capture groups.
/// Groups that did not participate in the match are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanMatch {
    pub index: usize,
    pub captures: Vec<Option<Range<usize>>>,
}

impl ScanMatch {
    /// Range of the whole match
    pub fn range(&self) -> Range<usize> {
        self.captures
            .first()
            .and_then(|c| c.clone())
            .unwrap_or(0..0)
    }
}

/// A list of patterns searched together.
pub trait Scanner: Send + Sync {
    /// Finds the pattern with the earliest match at or after `start`, the lowest pattern
    /// index winning ties.
    fn find_next_match(&self, text: &str, start: usize) -> Option<ScanMatch>;
}

/// Builds scanners. A pattern that fails to compile must never match rather than
/// failing the whole scanner.
pub trait RegexEngine: Send + Sync {
    fn create_scanner(&self, patterns: &[&str]) -> Box<dyn Scanner>;
}

/// The default engine, backed by Oniguruma which is the regex flavour TextMate grammars
/// are written for.
#[derive(Debug, Default, Clone, Copy)]
pub struct OnigEngine;

impl RegexEngine for OnigEngine {
    fn create_scanner(&self, patterns: &[&str]) -> Box<dyn Scanner> {
        Box::new(OnigScanner::new(patterns))
    }
}

struct ScannerPattern {
    regex: Option<Regex>,
    /// `\G` depends on where the search starts so those results can't be reused
    cacheable: bool,
}

/// Last search per pattern: where it started and what it found
type CachedSearch = Option<(usize, Option<Vec<Option<Range<usize>>>>)>;

#[derive(Default)]
struct SearchCache {
    text: String,
    searches: Vec<CachedSearch>,
}

struct OnigScanner {
    patterns: Vec<ScannerPattern>,
    cache: Mutex<SearchCache>,
}

impl OnigScanner {
    fn new(patterns: &[&str]) -> Self {
        let patterns: Vec<_> = patterns
            .iter()
            .map(|pattern| {
                let regex = match Regex::with_options(
                    pattern,
                    RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
                    Syntax::default(),
                ) {
                    Ok(re) => Some(re),
                    Err(err) => {
                        log::warn!("Pattern `{pattern}` failed to compile and will never match: {err}");
                        None
                    }
                };
                ScannerPattern {
                    regex,
                    cacheable: !pattern.contains("\\G"),
                }
            })
            .collect();

        let cache = SearchCache {
            text: String::new(),
            searches: vec![None; patterns.len()],
        };

        Self {
            patterns,
            cache: Mutex::new(cache),
        }
    }
}

fn search(regex: &Regex, text: &str, start: usize) -> Option<Vec<Option<Range<usize>>>> {
    let mut region = Region::new();
    regex.search_with_options(
        text,
        start,
        text.len(),
        SearchOptions::SEARCH_OPTION_NONE,
        Some(&mut region),
    )?;
    Some(
        (0..region.len())
            .map(|i| region.pos(i).map(|(s, e)| s..e))
            .collect(),
    )
}

impl Scanner for OnigScanner {
    fn find_next_match(&self, text: &str, start: usize) -> Option<ScanMatch> {
        if start > text.len() {
            return None;
        }

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.text != text {
            cache.text.clear();
            cache.text.push_str(text);
            cache.searches.iter_mut().for_each(|s| *s = None);
        }

        let mut best: Option<ScanMatch> = None;

        for (index, pattern) in self.patterns.iter().enumerate() {
            let Some(regex) = &pattern.regex else {
                continue;
            };

            // A cached search from an earlier offset is still valid as long as it found
            // nothing or its match doesn't start before `start`.
            let cached = match &cache.searches[index] {
                Some((searched_from, result)) if *searched_from <= start => match result {
                    None => Some(None),
                    Some(captures) => match captures.first() {
                        Some(Some(whole)) if whole.start >= start => Some(Some(captures.clone())),
                        _ => None,
                    },
                },
                _ => None,
            };

            let result = match cached {
                Some(result) => result,
                None => {
                    let result = search(regex, text, start);
                    if pattern.cacheable {
                        cache.searches[index] = Some((start, result.clone()));
                    }
                    result
                }
            };

            let Some(captures) = result else {
                continue;
            };
            let match_start = captures
                .first()
                .and_then(|c| c.as_ref())
                .map_or(start, |c| c.start);

            let is_better = match &best {
                Some(b) => match_start < b.range().start,
                None => true,
            };
            if is_better {
                best = Some(ScanMatch { index, captures });
                // nothing can start earlier and lower indices win ties
                if match_start == start {
                    break;
                }
            }
        }

        best
    }
}

impl fmt::Debug for OnigScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnigScanner")
            .field("patterns", &self.patterns.len())
            .finish()
    }
}
