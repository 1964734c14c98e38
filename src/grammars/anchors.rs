use std::fmt;

/// Disallowed anchors get their letter replaced by this, which is very unlikely to match
const DISABLED_ANCHOR: char = '\u{FFFF}';

/// Which of `\A` and `\G` are allowed to match for a given search.
/// We don't want to enable them everywhere, it's context dependent.
#[derive(Copy, Clone, PartialEq, Hash, Eq)]
pub enum AnchorActive {
    /// Only \A is active
    A,
    /// Only \G is active
    G,
    /// Both \A and \G are active
    AG,
    /// Neither \A nor \G are active
    None,
}

impl AnchorActive {
    /// `\A` only holds while we are on the first line and haven't advanced yet.
    /// `\G` holds when the search starts where the current rule was anchored.
    pub fn new(allow_a: bool, allow_g: bool) -> Self {
        match (allow_a, allow_g) {
            (true, true) => AnchorActive::AG,
            (true, false) => AnchorActive::A,
            (false, true) => AnchorActive::G,
            (false, false) => AnchorActive::None,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            AnchorActive::None => 0,
            AnchorActive::G => 1,
            AnchorActive::A => 2,
            AnchorActive::AG => 3,
        }
    }
}

impl fmt::Debug for AnchorActive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnchorActive::A => "allow_A=true, allow_G=false",
            AnchorActive::G => "allow_A=false, allow_G=true",
            AnchorActive::AG => "allow_A=true, allow_G=true",
            AnchorActive::None => "allow_A=false, allow_G=false",
        };
        f.write_str(s)
    }
}

/// The 4 variants of a pattern, indexed by [`AnchorActive::index`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AnchorCache {
    variants: [String; 4],
}

impl AnchorCache {
    /// Escape-aware: `\\G` is an escaped backslash followed by a `G`, not an anchor.
    pub fn new(source: &str) -> Self {
        let mut variants: [String; 4] = Default::default();
        let mut chars = source.chars();

        while let Some(ch) = chars.next() {
            for v in variants.iter_mut() {
                v.push(ch);
            }
            if ch != '\\' {
                continue;
            }
            let Some(next) = chars.next() else {
                break;
            };
            for anchor in [
                AnchorActive::None,
                AnchorActive::G,
                AnchorActive::A,
                AnchorActive::AG,
            ] {
                let allowed = match (next, anchor) {
                    ('A', AnchorActive::A | AnchorActive::AG) => true,
                    ('A', _) => false,
                    ('G', AnchorActive::G | AnchorActive::AG) => true,
                    ('G', _) => false,
                    _ => true,
                };
                variants[anchor.index()].push(if allowed { next } else { DISABLED_ANCHOR });
            }
        }

        Self { variants }
    }

    pub fn resolve(&self, anchor: AnchorActive) -> &str {
        &self.variants[anchor.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_disallowed_anchors() {
        let cache = AnchorCache::new("\\Afoo\\Gbar");
        assert_eq!(cache.resolve(AnchorActive::AG), "\\Afoo\\Gbar");
        assert_eq!(cache.resolve(AnchorActive::A), "\\Afoo\\\u{FFFF}bar");
        assert_eq!(cache.resolve(AnchorActive::G), "\\\u{FFFF}foo\\Gbar");
        assert_eq!(cache.resolve(AnchorActive::None), "\\\u{FFFF}foo\\\u{FFFF}bar");
    }

    #[test]
    fn escaped_backslashes_are_not_anchors() {
        let cache = AnchorCache::new("\\\\G");
        assert_eq!(cache.resolve(AnchorActive::None), "\\\\G");
    }
}
