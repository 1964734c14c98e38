//! Scope paths, eg `source.js meta.function.js string.quoted.double.js`.
//!
//! A path is a linked list from the innermost scope up to the root, sharing the
//! parent nodes between all the paths pushed from it.

use std::fmt;
use std::sync::Arc;

#[derive(PartialEq, Eq, Hash)]
pub struct ScopeStack {
    parent: Option<Arc<ScopeStack>>,
    scope_name: String,
}

impl ScopeStack {
    pub fn new(parent: Option<Arc<ScopeStack>>, scope_name: &str) -> Arc<Self> {
        Arc::new(Self {
            parent,
            scope_name: scope_name.to_owned(),
        })
    }

    /// Builds a path from its segments, root first. `None` if there are no segments.
    pub fn from_segments<S: AsRef<str>>(segments: &[S]) -> Option<Arc<Self>> {
        let mut result: Option<Arc<Self>> = None;
        for segment in segments {
            result = Some(Self::new(result, segment.as_ref()));
        }
        result
    }

    pub fn push(self: &Arc<Self>, scope_name: &str) -> Arc<Self> {
        Self::new(Some(Arc::clone(self)), scope_name)
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn parent(&self) -> Option<&ScopeStack> {
        self.parent.as_deref()
    }

    /// Iterates from the innermost scope up to the root
    pub fn iter(&self) -> impl Iterator<Item = &ScopeStack> {
        std::iter::successors(Some(self), |s| s.parent())
    }

    /// All the scope names, root first
    pub fn segments(&self) -> Vec<&str> {
        let mut segments: Vec<&str> = self.iter().map(|s| s.scope_name()).collect();
        segments.reverse();
        segments
    }
}

impl fmt::Display for ScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments().join(" "))
    }
}

impl fmt::Debug for ScopeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeStack({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_paths_from_segments() {
        let path = ScopeStack::from_segments(&["source.js", "meta.function.js", "string"]).unwrap();
        assert_eq!(path.scope_name(), "string");
        assert_eq!(path.segments(), vec!["source.js", "meta.function.js", "string"]);
        assert_eq!(path.to_string(), "source.js meta.function.js string");
        assert!(ScopeStack::from_segments::<&str>(&[]).is_none());
    }

    #[test]
    fn push_shares_parents() {
        let root = ScopeStack::new(None, "source.js");
        let a = root.push("a");
        let b = root.push("b");
        assert!(std::ptr::eq(a.parent().unwrap(), b.parent().unwrap()));
        assert_eq!(a.segments(), vec!["source.js", "a"]);
    }
}
