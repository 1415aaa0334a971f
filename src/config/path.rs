//! Paths into a configuration tree and the patterns that match them.
//!
//! A [`ConfigPath`] addresses one node, rendered as `nodes.worker[w3].cpu`:
//! map keys are joined with `.`, positional list elements render as `[2]` and
//! identity-keyed list elements as `[w3]`.
//!
//! A [`PathPattern`] matches paths. Supported syntax:
//!
//! - `a.b` exact keys, `*` any single key
//! - `[*]` any list element, `[w1]` or `[2]` one element
//! - a trailing `**` matches zero or more further segments

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ClassifyError;

/// One step in a configuration path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    /// A map key.
    Key(String),
    /// A positional list element.
    Index(usize),
    /// An identity-keyed list element.
    Id(String),
}

/// Address of a node in a configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigPath {
    segments: Vec<PathSegment>,
}

impl ConfigPath {
    /// Returns the root path.
    #[must_use]
    pub const fn root() -> Self {
        Self { segments: Vec::new() }
    }

    /// Returns the path of a map entry below this one.
    #[must_use]
    pub fn key(&self, key: &str) -> Self {
        self.child(PathSegment::Key(key.to_string()))
    }

    /// Returns the path of a positional list element below this one.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        self.child(PathSegment::Index(index))
    }

    /// Returns the path of an identity-keyed list element below this one.
    #[must_use]
    pub fn id(&self, id: &str) -> Self {
        self.child(PathSegment::Id(id.to_string()))
    }

    fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// Returns the segments of this path.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Returns true for the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the top-level section this path belongs to.
    #[must_use]
    pub fn section(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSegment::Key(key)) => Some(key),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i == 0 => write!(f, "{key}")?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
                PathSegment::Id(id) => write!(f, "[{id}]")?,
            }
        }
        Ok(())
    }
}

impl Serialize for ConfigPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Key(String),
    AnyKey,
    Element(String),
    AnyElement,
    Rest,
}

impl PatternSegment {
    fn matches(&self, segment: &PathSegment) -> bool {
        match (self, segment) {
            (Self::Key(expected), PathSegment::Key(key)) => expected == key,
            (Self::AnyKey, PathSegment::Key(_))
            | (Self::AnyElement, PathSegment::Index(_) | PathSegment::Id(_)) => true,
            (Self::Element(expected), PathSegment::Index(index)) => *expected == index.to_string(),
            (Self::Element(expected), PathSegment::Id(id)) => expected == id,
            _ => false,
        }
    }
}

/// A wildcard pattern over configuration paths.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct PathPattern {
    source: String,
    segments: Vec<PatternSegment>,
}

impl PathPattern {
    /// Parses a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error on empty segments, unbalanced brackets, or a `**`
    /// that is not the last segment.
    pub fn parse(source: &str) -> Result<Self, ClassifyError> {
        let mut segments = Vec::new();

        for part in source.split('.') {
            let (name, mut rest) = part.find('[').map_or((part, ""), |i| part.split_at(i));

            match name {
                "" if rest.is_empty() => {
                    return Err(ClassifyError::pattern(source, "empty segment"));
                }
                "" => {}
                "**" => segments.push(PatternSegment::Rest),
                "*" => segments.push(PatternSegment::AnyKey),
                key => segments.push(PatternSegment::Key(key.to_string())),
            }

            while !rest.is_empty() {
                let end = match (rest.starts_with('['), rest.find(']')) {
                    (true, Some(end)) if end > 1 => end,
                    _ => return Err(ClassifyError::pattern(source, "malformed element selector")),
                };
                let inner = &rest[1..end];
                segments.push(if inner == "*" {
                    PatternSegment::AnyElement
                } else {
                    PatternSegment::Element(inner.to_string())
                });
                rest = &rest[end + 1..];
            }
        }

        let rest_count = segments.iter().filter(|s| **s == PatternSegment::Rest).count();
        if rest_count > 1 || (rest_count == 1 && segments.last() != Some(&PatternSegment::Rest)) {
            return Err(ClassifyError::pattern(source, "'**' is only allowed as the last segment"));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Returns true if the pattern matches the whole path.
    #[must_use]
    pub fn matches(&self, path: &ConfigPath) -> bool {
        matches_exact(&self.segments, path.segments())
    }

    /// Returns true if the path is matched by the pattern or is an ancestor of
    /// a path the pattern matches.
    #[must_use]
    pub fn covers(&self, path: &ConfigPath) -> bool {
        covers_prefix(&self.segments, path.segments())
    }

    /// Returns the pattern source.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn matches_exact(pattern: &[PatternSegment], path: &[PathSegment]) -> bool {
    match (pattern.split_first(), path.split_first()) {
        (None, None) | (Some((PatternSegment::Rest, _)), _) => true,
        (Some((expected, pattern)), Some((segment, path))) => {
            expected.matches(segment) && matches_exact(pattern, path)
        }
        _ => false,
    }
}

fn covers_prefix(pattern: &[PatternSegment], path: &[PathSegment]) -> bool {
    match (pattern.split_first(), path.split_first()) {
        (_, None) | (Some((PatternSegment::Rest, _)), _) => true,
        (Some((expected, pattern)), Some((segment, path))) => {
            expected.matches(segment) && covers_prefix(pattern, path)
        }
        (None, Some(_)) => false,
    }
}

impl TryFrom<String> for PathPattern {
    type Error = ClassifyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker_cpu(id: &str) -> ConfigPath {
        ConfigPath::root().key("nodes").key("worker").id(id).key("cpu")
    }

    #[test]
    fn test_path_display() {
        assert_eq!(worker_cpu("w3").to_string(), "nodes.worker[w3].cpu");
        assert_eq!(ConfigPath::root().key("dns").index(2).to_string(), "dns[2]");
        assert_eq!(ConfigPath::root().to_string(), "");
        assert_eq!(worker_cpu("w3").section(), Some("nodes"));
    }

    #[test]
    fn test_wildcard_element() {
        let pattern = PathPattern::parse("nodes.worker[*].cpu").expect("pattern");

        assert!(pattern.matches(&worker_cpu("w1")));
        assert!(pattern.matches(&ConfigPath::root().key("nodes").key("worker").index(2).key("cpu")));
        assert!(!pattern.matches(&ConfigPath::root().key("nodes").key("worker").id("w1")));
    }

    #[test]
    fn test_specific_element_and_any_key() {
        let pattern = PathPattern::parse("nodes.*[w1].cpu").expect("pattern");

        assert!(pattern.matches(&worker_cpu("w1")));
        assert!(!pattern.matches(&worker_cpu("w2")));
    }

    #[test]
    fn test_trailing_rest() {
        let pattern = PathPattern::parse("network.**").expect("pattern");

        assert!(pattern.matches(&ConfigPath::root().key("network")));
        assert!(pattern.matches(&ConfigPath::root().key("network").key("cidr")));
        assert!(!pattern.matches(&ConfigPath::root().key("nodes")));
    }

    #[test]
    fn test_covers_ancestors() {
        let pattern = PathPattern::parse("nodes.worker[*].cpu").expect("pattern");

        assert!(pattern.covers(&ConfigPath::root().key("nodes")));
        assert!(pattern.covers(&ConfigPath::root().key("nodes").key("worker").id("w9")));
        assert!(pattern.covers(&worker_cpu("w9")));
        assert!(!pattern.covers(&worker_cpu("w9").key("extra")));
        assert!(!pattern.covers(&ConfigPath::root().key("network")));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(PathPattern::parse("a..b").is_err());
        assert!(PathPattern::parse("a[").is_err());
        assert!(PathPattern::parse("a[]").is_err());
        assert!(PathPattern::parse("**.a").is_err());
    }
}
