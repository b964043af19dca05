//! Ordinal index paths.
//!
//! Every data source in a hierarchy level gets an index path. A data source
//! created on behalf of another one (e.g. a page of a large query) gets its
//! parent's path with one more segment appended, so comparing paths
//! lexicographically gives a total order over the whole level.
//!
//! Paths are persisted as fixed-width, zero-padded decimal segments joined by
//! [`SEGMENT_SEPARATOR`], which makes plain string comparison in SQL agree
//! with the ordering of the paths themselves.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Digits used for each persisted segment (enough for `u64::MAX`).
pub const SEGMENT_WIDTH: usize = 20;

/// Separator between persisted segments. Sorts below every digit.
pub const SEGMENT_SEPARATOR: char = '.';

/// A sequence of ordinals identifying a position in a hierarchy level
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexPath(Vec<u64>);

impl IndexPath {
    pub fn new(segments: Vec<u64>) -> Self {
        Self(segments)
    }

    /// The empty path of a root-level allocator
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn single(segment: u64) -> Self {
        Self(vec![segment])
    }

    pub fn segments(&self) -> &[u64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<u64> {
        self.0.last().copied()
    }

    /// This path with `segment` appended
    pub fn child(&self, segment: u64) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    /// This path followed by all segments of `other`
    pub fn concat(&self, other: &IndexPath) -> Self {
        let mut segments = self.0.clone();
        segments.extend_from_slice(&other.0);
        Self(segments)
    }

    pub fn starts_with(&self, prefix: &IndexPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// The remainder of this path after `prefix`, if `prefix` is a proper
    /// prefix of it.
    pub fn strip_prefix(&self, prefix: &IndexPath) -> Option<IndexPath> {
        if prefix.len() >= self.len() || !self.starts_with(prefix) {
            return None;
        }
        Some(Self(self.0[prefix.len()..].to_vec()))
    }

    /// Persisted form, ordered the same way as the path itself
    pub fn to_sortable_string(&self) -> String {
        let mut out = String::with_capacity(self.0.len() * (SEGMENT_WIDTH + 1));
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(SEGMENT_SEPARATOR);
            }
            out.push_str(&format!("{:0width$}", segment, width = SEGMENT_WIDTH));
        }
        out
    }

    /// Parse the persisted form produced by [`IndexPath::to_sortable_string`]
    pub fn parse_sortable(value: &str) -> Option<Self> {
        if value.is_empty() {
            return Some(Self::root());
        }
        value
            .split(SEGMENT_SEPARATOR)
            .map(|segment| segment.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }
}

impl From<Vec<u64>> for IndexPath {
    fn from(segments: Vec<u64>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for IndexPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", segment)?;
        }
        write!(f, "]")
    }
}
