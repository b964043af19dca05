//! Paging of node sequences.

use serde::{Deserialize, Serialize};

/// A window into a node sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PageOptions {
    pub start: usize,
    /// `None` means everything from `start`
    pub size: Option<usize>,
}

impl PageOptions {
    pub fn new(start: usize, size: Option<usize>) -> Self {
        Self { start, size }
    }

    pub fn from_start(start: usize) -> Self {
        Self { start, size: None }
    }

    /// A page that returns nothing
    pub fn empty() -> Self {
        Self {
            start: 0,
            size: Some(0),
        }
    }

    pub fn has_size(&self) -> bool {
        self.size.is_some()
    }

    pub fn is_empty_page(&self) -> bool {
        self.size == Some(0)
    }

    /// Number of nodes this page selects out of `total`
    pub fn paged_count(&self, total: usize) -> usize {
        if self.start >= total || self.is_empty_page() {
            return 0;
        }
        let from_start = total - self.start;
        match self.size {
            Some(size) if size < from_start => size,
            _ => from_start,
        }
    }
}
