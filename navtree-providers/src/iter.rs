//! Iteration over provider trees.

use crate::error::Result;
use crate::provider::{Expansion, NodesProvider};
use navtree_types::NodeRef;
use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::sync::Arc;

/// Double-ended iterator over the nodes of a provider tree.
///
/// Providers are only expanded when the iterator reaches them, from either
/// end, so reading the first or last few nodes does not compute the rest.
/// The iterator stops for good after yielding an error.
#[derive(Debug)]
pub struct NodesIter {
    providers: VecDeque<Arc<NodesProvider>>,
    front: VecDeque<NodeRef>,
    back: VecDeque<NodeRef>,
    failed: bool,
}

impl NodesIter {
    pub fn new(provider: Arc<NodesProvider>) -> Self {
        Self {
            providers: VecDeque::from([provider]),
            front: VecDeque::new(),
            back: VecDeque::new(),
            failed: false,
        }
    }

    /// Advance past `count` nodes, skipping whole providers by their counts
    pub fn skip_nodes(&mut self, mut count: usize) -> Result<()> {
        while count > 0 {
            if !self.front.is_empty() {
                let taken = count.min(self.front.len());
                self.front.drain(..taken);
                count -= taken;
                continue;
            }
            let Some(provider) = self.providers.pop_front() else {
                let taken = count.min(self.back.len());
                self.back.drain(..taken);
                return Ok(());
            };
            let provided = self.guard(provider.count())?;
            if provided <= count {
                count -= provided;
                continue;
            }
            match self.guard(provider.expand(count))? {
                Expansion::Nodes(nodes) => {
                    self.front.extend(nodes);
                    count = 0;
                }
                Expansion::Providers(children) => {
                    for child in children.into_iter().rev() {
                        self.providers.push_front(child);
                    }
                }
            }
        }
        Ok(())
    }

    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.failed = true;
        }
        result
    }
}

impl Iterator for NodesIter {
    type Item = Result<NodeRef>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(node) = self.front.pop_front() {
                return Some(Ok(node));
            }
            let Some(provider) = self.providers.pop_front() else {
                return self.back.pop_front().map(Ok);
            };
            match self.guard(provider.expand(0)) {
                Ok(Expansion::Nodes(nodes)) => self.front.extend(nodes),
                Ok(Expansion::Providers(children)) => {
                    for child in children.into_iter().rev() {
                        self.providers.push_front(child);
                    }
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

impl DoubleEndedIterator for NodesIter {
    fn next_back(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(node) = self.back.pop_back() {
                return Some(Ok(node));
            }
            let Some(provider) = self.providers.pop_back() else {
                return self.front.pop_back().map(Ok);
            };
            match self.guard(provider.expand(0)) {
                Ok(Expansion::Nodes(nodes)) => {
                    for node in nodes.into_iter().rev() {
                        self.back.push_front(node);
                    }
                }
                Ok(Expansion::Providers(children)) => self.providers.extend(children),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

impl FusedIterator for NodesIter {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{labels, node, TestSetup};

    fn nested(setup: &TestSetup) -> Arc<NodesProvider> {
        let ctx = setup.root_context();
        Arc::new(NodesProvider::multi(
            Arc::clone(&ctx),
            vec![
                NodesProvider::from_nodes(Arc::clone(&ctx), vec![node("a"), node("b")]),
                NodesProvider::multi(
                    Arc::clone(&ctx),
                    vec![
                        NodesProvider::empty(Arc::clone(&ctx)),
                        NodesProvider::single(Arc::clone(&ctx), node("c")),
                    ],
                ),
                NodesProvider::single(Arc::clone(&ctx), node("d")),
            ],
        ))
    }

    #[test]
    fn test_forward_and_backward() {
        let setup = TestSetup::new();
        let provider = nested(&setup);
        let forward: Vec<_> = provider.iter().collect::<Result<_>>().unwrap();
        assert_eq!(labels(&forward), ["a", "b", "c", "d"]);
        let backward: Vec<_> = provider.iter().rev().collect::<Result<_>>().unwrap();
        assert_eq!(labels(&backward), ["d", "c", "b", "a"]);
    }

    #[test]
    fn test_both_ends_meet() {
        let setup = TestSetup::new();
        let mut iter = nested(&setup).iter();
        assert_eq!(iter.next().unwrap().unwrap().label, "a");
        assert_eq!(iter.next_back().unwrap().unwrap().label, "d");
        assert_eq!(iter.next_back().unwrap().unwrap().label, "c");
        assert_eq!(iter.next().unwrap().unwrap().label, "b");
        assert!(iter.next().is_none());
        assert!(iter.next_back().is_none());
    }

    #[test]
    fn test_skip_nodes() {
        let setup = TestSetup::new();
        let mut iter = nested(&setup).iter();
        iter.skip_nodes(2).unwrap();
        assert_eq!(iter.next().unwrap().unwrap().label, "c");
        iter.skip_nodes(10).unwrap();
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_stops_after_cancellation() {
        let setup = TestSetup::new();
        let provider = nested(&setup);
        let mut iter = provider.iter();
        provider.context().cancellation().cancel();
        assert!(iter.next().unwrap().unwrap_err().is_canceled());
        assert!(iter.next().is_none());
    }
}
