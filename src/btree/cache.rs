//! Node Cache
//!
//! Nodes touched by an index operation stay in memory keyed by their
//! section-relative offset, so a split that walks back up to the root keeps
//! working on the same copies it descended through. Modified nodes are marked
//! dirty and written out by the owner at the end of the operation.
//!
//! The cache is bounded: once it holds more than `max` nodes, `trim` evicts
//! least-recently-used nodes until `target` remain. Evicted dirty nodes are
//! handed back to the caller to persist. A miss is never an error; the owner
//! reads the node from the stream again.

use lru::LruCache;
use tracing::debug;

use crate::format::Node;

#[derive(Debug)]
struct CachedNode {
    node: Node,
    dirty: bool,
}

/// LRU cache of decoded nodes
#[derive(Debug)]
pub struct NodeCache {
    nodes: LruCache<u64, CachedNode>,
    max: usize,
    target: usize,
}

impl NodeCache {
    pub fn new(max: usize, target: usize) -> Self {
        Self {
            nodes: LruCache::unbounded(),
            max,
            target: target.min(max),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 0
    }

    /// Copy of a cached node, refreshing its recency
    pub fn get(&mut self, offset: u64) -> Option<Node> {
        self.nodes.get(&offset).map(|cached| cached.node.clone())
    }

    /// Cache a node just read from disk
    pub fn insert_clean(&mut self, offset: u64, node: Node) {
        // never downgrade a pending write
        if let Some(cached) = self.nodes.get_mut(&offset) {
            if cached.dirty {
                return;
            }
        }
        self.nodes.put(offset, CachedNode { node, dirty: false });
    }

    /// Store a modified node; it is written at the next `take_dirty`
    pub fn put(&mut self, offset: u64, node: Node) {
        self.nodes.put(offset, CachedNode { node, dirty: true });
    }

    /// Copies of every dirty node, marking them clean
    pub fn take_dirty(&mut self) -> Vec<(u64, Node)> {
        let mut dirty: Vec<(u64, Node)> = self
            .nodes
            .iter_mut()
            .filter(|(_, cached)| cached.dirty)
            .map(|(offset, cached)| {
                cached.dirty = false;
                (*offset, cached.node.clone())
            })
            .collect();
        dirty.sort_by_key(|(offset, _)| *offset);
        dirty
    }

    /// Evict down to the target once the trigger size is exceeded.
    /// Returns the dirty nodes that were evicted.
    pub fn trim(&mut self) -> Vec<(u64, Node)> {
        let mut evicted = Vec::new();
        if self.nodes.len() <= self.max {
            return evicted;
        }

        let before = self.nodes.len();
        while self.nodes.len() > self.target {
            match self.nodes.pop_lru() {
                Some((offset, cached)) if cached.dirty => evicted.push((offset, cached.node)),
                Some(_) => {}
                None => break,
            }
        }
        debug!(
            before,
            after = self.nodes.len(),
            dirty = evicted.len(),
            "Node cache trimmed"
        );
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(value: u64) -> Node {
        let mut node = Node::new_leaf();
        node.push(b"k", value).unwrap();
        node
    }

    #[test]
    fn test_dirty_tracking() {
        let mut cache = NodeCache::new(8, 4);
        cache.insert_clean(512, leaf(1));
        cache.put(4608, leaf(2));

        let dirty = cache.take_dirty();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].0, 4608);
        assert!(cache.take_dirty().is_empty());
        assert_eq!(cache.get(512).unwrap().value(0), 1);
    }

    #[test]
    fn test_clean_insert_keeps_pending_write() {
        let mut cache = NodeCache::new(8, 4);
        cache.put(512, leaf(2));
        cache.insert_clean(512, leaf(1));
        assert_eq!(cache.get(512).unwrap().value(0), 2);
        assert_eq!(cache.take_dirty().len(), 1);
    }

    #[test]
    fn test_trim_evicts_least_recent() {
        let mut cache = NodeCache::new(4, 2);
        for i in 0..4u64 {
            cache.insert_clean(i * 4096, leaf(i));
        }
        // nothing happens at the trigger size
        assert!(cache.trim().is_empty());
        assert_eq!(cache.len(), 4);

        cache.put(4 * 4096, leaf(4));
        cache.get(0);
        let evicted = cache.trim();

        assert!(evicted.is_empty());
        assert_eq!(cache.len(), 2);
        assert!(cache.get(0).is_some());
        assert!(cache.get(4 * 4096).is_some());
        assert!(cache.get(4096).is_none());
    }

    #[test]
    fn test_trim_returns_dirty_victims() {
        let mut cache = NodeCache::new(2, 1);
        cache.put(0, leaf(0));
        cache.put(4096, leaf(1));
        cache.put(8192, leaf(2));

        let evicted = cache.trim();
        assert_eq!(evicted.len(), 2);
        assert_eq!(evicted[0].0, 0);
        assert_eq!(cache.len(), 1);
    }
}
