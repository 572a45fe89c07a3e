//! Tree Operations
//!
//! Lookup, insertion and node splitting over a `NodeStore`.

use tracing::{debug, trace};

use super::search::{search_leftmost, search_rightmost, Slot};
use super::NodeStore;
use crate::error::{PileError, Result};
use crate::format::node::element_size;
use crate::format::{Node, NODE_DATA_SIZE};

/// Allocate an empty leaf to serve as the root of a new tree
pub fn create_tree<S: NodeStore + ?Sized>(store: &mut S) -> Result<u64> {
    let root = store.allocate()?;
    store.store(root, Node::new_leaf())?;
    Ok(root)
}

// =============================================================================
// Lookup
// =============================================================================

/// Values of every element whose key equals `key`, in insertion order
pub fn find<S: NodeStore + ?Sized>(store: &mut S, root: u64, key: &[u8]) -> Result<Vec<u64>> {
    let mut node = store.load(root)?;

    // Step 1: descend to the leaf where the run of `key` starts. An equal
    // separator means the run may begin in the child to its left.
    while !node.is_leaf {
        let child = match search_leftmost(&node, key, true) {
            None | Some(Slot::BeforeFirst) => node.extra,
            Some(Slot::At(0)) if node.key(0) == key => node.extra,
            Some(Slot::At(i)) if node.key(i) == key => node.value(i - 1),
            Some(Slot::At(i)) => node.value(i),
        };
        trace!(child, "find descends");
        node = store.load(child)?;
    }

    // Step 2: position on the first key not below `key`
    let mut start = match search_leftmost(&node, key, true) {
        Some(Slot::At(i)) if node.key(i) == key => i,
        Some(Slot::At(i)) => i + 1,
        None | Some(Slot::BeforeFirst) => 0,
    };

    // Step 3: collect the run, following the leaf chain
    let mut values = Vec::new();
    loop {
        for i in start..node.len() {
            if node.key(i) != key {
                return Ok(values);
            }
            values.push(node.value(i));
        }
        if node.extra == 0 {
            return Ok(values);
        }
        node = store.load(node.extra)?;
        start = 0;
    }
}

// =============================================================================
// Insertion
// =============================================================================

/// Insert `key → value` after any existing equal keys.
///
/// Returns the root offset, which differs from `root` when the old root
/// was split.
pub fn insert<S: NodeStore + ?Sized>(
    store: &mut S,
    root: u64,
    key: &[u8],
    value: u64,
) -> Result<u64> {
    let mut path = Vec::new();
    let mut offset = root;
    let mut node = store.load(root)?;

    while !node.is_leaf {
        let child = match search_rightmost(&node, key, true) {
            None | Some(Slot::BeforeFirst) => node.extra,
            Some(Slot::At(i)) => node.value(i),
        };
        path.push(offset);
        offset = child;
        node = store.load(child)?;
    }

    let position = match search_rightmost(&node, key, true) {
        None | Some(Slot::BeforeFirst) => 0,
        Some(Slot::At(i)) => i + 1,
    };
    node.insert(position, key, value)?;
    trace!(offset, position, "leaf insert");

    if !node.is_overflowed() {
        store.store(offset, node)?;
        return Ok(root);
    }
    split(store, path, offset, node, root)
}

/// Split an overflowed node and push separators upward until a parent fits
fn split<S: NodeStore + ?Sized>(
    store: &mut S,
    mut path: Vec<u64>,
    mut offset: u64,
    mut node: Node,
    root: u64,
) -> Result<u64> {
    loop {
        let first_key = node.key(0).to_vec();
        let (lower, uppers) = split_node(store, node)?;
        store.store(offset, lower)?;

        let mut separators = Vec::with_capacity(uppers.len());
        for (separator, sibling_offset, sibling) in uppers {
            store.store(sibling_offset, sibling)?;
            separators.push((separator, sibling_offset));
        }

        let Some(parent_offset) = path.pop() else {
            // the root itself split: grow the tree by one level
            let mut new_root = Node::new_internal(offset);
            for (separator, child) in &separators {
                new_root.push(separator, *child)?;
            }
            let new_root_offset = store.allocate()?;
            store.store(new_root_offset, new_root)?;
            debug!(old = root, new = new_root_offset, "Root split");
            return Ok(new_root_offset);
        };

        let mut parent = store.load(parent_offset)?;
        let position = child_position(&parent, offset, &first_key)?;
        for (i, (separator, child)) in separators.iter().enumerate() {
            parent.insert(position + i, separator, *child)?;
        }

        if !parent.is_overflowed() {
            store.store(parent_offset, parent)?;
            return Ok(root);
        }
        offset = parent_offset;
        node = parent;
    }
}

/// Split `node` until every piece fits. Returns the lower piece (which keeps
/// the node's offset) and, in order, each new piece with its separator.
fn split_node<S: NodeStore + ?Sized>(
    store: &mut S,
    node: Node,
) -> Result<(Node, Vec<(Vec<u8>, u64, Node)>)> {
    let mut pieces = vec![node];
    let mut links = Vec::new();

    while let Some(last) = pieces.last_mut().filter(|n| n.is_overflowed()) {
        let middle = split_point(last);
        let sibling_offset = store.allocate()?;

        let (separator, sibling) = if last.is_leaf {
            let mut sibling = last.split_off(middle);
            sibling.extra = last.extra;
            last.extra = sibling_offset;
            (sibling.key(0).to_vec(), sibling)
        } else {
            // the middle element moves up; its child becomes the sibling's extra
            let mut promoted = last.split_off(middle);
            let mut sibling = promoted.split_off(1);
            sibling.extra = promoted.value(0);
            (promoted.key(0).to_vec(), sibling)
        };

        debug!(
            leaf = sibling.is_leaf,
            middle,
            sibling = sibling_offset,
            "Node split"
        );
        links.push((separator, sibling_offset));
        pieces.push(sibling);
    }

    let mut pieces = pieces.into_iter();
    let lower = pieces
        .next()
        .ok_or_else(|| PileError::Internal("split produced no pieces".to_string()))?;
    let uppers = links
        .into_iter()
        .zip(pieces)
        .map(|((separator, offset), piece)| (separator, offset, piece))
        .collect();

    Ok((lower, uppers))
}

/// Index of the first element of the upper half
///
/// The first element at which the accumulated packed size passes half the
/// element area, moved back to the start of its run of equal keys unless that
/// run starts the node.
fn split_point(node: &Node) -> usize {
    let half = NODE_DATA_SIZE / 2;
    let mut used = 0;
    let mut middle = node.len() - 1;

    for i in 0..node.len() {
        used += element_size(node.key(i));
        if used > half {
            middle = i;
            break;
        }
    }
    let mut middle = middle.max(1);

    if node.key(middle) != node.key(0) {
        while node.key(middle - 1) == node.key(middle) {
            middle -= 1;
        }
    }
    middle
}

/// Position in `parent` right after the element pointing at `child`
fn child_position(parent: &Node, child: u64, child_first_key: &[u8]) -> Result<usize> {
    if parent.extra == child {
        return Ok(0);
    }

    // the separator usually equals the child's first key
    if let Some(Slot::At(i)) = search_leftmost(parent, child_first_key, true) {
        if parent.value(i) == child {
            return Ok(i + 1);
        }
    }

    (0..parent.len())
        .find(|&i| parent.value(i) == child)
        .map(|i| i + 1)
        .ok_or_else(|| {
            PileError::Internal(format!(
                "node {} is not a child of its parent on the descent path",
                child
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryStore {
        nodes: HashMap<u64, Node>,
        next: u64,
    }

    impl NodeStore for MemoryStore {
        fn load(&mut self, offset: u64) -> Result<Node> {
            self.nodes
                .get(&offset)
                .cloned()
                .ok_or_else(|| PileError::Internal(format!("no node at {}", offset)))
        }

        fn store(&mut self, offset: u64, node: Node) -> Result<()> {
            self.nodes.insert(offset, node);
            Ok(())
        }

        fn allocate(&mut self) -> Result<u64> {
            self.next += 4096;
            Ok(self.next)
        }
    }

    #[test]
    fn test_find_in_single_leaf() {
        let mut store = MemoryStore::default();
        let mut root = create_tree(&mut store).unwrap();
        for (i, key) in ["b", "a", "c", "a"].iter().enumerate() {
            root = insert(&mut store, root, key.as_bytes(), i as u64).unwrap();
        }

        assert_eq!(find(&mut store, root, b"a").unwrap(), vec![1, 3]);
        assert_eq!(find(&mut store, root, b"c").unwrap(), vec![2]);
        assert!(find(&mut store, root, b"z").unwrap().is_empty());
        assert!(find(&mut store, root, b"0").unwrap().is_empty());
    }

    #[test]
    fn test_split_point_keeps_runs_together() {
        let mut node = Node::new_leaf();
        // 200 elements of 16 bytes; half the area is reached at element 127
        for i in 0..200u64 {
            let key = format!("{:05}", if (120..140).contains(&i) { 120 } else { i });
            node.push(key.as_bytes(), i).unwrap();
        }
        assert_eq!(split_point(&node), 120);
    }

    #[test]
    fn test_split_point_divides_leading_run() {
        let mut node = Node::new_leaf();
        for i in 0..300u64 {
            node.push(b"same", i).unwrap();
        }
        let middle = split_point(&node);
        assert!(middle > 0 && middle < node.len());
    }

    #[test]
    fn test_root_split_grows_tree() {
        let mut store = MemoryStore::default();
        let first_root = create_tree(&mut store).unwrap();
        let mut root = first_root;
        for i in 0..400u64 {
            root = insert(&mut store, root, format!("key{:04}", i).as_bytes(), i).unwrap();
        }

        assert_ne!(root, first_root);
        let top = store.load(root).unwrap();
        assert!(!top.is_leaf);
        assert_eq!(top.extra, first_root);
        for i in (0..400u64).step_by(37) {
            assert_eq!(
                find(&mut store, root, format!("key{:04}", i).as_bytes()).unwrap(),
                vec![i]
            );
        }
    }
}
