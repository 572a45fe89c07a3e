//! B+-Tree Node Block
//!
//! ```text
//! ┌─────────┬────────┬───────┬───────────┬───────────┬──────────────┐
//! │ Sig (4) │Leaf (1)│Rsv (1)│ Count (2) │ Extra (8) │ Reserved (16)│  = 32 bytes
//! ├─────────┴────────┴───────┴───────────┴───────────┴──────────────┤
//! │ Element area (4064 bytes)                                       │
//! │   → [Dist (2)][Value (8)] [Dist (2)][Value (8)] ...             │
//! │                              ... [Len (1)][Key 1] [Len (1)][Key 0] ← │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Elements grow forward from the start of the area; key records grow
//! backward from its end. `Dist` is the distance from the end of the area to
//! the start of the element's key record.
//!
//! In memory a node keeps the two halves apart: a vector of fixed-size
//! elements and an arena of length-prefixed key records. `encode` packs them
//! into the block layout above.

use bytes::{Buf, BufMut};

use super::{
    check_signature, offset_from_disk, NODE_BLOCK_SIZE, NODE_DATA_SIZE, NODE_HEADER_SIZE,
    NODE_SIGNATURE,
};
use crate::error::{PileError, Result};

/// Bytes of one element in the forward area: distance (2) + value (8)
pub const ELEMENT_SIZE: usize = 2 + 8;

/// Longest key a node can store
pub const MAX_KEY_LEN: usize = u8::MAX as usize;

/// Serialized size of an element holding `key`: 2 + 8 + 1 + len
pub fn element_size(key: &[u8]) -> usize {
    ELEMENT_SIZE + 1 + key.len()
}

/// One element: where its key record sits in the arena, and its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeElement {
    key_at: usize,
    pub value: u64,
}

/// A decoded B+-tree node
///
/// For leaves `extra` is the next leaf (0 = last leaf) and values are
/// metadata record offsets. For internal nodes `extra` is the child holding
/// keys below the first key and each value is the child for keys from that
/// element's key up to the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub is_leaf: bool,
    pub extra: u64,
    elements: Vec<NodeElement>,
    keys: Vec<u8>,
}

impl Node {
    pub fn new_leaf() -> Self {
        Self {
            is_leaf: true,
            extra: 0,
            elements: Vec::new(),
            keys: Vec::new(),
        }
    }

    pub fn new_internal(extra: u64) -> Self {
        Self {
            is_leaf: false,
            extra,
            elements: Vec::new(),
            keys: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Key of element `index`
    pub fn key(&self, index: usize) -> &[u8] {
        let at = self.elements[index].key_at;
        let len = self.keys[at] as usize;
        &self.keys[at + 1..at + 1 + len]
    }

    /// Value of element `index`
    pub fn value(&self, index: usize) -> u64 {
        self.elements[index].value
    }

    /// Append an element at the end
    pub fn push(&mut self, key: &[u8], value: u64) -> Result<()> {
        self.insert(self.elements.len(), key, value)
    }

    /// Insert an element so that it becomes element `index`
    pub fn insert(&mut self, index: usize, key: &[u8], value: u64) -> Result<()> {
        if key.len() > MAX_KEY_LEN {
            return Err(PileError::InvalidAttributeValue(format!(
                "index key is {} bytes, the limit is {}",
                key.len(),
                MAX_KEY_LEN
            )));
        }
        if index > self.elements.len() {
            return Err(PileError::Internal(format!(
                "insert position {} beyond {} elements",
                index,
                self.elements.len()
            )));
        }

        let key_at = self.keys.len();
        self.keys.push(key.len() as u8);
        self.keys.extend_from_slice(key);
        self.elements.insert(index, NodeElement { key_at, value });
        Ok(())
    }

    /// Bytes the elements and keys occupy once packed
    pub fn packed_size(&self) -> usize {
        self.elements.len() * ELEMENT_SIZE + self.keys.len()
    }

    /// True when the packed form no longer fits the element area
    pub fn is_overflowed(&self) -> bool {
        self.packed_size() > NODE_DATA_SIZE
    }

    /// Keep elements `..at`, return a node of the same kind holding `at..`
    ///
    /// Both arenas are rebuilt so neither keeps the other's key bytes. The
    /// returned node's `extra` is zero; the caller wires the links.
    pub fn split_off(&mut self, at: usize) -> Node {
        let mut upper = Node {
            is_leaf: self.is_leaf,
            extra: 0,
            elements: Vec::with_capacity(self.elements.len() - at),
            keys: Vec::new(),
        };
        let mut lower = Node {
            is_leaf: self.is_leaf,
            extra: self.extra,
            elements: Vec::with_capacity(at),
            keys: Vec::new(),
        };

        for i in 0..self.elements.len() {
            let target = if i < at { &mut lower } else { &mut upper };
            let key = self.key(i);
            let key_at = target.keys.len();
            target.keys.push(key.len() as u8);
            target.keys.extend_from_slice(key);
            target.elements.push(NodeElement {
                key_at,
                value: self.elements[i].value,
            });
        }

        *self = lower;
        upper
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.is_overflowed() {
            return Err(PileError::Internal(format!(
                "node overflow: {} bytes packed into {}",
                self.packed_size(),
                NODE_DATA_SIZE
            )));
        }

        let mut buf = Vec::with_capacity(NODE_BLOCK_SIZE);
        buf.put_u32_le(NODE_SIGNATURE);
        buf.put_u8(self.is_leaf as u8);
        buf.put_u8(0);
        buf.put_u16_le(self.elements.len() as u16);
        buf.put_i64_le(self.extra as i64);
        buf.put_bytes(0, 16);
        buf.resize(NODE_BLOCK_SIZE, 0);

        let data = &mut buf[NODE_HEADER_SIZE..];
        let mut distance = 0usize;
        for i in 0..self.elements.len() {
            let key = self.key(i);
            distance += 1 + key.len();
            let at = NODE_DATA_SIZE - distance;
            data[at] = key.len() as u8;
            data[at + 1..at + 1 + key.len()].copy_from_slice(key);

            let mut slot = &mut data[i * ELEMENT_SIZE..(i + 1) * ELEMENT_SIZE];
            slot.put_u16_le(distance as u16);
            slot.put_u64_le(self.elements[i].value);
        }

        Ok(buf)
    }

    pub fn decode(block: &[u8]) -> Result<Self> {
        check_signature(block, NODE_SIGNATURE, "node")?;
        if block.len() < NODE_BLOCK_SIZE {
            return Err(PileError::FileBroken(format!(
                "Node block truncated to {} bytes",
                block.len()
            )));
        }

        let mut header = &block[4..NODE_HEADER_SIZE];
        let is_leaf = header.get_u8() != 0;
        header.advance(1);
        let count = header.get_u16_le() as usize;
        let extra = offset_from_disk(header.get_i64_le(), "node extra")?;

        let element_area = count * ELEMENT_SIZE;
        if element_area > NODE_DATA_SIZE {
            return Err(PileError::FileBroken(format!(
                "Node claims {} elements, more than fit",
                count
            )));
        }

        let data = &block[NODE_HEADER_SIZE..NODE_BLOCK_SIZE];
        let mut node = Node {
            is_leaf,
            extra,
            elements: Vec::with_capacity(count),
            keys: Vec::new(),
        };

        let mut slots = &data[..element_area];
        for _ in 0..count {
            let distance = slots.get_u16_le() as usize;
            let value = slots.get_u64_le();

            if distance == 0 || distance > NODE_DATA_SIZE - element_area {
                return Err(PileError::FileBroken(format!(
                    "Node key distance {} out of range",
                    distance
                )));
            }
            let at = NODE_DATA_SIZE - distance;
            let len = data[at] as usize;
            if at + 1 + len > NODE_DATA_SIZE {
                return Err(PileError::FileBroken(format!(
                    "Node key of {} bytes runs past the element area",
                    len
                )));
            }
            node.push(&data[at + 1..at + 1 + len], value)?;
        }

        Ok(node)
    }
}
