//! Index Table Block
//!
//! Directory of the indexes in one indexes section: for every indexed
//! attribute name, the kind of index and the offset of its root node.
//!
//! ```text
//! ┌─────────┬───────────┬────────────┬───────────────┐
//! │ Sig (4) │ Block (4) │ Actual (4) │ Reserved (20) │  = 32 bytes
//! ├─────────┴───────────┴────────────┴───────────────┤
//! │ [0xE1][Kind (1)][NameLen (1)][Name][Root (8)]    │
//! │ ... repeated ...                                 │
//! ├──────────────────────────────────────────────────┤
//! │ Zero padding to block length                     │
//! └──────────────────────────────────────────────────┘
//! ```

use bytes::{Buf, BufMut};

use super::{
    block_length, check_signature, offset_from_disk, INDEX_SIGNATURE, INDEX_TABLE_BLOCK_SIZE,
    INDEX_TABLE_SIGNATURE,
};
use crate::entry::MAX_NAME_LEN;
use crate::error::{PileError, Result};

/// Fixed part of an index table block
pub const INDEX_TABLE_HEADER_SIZE: usize = 32;

/// Kind of index behind a table record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IndexKind {
    BTree = 0x01,
}

/// One index table record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub kind: IndexKind,
    pub name: String,
    /// Root node offset, relative to the indexes section
    pub root: u64,
}

impl IndexRecord {
    /// Packed size of this record
    pub fn encoded_len(&self) -> usize {
        3 + self.name.len() + 8
    }
}

/// Decoded index table
///
/// `block_len` is the space reserved on disk; records may be appended in
/// place until `actual_len()` would exceed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTable {
    pub block_len: usize,
    pub records: Vec<IndexRecord>,
}

impl Default for IndexTable {
    fn default() -> Self {
        Self {
            block_len: INDEX_TABLE_BLOCK_SIZE,
            records: Vec::new(),
        }
    }
}

impl IndexTable {
    /// Bytes currently used (header plus records)
    pub fn actual_len(&self) -> usize {
        INDEX_TABLE_HEADER_SIZE
            + self
                .records
                .iter()
                .map(IndexRecord::encoded_len)
                .sum::<usize>()
    }

    /// Root of the index for `name`, if one exists
    pub fn root(&self, name: &str) -> Option<u64> {
        self.records.iter().find(|r| r.name == name).map(|r| r.root)
    }

    /// Point an existing index at a new root; false if `name` is unknown
    pub fn set_root(&mut self, name: &str, root: u64) -> bool {
        match self.records.iter_mut().find(|r| r.name == name) {
            Some(record) => {
                record.root = root;
                true
            }
            None => false,
        }
    }

    /// Add a record. Returns true if the table still fits its current block;
    /// false means `block_len` was grown and the table must be relocated.
    pub fn push(&mut self, record: IndexRecord) -> Result<bool> {
        if record.name.is_empty() || record.name.len() > MAX_NAME_LEN {
            return Err(PileError::InvalidAttributeName(format!(
                "index name must be 1..={} bytes, got {}",
                MAX_NAME_LEN,
                record.name.len()
            )));
        }

        self.records.push(record);
        let actual = self.actual_len();
        if actual <= self.block_len {
            return Ok(true);
        }

        self.block_len = block_length(INDEX_TABLE_BLOCK_SIZE, actual);
        Ok(false)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.block_len);
        buf.put_u32_le(INDEX_TABLE_SIGNATURE);
        buf.put_i32_le(self.block_len as i32);
        buf.put_i32_le(self.actual_len() as i32);
        buf.put_bytes(0, 20);
        for record in &self.records {
            buf.put_u8(INDEX_SIGNATURE);
            buf.put_u8(record.kind as u8);
            buf.put_u8(record.name.len() as u8);
            buf.put_slice(record.name.as_bytes());
            buf.put_i64_le(record.root as i64);
        }
        buf.resize(self.block_len, 0);
        buf
    }

    /// Read the block length out of the first base block
    pub fn peek_block_length(first_block: &[u8]) -> Result<usize> {
        check_signature(first_block, INDEX_TABLE_SIGNATURE, "index table")?;
        if first_block.len() < INDEX_TABLE_HEADER_SIZE {
            return Err(PileError::FileBroken("Index table truncated".to_string()));
        }

        let len = (&first_block[4..8]).get_i32_le();
        if len < INDEX_TABLE_BLOCK_SIZE as i32 || len as usize % INDEX_TABLE_BLOCK_SIZE != 0 {
            return Err(PileError::FileBroken(format!(
                "Invalid index table block length {}",
                len
            )));
        }
        Ok(len as usize)
    }

    pub fn decode(block: &[u8]) -> Result<Self> {
        let block_len = Self::peek_block_length(block)?;
        if block.len() < block_len {
            return Err(PileError::FileBroken(format!(
                "Index table truncated: {} of {} bytes",
                block.len(),
                block_len
            )));
        }

        let actual = (&block[8..12]).get_i32_le();
        if actual < INDEX_TABLE_HEADER_SIZE as i32 || actual as usize > block_len {
            return Err(PileError::FileBroken(format!(
                "Invalid index table actual length {}",
                actual
            )));
        }

        let mut blob = &block[INDEX_TABLE_HEADER_SIZE..actual as usize];
        let mut records = Vec::new();
        while blob.has_remaining() {
            if blob.remaining() < 3 {
                return Err(PileError::FileBroken("Index record truncated".to_string()));
            }
            let signature = blob.get_u8();
            if signature != INDEX_SIGNATURE {
                return Err(PileError::FileBroken(format!(
                    "Unexpected index signature 0x{:02X}, expecting 0x{:02X}",
                    signature, INDEX_SIGNATURE
                )));
            }
            let kind = blob.get_u8();
            if kind != IndexKind::BTree as u8 {
                return Err(PileError::FileBroken(format!(
                    "Unknown index kind 0x{:02X}",
                    kind
                )));
            }
            let name_len = blob.get_u8() as usize;
            if blob.remaining() < name_len + 8 {
                return Err(PileError::FileBroken("Index record truncated".to_string()));
            }
            let name = String::from_utf8(blob[..name_len].to_vec())
                .map_err(|e| PileError::FileBroken(format!("Index name is not UTF-8: {}", e)))?;
            blob.advance(name_len);
            let root = offset_from_disk(blob.get_i64_le(), "index root")?;

            records.push(IndexRecord {
                kind: IndexKind::BTree,
                name,
                root,
            });
        }

        Ok(Self { block_len, records })
    }
}
