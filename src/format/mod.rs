//! Block Format Module
//!
//! Byte-exact encoding of every structure a pile writes to disk. All
//! integers are little-endian.
//!
//! ## File Layout (one file per section)
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (512 bytes)                                      │
//! │   Sig "WPDP" | Version | Flags | Kind | Limit           │
//! │   Contents ofs (8) | Metadata ofs (8) | Indexes ofs (8) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Section (512 bytes)                                     │
//! │   Sig "SECT" | Kind | Length (8) | Table (8) | First (8)│
//! ├─────────────────────────────────────────────────────────┤
//! │ Section data                                            │
//! │   contents: chunks, offset tables, checksum tables      │
//! │   metadata: metadata blocks (n × 512)                   │
//! │   indexes:  index table (n × 512), nodes (4096 each)    │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod header;
pub mod index_table;
pub mod metadata;
pub mod node;
pub mod section;

pub use header::{FileKind, HeaderBlock};
pub use index_table::{IndexKind, IndexRecord, IndexTable};
pub use metadata::MetadataBlock;
pub use node::{Node, NodeElement};
pub use section::{SectionBlock, SectionKind};

use bytes::Buf;

use crate::error::{PileError, Result};

// =============================================================================
// Signatures
// =============================================================================

/// "WPDP"
pub const HEADER_SIGNATURE: u32 = 0x5044_5057;
/// "SECT"
pub const SECTION_SIGNATURE: u32 = 0x5443_4553;
/// "META"
pub const METADATA_SIGNATURE: u32 = 0x4154_454D;
/// "IDXT"
pub const INDEX_TABLE_SIGNATURE: u32 = 0x5458_4449;
/// "NODE"
pub const NODE_SIGNATURE: u32 = 0x4544_4F4E;

/// Leading byte of every packed attribute
pub const ATTRIBUTE_SIGNATURE: u8 = 0xD5;
/// Leading byte of every index table record
pub const INDEX_SIGNATURE: u8 = 0xE1;

// =============================================================================
// Block Sizes
// =============================================================================

pub const BASE_BLOCK_SIZE: usize = 512;

pub const HEADER_BLOCK_SIZE: usize = BASE_BLOCK_SIZE;
pub const SECTION_BLOCK_SIZE: usize = BASE_BLOCK_SIZE;
pub const METADATA_BLOCK_SIZE: usize = BASE_BLOCK_SIZE;
pub const INDEX_TABLE_BLOCK_SIZE: usize = BASE_BLOCK_SIZE;

/// Smallest node size that holds two maximum-size elements per half:
/// 2 × (2 + 8 + 1 + 255) + 32 = 564, rounded up to a power-of-two block.
pub const NODE_BLOCK_SIZE: usize = BASE_BLOCK_SIZE * 8;

/// Fixed header of a node block
pub const NODE_HEADER_SIZE: usize = 32;

/// Packed element area of a node
pub const NODE_DATA_SIZE: usize = NODE_BLOCK_SIZE - NODE_HEADER_SIZE;

// =============================================================================
// Format Constants
// =============================================================================

/// Current data pile format version
pub const THIS_VERSION: u16 = 0x0100;

/// Only limit this implementation supports: offsets fit a signed 32-bit int
pub const LIMIT_INT32: u8 = 0x01;

/// Largest pile (all sections together) under the INT32 limit: 2 GiB - 32 MiB
pub const FILESIZE_MAX: u64 = 2_113_929_216;

/// Round `actual_length` up to a whole number of blocks
pub fn block_length(block_size: usize, actual_length: usize) -> usize {
    actual_length.div_ceil(block_size) * block_size
}

/// Read a little-endian `u32` signature from the front of a block and compare
pub(crate) fn check_signature(buf: &[u8], expected: u32, what: &str) -> Result<()> {
    if buf.len() < 4 {
        return Err(PileError::FileBroken(format!(
            "{} block truncated to {} bytes",
            what,
            buf.len()
        )));
    }

    let found = (&buf[..4]).get_u32_le();
    if found != expected {
        return Err(PileError::FileBroken(format!(
            "Unexpected {} signature 0x{:08X}, expecting 0x{:08X}",
            what, found, expected
        )));
    }
    Ok(())
}

/// Stored offsets are signed on disk; negative values never occur in a
/// healthy file
pub(crate) fn offset_from_disk(raw: i64, what: &str) -> Result<u64> {
    u64::try_from(raw).map_err(|_| PileError::FileBroken(format!("Negative {} offset {}", what, raw)))
}
