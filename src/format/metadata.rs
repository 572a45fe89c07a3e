//! Metadata Block
//!
//! One block per committed entry, rounded up to 512 bytes.
//!
//! ```text
//! ┌─────────┬───────────┬────────────┬─────────┬──────┬──────┐
//! │ Sig (4) │ Block (4) │ Actual (4) │ Flg (2) │ Cmp 1│ Chk 1│
//! ├─────────┴───────────┴────────────┴─────────┴──────┴──────┤
//! │ Original len (8) │ Compressed len (8)                    │
//! │ Chunk size (4) │ Chunk count (4)                         │
//! │ Contents ofs (8) │ Offset table (8) │ Checksum table (8) │
//! │ Reserved (32)                                 = 96 bytes │
//! ├──────────────────────────────────────────────────────────┤
//! │ Attributes:                                              │
//! │   [0xD5][Flags][NameLen (1)][Name][ValueLen (2)][Value]  │
//! │   ... repeated ...                                       │
//! ├──────────────────────────────────────────────────────────┤
//! │ Zero padding to block length                             │
//! └──────────────────────────────────────────────────────────┘
//! ```

use bytes::{Buf, BufMut};

use super::{
    block_length, check_signature, offset_from_disk, ATTRIBUTE_SIGNATURE, METADATA_BLOCK_SIZE,
    METADATA_SIGNATURE,
};
use crate::codec::{Checksum, Compression};
use crate::entry::{Attribute, Attributes, Placement};
use crate::error::{PileError, Result};

/// Fixed part of a metadata block
pub const METADATA_HEADER_SIZE: usize = 96;

/// Record flag: chunks of the entry are compressed
pub const METADATA_FLAG_COMPRESSED: u16 = 0x0010;

/// Attribute flag: attribute is indexed
pub const ATTRIBUTE_FLAG_INDEXED: u8 = 0x01;

/// Decoded metadata record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataBlock {
    pub flags: u16,
    pub placement: Placement,
    pub attributes: Attributes,
}

impl MetadataBlock {
    pub fn new(placement: Placement, attributes: Attributes) -> Self {
        let flags = if placement.compression != Compression::None {
            METADATA_FLAG_COMPRESSED
        } else {
            0
        };
        Self {
            flags,
            placement,
            attributes,
        }
    }

    /// Encode to a whole number of blocks
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut blob = Vec::new();
        for attr in &self.attributes {
            attr.validate()?;
            let flags = if attr.indexed {
                ATTRIBUTE_FLAG_INDEXED
            } else {
                0
            };
            blob.put_u8(ATTRIBUTE_SIGNATURE);
            blob.put_u8(flags);
            blob.put_u8(attr.name.len() as u8);
            blob.put_slice(attr.name.as_bytes());
            blob.put_u16_le(attr.value.len() as u16);
            blob.put_slice(attr.value.as_bytes());
        }

        let actual = METADATA_HEADER_SIZE + blob.len();
        let block = block_length(METADATA_BLOCK_SIZE, actual);
        let p = &self.placement;

        let mut buf = Vec::with_capacity(block);
        buf.put_u32_le(METADATA_SIGNATURE);
        buf.put_i32_le(block as i32);
        buf.put_i32_le(actual as i32);
        buf.put_u16_le(self.flags);
        buf.put_u8(p.compression as u8);
        buf.put_u8(p.checksum as u8);
        buf.put_i64_le(p.original_length as i64);
        buf.put_i64_le(p.compressed_length as i64);
        buf.put_i32_le(p.chunk_size as i32);
        buf.put_i32_le(p.chunk_count as i32);
        buf.put_i64_le(p.contents_offset as i64);
        buf.put_i64_le(p.offset_table_offset as i64);
        buf.put_i64_le(p.checksum_table_offset as i64);
        buf.put_bytes(0, 32);
        buf.put_slice(&blob);
        buf.resize(block, 0);

        Ok(buf)
    }

    /// Read the block length out of the first base block, so the caller knows
    /// how much more to fetch
    pub fn peek_block_length(first_block: &[u8]) -> Result<usize> {
        check_signature(first_block, METADATA_SIGNATURE, "metadata")?;
        if first_block.len() < METADATA_HEADER_SIZE {
            return Err(PileError::FileBroken("Metadata block truncated".to_string()));
        }

        let len = (&first_block[4..8]).get_i32_le();
        if len < METADATA_BLOCK_SIZE as i32 || len as usize % METADATA_BLOCK_SIZE != 0 {
            return Err(PileError::FileBroken(format!(
                "Invalid metadata block length {}",
                len
            )));
        }
        Ok(len as usize)
    }

    /// Decode a complete block (as many bytes as its block length says)
    pub fn decode(block: &[u8]) -> Result<Self> {
        let block_len = Self::peek_block_length(block)?;
        if block.len() < block_len {
            return Err(PileError::FileBroken(format!(
                "Metadata block truncated: {} of {} bytes",
                block.len(),
                block_len
            )));
        }

        let mut buf = &block[8..];
        let actual = buf.get_i32_le();
        if actual < METADATA_HEADER_SIZE as i32 || actual as usize > block_len {
            return Err(PileError::FileBroken(format!(
                "Invalid metadata actual length {}",
                actual
            )));
        }
        let flags = buf.get_u16_le();
        let compression = Compression::try_from(buf.get_u8())?;
        let checksum = Checksum::try_from(buf.get_u8())?;
        let original_length = offset_from_disk(buf.get_i64_le(), "original length")?;
        let compressed_length = offset_from_disk(buf.get_i64_le(), "compressed length")?;
        let chunk_size = buf.get_i32_le();
        let chunk_count = buf.get_i32_le();
        if chunk_size < 0 || chunk_count < 0 {
            return Err(PileError::FileBroken(format!(
                "Invalid chunk geometry {} x {}",
                chunk_count, chunk_size
            )));
        }
        let contents_offset = offset_from_disk(buf.get_i64_le(), "contents")?;
        let offset_table_offset = offset_from_disk(buf.get_i64_le(), "offset table")?;
        let checksum_table_offset = offset_from_disk(buf.get_i64_le(), "checksum table")?;

        let placement = Placement {
            compression,
            checksum,
            chunk_size: chunk_size as u32,
            chunk_count: chunk_count as u32,
            original_length,
            compressed_length,
            contents_offset,
            offset_table_offset,
            checksum_table_offset,
        };

        let blob = &block[METADATA_HEADER_SIZE..actual as usize];
        let attributes = decode_attributes(blob)?;

        Ok(Self {
            flags,
            placement,
            attributes,
        })
    }
}

fn decode_attributes(mut blob: &[u8]) -> Result<Attributes> {
    let broken = || PileError::FileBroken("Attribute list truncated".to_string());
    let mut attrs = Attributes::new();

    while blob.has_remaining() {
        if blob.remaining() < 3 {
            return Err(broken());
        }
        let signature = blob.get_u8();
        if signature != ATTRIBUTE_SIGNATURE {
            return Err(PileError::FileBroken(format!(
                "Unexpected attribute signature 0x{:02X}, expecting 0x{:02X}",
                signature, ATTRIBUTE_SIGNATURE
            )));
        }
        let flags = blob.get_u8();
        let name_len = blob.get_u8() as usize;
        if blob.remaining() < name_len + 2 {
            return Err(broken());
        }
        let name = utf8(&blob[..name_len])?;
        blob.advance(name_len);

        let value_len = blob.get_u16_le() as usize;
        if blob.remaining() < value_len {
            return Err(broken());
        }
        let value = utf8(&blob[..value_len])?;
        blob.advance(value_len);

        attrs.add(Attribute {
            name,
            value,
            indexed: flags & ATTRIBUTE_FLAG_INDEXED != 0,
        });
    }

    Ok(attrs)
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| PileError::FileBroken(format!("Attribute is not UTF-8: {}", e)))
}
