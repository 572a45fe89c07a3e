//! Section Block
//!
//! ```text
//! ┌─────────┬────────┬───────┬────────────┬───────────┬───────────┐
//! │ Sig (4) │Kind (1)│Rsv (1)│ Length (8) │ Table (8) │ First (8) │
//! └─────────┴────────┴───────┴────────────┴───────────┴───────────┘
//! padded to 512 bytes
//! ```
//!
//! `length`, `table_offset` and `first_offset` are relative to the section
//! base (the absolute offset of this block).

use bytes::{Buf, BufMut};

use super::{check_signature, offset_from_disk, SECTION_BLOCK_SIZE, SECTION_SIGNATURE};
use crate::error::{PileError, Result};

/// The three section kinds; values are bit flags so they can be combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SectionKind {
    Contents = 0x01,
    Metadata = 0x02,
    Indexes = 0x04,
}

impl TryFrom<u8> for SectionKind {
    type Error = PileError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(SectionKind::Contents),
            0x02 => Ok(SectionKind::Metadata),
            0x04 => Ok(SectionKind::Indexes),
            other => Err(PileError::FileBroken(format!(
                "Unknown section kind 0x{:02X}",
                other
            ))),
        }
    }
}

/// Decoded section block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionBlock {
    pub kind: SectionKind,
    /// Logical length of the section, block included
    pub length: u64,
    /// Index table (indexes section), unused elsewhere
    pub table_offset: u64,
    /// First metadata record (metadata section), unused elsewhere
    pub first_offset: u64,
}

impl SectionBlock {
    /// A freshly created section holds only its own block
    pub fn new(kind: SectionKind) -> Self {
        Self {
            kind,
            length: SECTION_BLOCK_SIZE as u64,
            table_offset: 0,
            first_offset: 0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SECTION_BLOCK_SIZE);
        buf.put_u32_le(SECTION_SIGNATURE);
        buf.put_u8(self.kind as u8);
        buf.put_u8(0);
        buf.put_i64_le(self.length as i64);
        buf.put_i64_le(self.table_offset as i64);
        buf.put_i64_le(self.first_offset as i64);
        buf.resize(SECTION_BLOCK_SIZE, 0);
        buf
    }

    pub fn decode(block: &[u8]) -> Result<Self> {
        check_signature(block, SECTION_SIGNATURE, "section")?;
        if block.len() < SECTION_BLOCK_SIZE {
            return Err(PileError::FileBroken(format!(
                "Section block truncated to {} bytes",
                block.len()
            )));
        }

        let mut buf = &block[4..];
        let kind = SectionKind::try_from(buf.get_u8())?;
        buf.advance(1);
        let length = offset_from_disk(buf.get_i64_le(), "section length")?;
        let table_offset = offset_from_disk(buf.get_i64_le(), "table")?;
        let first_offset = offset_from_disk(buf.get_i64_le(), "first record")?;

        Ok(Self {
            kind,
            length,
            table_offset,
            first_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_layout() {
        let section = SectionBlock {
            kind: SectionKind::Metadata,
            length: 2048,
            table_offset: 0,
            first_offset: 512,
        };
        let block = section.encode();

        assert_eq!(block.len(), SECTION_BLOCK_SIZE);
        assert_eq!(&block[0..4], b"SECT");
        assert_eq!(block[4], 0x02);
        assert_eq!(&block[6..14], &2048i64.to_le_bytes());
        assert_eq!(&block[22..30], &512i64.to_le_bytes());

        assert_eq!(SectionBlock::decode(&block).unwrap(), section);
    }

    #[test]
    fn test_bad_signature_is_file_broken() {
        let mut block = SectionBlock::new(SectionKind::Contents).encode();
        block[0] = b'X';
        assert!(matches!(
            SectionBlock::decode(&block),
            Err(PileError::FileBroken(_))
        ));
    }
}
