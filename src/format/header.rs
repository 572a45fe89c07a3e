//! Header Block
//!
//! First 512 bytes of every pile file.
//!
//! ```text
//! ┌──────────┬─────────┬───────┬──────┬───────┬──────────┐
//! │ Sig (4)  │ Ver (2) │Flg (2)│Kind 1│Limit 1│ Rsv (2)  │
//! ├──────────┴─────────┴───────┴──────┴───────┴──────────┤
//! │ Contents ofs (8) │ Metadata ofs (8) │ Indexes ofs (8)│
//! ├──────────────────────────────────────────────────────┤
//! │ Padding to 512                                       │
//! └──────────────────────────────────────────────────────┘
//! ```

use bytes::{Buf, BufMut};

use super::{
    check_signature, offset_from_disk, SectionKind, HEADER_BLOCK_SIZE, HEADER_SIGNATURE,
    LIMIT_INT32, THIS_VERSION,
};
use crate::error::{PileError, Result};

/// Header flag: file must not be written
pub const HEADER_FLAG_READONLY: u16 = 0x0002;

/// What a pile file contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileKind {
    Undefined = 0x00,
    Contents = 0x01,
    Metadata = 0x02,
    Indexes = 0x03,
    /// Contents, metadata and indexes in one file
    Compound = 0x10,
    /// Metadata and indexes only
    Lookup = 0x20,
}

impl FileKind {
    /// File kind of a single-section file
    pub fn for_section(kind: SectionKind) -> Self {
        match kind {
            SectionKind::Contents => FileKind::Contents,
            SectionKind::Metadata => FileKind::Metadata,
            SectionKind::Indexes => FileKind::Indexes,
        }
    }
}

impl TryFrom<u8> for FileKind {
    type Error = PileError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(FileKind::Undefined),
            0x01 => Ok(FileKind::Contents),
            0x02 => Ok(FileKind::Metadata),
            0x03 => Ok(FileKind::Indexes),
            0x10 => Ok(FileKind::Compound),
            0x20 => Ok(FileKind::Lookup),
            other => Err(PileError::FileOpen(format!(
                "Unknown file kind 0x{:02X}",
                other
            ))),
        }
    }
}

/// Decoded header block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    pub version: u16,
    pub flags: u16,
    pub kind: FileKind,
    pub limit: u8,
    pub contents_offset: u64,
    pub metadata_offset: u64,
    pub indexes_offset: u64,
}

impl HeaderBlock {
    /// Fresh header of the current version with no sections
    pub fn new(kind: FileKind) -> Self {
        Self {
            version: THIS_VERSION,
            flags: 0,
            kind,
            limit: LIMIT_INT32,
            contents_offset: 0,
            metadata_offset: 0,
            indexes_offset: 0,
        }
    }

    /// Absolute offset of the given section (0 = absent)
    pub fn section_offset(&self, kind: SectionKind) -> u64 {
        match kind {
            SectionKind::Contents => self.contents_offset,
            SectionKind::Metadata => self.metadata_offset,
            SectionKind::Indexes => self.indexes_offset,
        }
    }

    pub fn set_section_offset(&mut self, kind: SectionKind, offset: u64) {
        match kind {
            SectionKind::Contents => self.contents_offset = offset,
            SectionKind::Metadata => self.metadata_offset = offset,
            SectionKind::Indexes => self.indexes_offset = offset,
        }
    }

    /// Reject versions and limits this build cannot address
    pub fn check_compatible(&self) -> Result<()> {
        if self.version != THIS_VERSION {
            return Err(PileError::NotCompatible(format!(
                "Data pile version 0x{:04X} is not supported by datapile {}",
                self.version,
                crate::VERSION
            )));
        }
        if self.limit != LIMIT_INT32 {
            return Err(PileError::NotCompatible(format!(
                "Addressing limit 0x{:02X} is not supported, only INT32 limited files",
                self.limit
            )));
        }
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_BLOCK_SIZE);
        buf.put_u32_le(HEADER_SIGNATURE);
        buf.put_u16_le(self.version);
        buf.put_u16_le(self.flags);
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.limit);
        buf.put_bytes(0, 2);
        buf.put_i64_le(self.contents_offset as i64);
        buf.put_i64_le(self.metadata_offset as i64);
        buf.put_i64_le(self.indexes_offset as i64);
        buf.resize(HEADER_BLOCK_SIZE, 0);
        buf
    }

    pub fn decode(block: &[u8]) -> Result<Self> {
        check_signature(block, HEADER_SIGNATURE, "header")?;
        if block.len() < HEADER_BLOCK_SIZE {
            return Err(PileError::FileBroken(format!(
                "Header block truncated to {} bytes",
                block.len()
            )));
        }

        let mut buf = &block[4..];
        let version = buf.get_u16_le();
        let flags = buf.get_u16_le();
        let kind = FileKind::try_from(buf.get_u8())?;
        let limit = buf.get_u8();
        buf.advance(2);
        let contents_offset = offset_from_disk(buf.get_i64_le(), "contents section")?;
        let metadata_offset = offset_from_disk(buf.get_i64_le(), "metadata section")?;
        let indexes_offset = offset_from_disk(buf.get_i64_le(), "indexes section")?;

        Ok(Self {
            version,
            flags,
            kind,
            limit,
            contents_offset,
            metadata_offset,
            indexes_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut header = HeaderBlock::new(FileKind::Indexes);
        header.set_section_offset(SectionKind::Indexes, 512);
        let block = header.encode();

        assert_eq!(block.len(), HEADER_BLOCK_SIZE);
        assert_eq!(&block[0..4], b"WPDP");
        assert_eq!(&block[4..6], &THIS_VERSION.to_le_bytes());
        assert_eq!(block[8], FileKind::Indexes as u8);
        assert_eq!(block[9], LIMIT_INT32);
        assert_eq!(&block[28..36], &512i64.to_le_bytes());

        assert_eq!(HeaderBlock::decode(&block).unwrap(), header);
    }

    #[test]
    fn test_incompatible_version_and_limit() {
        let mut header = HeaderBlock::new(FileKind::Contents);
        header.version = 0x0200;
        assert!(matches!(
            header.check_compatible(),
            Err(PileError::NotCompatible(_))
        ));

        let mut header = HeaderBlock::new(FileKind::Contents);
        header.limit = 0x03;
        assert!(matches!(
            header.check_compatible(),
            Err(PileError::NotCompatible(_))
        ));
    }
}
