//! Metadata Section
//!
//! An append-only log of metadata blocks, one per committed entry. A record
//! is addressed by its offset from the section base; the next record starts
//! right after the current one's block length.

use tracing::debug;

use super::{SectionCore, SectionLifecycle};
use crate::entry::{Attributes, Entry, Placement};
use crate::error::{PileError, Result};
use crate::format::{MetadataBlock, SectionKind, METADATA_BLOCK_SIZE};
use crate::stream::Stream;

pub struct MetadataSection<S: Stream> {
    core: SectionCore<S>,
}

impl<S: Stream> MetadataSection<S> {
    pub fn create(stream: S) -> Result<Self> {
        Ok(Self {
            core: SectionCore::create(stream, SectionKind::Metadata)?,
        })
    }

    pub fn open(stream: S, writable: bool) -> Result<Self> {
        Ok(Self {
            core: SectionCore::open(stream, SectionKind::Metadata, writable)?,
        })
    }

    /// Append a record and return its offset
    pub fn add(&mut self, placement: Placement, attributes: Attributes) -> Result<u64> {
        self.core.ensure_writable()?;

        let block = MetadataBlock::new(placement, attributes).encode()?;
        let offset = self.core.block().length;
        self.core.write_at(offset, &block)?;

        let section = self.core.block_mut();
        if section.first_offset == 0 {
            section.first_offset = offset;
        }
        section.length += block.len() as u64;
        self.core.write_block()?;

        debug!(offset, len = block.len(), "Metadata record added");
        Ok(offset)
    }

    /// Read the record at `offset`
    pub fn get(&mut self, offset: u64) -> Result<Entry> {
        let length = self.core.block().length;
        if offset < METADATA_BLOCK_SIZE as u64 || offset >= length {
            return Err(PileError::OutOfBounds(format!(
                "metadata offset {} outside records 512..{}",
                offset, length
            )));
        }

        let mut block = vec![0u8; METADATA_BLOCK_SIZE];
        self.core.read_at(offset, &mut block)?;
        let block_len = MetadataBlock::peek_block_length(&block)?;
        if offset + block_len as u64 > length {
            return Err(PileError::FileBroken(format!(
                "metadata record at {} runs past the section end",
                offset
            )));
        }
        if block_len > METADATA_BLOCK_SIZE {
            block.resize(block_len, 0);
            self.core
                .read_at(offset + METADATA_BLOCK_SIZE as u64, &mut block[METADATA_BLOCK_SIZE..])?;
        }

        let record = MetadataBlock::decode(&block)?;
        Ok(Entry {
            offset,
            placement: record.placement,
            attributes: record.attributes,
        })
    }

    /// Offset of the first record, if any
    pub fn first(&self) -> Option<u64> {
        match self.core.block().first_offset {
            0 => None,
            offset => Some(offset),
        }
    }

    /// Offset of the record after the one at `offset`, if any
    pub fn next(&mut self, offset: u64) -> Result<Option<u64>> {
        let mut block = vec![0u8; METADATA_BLOCK_SIZE];
        self.core.read_at(offset, &mut block)?;
        let next = offset + MetadataBlock::peek_block_length(&block)? as u64;
        Ok((next < self.core.block().length).then_some(next))
    }
}

impl<S: Stream> SectionLifecycle for MetadataSection<S> {
    fn kind(&self) -> SectionKind {
        SectionKind::Metadata
    }

    fn length(&self) -> u64 {
        self.core.block().length
    }

    fn flush(&mut self) -> Result<()> {
        self.core.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_records_chain() {
        let mut section = MetadataSection::create(Cursor::new(Vec::new())).unwrap();
        assert_eq!(section.first(), None);

        let a = section
            .add(Placement::default(), Attributes::new().with("n", "1", true))
            .unwrap();
        let b = section
            .add(
                Placement::default(),
                Attributes::new().with("big", "x".repeat(700), false),
            )
            .unwrap();
        let c = section.add(Placement::default(), Attributes::new()).unwrap();

        assert_eq!(a, 512);
        assert_eq!(b, 1024);
        assert_eq!(c, 2048);
        assert_eq!(section.first(), Some(512));
        assert_eq!(section.next(a).unwrap(), Some(b));
        assert_eq!(section.next(b).unwrap(), Some(c));
        assert_eq!(section.next(c).unwrap(), None);

        let entry = section.get(b).unwrap();
        assert_eq!(entry.offset, b);
        assert_eq!(entry.attributes.value("big").map(str::len), Some(700));
    }

    #[test]
    fn test_out_of_range_offset() {
        let mut section = MetadataSection::create(Cursor::new(Vec::new())).unwrap();
        section.add(Placement::default(), Attributes::new()).unwrap();

        assert!(matches!(section.get(0), Err(PileError::OutOfBounds(_))));
        assert!(matches!(section.get(1024), Err(PileError::OutOfBounds(_))));
    }
}
