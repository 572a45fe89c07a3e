//! Section Module
//!
//! A pile is three sections, each in its own file. Every file starts with a
//! header naming its kind and pointing at the section block; all section
//! data follows the block.
//!
//! ```text
//!   <path>.5dp    <path>.5dpm    <path>.5dpi
//!  ┌──────────┐  ┌──────────┐   ┌──────────┐
//!  │ Header   │  │ Header   │   │ Header   │   @ 0
//!  ├──────────┤  ├──────────┤   ├──────────┤
//!  │ Section  │  │ Section  │   │ Section  │   @ 512 (section base)
//!  ├──────────┤  ├──────────┤   ├──────────┤
//!  │ chunks   │  │ metadata │   │ idx table│
//!  │ tables   │  │ blocks   │   │ nodes    │
//!  └──────────┘  └──────────┘   └──────────┘
//! ```
//!
//! `SectionCore` owns the stream and the two fixed blocks; the typed
//! sections wrap it and share the `SectionLifecycle` operations.

pub mod contents;
pub mod indexes;
pub mod metadata;

pub use contents::{chunk_size_for, ChunkWriter, ContentsSection};
pub use indexes::IndexesSection;
pub use metadata::MetadataSection;

use tracing::trace;

use crate::error::{PileError, Result};
use crate::format::{
    FileKind, HeaderBlock, SectionBlock, SectionKind, HEADER_BLOCK_SIZE, SECTION_BLOCK_SIZE,
};
use crate::stream::Stream;

/// Operations every section supports
pub trait SectionLifecycle {
    fn kind(&self) -> SectionKind;

    /// Logical length relative to the section base, section block included
    fn length(&self) -> u64;

    /// Persist the section block and flush the stream
    fn flush(&mut self) -> Result<()>;
}

/// Stream plus the header and section block of one section file
#[derive(Debug)]
pub struct SectionCore<S: Stream> {
    stream: S,
    header: HeaderBlock,
    block: SectionBlock,
    base: u64,
    writable: bool,
}

impl<S: Stream> SectionCore<S> {
    /// Write a fresh header and an empty section block
    pub fn create(mut stream: S, kind: SectionKind) -> Result<Self> {
        let base = HEADER_BLOCK_SIZE as u64;
        let mut header = HeaderBlock::new(FileKind::for_section(kind));
        header.set_section_offset(kind, base);
        let block = SectionBlock::new(kind);

        stream.seek_to(0)?;
        stream.write_exactly(&header.encode())?;
        stream.write_exactly(&block.encode())?;

        Ok(Self {
            stream,
            header,
            block,
            base,
            writable: true,
        })
    }

    /// Read and check the header and section block
    pub fn open(mut stream: S, kind: SectionKind, writable: bool) -> Result<Self> {
        // Step 1: header, version and limit
        let mut buf = vec![0u8; HEADER_BLOCK_SIZE];
        stream.seek_to(0)?;
        stream.read_exactly(&mut buf)?;
        let header = HeaderBlock::decode(&buf)?;
        header.check_compatible()?;

        // Step 2: this file must hold exactly the section we want
        let expected = FileKind::for_section(kind);
        if header.kind != expected {
            return Err(PileError::FileOpen(format!(
                "Expected a {:?} file, found {:?}",
                expected, header.kind
            )));
        }

        let base = header.section_offset(kind);
        if base == 0 {
            return Err(PileError::FileBroken(format!(
                "{:?} file has no {:?} section",
                header.kind, kind
            )));
        }

        // Step 3: section block
        let mut buf = vec![0u8; SECTION_BLOCK_SIZE];
        stream.seek_to(base)?;
        stream.read_exactly(&mut buf)?;
        let block = SectionBlock::decode(&buf)?;
        if block.kind != kind {
            return Err(PileError::FileBroken(format!(
                "Section at {} is {:?}, expecting {:?}",
                base, block.kind, kind
            )));
        }
        if block.length < SECTION_BLOCK_SIZE as u64 {
            return Err(PileError::FileBroken(format!(
                "Section length {} is shorter than its own block",
                block.length
            )));
        }

        Ok(Self {
            stream,
            header,
            block,
            base,
            writable,
        })
    }

    pub fn header(&self) -> &HeaderBlock {
        &self.header
    }

    pub fn block(&self) -> &SectionBlock {
        &self.block
    }

    pub fn block_mut(&mut self) -> &mut SectionBlock {
        &mut self.block
    }

    /// Absolute offset of the section block
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(PileError::BadFunctionCall(format!(
                "{:?} section is opened read-only",
                self.block.kind
            )))
        }
    }

    /// Read at an offset relative to the section base
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.read_absolute(self.base + offset, buf)
    }

    /// Write at an offset relative to the section base
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.write_absolute(self.base + offset, buf)
    }

    pub fn read_absolute(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        trace!(offset, len = buf.len(), "read");
        self.stream.seek_to(offset)?;
        self.stream.read_exactly(buf)
    }

    pub fn write_absolute(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        trace!(offset, len = buf.len(), "write");
        self.stream.seek_to(offset)?;
        self.stream.write_exactly(buf)
    }

    /// Rewrite the section block at the base
    pub fn write_block(&mut self) -> Result<()> {
        let encoded = self.block.encode();
        self.write_absolute(self.base, &encoded)
    }

    /// Write the section block (when writable) and flush the stream
    pub fn flush(&mut self) -> Result<()> {
        if self.writable {
            self.write_block()?;
            self.stream.flush_stream()?;
        }
        Ok(())
    }

    pub fn into_stream(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_create_then_open() {
        let core = SectionCore::create(Cursor::new(Vec::new()), SectionKind::Metadata).unwrap();
        let bytes = core.into_stream().into_inner();
        assert_eq!(bytes.len(), 1024);

        let core = SectionCore::open(Cursor::new(bytes), SectionKind::Metadata, false).unwrap();
        assert_eq!(core.base(), 512);
        assert_eq!(core.block().length, 512);
        assert_eq!(core.header().kind, FileKind::Metadata);
    }

    #[test]
    fn test_open_wrong_kind_is_file_open() {
        let core = SectionCore::create(Cursor::new(Vec::new()), SectionKind::Contents).unwrap();
        let bytes = core.into_stream().into_inner();

        let err = SectionCore::open(Cursor::new(bytes), SectionKind::Indexes, true).unwrap_err();
        assert!(matches!(err, PileError::FileOpen(_)));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let core = SectionCore::create(Cursor::new(Vec::new()), SectionKind::Contents).unwrap();
        let bytes = core.into_stream().into_inner();

        let mut core = SectionCore::open(Cursor::new(bytes), SectionKind::Contents, false).unwrap();
        assert!(matches!(
            core.write_at(512, b"x"),
            Err(PileError::BadFunctionCall(_))
        ));
        // flushing a read-only section is a no-op
        assert!(core.flush().is_ok());
    }
}
