//! Contents Section (Chunk Store)
//!
//! Entry bytes are cut into chunks of a fixed size chosen from the entry
//! length. Each chunk is checksummed and compressed on its own, then
//! appended to the section.
//!
//! ## Entry Layout
//! ```text
//! contents_offset
//! ▼
//! ┌─────────┬─────────┬─────┬─────────┬──────────────┬────────────────┐
//! │ Chunk 0 │ Chunk 1 │ ... │ Chunk n │ Offset table │ Checksum table │
//! └─────────┴─────────┴─────┴─────────┴──────────────┴────────────────┘
//!                                       (compressed)   (checksummed)
//! ```
//!
//! The offset table holds one u64 per chunk: its offset from
//! `contents_offset`. Without compression every chunk is exactly
//! `chunk_size` bytes (the last may be shorter) and no table is needed.
//! The checksum table holds one checksum of the original chunk bytes per
//! chunk.

use bytes::{Buf, BufMut};
use tracing::{debug, trace};

use super::{SectionCore, SectionLifecycle};
use crate::codec::{Checksum, ChunkCodec, Compression};
use crate::entry::Placement;
use crate::error::{PileError, Result};
use crate::format::SectionKind;
use crate::stream::Stream;

const MIB: u64 = 1024 * 1024;

/// Chunk size for an entry of `length` bytes
///
/// Up to 64 MiB: 16 KiB. Above 1024 MiB: 512 KiB. In between: the length
/// divided by 4096, rounded up to a power of two.
pub fn chunk_size_for(length: u64) -> u32 {
    if length <= 64 * MIB {
        16 * 1024
    } else if length > 1024 * MIB {
        512 * 1024
    } else {
        length.div_ceil(4096).next_power_of_two() as u32
    }
}

// =============================================================================
// Chunk Writer
// =============================================================================

/// State of one entry being written
///
/// Created by `ContentsSection::begin`, fed through `transfer` and consumed
/// by `commit`.
#[derive(Debug)]
pub struct ChunkWriter {
    placement: Placement,
    buffer: Vec<u8>,
    /// Chunk offsets relative to `placement.contents_offset`
    offsets: Vec<u64>,
    checksums: Vec<u8>,
    transferred: u64,
}

impl ChunkWriter {
    /// Placement as known so far
    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Bytes accepted by `transfer` so far
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Bytes still expected before `commit`
    pub fn remaining(&self) -> u64 {
        self.placement.original_length - self.transferred
    }
}

// =============================================================================
// Contents Section
// =============================================================================

pub struct ContentsSection<S: Stream> {
    core: SectionCore<S>,
}

impl<S: Stream> ContentsSection<S> {
    pub fn create(stream: S) -> Result<Self> {
        Ok(Self {
            core: SectionCore::create(stream, SectionKind::Contents)?,
        })
    }

    pub fn open(stream: S, writable: bool) -> Result<Self> {
        Ok(Self {
            core: SectionCore::open(stream, SectionKind::Contents, writable)?,
        })
    }

    pub fn core(&self) -> &SectionCore<S> {
        &self.core
    }

    /// Start an entry of `length` bytes at the end of the section
    pub fn begin(
        &self,
        length: u64,
        compression: Compression,
        checksum: Checksum,
    ) -> Result<ChunkWriter> {
        self.core.ensure_writable()?;

        let chunk_size = chunk_size_for(length);
        let placement = Placement {
            compression,
            checksum,
            chunk_size,
            chunk_count: 0,
            original_length: length,
            compressed_length: 0,
            contents_offset: self.core.base() + self.core.block().length,
            offset_table_offset: 0,
            checksum_table_offset: 0,
        };

        Ok(ChunkWriter {
            placement,
            buffer: Vec::with_capacity(chunk_size as usize),
            offsets: Vec::new(),
            checksums: Vec::new(),
            transferred: 0,
        })
    }

    /// Append bytes; every time the buffer reaches the chunk size it is
    /// written out as one chunk
    pub fn transfer<C: ChunkCodec + ?Sized>(
        &mut self,
        writer: &mut ChunkWriter,
        codec: &C,
        mut data: &[u8],
    ) -> Result<()> {
        if data.len() as u64 > writer.remaining() {
            return Err(PileError::InvalidArgument(format!(
                "transfer of {} bytes exceeds the {} bytes left of the entry",
                data.len(),
                writer.remaining()
            )));
        }

        let chunk_size = writer.placement.chunk_size as usize;
        while !data.is_empty() {
            let room = chunk_size - writer.buffer.len();
            let take = room.min(data.len());
            writer.buffer.extend_from_slice(&data[..take]);
            writer.transferred += take as u64;
            data = &data[take..];

            if writer.buffer.len() == chunk_size {
                self.write_buffer(writer, codec)?;
            }
        }
        Ok(())
    }

    /// Write the buffered bytes as one chunk
    fn write_buffer<C: ChunkCodec + ?Sized>(
        &mut self,
        writer: &mut ChunkWriter,
        codec: &C,
    ) -> Result<()> {
        let placement = &mut writer.placement;

        if placement.checksum != Checksum::None {
            let sum = codec.checksum(placement.checksum, &writer.buffer)?;
            writer.checksums.extend_from_slice(&sum);
        }

        let offset = placement.compressed_length;
        let position = placement.contents_offset + offset;
        let stored = if placement.compression == Compression::None {
            self.core.write_absolute(position, &writer.buffer)?;
            writer.buffer.len()
        } else {
            let packed = codec.compress(placement.compression, &writer.buffer)?;
            self.core.write_absolute(position, &packed)?;
            packed.len()
        };

        trace!(
            chunk = writer.offsets.len(),
            original = writer.buffer.len(),
            stored,
            "Chunk flushed"
        );
        writer.offsets.push(offset);
        placement.compressed_length += stored as u64;
        writer.buffer.clear();
        Ok(())
    }

    /// Flush the last chunk, write the tables and return the final placement
    pub fn commit<C: ChunkCodec + ?Sized>(
        &mut self,
        mut writer: ChunkWriter,
        codec: &C,
    ) -> Result<Placement> {
        if writer.transferred != writer.placement.original_length {
            return Err(PileError::InvalidArgument(format!(
                "entry declared {} bytes but {} were transferred",
                writer.placement.original_length, writer.transferred
            )));
        }

        if !writer.buffer.is_empty() {
            self.write_buffer(&mut writer, codec)?;
        }

        let mut placement = writer.placement;
        placement.chunk_count = writer.offsets.len() as u32;
        let mut end = placement.contents_offset + placement.compressed_length;

        if placement.compression != Compression::None {
            let mut table = Vec::with_capacity(writer.offsets.len() * 8);
            for offset in &writer.offsets {
                table.put_u64_le(*offset);
            }
            placement.offset_table_offset = end;
            self.core.write_absolute(end, &table)?;
            end += table.len() as u64;
        }

        if placement.checksum != Checksum::None {
            placement.checksum_table_offset = end;
            self.core.write_absolute(end, &writer.checksums)?;
            end += writer.checksums.len() as u64;
        }

        self.core.block_mut().length = end - self.core.base();
        self.core.write_block()?;

        debug!(
            length = placement.original_length,
            stored = placement.compressed_length,
            chunks = placement.chunk_count,
            chunk_size = placement.chunk_size,
            "Contents committed"
        );
        Ok(placement)
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Read `length` bytes of an entry starting at `offset`
    ///
    /// The window is clamped to the end of the entry.
    pub fn get_contents<C: ChunkCodec + ?Sized>(
        &mut self,
        placement: &Placement,
        codec: &C,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>> {
        let total = placement.original_length;
        if offset > total {
            return Err(PileError::Internal(format!(
                "read offset {} beyond entry length {}",
                offset, total
            )));
        }
        let length = length.min(total - offset);
        if length == 0 {
            return Ok(Vec::new());
        }

        let chunk_size = placement.chunk_size as u64;
        let chunk_count = placement.chunk_count as u64;
        if chunk_size == 0 || chunk_count == 0 || chunk_count * chunk_size < total {
            return Err(PileError::FileBroken(format!(
                "{} chunks of {} bytes cannot hold {} bytes",
                chunk_count, chunk_size, total
            )));
        }

        let table = self.chunk_table(placement)?;
        let checksums = self.checksum_table(placement)?;

        // Step 1: locate the first chunk and the bytes to skip inside it
        let mut index = offset / chunk_size;
        let mut skip = (offset % chunk_size) as usize;
        let mut out = Vec::with_capacity(length as usize);

        // Step 2: decode chunks in order until the window is filled
        while (out.len() as u64) < length {
            if index >= chunk_count {
                return Err(PileError::FileBroken(format!(
                    "chunk {} missing, entry has {}",
                    index, chunk_count
                )));
            }
            let original_len = chunk_size.min(total - index * chunk_size) as usize;
            let (chunk_offset, stored_len) = match &table {
                Some(table) => table[index as usize],
                None => (index * chunk_size, original_len as u64),
            };

            let mut raw = vec![0u8; stored_len as usize];
            self.core
                .read_absolute(placement.contents_offset + chunk_offset, &mut raw)?;
            let chunk = if placement.compression == Compression::None {
                raw
            } else {
                codec.decompress(placement.compression, &raw, original_len)?
            };
            if chunk.len() != original_len {
                return Err(PileError::FileBroken(format!(
                    "chunk {} decoded to {} bytes, expecting {}",
                    index,
                    chunk.len(),
                    original_len
                )));
            }

            if let Some(sums) = &checksums {
                let width = placement.checksum.size();
                let expected = &sums[index as usize * width..(index as usize + 1) * width];
                if codec.checksum(placement.checksum, &chunk)? != expected {
                    return Err(PileError::FileBroken(format!(
                        "checksum mismatch in chunk {}",
                        index
                    )));
                }
            }

            let take = (chunk.len() - skip).min((length - out.len() as u64) as usize);
            out.extend_from_slice(&chunk[skip..skip + take]);
            skip = 0;
            index += 1;
        }

        Ok(out)
    }

    /// (offset, stored size) of every chunk, from the offset table
    fn chunk_table(&mut self, placement: &Placement) -> Result<Option<Vec<(u64, u64)>>> {
        if placement.compression == Compression::None {
            return Ok(None);
        }
        if placement.offset_table_offset == 0 {
            return Err(PileError::FileBroken(
                "compressed entry has no offset table".to_string(),
            ));
        }

        let count = placement.chunk_count as usize;
        let mut raw = vec![0u8; count * 8];
        self.core
            .read_absolute(placement.offset_table_offset, &mut raw)?;

        let mut buf = &raw[..];
        let offsets: Vec<u64> = (0..count).map(|_| buf.get_u64_le()).collect();

        // sizes run backward from the total stored length
        let mut table = vec![(0u64, 0u64); count];
        let mut next = placement.compressed_length;
        for i in (0..count).rev() {
            let start = offsets[i];
            if start > next {
                return Err(PileError::FileBroken(format!(
                    "offset table entry {} out of order",
                    i
                )));
            }
            table[i] = (start, next - start);
            next = start;
        }
        Ok(Some(table))
    }

    fn checksum_table(&mut self, placement: &Placement) -> Result<Option<Vec<u8>>> {
        if placement.checksum == Checksum::None || placement.checksum_table_offset == 0 {
            return Ok(None);
        }

        let mut raw = vec![0u8; placement.chunk_count as usize * placement.checksum.size()];
        self.core
            .read_absolute(placement.checksum_table_offset, &mut raw)?;
        Ok(Some(raw))
    }
}

impl<S: Stream> SectionLifecycle for ContentsSection<S> {
    fn kind(&self) -> SectionKind {
        SectionKind::Contents
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
    use crate::codec::DefaultCodec;
    use std::io::Cursor;

    fn write_entry(
        section: &mut ContentsSection<Cursor<Vec<u8>>>,
        data: &[u8],
        compression: Compression,
        checksum: Checksum,
        step: usize,
    ) -> Placement {
        let mut writer = section
            .begin(data.len() as u64, compression, checksum)
            .unwrap();
        for piece in data.chunks(step) {
            section.transfer(&mut writer, &DefaultCodec, piece).unwrap();
        }
        section.commit(writer, &DefaultCodec).unwrap()
    }

    #[test]
    fn test_chunk_size_tiers() {
        assert_eq!(chunk_size_for(0), 16384);
        assert_eq!(chunk_size_for(64 * MIB), 16384);
        assert_eq!(chunk_size_for(64 * MIB + 1), 32768);
        assert_eq!(chunk_size_for(128 * MIB), 32768);
        assert_eq!(chunk_size_for(1024 * MIB), 262144);
        assert_eq!(chunk_size_for(1024 * MIB + 1), 524288);
        assert_eq!(chunk_size_for(1025 * MIB), 524288);
    }

    #[test]
    fn test_uncompressed_placement() {
        let mut section = ContentsSection::create(Cursor::new(Vec::new())).unwrap();
        let data = vec![7u8; 40_000];
        let placement = write_entry(&mut section, &data, Compression::None, Checksum::None, 999);

        assert_eq!(placement.contents_offset, 1024);
        assert_eq!(placement.chunk_count, 3);
        assert_eq!(placement.compressed_length, 40_000);
        assert_eq!(placement.offset_table_offset, 0);
        assert_eq!(section.length(), 512 + 40_000);
    }

    #[test]
    fn test_tables_follow_chunks() {
        let mut section = ContentsSection::create(Cursor::new(Vec::new())).unwrap();
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 7) as u8).collect();
        let placement = write_entry(&mut section, &data, Compression::Gzip, Checksum::Crc32, 4096);

        let tables_start = placement.contents_offset + placement.compressed_length;
        assert_eq!(placement.chunk_count, 4);
        assert_eq!(placement.offset_table_offset, tables_start);
        assert_eq!(placement.checksum_table_offset, tables_start + 4 * 8);
        assert_eq!(
            section.length(),
            tables_start + 4 * 8 + 4 * 4 - section.core().base()
        );
        assert_eq!(
            section
                .get_contents(&placement, &DefaultCodec, 0, data.len() as u64)
                .unwrap(),
            data
        );
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut section = ContentsSection::create(Cursor::new(Vec::new())).unwrap();
        let mut writer = section.begin(10, Compression::None, Checksum::None).unwrap();
        section.transfer(&mut writer, &DefaultCodec, b"short").unwrap();
        assert!(matches!(
            section.commit(writer, &DefaultCodec),
            Err(PileError::InvalidArgument(_))
        ));

        let mut writer = section.begin(3, Compression::None, Checksum::None).unwrap();
        assert!(matches!(
            section.transfer(&mut writer, &DefaultCodec, b"toolong"),
            Err(PileError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_read_past_end_is_internal() {
        let mut section = ContentsSection::create(Cursor::new(Vec::new())).unwrap();
        let placement = write_entry(&mut section, b"abc", Compression::None, Checksum::None, 3);
        assert!(matches!(
            section.get_contents(&placement, &DefaultCodec, 4, 1),
            Err(PileError::Internal(_))
        ));
        assert!(section
            .get_contents(&placement, &DefaultCodec, 3, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_offset_table_is_file_broken() {
        let mut section = ContentsSection::create(Cursor::new(Vec::new())).unwrap();
        let mut placement =
            write_entry(&mut section, b"abcdef", Compression::Gzip, Checksum::None, 6);
        placement.offset_table_offset = 0;
        assert!(matches!(
            section.get_contents(&placement, &DefaultCodec, 0, 6),
            Err(PileError::FileBroken(_))
        ));
    }
}
