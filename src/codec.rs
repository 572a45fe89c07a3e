//! Chunk Codec
//!
//! Per-chunk compression and checksum hooks. The chunk store calls the codec
//! at two seams only: when a full chunk is flushed (checksum, then compress)
//! and when a chunk is read back (decompress, then verify).
//!
//! The ids below are persisted in every metadata record, so their numeric
//! values are part of the file format.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::{PileError, Result};

// =============================================================================
// Codec Ids
// =============================================================================

/// Compression applied to each chunk of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Compression {
    #[default]
    None = 0x00,
    Gzip = 0x01,
    Bzip2 = 0x02,
}

impl TryFrom<u8> for Compression {
    type Error = PileError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Compression::None),
            0x01 => Ok(Compression::Gzip),
            0x02 => Ok(Compression::Bzip2),
            other => Err(PileError::FileBroken(format!(
                "Unknown compression id 0x{:02X}",
                other
            ))),
        }
    }
}

/// Checksum recorded for each chunk of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Checksum {
    #[default]
    None = 0x00,
    Crc32 = 0x01,
    Md5 = 0x02,
    Sha1 = 0x03,
}

impl Checksum {
    /// Bytes one chunk checksum occupies in the checksum table
    pub fn size(self) -> usize {
        match self {
            Checksum::None => 0,
            Checksum::Crc32 => 4,
            Checksum::Md5 => 16,
            Checksum::Sha1 => 20,
        }
    }
}

impl TryFrom<u8> for Checksum {
    type Error = PileError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Checksum::None),
            0x01 => Ok(Checksum::Crc32),
            0x02 => Ok(Checksum::Md5),
            0x03 => Ok(Checksum::Sha1),
            other => Err(PileError::FileBroken(format!(
                "Unknown checksum id 0x{:02X}",
                other
            ))),
        }
    }
}

// =============================================================================
// Codec Trait
// =============================================================================

/// Byte transforms applied to chunks
///
/// Implementations must be deterministic: `decompress(compress(x)) == x` and
/// `checksum(x)` always yields `kind.size()` bytes.
pub trait ChunkCodec {
    /// Whether this codec can handle the given pair of ids
    fn supports(&self, compression: Compression, checksum: Checksum) -> bool;

    /// Compress one chunk
    fn compress(&self, compression: Compression, chunk: &[u8]) -> Result<Vec<u8>>;

    /// Restore one chunk; `original_len` is the expected decoded size
    fn decompress(
        &self,
        compression: Compression,
        chunk: &[u8],
        original_len: usize,
    ) -> Result<Vec<u8>>;

    /// Checksum of one original (uncompressed) chunk
    fn checksum(&self, kind: Checksum, chunk: &[u8]) -> Result<Vec<u8>>;
}

/// Built-in codec: zlib compression via flate2 and CRC32 via crc32fast
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCodec;

impl ChunkCodec for DefaultCodec {
    fn supports(&self, compression: Compression, checksum: Checksum) -> bool {
        matches!(compression, Compression::None | Compression::Gzip)
            && matches!(checksum, Checksum::None | Checksum::Crc32)
    }

    fn compress(&self, compression: Compression, chunk: &[u8]) -> Result<Vec<u8>> {
        match compression {
            Compression::None => Ok(chunk.to_vec()),
            Compression::Gzip => {
                let mut encoder = ZlibEncoder::new(
                    Vec::with_capacity(chunk.len() / 2),
                    flate2::Compression::default(),
                );
                encoder.write_all(chunk)?;
                Ok(encoder.finish()?)
            }
            other => Err(PileError::InvalidArgument(format!(
                "Compression {:?} is not supported by the default codec",
                other
            ))),
        }
    }

    fn decompress(
        &self,
        compression: Compression,
        chunk: &[u8],
        original_len: usize,
    ) -> Result<Vec<u8>> {
        match compression {
            Compression::None => Ok(chunk.to_vec()),
            Compression::Gzip => {
                let mut decoded = Vec::with_capacity(original_len);
                ZlibDecoder::new(chunk)
                    .read_to_end(&mut decoded)
                    .map_err(|e| PileError::FileBroken(format!("Corrupt zlib chunk: {}", e)))?;
                Ok(decoded)
            }
            other => Err(PileError::InvalidArgument(format!(
                "Compression {:?} is not supported by the default codec",
                other
            ))),
        }
    }

    fn checksum(&self, kind: Checksum, chunk: &[u8]) -> Result<Vec<u8>> {
        match kind {
            Checksum::None => Ok(Vec::new()),
            Checksum::Crc32 => Ok(crc32fast::hash(chunk).to_le_bytes().to_vec()),
            other => Err(PileError::InvalidArgument(format!(
                "Checksum {:?} is not supported by the default codec",
                other
            ))),
        }
    }
}
