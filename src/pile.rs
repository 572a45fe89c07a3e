//! Data Pile
//!
//! Ties the three sections together into one store of entries.
//!
//! ## Write Path
//! ```text
//! begin(length, attrs) ──► transfer(bytes)* ──► commit()
//!                                                  │
//!        ┌─────────────────────────────────────────┤
//!        ▼                                         ▼
//!   contents: last chunk + tables      metadata: append record
//!                                                  │
//!                                                  ▼
//!                          indexes: insert (value → record offset)
//!                                   for every indexed attribute
//! ```
//!
//! ## Read Path
//! `find(name, value)` resolves record offsets from the index, `entry()`
//! decodes the record and `read_contents()` pulls any byte window of the
//! entry back out of its chunks.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::codec::{ChunkCodec, DefaultCodec};
use crate::config::{Config, OpenMode};
use crate::entry::{Attributes, Entry, Placement};
use crate::error::{PileError, Result};
use crate::format::{block_length, BASE_BLOCK_SIZE, FILESIZE_MAX, HEADER_BLOCK_SIZE};
use crate::section::{
    ChunkWriter, ContentsSection, IndexesSection, MetadataSection, SectionLifecycle,
};
use crate::stream::Stream;

/// An entry between `begin` and `commit`
struct PendingEntry {
    writer: ChunkWriter,
    attributes: Attributes,
}

/// An open data pile
///
/// One writer at a time: the pile has no internal locking and must be owned
/// by a single handle while it is written.
pub struct DataPile<S: Stream = File> {
    config: Config,
    contents: ContentsSection<S>,
    metadata: MetadataSection<S>,
    indexes: IndexesSection<S>,
    codec: Box<dyn ChunkCodec>,
    pending: Option<PendingEntry>,
    writable: bool,
}

// =============================================================================
// File-backed Piles
// =============================================================================

impl DataPile<File> {
    /// Create the three files of a new pile next to `config.path`
    ///
    /// Fails if any of the files already exists.
    pub fn create(config: Config) -> Result<Self> {
        config.validate()?;
        if config.mode == OpenMode::ReadOnly {
            return Err(PileError::InvalidArgument(
                "cannot create a pile in read-only mode".to_string(),
            ));
        }

        let contents = create_file(&config.contents_path())?;
        let metadata = create_file(&config.metadata_path())?;
        let indexes = create_file(&config.indexes_path())?;

        info!(path = %config.path.display(), "Creating data pile");
        Self::create_streams(contents, metadata, indexes, config)
    }

    /// Open an existing pile
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let writable = config.mode == OpenMode::ReadWrite;

        let contents = open_file(&config.contents_path(), writable)?;
        let metadata = open_file(&config.metadata_path(), writable)?;
        let indexes = open_file(&config.indexes_path(), writable)?;

        info!(path = %config.path.display(), mode = ?config.mode, "Opening data pile");
        Self::open_streams(contents, metadata, indexes, config)
    }

    /// Create with default settings at `path`
    pub fn create_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::create(Config::builder().path(path).build()?)
    }

    /// Open read-write with default settings at `path`
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(Config::builder().path(path).build()?)
    }
}

fn create_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => {
                PileError::FileOpen(format!("{} already exists", path.display()))
            }
            _ => PileError::Io(e),
        })
}

fn open_file(path: &Path, writable: bool) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(writable)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => PileError::FileOpen(format!("{} not found", path.display())),
            _ => PileError::Io(e),
        })
}

// =============================================================================
// Stream-generic Operations
// =============================================================================

impl<S: Stream> DataPile<S> {
    /// Build a new pile on three empty streams
    pub fn create_streams(contents: S, metadata: S, indexes: S, config: Config) -> Result<Self> {
        config.validate()?;

        let contents = ContentsSection::create(contents)?;
        let metadata = MetadataSection::create(metadata)?;
        let indexes =
            IndexesSection::create(indexes, config.node_cache_max, config.node_cache_target)?;

        let mut pile = Self {
            config,
            contents,
            metadata,
            indexes,
            codec: Box::new(DefaultCodec),
            pending: None,
            writable: true,
        };
        pile.flush()?;
        Ok(pile)
    }

    /// Open a pile from its three streams
    pub fn open_streams(contents: S, metadata: S, indexes: S, config: Config) -> Result<Self> {
        config.validate()?;
        let writable = config.mode == OpenMode::ReadWrite;

        let contents = ContentsSection::open(contents, writable)?;
        let metadata = MetadataSection::open(metadata, writable)?;
        let indexes = IndexesSection::open(
            indexes,
            writable,
            config.node_cache_max,
            config.node_cache_target,
        )?;

        debug!(
            contents = contents.length(),
            metadata = metadata.length(),
            indexes = indexes.length(),
            "Sections loaded"
        );

        Ok(Self {
            config,
            contents,
            metadata,
            indexes,
            codec: Box::new(DefaultCodec),
            pending: None,
            writable,
        })
    }

    /// Replace the chunk codec used for new and existing entries
    pub fn with_codec(mut self, codec: impl ChunkCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn ensure_writable(&self, operation: &str) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(PileError::BadFunctionCall(format!(
                "{} on a read-only pile",
                operation
            )))
        }
    }

    // =========================================================================
    // Writing Entries
    // =========================================================================

    /// Start a new entry of exactly `length` bytes
    pub fn begin(&mut self, length: u64, attributes: Attributes) -> Result<()> {
        self.ensure_writable("begin")?;
        if self.pending.is_some() {
            return Err(PileError::BadFunctionCall(
                "an entry is already in progress".to_string(),
            ));
        }

        attributes.validate()?;
        let (compression, checksum) = (self.config.compression, self.config.checksum);
        if !self.codec.supports(compression, checksum) {
            return Err(PileError::InvalidArgument(format!(
                "codec does not support {:?} with {:?}",
                compression, checksum
            )));
        }

        let available = self.space_available();
        if length > available {
            return Err(PileError::ExceedLimit(format!(
                "entry of {} bytes exceeds the {} bytes available",
                length, available
            )));
        }

        let writer = self.contents.begin(length, compression, checksum)?;
        self.pending = Some(PendingEntry { writer, attributes });
        Ok(())
    }

    /// Feed bytes of the entry in progress
    pub fn transfer(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_writable("transfer")?;
        let pending = self
            .pending
            .as_mut()
            .ok_or_else(|| PileError::BadFunctionCall("transfer without begin".to_string()))?;

        self.contents
            .transfer(&mut pending.writer, self.codec.as_ref(), data)
    }

    /// Finish the entry in progress: contents, then metadata, then indexes
    pub fn commit(&mut self) -> Result<Entry> {
        self.ensure_writable("commit")?;
        let PendingEntry { writer, attributes } = self
            .pending
            .take()
            .ok_or_else(|| PileError::BadFunctionCall("commit without begin".to_string()))?;

        let placement = self.contents.commit(writer, self.codec.as_ref())?;
        let offset = self.metadata.add(placement.clone(), attributes.clone())?;
        for attr in attributes.indexed() {
            self.indexes.index(&attr.name, attr.value.as_bytes(), offset)?;
        }
        self.flush()?;

        debug!(
            offset,
            length = placement.original_length,
            attributes = attributes.len(),
            "Entry committed"
        );
        Ok(Entry {
            offset,
            placement,
            attributes,
        })
    }

    /// Drop the entry in progress; bytes already written become dead space
    pub fn abort(&mut self) -> Result<()> {
        match self.pending.take() {
            Some(pending) => {
                warn!(
                    transferred = pending.writer.transferred(),
                    "Entry aborted"
                );
                Ok(())
            }
            None => Err(PileError::BadFunctionCall("abort without begin".to_string())),
        }
    }

    /// Add a whole entry in one call
    pub fn add(&mut self, contents: &[u8], attributes: Attributes) -> Result<Entry> {
        self.begin(contents.len() as u64, attributes)?;
        if let Err(e) = self.transfer(contents) {
            self.pending = None;
            return Err(e);
        }
        self.commit()
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Metadata offsets of entries whose `name` equals `value`, in the order
    /// they were added
    pub fn find(&mut self, name: &str, value: &str) -> Result<Vec<u64>> {
        self.indexes.find(name, value.as_bytes())
    }

    /// Entries whose `name` equals `value`
    pub fn query(&mut self, name: &str, value: &str) -> Result<Vec<Entry>> {
        let offsets = self.find(name, value)?;
        offsets
            .into_iter()
            .map(|offset| self.metadata.get(offset))
            .collect()
    }

    /// Entry whose metadata record sits at `offset`
    pub fn entry(&mut self, offset: u64) -> Result<Entry> {
        self.metadata.get(offset)
    }

    /// Every committed entry in commit order
    pub fn entries(&mut self) -> Entries<'_, S> {
        let next = self.metadata.first();
        Entries { pile: self, next }
    }

    /// Names of the indexed attributes
    pub fn indexed_attributes(&self) -> Vec<&str> {
        self.indexes
            .table()
            .records
            .iter()
            .map(|r| r.name.as_str())
            .collect()
    }

    // =========================================================================
    // Reading Contents
    // =========================================================================

    /// `length` bytes of an entry's contents starting at `offset`, clamped to
    /// the entry end
    pub fn read_contents(&mut self, entry: &Entry, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.contents
            .get_contents(&entry.placement, self.codec.as_ref(), offset, length)
    }

    /// Seekable reader over an entry's contents
    pub fn contents_reader(&mut self, entry: &Entry) -> ContentsReader<'_, S> {
        ContentsReader {
            pile: self,
            placement: entry.placement.clone(),
            position: 0,
        }
    }

    // =========================================================================
    // Space and Lifecycle
    // =========================================================================

    /// Bytes taken by all three files
    pub fn space_used(&self) -> u64 {
        let round = |len: u64| block_length(BASE_BLOCK_SIZE, len as usize) as u64;
        3 * HEADER_BLOCK_SIZE as u64
            + round(self.contents.length())
            + round(self.metadata.length())
            + round(self.indexes.length())
    }

    /// Bytes left under the pile size limit
    pub fn space_available(&self) -> u64 {
        FILESIZE_MAX.saturating_sub(self.space_used())
    }

    /// Write all section blocks and flush the streams
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_writable("flush")?;
        self.contents.flush()?;
        self.metadata.flush()?;
        self.indexes.flush()
    }

    /// Flush (when writable) and release the pile
    pub fn close(mut self) -> Result<()> {
        if self.pending.take().is_some() {
            warn!("Closing with an uncommitted entry, it is discarded");
        }
        if self.writable {
            self.flush()?;
        }
        info!(path = %self.config.path.display(), "Data pile closed");
        Ok(())
    }
}

// =============================================================================
// Entry Iterator
// =============================================================================

/// Iterator over committed entries, following the metadata log
pub struct Entries<'a, S: Stream> {
    pile: &'a mut DataPile<S>,
    next: Option<u64>,
}

impl<S: Stream> Iterator for Entries<'_, S> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next.take()?;
        let entry = match self.pile.metadata.get(offset) {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };
        match self.pile.metadata.next(offset) {
            Ok(next) => self.next = next,
            Err(e) => return Some(Err(e)),
        }
        Some(Ok(entry))
    }
}

// =============================================================================
// Contents Reader
// =============================================================================

/// `Read + Seek` view of one entry's contents
///
/// Seeking past the end is allowed; reads there return 0 bytes.
pub struct ContentsReader<'a, S: Stream> {
    pile: &'a mut DataPile<S>,
    placement: Placement,
    position: u64,
}

impl<S: Stream> ContentsReader<'_, S> {
    pub fn len(&self) -> u64 {
        self.placement.original_length
    }

    pub fn is_empty(&self) -> bool {
        self.placement.original_length == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<S: Stream> Read for ContentsReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let total = self.placement.original_length;
        if self.position >= total || buf.is_empty() {
            return Ok(0);
        }

        let want = (buf.len() as u64).min(total - self.position);
        let bytes = self
            .pile
            .contents
            .get_contents(
                &self.placement,
                self.pile.codec.as_ref(),
                self.position,
                want,
            )
            .map_err(|e| io::Error::new(ErrorKind::Other, e))?;

        buf[..bytes.len()].copy_from_slice(&bytes);
        self.position += bytes.len() as u64;
        Ok(bytes.len())
    }
}

impl<S: Stream> Seek for ContentsReader<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (base, delta) = match pos {
            SeekFrom::Start(offset) => {
                self.position = offset;
                return Ok(offset);
            }
            SeekFrom::Current(delta) => (self.position, delta),
            SeekFrom::End(delta) => (self.placement.original_length, delta),
        };

        let target = base.checked_add_signed(delta).ok_or_else(|| {
            io::Error::new(
                ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )
        })?;
        self.position = target;
        Ok(target)
    }
}
