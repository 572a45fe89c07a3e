//! # datapile
//!
//! An embedded, file-based store of entries with:
//! - Chunked contents with optional per-chunk compression and checksums
//! - An append-only metadata log of entry attributes
//! - On-disk B+-tree indexes for equality lookup on attributes
//! - A byte-exact, little-endian block format spread over three files
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        DataPile                             │
//! │        begin / transfer / commit / find / read              │
//! └─────────────┬───────────────────┬───────────────────┬───────┘
//!               │                   │                   │
//!               ▼                   ▼                   ▼
//!      ┌────────────────┐  ┌────────────────┐  ┌────────────────┐
//!      │   Contents     │  │   Metadata     │  │   Indexes      │
//!      │ (chunk store)  │  │  (record log)  │  │  (B+-trees)    │
//!      └───────┬────────┘  └───────┬────────┘  └───────┬────────┘
//!              │                   │                   │
//!              ▼                   ▼                   ▼
//!          <path>.5dp         <path>.5dpm         <path>.5dpi
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use datapile::{Attributes, DataPile};
//!
//! # fn main() -> datapile::Result<()> {
//! let mut pile = DataPile::create_path("/tmp/photos")?;
//! let attrs = Attributes::new().with("name", "cat.jpg", true);
//! pile.add(b"...jpeg bytes...", attrs)?;
//!
//! for entry in pile.query("name", "cat.jpg")? {
//!     let bytes = pile.read_contents(&entry, 0, entry.len())?;
//!     assert_eq!(bytes.len() as u64, entry.len());
//! }
//! pile.close()?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod stream;
pub mod codec;
pub mod format;
pub mod entry;
pub mod section;
pub mod btree;
pub mod pile;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{PileError, Result};
pub use config::{Config, ConfigBuilder, OpenMode};
pub use codec::{Checksum, ChunkCodec, Compression, DefaultCodec};
pub use entry::{Attribute, Attributes, Entry, Placement};
pub use pile::{ContentsReader, DataPile, Entries};
pub use stream::Stream;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of datapile
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Whether this build can serve a caller written against `major.minor`
///
/// Compatible when the major versions match and this build is at least as
/// new as the requested minor version.
pub fn library_compatible_with(major: u32, minor: u32) -> bool {
    let mut parts = VERSION.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let own_major = parts.next().unwrap_or(0);
    let own_minor = parts.next().unwrap_or(0);

    own_major == major && own_minor >= minor
}
