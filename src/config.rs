//! Configuration for datapile
//!
//! Centralized configuration with sensible defaults.

use std::path::{Path, PathBuf};

use crate::codec::{Checksum, Compression};
use crate::error::{PileError, Result};

/// Main configuration for a data pile instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Base path of the pile. The three section files live next to it:
    ///   {path}.5dp     (contents)
    ///   {path}.5dpm    (metadata)
    ///   {path}.5dpi    (indexes)
    pub path: PathBuf,

    /// Whether the pile may be written
    pub mode: OpenMode,

    // -------------------------------------------------------------------------
    // Entry Defaults
    // -------------------------------------------------------------------------
    /// Compression applied to chunks of new entries
    pub compression: Compression,

    /// Checksum recorded for chunks of new entries
    pub checksum: Checksum,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Node cache size that triggers a trim
    pub node_cache_max: usize,

    /// Node cache size a trim shrinks down to
    pub node_cache_target: usize,
}

/// How a pile is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Lookups and reads only
    ReadOnly,

    /// Lookups, reads and appends
    ReadWrite,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./datapile"),
            mode: OpenMode::ReadWrite,
            compression: Compression::None,
            checksum: Checksum::None,
            node_cache_max: 1024,
            node_cache_target: 768,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Path of the contents file
    pub fn contents_path(&self) -> PathBuf {
        with_suffix(&self.path, ".5dp")
    }

    /// Path of the metadata file
    pub fn metadata_path(&self) -> PathBuf {
        with_suffix(&self.path, ".5dpm")
    }

    /// Path of the indexes file
    pub fn indexes_path(&self) -> PathBuf {
        with_suffix(&self.path, ".5dpi")
    }

    /// Check the values that the builder cannot enforce by type
    pub fn validate(&self) -> Result<()> {
        if self.node_cache_max == 0 {
            return Err(PileError::Config(
                "node_cache_max must be greater than zero".to_string(),
            ));
        }
        if self.node_cache_target > self.node_cache_max {
            return Err(PileError::Config(format!(
                "node_cache_target ({}) exceeds node_cache_max ({})",
                self.node_cache_target, self.node_cache_max
            )));
        }
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the base path of the pile
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the open mode
    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Set the compression used for new entries
    pub fn compression(mut self, compression: Compression) -> Self {
        self.config.compression = compression;
        self
    }

    /// Set the checksum used for new entries
    pub fn checksum(mut self, checksum: Checksum) -> Self {
        self.config.checksum = checksum;
        self
    }

    /// Set the node cache trim trigger
    pub fn node_cache_max(mut self, count: usize) -> Self {
        self.config.node_cache_max = count;
        self
    }

    /// Set the node cache trim target
    pub fn node_cache_target(mut self, count: usize) -> Self {
        self.config.node_cache_target = count;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
