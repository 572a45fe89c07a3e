//! Entry Types
//!
//! An entry is one stored item: its contents (placed as chunks in the
//! contents section) and its attributes (packed into a metadata record).

use crate::codec::{Checksum, Compression};
use crate::error::{PileError, Result};

/// Longest attribute name (length is stored in one byte)
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Longest attribute value (length is stored in two bytes)
pub const MAX_VALUE_LEN: usize = u16::MAX as usize;

/// Longest value of an indexed attribute (node keys carry a one-byte length)
pub const MAX_INDEXED_VALUE_LEN: usize = u8::MAX as usize;

// =============================================================================
// Placement
// =============================================================================

/// Where and how an entry's contents were written
///
/// Produced by the chunk store at commit and embedded in the metadata record.
/// Table offsets are absolute; zero means the table was not written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    pub compression: Compression,
    pub checksum: Checksum,
    pub chunk_size: u32,
    pub chunk_count: u32,
    pub original_length: u64,
    pub compressed_length: u64,
    /// Absolute offset of the first chunk
    pub contents_offset: u64,
    pub offset_table_offset: u64,
    pub checksum_table_offset: u64,
}

// =============================================================================
// Attributes
// =============================================================================

/// A named value on an entry, optionally indexed for equality lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    pub indexed: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>, indexed: bool) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            indexed,
        }
    }

    /// Check the length limits imposed by the on-disk encoding
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(PileError::InvalidAttributeName(
                "attribute name cannot be empty".to_string(),
            ));
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(PileError::InvalidAttributeName(format!(
                "attribute name is {} bytes, the limit is {}",
                self.name.len(),
                MAX_NAME_LEN
            )));
        }

        let limit = if self.indexed {
            MAX_INDEXED_VALUE_LEN
        } else {
            MAX_VALUE_LEN
        };
        if self.value.len() > limit {
            return Err(PileError::InvalidAttributeValue(format!(
                "value of '{}' is {} bytes, the limit is {}",
                self.name,
                self.value.len(),
                limit
            )));
        }
        Ok(())
    }
}

/// Ordered list of an entry's attributes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    attrs: Vec<Attribute>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute (builder style)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>, indexed: bool) -> Self {
        self.add(Attribute::new(name, value, indexed));
        self
    }

    pub fn add(&mut self, attr: Attribute) {
        self.attrs.push(attr);
    }

    /// First attribute with the given name
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.name == name)
    }

    /// Value of the first attribute with the given name
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(|a| a.value.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.attrs.iter()
    }

    /// Attributes that must be written to an index
    pub fn indexed(&self) -> impl Iterator<Item = &Attribute> {
        self.attrs.iter().filter(|a| a.indexed)
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        self.attrs.iter().try_for_each(Attribute::validate)
    }
}

impl FromIterator<Attribute> for Attributes {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        Self {
            attrs: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.attrs.iter()
    }
}

// =============================================================================
// Entry
// =============================================================================

/// A committed entry as read back from the metadata log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Offset of the metadata record, relative to the metadata section
    pub offset: u64,
    pub placement: Placement,
    pub attributes: Attributes,
}

impl Entry {
    /// Original (uncompressed) length of the contents
    pub fn len(&self) -> u64 {
        self.placement.original_length
    }

    pub fn is_empty(&self) -> bool {
        self.placement.original_length == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_limits() {
        assert!(Attribute::new("name", "v", true).validate().is_ok());

        assert!(matches!(
            Attribute::new("", "v", false).validate(),
            Err(PileError::InvalidAttributeName(_))
        ));
        assert!(matches!(
            Attribute::new("n".repeat(256), "v", false).validate(),
            Err(PileError::InvalidAttributeName(_))
        ));

        // indexed values are capped by the node key length byte
        let long = "v".repeat(300);
        assert!(Attribute::new("n", long.clone(), false).validate().is_ok());
        assert!(matches!(
            Attribute::new("n", long, true).validate(),
            Err(PileError::InvalidAttributeValue(_))
        ));
    }

    #[test]
    fn test_attributes_lookup() {
        let attrs = Attributes::new()
            .with("title", "hello", true)
            .with("mime", "text/plain", false);

        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.value("mime"), Some("text/plain"));
        assert_eq!(attrs.value("missing"), None);
        assert_eq!(attrs.indexed().count(), 1);
    }
}
