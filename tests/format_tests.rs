//! Tests for the on-disk layout
//!
//! These tests verify the exact bytes a pile writes: headers, section
//! blocks, the first metadata record, the index table and the first node.

use std::fs;

use datapile::{Attributes, Config, DataPile};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const TEST_DATA: &[u8] = b"this is the data for test";

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap())
}

fn i32_at(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn i64_at(bytes: &[u8], at: usize) -> i64 {
    i64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
}

/// Pile with one entry, returning the raw bytes of its three files
fn one_entry_files() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .path(temp_dir.path().join("pile"))
        .build()
        .unwrap();

    let mut pile = DataPile::create(config.clone()).unwrap();
    pile.add(
        TEST_DATA,
        Attributes::new().with("name_1", "value_1_1", true),
    )
    .unwrap();
    pile.close().unwrap();

    (
        fs::read(config.contents_path()).unwrap(),
        fs::read(config.metadata_path()).unwrap(),
        fs::read(config.indexes_path()).unwrap(),
    )
}

fn check_header(bytes: &[u8], kind: u8, section_field: usize) {
    assert_eq!(&bytes[0..4], b"WPDP");
    assert_eq!(u16_at(bytes, 4), 0x0100);
    assert_eq!(bytes[8], kind);
    assert_eq!(bytes[9], 1);
    for field in 0..3 {
        let expected = if field == section_field { 512 } else { 0 };
        assert_eq!(i64_at(bytes, 12 + field * 8), expected);
    }
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_contents_file_layout() {
    let (contents, _, _) = one_entry_files();
    check_header(&contents, 0x01, 0);

    assert_eq!(&contents[512..516], b"SECT");
    assert_eq!(contents[516], 0x01);
    assert_eq!(i64_at(&contents, 518), 512 + TEST_DATA.len() as i64);

    assert_eq!(&contents[1024..1024 + TEST_DATA.len()], TEST_DATA);
}

#[test]
fn test_metadata_file_layout() {
    let (_, metadata, _) = one_entry_files();
    check_header(&metadata, 0x02, 1);

    // section block: length covers one record, first record at 512
    assert_eq!(&metadata[512..516], b"SECT");
    assert_eq!(metadata[516], 0x02);
    assert_eq!(i64_at(&metadata, 518), 1024);
    assert_eq!(i64_at(&metadata, 534), 512);

    let record = &metadata[1024..1536];
    assert_eq!(&record[0..4], b"META");
    assert_eq!(i32_at(record, 4), 512);
    assert_eq!(i32_at(record, 8), 96 + 3 + 6 + 2 + 9);
    assert_eq!(record[14], 0x00);
    assert_eq!(record[15], 0x00);
    assert_eq!(i64_at(record, 16), TEST_DATA.len() as i64);
    assert_eq!(i64_at(record, 24), TEST_DATA.len() as i64);
    assert_eq!(i32_at(record, 32), 16 * 1024);
    assert_eq!(i32_at(record, 36), 1);
    assert_eq!(i64_at(record, 40), 1024);

    assert_eq!(record[96], 0xD5);
    assert_eq!(record[97], 0x01);
    assert_eq!(record[98], 6);
    assert_eq!(&record[99..105], b"name_1");
    assert_eq!(u16_at(record, 105), 9);
    assert_eq!(&record[107..116], b"value_1_1");
}

#[test]
fn test_indexes_file_layout() {
    let (_, _, indexes) = one_entry_files();
    check_header(&indexes, 0x03, 2);

    // section block: table right after it, then one node
    assert_eq!(&indexes[512..516], b"SECT");
    assert_eq!(indexes[516], 0x04);
    assert_eq!(i64_at(&indexes, 518), 1024 + 4096);
    assert_eq!(i64_at(&indexes, 526), 512);

    let table = &indexes[1024..1536];
    assert_eq!(&table[0..4], b"IDXT");
    assert_eq!(i32_at(table, 4), 512);
    assert_eq!(i32_at(table, 8), 32 + 3 + 6 + 8);
    assert_eq!(table[32], 0xE1);
    assert_eq!(table[33], 0x01);
    assert_eq!(table[34], 6);
    assert_eq!(&table[35..41], b"name_1");
    assert_eq!(i64_at(table, 41), 1024);

    let node = &indexes[1536..1536 + 4096];
    assert_eq!(&node[0..4], b"NODE");
    assert_eq!(node[4], 1);
    assert_eq!(u16_at(node, 6), 1);
    assert_eq!(i64_at(node, 8), 0);

    // element 0: back-distance to its key record, then the record offset
    let data = &node[32..];
    assert_eq!(u16_at(data, 0), 10);
    assert_eq!(i64_at(data, 2), 512);
    assert_eq!(data[4064 - 10], 9);
    assert_eq!(&data[4064 - 9..], b"value_1_1");
}
