//! Indexes Section
//!
//! Holds the index table and the nodes of every B+-tree. New nodes and
//! relocated index tables are appended at the end of the section, whose
//! length doubles as the allocation pointer.
//!
//! ## Operation Lifecycle
//! ```text
//! find / index
//!   │
//!   ├─► tree code loads/stores nodes through the cache (NodeStore)
//!   │
//!   └─► end of operation:
//!         write dirty nodes → write index table (if changed)
//!         → write section block → flush → trim cache
//! ```

use tracing::{debug, info, trace};

use super::{SectionCore, SectionLifecycle};
use crate::btree::{self, NodeCache, NodeStore};
use crate::error::{PileError, Result};
use crate::format::{
    IndexKind, IndexRecord, IndexTable, Node, SectionKind, BASE_BLOCK_SIZE, NODE_BLOCK_SIZE,
    SECTION_BLOCK_SIZE,
};
use crate::stream::Stream;

pub struct IndexesSection<S: Stream> {
    core: SectionCore<S>,
    table: IndexTable,
    table_dirty: bool,
    modified: bool,
    cache: NodeCache,
}

impl<S: Stream> IndexesSection<S> {
    /// New section with an empty index table right after the section block
    pub fn create(stream: S, cache_max: usize, cache_target: usize) -> Result<Self> {
        let mut core = SectionCore::create(stream, SectionKind::Indexes)?;
        let table = IndexTable::default();

        let table_offset = SECTION_BLOCK_SIZE as u64;
        core.write_at(table_offset, &table.encode())?;
        let block = core.block_mut();
        block.table_offset = table_offset;
        block.length = table_offset + table.block_len as u64;
        core.write_block()?;

        Ok(Self {
            core,
            table,
            table_dirty: false,
            modified: false,
            cache: NodeCache::new(cache_max, cache_target),
        })
    }

    pub fn open(stream: S, writable: bool, cache_max: usize, cache_target: usize) -> Result<Self> {
        let mut core = SectionCore::open(stream, SectionKind::Indexes, writable)?;

        let table_offset = core.block().table_offset;
        let length = core.block().length;
        if table_offset == 0 || table_offset + BASE_BLOCK_SIZE as u64 > length {
            return Err(PileError::FileBroken(format!(
                "index table offset {} invalid for a section of {} bytes",
                table_offset, length
            )));
        }

        let mut block = vec![0u8; BASE_BLOCK_SIZE];
        core.read_at(table_offset, &mut block)?;
        let block_len = IndexTable::peek_block_length(&block)?;
        if table_offset + block_len as u64 > length {
            return Err(PileError::FileBroken(format!(
                "index table at {} runs past the section end",
                table_offset
            )));
        }
        if block_len > BASE_BLOCK_SIZE {
            block.resize(block_len, 0);
            core.read_at(table_offset + BASE_BLOCK_SIZE as u64, &mut block[BASE_BLOCK_SIZE..])?;
        }
        let table = IndexTable::decode(&block)?;

        Ok(Self {
            core,
            table,
            table_dirty: false,
            modified: false,
            cache: NodeCache::new(cache_max, cache_target),
        })
    }

    pub fn table(&self) -> &IndexTable {
        &self.table
    }

    /// Whether `name` has an index
    pub fn is_indexed(&self, name: &str) -> bool {
        self.table.root(name).is_some()
    }

    /// Metadata offsets of entries whose `name` attribute equals `value`
    pub fn find(&mut self, name: &str, value: &[u8]) -> Result<Vec<u64>> {
        let root = self
            .table
            .root(name)
            .ok_or_else(|| PileError::NotIndexed(name.to_string()))?;

        let found = btree::find(self, root, value);
        self.end_operation()?;
        found
    }

    /// Add `value → metadata_offset` to the index of `name`, creating the
    /// index on first use
    pub fn index(&mut self, name: &str, value: &[u8], metadata_offset: u64) -> Result<()> {
        self.core.ensure_writable()?;

        let root = match self.table.root(name) {
            Some(root) => root,
            None => self.create_index(name)?,
        };

        let new_root = btree::insert(self, root, value, metadata_offset)?;
        if new_root != root {
            self.table.set_root(name, new_root);
            self.table_dirty = true;
        }
        self.modified = true;
        self.end_operation()
    }

    fn create_index(&mut self, name: &str) -> Result<u64> {
        let root = btree::create_tree(self)?;
        let fits = self.table.push(IndexRecord {
            kind: IndexKind::BTree,
            name: name.to_string(),
            root,
        })?;

        if !fits {
            // the grown table no longer fits its block: move it to the end
            let table_offset = self.core.block().length;
            self.core.block_mut().table_offset = table_offset;
            self.core.block_mut().length += self.table.block_len as u64;
            debug!(
                table_offset,
                block_len = self.table.block_len,
                "Index table relocated"
            );
        }
        self.table_dirty = true;
        info!(name, root, "Index created");
        Ok(root)
    }

    /// Persist everything the last operation changed, then trim the cache
    fn end_operation(&mut self) -> Result<()> {
        let dirty = self.cache.take_dirty();
        for (offset, node) in dirty {
            self.write_node(offset, &node)?;
        }

        if self.table_dirty {
            let table_offset = self.core.block().table_offset;
            self.core.write_at(table_offset, &self.table.encode())?;
            self.table_dirty = false;
        }

        if self.modified {
            self.core.flush()?;
            self.modified = false;
        }

        let evicted = self.cache.trim();
        for (offset, node) in evicted {
            self.write_node(offset, &node)?;
        }
        Ok(())
    }

    fn write_node(&mut self, offset: u64, node: &Node) -> Result<()> {
        trace!(offset, count = node.len(), leaf = node.is_leaf, "Node write");
        self.core.write_at(offset, &node.encode()?)
    }
}

impl<S: Stream> NodeStore for IndexesSection<S> {
    fn load(&mut self, offset: u64) -> Result<Node> {
        if let Some(node) = self.cache.get(offset) {
            return Ok(node);
        }

        if offset < SECTION_BLOCK_SIZE as u64
            || offset + NODE_BLOCK_SIZE as u64 > self.core.block().length
        {
            return Err(PileError::FileBroken(format!(
                "node offset {} outside the indexes section",
                offset
            )));
        }

        let mut block = vec![0u8; NODE_BLOCK_SIZE];
        self.core.read_at(offset, &mut block)?;
        let node = Node::decode(&block)?;
        trace!(offset, count = node.len(), leaf = node.is_leaf, "Node read");

        self.cache.insert_clean(offset, node.clone());
        Ok(node)
    }

    fn store(&mut self, offset: u64, node: Node) -> Result<()> {
        self.cache.put(offset, node);
        Ok(())
    }

    fn allocate(&mut self) -> Result<u64> {
        let offset = self.core.block().length;
        self.core.block_mut().length += NODE_BLOCK_SIZE as u64;
        self.modified = true;
        Ok(offset)
    }
}

impl<S: Stream> SectionLifecycle for IndexesSection<S> {
    fn kind(&self) -> SectionKind {
        SectionKind::Indexes
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

    fn reopen(section: IndexesSection<Cursor<Vec<u8>>>) -> IndexesSection<Cursor<Vec<u8>>> {
        let bytes = section.core.into_stream().into_inner();
        IndexesSection::open(Cursor::new(bytes), true, 16, 8).unwrap()
    }

    #[test]
    fn test_fresh_section_layout() {
        let section = IndexesSection::create(Cursor::new(Vec::new()), 16, 8).unwrap();
        assert_eq!(section.core.block().table_offset, 512);
        assert_eq!(section.length(), 1024);
        assert!(section.table().records.is_empty());
    }

    #[test]
    fn test_unindexed_lookup() {
        let mut section = IndexesSection::create(Cursor::new(Vec::new()), 16, 8).unwrap();
        assert!(matches!(
            section.find("missing", b"x"),
            Err(PileError::NotIndexed(_))
        ));
    }

    #[test]
    fn test_index_survives_reopen() {
        let mut section = IndexesSection::create(Cursor::new(Vec::new()), 16, 8).unwrap();
        section.index("title", b"alpha", 512).unwrap();
        section.index("title", b"beta", 1024).unwrap();
        section.index("title", b"alpha", 1536).unwrap();
        // first node sits right after the index table
        assert_eq!(section.table().root("title"), Some(1024));

        let mut section = reopen(section);
        assert_eq!(section.find("title", b"alpha").unwrap(), vec![512, 1536]);
        assert_eq!(section.find("title", b"beta").unwrap(), vec![1024]);
        assert!(section.find("title", b"gamma").unwrap().is_empty());
    }

    #[test]
    fn test_table_relocation_keeps_indexes() {
        let mut section = IndexesSection::create(Cursor::new(Vec::new()), 16, 8).unwrap();
        for i in 0..30u64 {
            section
                .index(&format!("attr_{:05}", i), b"v", 512 + i * 512)
                .unwrap();
        }
        assert_ne!(section.core.block().table_offset, 512);

        let mut section = reopen(section);
        assert_eq!(section.table().records.len(), 30);
        assert_eq!(section.find("attr_00029", b"v").unwrap(), vec![512 + 29 * 512]);
        assert_eq!(section.find("attr_00000", b"v").unwrap(), vec![512]);
    }

    #[test]
    fn test_small_cache_still_finds_everything() {
        let mut section = IndexesSection::create(Cursor::new(Vec::new()), 2, 1).unwrap();
        for i in 0..2000u64 {
            section
                .index("n", format!("value_{:06}", i).as_bytes(), i)
                .unwrap();
            assert!(section.cache.len() <= 2);
        }
        for i in (0..2000u64).step_by(97) {
            assert_eq!(
                section.find("n", format!("value_{:06}", i).as_bytes()).unwrap(),
                vec![i]
            );
        }
    }
}
