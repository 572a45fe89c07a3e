//! B+-Tree Index Module
//!
//! One tree per indexed attribute name. Keys are attribute values (compared
//! bytewise), values are metadata record offsets. Duplicate keys are allowed
//! and kept in insertion order.
//!
//! ## Shape
//! ```text
//!                 ┌───────────────────────────┐
//!                 │ internal: extra | k1 | k2 │
//!                 └───┬─────────┬─────────┬───┘
//!            < k1     │  k1..k2 │   >= k2 │
//!          ┌──────────▼┐   ┌────▼──────┐  ┌▼──────────┐
//!          │ leaf      ├──►│ leaf      ├─►│ leaf      ├─► 0
//!          └───────────┘   └───────────┘  └───────────┘
//! ```
//!
//! Nodes refer to each other by offset only. The tree code never touches a
//! stream; it works through a `NodeStore`, which the indexes section backs
//! with its node cache and file.

pub mod cache;
pub mod search;
pub mod tree;

pub use cache::NodeCache;
pub use search::{search_leftmost, search_rightmost, Slot, SortedKeys};
pub use tree::{create_tree, find, insert};

use crate::error::Result;
use crate::format::Node;

/// Offset-addressed node storage a tree operates on
pub trait NodeStore {
    /// Node at `offset`; must succeed whether or not it is cached
    fn load(&mut self, offset: u64) -> Result<Node>;

    /// Replace the node at `offset`
    fn store(&mut self, offset: u64, node: Node) -> Result<()>;

    /// Reserve space for a new node and return its offset
    fn allocate(&mut self) -> Result<u64>;
}
