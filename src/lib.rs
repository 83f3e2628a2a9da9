//! Embedded B+ tree indexing core.
//!
//! [`Tree`] keeps unique ordered keys in fixed-fanout slotted pages. Pages live
//! in memory and can be written to, and faulted back from, any [`PageStore`].
//!
//! ```
//! use arbor::{Tree, TreeOptions};
//!
//! let mut tree = Tree::<u64, u64>::new(TreeOptions::with_fanout(8))?;
//! for key in [2, 5, 3, 1, 6, 0, 4] {
//!     tree.insert(key, key * 100)?;
//! }
//! assert_eq!(tree.search(&3), Some(300));
//! assert!(tree.erase(&3)?);
//! assert_eq!(tree.search(&3), None);
//! # Ok::<(), arbor::ArborError>(())
//! ```

#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod types;

pub use primitives::pager::{FileStore, MemStore, NullStore, PageStore};
pub use storage::btree::{
    BTreeStats, BTreeStatsSnapshot, KeyCodec, Tree, TreeOptions, TreeShape, ValCodec,
};
pub use types::{ArborError, PageId, Result};
