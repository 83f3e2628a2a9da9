//! Index structures built on top of the page store.

/// B+ tree index.
///
/// Maps unique ordered keys to fixed-width values with point lookup, upsert
/// and erase with sibling merging.
pub mod btree;
