//! Low-level primitives the tree is built on.

/// Page store abstraction and its in-memory and file-backed implementations.
///
/// The tree never touches persistent storage directly; every page image goes
/// through a [`pager::PageStore`].
pub mod pager;
