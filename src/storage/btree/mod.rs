#![forbid(unsafe_code)]

//! B+ tree over slotted pages with separator-by-maximum internal keys.

/// Slotted page, cell and child reference types plus the page image codec.
pub mod page;

/// Encoding and decoding utilities for keys and values.
pub mod codecs;
mod options;
mod stats;
mod tree;

pub use codecs::{KeyCodec, ValCodec};
pub use options::TreeOptions;
pub use stats::{BTreeStats, BTreeStatsSnapshot};
pub use tree::{Tree, TreeShape};

#[cfg(test)]
mod tests;
