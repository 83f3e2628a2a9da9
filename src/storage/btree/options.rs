use std::path::Path;

use serde::{Deserialize, Serialize};

use super::page::{PageLayout, MIN_FANOUT};
use crate::types::page::DEFAULT_PAGE_SIZE;
use crate::types::{ArborError, PageId, Result};

/// Configuration options for a tree.
///
/// Every field has a default, so a TOML document only needs the keys it
/// overrides:
///
/// ```toml
/// fanout = 8
/// trace_enabled = true
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeOptions {
    /// Maximum cells per page; `None` uses the largest fanout the page fits
    pub fanout: Option<usize>,
    /// Pages with at least this many slots use binary search; `None` means `fanout / 2`
    pub binary_search_threshold: Option<usize>,
    /// Size of a page image in bytes
    pub page_size: usize,
    /// Whether to verify checksums when reading pages
    pub checksum_verify_on_read: bool,
    /// Whether to log a full dump after every mutation
    pub trace_enabled: bool,
    /// Optional root page ID for an existing tree
    pub root_page: Option<PageId>,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            fanout: None,
            binary_search_threshold: None,
            page_size: DEFAULT_PAGE_SIZE,
            checksum_verify_on_read: true,
            trace_enabled: false,
            root_page: None,
        }
    }
}

impl TreeOptions {
    /// Options for a tree with the given fanout and defaults elsewhere.
    pub fn with_fanout(fanout: usize) -> Self {
        Self {
            fanout: Some(fanout),
            ..Self::default()
        }
    }

    /// Parses options from a TOML document.
    pub fn from_toml_str(src: &str) -> Result<Self> {
        toml::from_str(src).map_err(|err| ArborError::Config(err.to_string()))
    }

    /// Reads and parses a TOML options file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|err| ArborError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    /// Checks the options against `layout`, returning the effective
    /// `(fanout, binary_search_threshold)`.
    pub(crate) fn resolve(&self, layout: &PageLayout) -> Result<(usize, usize)> {
        let fanout = self.fanout.unwrap_or(layout.capacity());
        if fanout < MIN_FANOUT {
            return Err(ArborError::Invalid("fanout must be at least 3"));
        }
        if fanout > layout.capacity() {
            return Err(ArborError::Invalid("fanout does not fit the page size"));
        }
        let threshold = self.binary_search_threshold.unwrap_or(fanout / 2);
        Ok((fanout, threshold))
    }
}
