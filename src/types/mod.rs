#![forbid(unsafe_code)]
//! Identifiers, the crate error type and shared on-disk page metadata.

use std::fmt;

/// Checksum helpers for page images.
pub mod checksum;

/// Identifier of a page inside a [`PageStore`](crate::primitives::pager::PageStore).
///
/// Page ids start at 1; `PageId(0)` is reserved to encode "no page" on disk.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct PageId(pub u64);

impl PageId {
    /// Sentinel used by the page image to encode an absent page reference.
    pub const NONE: PageId = PageId(0);

    /// Returns `true` if this id is the "no page" sentinel.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors surfaced by the tree and its page stores.
#[derive(thiserror::Error, Debug)]
pub enum ArborError {
    /// Underlying I/O failure in a page store.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// A page image or in-memory page violated a structural invariant.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The caller asked for something the tree cannot do.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A child reference points at a page the store cannot serve.
    #[error("page {0} is not resident in the page store")]
    PageFault(PageId),
    /// Configuration could not be parsed or validated.
    #[error("config: {0}")]
    Config(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ArborError>;

pub mod page {
    //! On-disk page metadata shared by the page codec and the stores.

    use core::convert::TryFrom;

    use super::{ArborError, Result};

    /// Magic marker at the start of every page image.
    pub const PAGE_MAGIC: [u8; 4] = *b"ARBR";
    /// Current page image format.
    pub const PAGE_FORMAT_VERSION: u16 = 1;
    /// Page size used when none is configured.
    pub const DEFAULT_PAGE_SIZE: usize = 4096;
    /// Length of the fixed page header.
    pub const PAGE_HDR_LEN: usize = 40;
    /// Bytes used to persist a child page reference inside an internal cell.
    pub const CHILD_REF_LEN: usize = 8;
    /// Bytes used by one slot-array entry and by one free-list entry.
    pub const INDEX_ENTRY_LEN: usize = 2;

    pub mod header {
        //! Byte offsets for fixed header fields.
        use core::ops::Range;

        pub const MAGIC: Range<usize> = 0..4;
        pub const FORMAT_VERSION: Range<usize> = 4..6;
        pub const PAGE_KIND: usize = 6;
        pub const RESERVED: usize = 7;
        pub const PAGE_NO: Range<usize> = 8..16;
        pub const SIBLING: Range<usize> = 16..24;
        pub const FANOUT: Range<usize> = 24..26;
        pub const SLOT_COUNT: Range<usize> = 26..28;
        pub const FREE_COUNT: Range<usize> = 28..30;
        pub const CELL_LEN: Range<usize> = 30..32;
        pub const CRC32: Range<usize> = 32..36;
        pub const RESERVED_TAIL: Range<usize> = 36..40;
    }

    /// Kind byte stored in the page header.
    #[repr(u8)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub enum PageKind {
        /// Page holding key → value cells.
        Leaf = 1,
        /// Page holding key → child cells.
        Internal = 2,
    }

    impl PageKind {
        /// Raw byte stored in the header.
        pub const fn as_u8(self) -> u8 {
            self as u8
        }

        /// Kind for a page of the given leaf-ness.
        pub const fn for_leaf(is_leaf: bool) -> Self {
            if is_leaf {
                PageKind::Leaf
            } else {
                PageKind::Internal
            }
        }
    }

    impl TryFrom<u8> for PageKind {
        type Error = ArborError;

        fn try_from(value: u8) -> Result<Self> {
            match value {
                1 => Ok(PageKind::Leaf),
                2 => Ok(PageKind::Internal),
                _ => Err(ArborError::Corruption("unknown page kind")),
            }
        }
    }

    /// Zeroes the CRC field of a page image.
    pub fn clear_crc32(buf: &mut [u8]) -> Result<()> {
        if buf.len() < header::CRC32.end {
            return Err(ArborError::Invalid("page header buffer too small"));
        }
        buf[header::CRC32].fill(0);
        Ok(())
    }
}
