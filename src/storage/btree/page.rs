//! Slotted B+ tree page.
//!
//! A page owns a fixed-capacity arena of cells. The logical key order lives in
//! a separate slot array of cell indices, and unused cell indices sit on a free
//! stack, so inserts and deletes only shift two-byte slot entries and never move
//! cell payloads.
//!
//! ```text
//! [ header | slot indices (fanout) | cells (fanout) | free list (fanout) ]
//! ```

use super::codecs::{KeyCodec, ValCodec};
use crate::types::checksum;
use crate::types::page::{
    header, PageKind, CHILD_REF_LEN, INDEX_ENTRY_LEN, PAGE_FORMAT_VERSION, PAGE_HDR_LEN,
    PAGE_MAGIC,
};
use crate::types::{ArborError, PageId, Result};

/// Smallest fanout a page may be configured with.
pub const MIN_FANOUT: usize = 3;

/// Reference from an internal cell to its child page.
pub enum ChildRef<K, V> {
    /// Child owned in memory by its parent.
    InMemory(Box<Page<K, V>>),
    /// Child that has to be fetched from the page store.
    OnDisk(PageId),
}

impl<K, V> ChildRef<K, V> {
    /// Page id of the referenced child.
    pub fn page_id(&self) -> PageId {
        match self {
            ChildRef::InMemory(page) => page.id(),
            ChildRef::OnDisk(id) => *id,
        }
    }

    /// Returns `true` when the child is already in memory.
    pub fn is_resident(&self) -> bool {
        matches!(self, ChildRef::InMemory(_))
    }
}

/// Payload of a cell: a value in a leaf, a child in an internal page.
pub enum CellValue<K, V> {
    /// Terminal value stored in a leaf.
    Data(V),
    /// Child reference stored in an internal page.
    Child(ChildRef<K, V>),
}

/// Unit of storage inside a page.
pub struct Cell<K, V> {
    /// Key of the entry; in internal pages, the maximum key of the child subtree.
    pub key: K,
    /// Value or child reference.
    pub value: CellValue<K, V>,
}

/// Which neighbour a merged page came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Side {
    /// Donor holds keys below the receiver's keys.
    Left,
    /// Donor holds keys above the receiver's keys.
    Right,
}

/// B+ tree node.
pub struct Page<K, V> {
    id: PageId,
    is_leaf: bool,
    cells: Vec<Option<Cell<K, V>>>,
    slots: Vec<u16>,
    free_list: Vec<u16>,
    sibling: Option<PageId>,
    dirty: bool,
}

impl<K, V> Page<K, V> {
    /// Page id assigned at allocation.
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Whether the page stores values rather than children.
    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }
}

impl<K: Ord, V> Page<K, V> {
    /// Creates an empty page whose free list holds every cell index.
    pub fn allocate(id: PageId, is_leaf: bool, fanout: usize) -> Self {
        debug_assert!(fanout >= MIN_FANOUT && fanout <= u16::MAX as usize);
        Self {
            id,
            is_leaf,
            cells: (0..fanout).map(|_| None).collect(),
            slots: Vec::with_capacity(fanout),
            // Reversed so the lowest index is handed out first.
            free_list: (0..fanout as u16).rev().collect(),
            sibling: None,
            dirty: true,
        }
    }

    /// Number of live cells.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Maximum number of live cells.
    pub fn fanout(&self) -> usize {
        self.cells.len()
    }

    /// Returns `true` when no cell is free.
    pub fn is_full(&self) -> bool {
        self.slots.len() == self.cells.len()
    }

    /// Returns `true` when the page holds no cells.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of entries on the free list.
    pub fn free_cells(&self) -> usize {
        self.free_list.len()
    }

    /// Cell index behind each slot, in key order.
    pub fn slot_indices(&self) -> &[u16] {
        &self.slots
    }

    /// Persisted right-sibling link.
    pub fn sibling(&self) -> Option<PageId> {
        self.sibling
    }

    /// Updates the persisted right-sibling link.
    pub fn set_sibling(&mut self, sibling: Option<PageId>) {
        self.sibling = sibling;
        self.dirty = true;
    }

    /// Whether the page changed since it was last written.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Flags the page for the next write-back.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    fn cell_at(&self, idx: u16) -> &Cell<K, V> {
        match &self.cells[idx as usize] {
            Some(cell) => cell,
            None => unreachable!("slot references free cell {idx} in page {}", self.id),
        }
    }

    fn cell_at_mut(&mut self, idx: u16) -> &mut Cell<K, V> {
        let id = self.id;
        match &mut self.cells[idx as usize] {
            Some(cell) => cell,
            None => unreachable!("slot references free cell {idx} in page {id}"),
        }
    }

    /// Key stored in slot `pos`.
    pub fn key(&self, pos: usize) -> &K {
        &self.cell_at(self.slots[pos]).key
    }

    /// Overwrites the key stored in slot `pos` without moving the cell.
    pub fn set_key(&mut self, pos: usize, key: K) {
        debug_assert!(pos == 0 || *self.key(pos - 1) < key, "separator out of order");
        debug_assert!(
            pos + 1 >= self.len() || key < *self.key(pos + 1),
            "separator out of order"
        );
        let idx = self.slots[pos];
        self.cell_at_mut(idx).key = key;
        self.dirty = true;
    }

    /// Largest key in the page.
    pub fn max_key(&self) -> Option<&K> {
        self.slots.last().map(|&idx| &self.cell_at(idx).key)
    }

    /// Keys in slot order.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.slots.iter().map(move |&idx| &self.cell_at(idx).key)
    }

    /// Payload stored in slot `pos`.
    pub fn value(&self, pos: usize) -> &CellValue<K, V> {
        &self.cell_at(self.slots[pos]).value
    }

    /// Mutable payload stored in slot `pos`.
    pub fn value_mut(&mut self, pos: usize) -> &mut CellValue<K, V> {
        self.dirty = true;
        let idx = self.slots[pos];
        &mut self.cell_at_mut(idx).value
    }

    /// Leaf value in slot `pos`.
    pub fn data(&self, pos: usize) -> Option<&V> {
        match self.value(pos) {
            CellValue::Data(value) => Some(value),
            CellValue::Child(_) => None,
        }
    }

    /// Child reference in slot `pos`.
    pub fn child(&self, pos: usize) -> Option<&ChildRef<K, V>> {
        match self.value(pos) {
            CellValue::Child(child) => Some(child),
            CellValue::Data(_) => None,
        }
    }

    /// Mutable child reference in slot `pos`.
    ///
    /// Does not dirty the page: swapping a resident child for its page id, or
    /// back, leaves the page image unchanged.
    pub fn child_mut(&mut self, pos: usize) -> Option<&mut ChildRef<K, V>> {
        let idx = self.slots[pos];
        match &mut self.cell_at_mut(idx).value {
            CellValue::Child(child) => Some(child),
            CellValue::Data(_) => None,
        }
    }

    /// First slot whose key is `>= key`, or `len()` when every key is smaller.
    ///
    /// Pages with fewer than `binary_threshold` slots are scanned linearly;
    /// both paths return the same position.
    pub fn lower_bound(&self, key: &K, binary_threshold: usize) -> usize {
        if self.slots.len() < binary_threshold {
            self.slots
                .iter()
                .position(|&idx| self.cell_at(idx).key >= *key)
                .unwrap_or(self.slots.len())
        } else {
            self.slots
                .partition_point(|&idx| self.cell_at(idx).key < *key)
        }
    }

    /// Stores a new cell and places it at slot `pos`, shifting later slots right.
    pub fn insert_at(&mut self, pos: usize, key: K, value: CellValue<K, V>) -> Result<()> {
        if pos > self.slots.len() {
            return Err(ArborError::Invalid("slot position out of range"));
        }
        debug_assert!(pos == 0 || *self.key(pos - 1) < key, "slot order violated");
        debug_assert!(pos == self.len() || key < *self.key(pos), "slot order violated");
        debug_assert_eq!(
            matches!(value, CellValue::Data(_)),
            self.is_leaf,
            "cell kind does not match page kind"
        );
        let Some(idx) = self.free_list.pop() else {
            return Err(ArborError::Invalid("insert into a full page"));
        };
        self.cells[idx as usize] = Some(Cell { key, value });
        self.slots.insert(pos, idx);
        self.dirty = true;
        Ok(())
    }

    /// Removes slot `pos`, returning its cell and recycling the cell index.
    pub fn remove_at(&mut self, pos: usize) -> Result<Cell<K, V>> {
        if pos >= self.slots.len() {
            return Err(ArborError::Invalid("slot position out of range"));
        }
        let idx = self.slots.remove(pos);
        let cell = self.cells[idx as usize]
            .take()
            .ok_or(ArborError::Corruption("slot references a free cell"))?;
        self.free_list.push(idx);
        self.dirty = true;
        Ok(cell)
    }

    /// Moves slots `at..` into the tail of `dst`, releasing their cells here.
    pub fn move_upper_into(&mut self, at: usize, dst: &mut Page<K, V>) -> Result<()> {
        if at > self.slots.len() {
            return Err(ArborError::Invalid("split point out of range"));
        }
        if dst.is_leaf != self.is_leaf {
            return Err(ArborError::Invalid("split target kind differs"));
        }
        if dst.free_cells() < self.slots.len() - at {
            return Err(ArborError::Invalid("split target lacks free cells"));
        }
        let moved: Vec<u16> = self.slots.drain(at..).collect();
        for idx in moved {
            let cell = self.cells[idx as usize]
                .take()
                .ok_or(ArborError::Corruption("slot references a free cell"))?;
            self.free_list.push(idx);
            let pos = dst.len();
            dst.insert_at(pos, cell.key, cell.value)?;
        }
        self.dirty = true;
        Ok(())
    }

    /// Moves every cell of `donor` into this page.
    ///
    /// The donor's key range must lie entirely on `side` of this page's keys.
    pub fn absorb(&mut self, donor: Page<K, V>, side: Side) -> Result<()> {
        if donor.is_leaf != self.is_leaf {
            return Err(ArborError::Invalid("cannot merge pages of different kinds"));
        }
        if self.len() + donor.len() > self.fanout() {
            return Err(ArborError::Invalid("merged page would exceed fanout"));
        }
        let cells = donor.into_cells()?;
        match side {
            Side::Right => {
                for cell in cells {
                    let pos = self.len();
                    self.insert_at(pos, cell.key, cell.value)?;
                }
            }
            Side::Left => {
                for (pos, cell) in cells.into_iter().enumerate() {
                    self.insert_at(pos, cell.key, cell.value)?;
                }
            }
        }
        Ok(())
    }

    fn into_cells(mut self) -> Result<Vec<Cell<K, V>>> {
        let slots = std::mem::take(&mut self.slots);
        slots
            .into_iter()
            .map(|idx| {
                self.cells[idx as usize]
                    .take()
                    .ok_or(ArborError::Corruption("slot references a free cell"))
            })
            .collect()
    }
}

/// Byte layout of a page image for one key/value shape.
///
/// The slot array, cell array and free list are each sized by the fanout, and
/// the capacity is chosen so that all three always fit after the header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageLayout {
    page_size: usize,
    key_len: usize,
    cell_len: usize,
    capacity: usize,
}

impl PageLayout {
    /// Derives the layout for `K`/`V` cells on pages of `page_size` bytes.
    pub fn for_codecs<K: KeyCodec, V: ValCodec>(page_size: usize) -> Result<Self> {
        if page_size <= PAGE_HDR_LEN {
            return Err(ArborError::Invalid("page size smaller than header"));
        }
        let key_len = K::ENCODED_LEN;
        let cell_len = key_len + V::ENCODED_LEN.max(CHILD_REF_LEN);
        if cell_len > u16::MAX as usize {
            return Err(ArborError::Invalid("cell too wide for page header"));
        }
        let per_cell = cell_len + 2 * INDEX_ENTRY_LEN;
        let capacity = ((page_size - PAGE_HDR_LEN) / per_cell).min(u16::MAX as usize);
        if capacity < MIN_FANOUT {
            return Err(ArborError::Invalid("page too small for the minimum fanout"));
        }
        Ok(Self {
            page_size,
            key_len,
            cell_len,
            capacity,
        })
    }

    /// Page image size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Bytes per cell: key plus the wider of value and child reference.
    pub fn cell_len(&self) -> usize {
        self.cell_len
    }

    /// Largest fanout whose regions fit the page.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn cells_start(&self, fanout: usize) -> usize {
        PAGE_HDR_LEN + fanout * INDEX_ENTRY_LEN
    }

    fn free_start(&self, fanout: usize) -> usize {
        self.cells_start(fanout) + fanout * self.cell_len
    }

    /// Bytes occupied by header and regions for `fanout`.
    pub fn used_bytes(&self, fanout: usize) -> usize {
        self.free_start(fanout) + fanout * INDEX_ENTRY_LEN
    }
}

fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

fn get_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn get_u64(buf: &[u8], at: usize) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&buf[at..at + 8]);
    u64::from_be_bytes(arr)
}

impl<K: KeyCodec, V: ValCodec> Page<K, V> {
    /// Serializes the page into a sealed image.
    ///
    /// Resident children are written as their page ids; the caller is
    /// responsible for writing those children too.
    pub fn encode(&self, layout: &PageLayout) -> Result<Vec<u8>> {
        let fanout = self.fanout();
        if fanout > layout.capacity() {
            return Err(ArborError::Invalid("fanout exceeds page capacity"));
        }
        let mut buf = vec![0u8; layout.page_size()];
        buf[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
        buf[header::FORMAT_VERSION].copy_from_slice(&PAGE_FORMAT_VERSION.to_be_bytes());
        buf[header::PAGE_KIND] = PageKind::for_leaf(self.is_leaf).as_u8();
        buf[header::PAGE_NO].copy_from_slice(&self.id.0.to_be_bytes());
        let sibling = self.sibling.unwrap_or(PageId::NONE);
        buf[header::SIBLING].copy_from_slice(&sibling.0.to_be_bytes());
        put_u16(&mut buf, header::FANOUT.start, fanout as u16);
        put_u16(&mut buf, header::SLOT_COUNT.start, self.slots.len() as u16);
        put_u16(&mut buf, header::FREE_COUNT.start, self.free_list.len() as u16);
        put_u16(&mut buf, header::CELL_LEN.start, layout.cell_len() as u16);

        for (i, &idx) in self.slots.iter().enumerate() {
            put_u16(&mut buf, PAGE_HDR_LEN + i * INDEX_ENTRY_LEN, idx);
        }

        let cells_start = layout.cells_start(fanout);
        let mut scratch = Vec::with_capacity(layout.cell_len());
        for (idx, cell) in self.cells.iter().enumerate() {
            let Some(cell) = cell else { continue };
            scratch.clear();
            K::encode_key(&cell.key, &mut scratch);
            if scratch.len() != layout.key_len {
                return Err(ArborError::Invalid("key codec wrote the wrong width"));
            }
            match &cell.value {
                CellValue::Data(value) if self.is_leaf => V::encode_val(value, &mut scratch),
                CellValue::Child(child) if !self.is_leaf => {
                    scratch.extend_from_slice(&child.page_id().0.to_be_bytes())
                }
                _ => return Err(ArborError::Corruption("cell kind does not match page kind")),
            }
            if scratch.len() > layout.cell_len() {
                return Err(ArborError::Invalid("value codec wrote past the cell"));
            }
            let start = cells_start + idx * layout.cell_len();
            buf[start..start + scratch.len()].copy_from_slice(&scratch);
        }

        let free_start = layout.free_start(fanout);
        for (i, &idx) in self.free_list.iter().enumerate() {
            put_u16(&mut buf, free_start + i * INDEX_ENTRY_LEN, idx);
        }

        checksum::seal_image(self.id, &mut buf)?;
        Ok(buf)
    }

    /// Rebuilds a page from an image produced by [`Page::encode`].
    ///
    /// Internal cells come back as [`ChildRef::OnDisk`]. The decoded page is clean.
    pub fn decode(image: &[u8], layout: &PageLayout, verify_checksum: bool) -> Result<Self> {
        if image.len() != layout.page_size() {
            return Err(ArborError::Corruption("page image size mismatch"));
        }
        if image[header::MAGIC] != PAGE_MAGIC {
            return Err(ArborError::Corruption("invalid page magic"));
        }
        if get_u16(image, header::FORMAT_VERSION.start) != PAGE_FORMAT_VERSION {
            return Err(ArborError::Corruption("unsupported page format version"));
        }
        if image[header::RESERVED] != 0 || image[header::RESERVED_TAIL].iter().any(|&b| b != 0) {
            return Err(ArborError::Corruption("page header reserved bytes not zero"));
        }
        let kind = PageKind::try_from(image[header::PAGE_KIND])?;
        let id = PageId(get_u64(image, header::PAGE_NO.start));
        if id.is_none() {
            return Err(ArborError::Corruption("page image carries page id 0"));
        }
        if verify_checksum {
            checksum::verify_image(id, image)?;
        }
        let sibling = PageId(get_u64(image, header::SIBLING.start));
        let fanout = get_u16(image, header::FANOUT.start) as usize;
        let slot_count = get_u16(image, header::SLOT_COUNT.start) as usize;
        let free_count = get_u16(image, header::FREE_COUNT.start) as usize;
        if get_u16(image, header::CELL_LEN.start) as usize != layout.cell_len() {
            return Err(ArborError::Corruption("cell length does not match codecs"));
        }
        if fanout < MIN_FANOUT || fanout > layout.capacity() {
            return Err(ArborError::Corruption("page fanout out of range"));
        }
        if slot_count + free_count != fanout {
            return Err(ArborError::Corruption("slot and free counts do not cover the cells"));
        }

        let mut seen = vec![false; fanout];
        let mut claim = |idx: u16| -> Result<u16> {
            let slot = seen
                .get_mut(idx as usize)
                .ok_or(ArborError::Corruption("cell index out of range"))?;
            if *slot {
                return Err(ArborError::Corruption("cell index referenced twice"));
            }
            *slot = true;
            Ok(idx)
        };
        let mut slots = Vec::with_capacity(fanout);
        for i in 0..slot_count {
            slots.push(claim(get_u16(image, PAGE_HDR_LEN + i * INDEX_ENTRY_LEN))?);
        }
        let free_start = layout.free_start(fanout);
        let mut free_list = Vec::with_capacity(fanout);
        for i in 0..free_count {
            free_list.push(claim(get_u16(image, free_start + i * INDEX_ENTRY_LEN))?);
        }

        let is_leaf = kind == PageKind::Leaf;
        let cells_start = layout.cells_start(fanout);
        let mut cells: Vec<Option<Cell<K, V>>> = (0..fanout).map(|_| None).collect();
        for &idx in &slots {
            let start = cells_start + idx as usize * layout.cell_len();
            let bytes = &image[start..start + layout.cell_len()];
            let (key_bytes, payload) = bytes.split_at(layout.key_len);
            let key = K::decode_key(key_bytes)?;
            let value = if is_leaf {
                CellValue::Data(V::decode_val(&payload[..V::ENCODED_LEN])?)
            } else {
                let child = PageId(get_u64(payload, 0));
                if child.is_none() {
                    return Err(ArborError::Corruption("internal cell without child"));
                }
                CellValue::Child(ChildRef::OnDisk(child))
            };
            cells[idx as usize] = Some(Cell { key, value });
        }

        let page = Self {
            id,
            is_leaf,
            cells,
            slots,
            free_list,
            sibling: (!sibling.is_none()).then_some(sibling),
            dirty: false,
        };
        if !page.keys().zip(page.keys().skip(1)).all(|(a, b)| a < b) {
            return Err(ArborError::Corruption("slot keys out of order"));
        }
        Ok(page)
    }
}
