use super::{Tree, TreeCtx};
use crate::storage::btree::codecs::{KeyCodec, ValCodec};
use crate::storage::btree::page::{CellValue, ChildRef, Page, Side};
use crate::types::{ArborError, Result};

impl<K: KeyCodec, V: ValCodec> Tree<K, V> {
    /// Removes `key`, merging siblings that fit into one page on the way back
    /// up. Returns `false` when the key was absent.
    ///
    /// Pages are only ever merged, never rebalanced by borrowing a cell.
    pub fn erase(&mut self, key: &K) -> Result<bool> {
        if !self.ctx.erase_from(&mut self.root, key)? {
            return Ok(false);
        }
        self.len -= 1;
        if self.root.is_empty() {
            self.height = 1;
        }
        if self.options.trace_enabled {
            tracing::debug!(target: "arbor::erase", "tree after erase\n{}", self.dump());
        }
        Ok(true)
    }
}

impl TreeCtx {
    fn erase_from<K: KeyCodec, V: ValCodec>(&self, page: &mut Page<K, V>, key: &K) -> Result<bool> {
        self.stats.inc_searches(page.is_leaf());
        let pos = page.lower_bound(key, self.threshold);
        if pos == page.len() {
            return Ok(false);
        }
        if page.is_leaf() {
            if page.key(pos) != key {
                return Ok(false);
            }
            page.remove_at(pos)?;
            tracing::trace!(target: "arbor::erase", page = page.id().0, slot = pos, key = ?key, "removed cell");
            return Ok(true);
        }

        // Every page a merge may touch is resident before anything is removed.
        if pos + 1 < page.len() {
            self.child_page(page, pos + 1)?;
        }
        if pos > 0 {
            self.child_page(page, pos - 1)?;
        }
        let child = self.child_page(page, pos)?;
        if !self.erase_from(child, key)? {
            return Ok(false);
        }
        let child_len = child.len();
        let child_max = child.max_key().cloned();
        if let Some(max) = child_max {
            if max != *page.key(pos) {
                page.set_key(pos, max);
            }
        }
        self.rebalance(page, pos, child_len)?;
        Ok(true)
    }

    /// Repairs `parent` after its child in slot `pos` shrank to `child_len` cells.
    /// Neighbours of `pos` are already resident.
    fn rebalance<K: KeyCodec, V: ValCodec>(
        &self,
        parent: &mut Page<K, V>,
        pos: usize,
        child_len: usize,
    ) -> Result<()> {
        if pos + 1 < parent.len() {
            let right_len = self.child_page(parent, pos + 1)?.len();
            if child_len + right_len <= self.fanout {
                return self.merge(parent, pos, Side::Right);
            }
        }
        if pos > 0 {
            let left_len = self.child_page(parent, pos - 1)?.len();
            if child_len + left_len <= self.fanout {
                return self.merge(parent, pos, Side::Left);
            }
        }
        if parent.len() == 1 && child_len == 0 {
            let cell = parent.remove_at(pos)?;
            let CellValue::Child(child) = cell.value else {
                return Err(ArborError::Corruption("internal cell holds a value"));
            };
            let child_id = child.page_id();
            self.store.free_page(child_id)?;
            self.stats.inc_root_collapses();
            tracing::debug!(
                target: "arbor::merge",
                parent = parent.id().0,
                page = child_id.0,
                "collapsed empty sole child"
            );
        }
        Ok(())
    }

    /// Moves the neighbour on `side` of slot `pos` into the child at `pos`,
    /// drops the neighbour's slot and repoints the surviving separator.
    fn merge<K: KeyCodec, V: ValCodec>(
        &self,
        parent: &mut Page<K, V>,
        pos: usize,
        side: Side,
    ) -> Result<()> {
        let (donor_pos, receiver_pos) = match side {
            Side::Right => (pos + 1, pos),
            Side::Left => (pos - 1, pos - 1),
        };
        let CellValue::Child(donor) = parent.remove_at(donor_pos)?.value else {
            return Err(ArborError::Corruption("internal cell holds a value"));
        };
        let donor = match donor {
            ChildRef::InMemory(page) => *page,
            ChildRef::OnDisk(id) => self.load_page(id)?,
        };
        let donor_id = donor.id();
        let receiver = self.child_page(parent, receiver_pos)?;
        let receiver_id = receiver.id();
        let is_leaf = receiver.is_leaf();
        receiver.absorb(donor, side)?;
        let new_max = receiver
            .max_key()
            .cloned()
            .ok_or(ArborError::Corruption("merge produced an empty page"))?;
        parent.set_key(receiver_pos, new_max);
        self.store.free_page(donor_id)?;
        self.stats.inc_merges(is_leaf);
        tracing::trace!(
            target: "arbor::merge",
            parent = parent.id().0,
            page = receiver_id.0,
            donor = donor_id.0,
            side = ?side,
            leaf = is_leaf,
            "merged siblings"
        );
        Ok(())
    }
}
