use super::{Tree, TreeCtx};
use crate::storage::btree::codecs::{KeyCodec, ValCodec};
use crate::storage::btree::page::{CellValue, ChildRef, Page};
use crate::types::{ArborError, PageId, Result};

impl<K: KeyCodec, V: ValCodec> Tree<K, V> {
    /// Inserts `key`, splitting full pages on the way down.
    ///
    /// An existing key keeps its cell and has its value replaced; the
    /// previous value is returned.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>> {
        let previous = if self.root.is_empty() {
            let leaf_id = self.ctx.store.allocate_page()?;
            let mut leaf = Page::allocate(leaf_id, true, self.ctx.fanout);
            leaf.insert_at(0, key.clone(), CellValue::Data(value))?;
            self.root
                .insert_at(0, key, CellValue::Child(ChildRef::InMemory(Box::new(leaf))))?;
            self.height = 2;
            tracing::debug!(
                target: "arbor::insert",
                root = self.root.id().0,
                leaf = leaf_id.0,
                "materialized first leaf"
            );
            None
        } else {
            if self.root.is_full() {
                self.ctx.grow_root(&mut self.root)?;
                self.height += 1;
            }
            self.ctx.insert_into(&mut self.root, key, value)?
        };
        if previous.is_none() {
            self.len += 1;
        }
        if self.options.trace_enabled {
            tracing::debug!(target: "arbor::insert", "tree after insert\n{}", self.dump());
        }
        Ok(previous)
    }
}

impl TreeCtx {
    /// Pushes a full root down under a fresh root and splits it.
    ///
    /// Both page ids are taken from the store before the old root moves, so
    /// a failed allocation leaves the tree as it was.
    fn grow_root<K: KeyCodec, V: ValCodec>(&self, root: &mut Box<Page<K, V>>) -> Result<()> {
        let old_max = root
            .max_key()
            .cloned()
            .ok_or(ArborError::Corruption("full root without keys"))?;
        let new_id = self.store.allocate_page()?;
        let sibling_id = match self.store.allocate_page() {
            Ok(id) => id,
            Err(err) => {
                self.store.free_page(new_id)?;
                return Err(err);
            }
        };
        let old = std::mem::replace(root, Box::new(Page::allocate(new_id, false, self.fanout)));
        let old_id = old.id();
        root.insert_at(0, old_max, CellValue::Child(ChildRef::InMemory(old)))?;
        self.split_child(root, 0, sibling_id)?;
        self.stats.inc_root_splits();
        tracing::debug!(
            target: "arbor::split",
            old_root = old_id.0,
            new_root = new_id.0,
            "root split"
        );
        Ok(())
    }

    /// Splits the full, resident child in slot `pos` of `parent`.
    ///
    /// The lower `fanout / 2` cells stay in the child; the rest move to a new
    /// sibling page `sibling_id` registered at `pos + 1`. Both separators
    /// become the maximum key of their half.
    fn split_child<K: KeyCodec, V: ValCodec>(
        &self,
        parent: &mut Page<K, V>,
        pos: usize,
        sibling_id: PageId,
    ) -> Result<()> {
        if parent.is_full() {
            return Err(ArborError::Invalid("split into a full parent"));
        }
        let child = self.child_page(parent, pos)?;
        let child_id = child.id();
        let is_leaf = child.is_leaf();
        let mut sibling = Page::allocate(sibling_id, is_leaf, self.fanout);
        child.move_upper_into(self.fanout / 2, &mut sibling)?;
        let lower_max = child
            .max_key()
            .cloned()
            .ok_or(ArborError::Corruption("split left an empty page"))?;
        let upper_max = sibling
            .max_key()
            .cloned()
            .ok_or(ArborError::Corruption("split produced an empty sibling"))?;
        parent.set_key(pos, lower_max);
        parent.insert_at(
            pos + 1,
            upper_max,
            CellValue::Child(ChildRef::InMemory(Box::new(sibling))),
        )?;
        self.stats.inc_splits(is_leaf);
        tracing::trace!(
            target: "arbor::split",
            parent = parent.id().0,
            page = child_id.0,
            sibling = sibling_id.0,
            leaf = is_leaf,
            "split page"
        );
        Ok(())
    }

    pub(super) fn insert_into<K: KeyCodec, V: ValCodec>(
        &self,
        page: &mut Page<K, V>,
        key: K,
        value: V,
    ) -> Result<Option<V>> {
        self.stats.inc_searches(page.is_leaf());
        if page.is_leaf() {
            let pos = page.lower_bound(&key, self.threshold);
            if pos < page.len() && *page.key(pos) == key {
                tracing::trace!(target: "arbor::insert", page = page.id().0, slot = pos, "replaced value");
                let CellValue::Data(slot) = page.value_mut(pos) else {
                    return Err(ArborError::Corruption("leaf cell holds a child"));
                };
                return Ok(Some(std::mem::replace(slot, value)));
            }
            tracing::trace!(target: "arbor::insert", page = page.id().0, slot = pos, key = ?key, "inserted cell");
            page.insert_at(pos, key, CellValue::Data(value))?;
            return Ok(None);
        }

        if page.is_empty() {
            return Err(ArborError::Corruption("internal page without children"));
        }
        let mut pos = page.lower_bound(&key, self.threshold).min(page.len() - 1);
        if self.child_page(page, pos)?.is_full() {
            let sibling_id = self.store.allocate_page()?;
            self.split_child(page, pos, sibling_id)?;
            if key > *page.key(pos) {
                pos += 1;
            }
        }
        let raised = (key > *page.key(pos)).then(|| key.clone());
        let child = self.child_page(page, pos)?;
        let previous = self.insert_into(child, key, value)?;
        if let Some(key) = raised {
            page.set_key(pos, key);
        }
        Ok(previous)
    }
}
