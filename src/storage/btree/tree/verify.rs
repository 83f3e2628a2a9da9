use std::fmt::Write as _;

use super::{Tree, TreeCtx};
use crate::storage::btree::codecs::{KeyCodec, ValCodec};
use crate::storage::btree::page::{ChildRef, Page};
use crate::types::{ArborError, Result};

/// Summary of a verified tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeShape {
    /// Levels including the root; 1 for an empty tree.
    pub height: usize,
    /// Pages visited, root included.
    pub pages: usize,
    /// Leaf pages visited.
    pub leaves: usize,
    /// Keys stored across all leaves.
    pub keys: usize,
}

struct Span<K> {
    min: K,
    max: K,
    height: usize,
}

impl<K: KeyCodec, V: ValCodec> Tree<K, V> {
    /// Walks every page, resident or in the store, and checks the structural
    /// invariants: sorted slots, separators equal to subtree maxima, disjoint
    /// sibling ranges, no empty pages below the root and leaves at one depth.
    pub fn verify(&self) -> Result<TreeShape> {
        let shape = self.ctx.shape_of(&self.root)?;
        if shape.keys != self.len {
            return Err(ArborError::Corruption("key count differs from tracked length"));
        }
        if shape.height != self.height {
            return Err(ArborError::Corruption("height differs from tracked height"));
        }
        Ok(shape)
    }

    /// Renders every page and key, indented by depth. For debugging only.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.ctx.dump_page(&self.root, 0, &mut out);
        out
    }
}

impl TreeCtx {
    pub(super) fn shape_of<K: KeyCodec, V: ValCodec>(&self, root: &Page<K, V>) -> Result<TreeShape> {
        if root.is_leaf() {
            return Err(ArborError::Corruption("root page is a leaf"));
        }
        let mut shape = TreeShape::default();
        let span = self.check_page(root, &mut shape)?;
        shape.height = span.map_or(1, |span| span.height);
        Ok(shape)
    }

    fn check_page<K: KeyCodec, V: ValCodec>(
        &self,
        page: &Page<K, V>,
        shape: &mut TreeShape,
    ) -> Result<Option<Span<K>>> {
        shape.pages += 1;
        if page.fanout() != self.fanout {
            return Err(ArborError::Corruption("page fanout differs from tree fanout"));
        }
        if !page.keys().zip(page.keys().skip(1)).all(|(a, b)| a < b) {
            return Err(ArborError::Corruption("slot keys out of order"));
        }
        if page.is_leaf() {
            shape.leaves += 1;
            shape.keys += page.len();
            if (0..page.len()).any(|pos| page.data(pos).is_none()) {
                return Err(ArborError::Corruption("leaf cell holds a child"));
            }
            return Ok(match (page.keys().next(), page.max_key()) {
                (Some(min), Some(max)) => Some(Span {
                    min: min.clone(),
                    max: max.clone(),
                    height: 1,
                }),
                _ => None,
            });
        }

        let mut span: Option<Span<K>> = None;
        for pos in 0..page.len() {
            let child_span = match page.child(pos) {
                Some(ChildRef::InMemory(child)) => self.check_page(child, shape)?,
                Some(ChildRef::OnDisk(id)) => {
                    let child = self.load_page::<K, V>(*id)?;
                    self.check_page(&child, shape)?
                }
                None => return Err(ArborError::Corruption("internal cell holds a value")),
            };
            let Some(child_span) = child_span else {
                return Err(ArborError::Corruption("empty page below the root"));
            };
            if child_span.max != *page.key(pos) {
                return Err(ArborError::Corruption("separator is not the subtree maximum"));
            }
            span = Some(match span {
                None => Span {
                    min: child_span.min,
                    max: child_span.max,
                    height: child_span.height + 1,
                },
                Some(acc) => {
                    if child_span.min <= acc.max {
                        return Err(ArborError::Corruption("sibling subtrees overlap"));
                    }
                    if child_span.height + 1 != acc.height {
                        return Err(ArborError::Corruption("leaves at different depths"));
                    }
                    Span {
                        min: acc.min,
                        max: child_span.max,
                        height: acc.height,
                    }
                }
            });
        }
        Ok(span)
    }

    fn dump_page<K: KeyCodec, V: ValCodec>(&self, page: &Page<K, V>, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        let kind = if page.is_leaf() { "leaf" } else { "internal" };
        let _ = writeln!(
            out,
            "{indent}{kind} page {} ({}/{} cells)",
            page.id(),
            page.len(),
            page.fanout()
        );
        for pos in 0..page.len() {
            let key = page.key(pos);
            match page.child(pos) {
                None => {
                    let _ = writeln!(out, "{indent}  {key:?}");
                }
                Some(ChildRef::InMemory(child)) => {
                    let _ = writeln!(out, "{indent}  {key:?} ->");
                    self.dump_page(child, depth + 2, out);
                }
                Some(ChildRef::OnDisk(id)) => match self.load_page::<K, V>(*id) {
                    Ok(child) => {
                        let _ = writeln!(out, "{indent}  {key:?} -> (on disk)");
                        self.dump_page(&child, depth + 2, out);
                    }
                    Err(err) => {
                        let _ = writeln!(out, "{indent}  {key:?} -> page {id} unavailable: {err}");
                    }
                },
            }
        }
    }
}
