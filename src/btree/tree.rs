//! # B-Tree Operations
//!
//! Search, insertion, and deletion over the paged classic B-Tree, plus
//! the handle lifecycle. Both mutating paths are single-pass top-down:
//! the descent makes every node safe before stepping into it, so no
//! operation ever revisits an ancestor.
//!
//! ## Insert
//!
//! A full node met on the way down is split immediately: the median
//! element moves up into the (guaranteed non-full) parent and the upper
//! half moves into a fresh right sibling. When the root itself is full
//! a new root is allocated first, making the tree one level taller, and
//! the old root becomes its only child before the split.
//!
//! Inserting a key that already exists replaces its payload in place,
//! wherever along the descent the key is found.
//!
//! ## Delete
//!
//! A minimal node met on the way down is thickened before descending:
//! borrow a key through the parent from a sibling that can spare one,
//! else merge with a sibling, pulling the separator down. When the key
//! lives in an internal node it is replaced by its in-order predecessor
//! (or successor), which is removed from the child subtree by the same
//! descent rules; when both adjacent children are minimal they are
//! merged and the deletion recurses into the merged node. An internal
//! root left with zero keys collapses onto its only child.
//!
//! At odd orders a merge of two minimal siblings lands on `m` keys,
//! one over the steady-state bound; the unwind splits any node still
//! over the bound back through its parent, so no completed operation
//! leaves an over-capacity page behind.
//!
//! ## Write Ordering
//!
//! Within one operation children are persisted before the parent that
//! references them, and every mutated node is written before any
//! dependent read elsewhere. There is no multi-page atomicity.

use log::debug;

use crate::btree::{audit, compact, iter, Element, Node};
use crate::error::{Error, Result};
use crate::storage::{Pager, NO_NODE};

/// Handle to one B-Tree index file.
#[derive(Debug)]
pub struct BTree {
    pager: Pager,
}

impl BTree {
    /// Opens `path`, initializing a fresh index when the file is empty.
    pub fn open<P: AsRef<std::path::Path>>(path: P, order: usize) -> Result<Self> {
        Ok(Self {
            pager: Pager::open(path, order)?,
        })
    }

    pub(crate) fn pager(&self) -> &Pager {
        &self.pager
    }

    pub(crate) fn pager_mut(&mut self) -> &mut Pager {
        &mut self.pager
    }

    pub fn order(&self) -> usize {
        self.pager.order()
    }

    pub fn root_id(&self) -> i32 {
        self.pager.root_id()
    }

    pub fn node_count(&self) -> i32 {
        self.pager.node_count()
    }

    pub fn free_count(&self) -> usize {
        self.pager.free_count()
    }

    /// Current physical file length in bytes.
    pub fn file_len(&self) -> u64 {
        self.pager.file_len()
    }

    /// Persists the header and flushes OS buffers.
    pub fn commit(&mut self) -> Result<()> {
        self.pager.commit()
    }

    /// Persists the free list and header, then releases the file.
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        self.pager.close()
    }

    /// Standard descent: returns the element stored under `key`, from
    /// whichever level of the tree holds it.
    pub fn try_search(&self, key: i32) -> Result<Option<Element>> {
        let mut next = self.pager.root_id();
        while next != NO_NODE {
            let node = self.pager.read_node(next)?;
            let i = node.search_index(key);
            if i < node.num_keys() && node.key(i).key == key {
                return Ok(Some(node.key(i)));
            }
            if node.is_leaf() {
                return Ok(None);
            }
            next = node.kid(i);
        }
        Ok(None)
    }

    /// Smallest element, found along the leftmost spine.
    pub fn find_min(&self) -> Result<Option<Element>> {
        let mut next = self.pager.root_id();
        while next != NO_NODE {
            let node = self.pager.read_node(next)?;
            if node.is_leaf() {
                if node.num_keys() == 0 {
                    return Ok(None);
                }
                return Ok(Some(node.key(0)));
            }
            next = node.kid(0);
        }
        Ok(None)
    }

    /// Largest element, found along the rightmost spine.
    pub fn find_max(&self) -> Result<Option<Element>> {
        let mut next = self.pager.root_id();
        while next != NO_NODE {
            let node = self.pager.read_node(next)?;
            if node.is_leaf() {
                if node.num_keys() == 0 {
                    return Ok(None);
                }
                return Ok(Some(node.key(node.num_keys() - 1)));
            }
            next = node.kid(node.num_keys());
        }
        Ok(None)
    }

    pub fn insert(&mut self, key: i32, data: i32) -> Result<()> {
        self.insert_element(Element::new(key, data))
    }

    /// Top-down insertion with preemptive splitting.
    pub fn insert_element(&mut self, e: Element) -> Result<()> {
        let root_id = self.pager.root_id();
        if root_id == NO_NODE {
            let id = self.pager.allocate()?;
            let mut root = Node::new(self.order(), id, true);
            root.leaf_insert(0, e);
            self.pager.write_node(&root)?;
            self.pager.set_root_id(id)?;
            return Ok(());
        }

        let mut root = self.pager.read_node(root_id)?;
        if root.is_full() {
            // Grow one level: the old root becomes the only child of a
            // fresh root, then splits into it.
            let new_root_id = self.pager.allocate()?;
            let mut new_root = Node::new(self.order(), new_root_id, false);
            new_root.set_kid(0, root_id);
            self.pager.set_root_id(new_root_id)?;
            self.split_child(&mut new_root, 0, &mut root)?;
            self.insert_nonfull(new_root, e)
        } else {
            self.insert_nonfull(root, e)
        }
    }

    /// Splits the full child `y` (already loaded as `x.kids[i]`),
    /// promoting its median into `x`. Children are persisted before the
    /// parent that points at the new sibling.
    fn split_child(&mut self, x: &mut Node, i: usize, y: &mut Node) -> Result<()> {
        let sibling_id = self.pager.allocate()?;
        let (median, sibling) = y.split_right(sibling_id);
        x.insert_separator(i, median, sibling_id);

        self.pager.write_node(y)?;
        self.pager.write_node(&sibling)?;
        self.pager.write_node(x)?;
        Ok(())
    }

    /// Descends into a node known not to be full, splitting any full
    /// child before stepping into it.
    fn insert_nonfull(&mut self, mut x: Node, e: Element) -> Result<()> {
        if x.is_leaf() {
            let pos = x.search_index(e.key);
            if pos < x.num_keys() && x.key(pos).key == e.key {
                x.set_key(pos, e);
            } else {
                x.leaf_insert(pos, e);
            }
            return self.pager.write_node(&x);
        }

        let mut i = x.search_index(e.key);
        if i < x.num_keys() && x.key(i).key == e.key {
            x.set_key(i, e);
            return self.pager.write_node(&x);
        }

        let mut child = self.pager.read_node(x.kid(i))?;
        if child.is_full() {
            self.split_child(&mut x, i, &mut child)?;
            // Re-pick between the two halves.
            if x.key(i).key == e.key {
                x.set_key(i, e);
                return self.pager.write_node(&x);
            }
            if e.key > x.key(i).key {
                i += 1;
            }
            child = self.pager.read_node(x.kid(i))?;
        }
        self.insert_nonfull(child, e)
    }

    /// Top-down deletion with preemptive rebalancing. Only `key`
    /// determines the match; `data` is accepted for symmetry with
    /// [`BTree::insert`] but does not participate. Deleting an absent
    /// key is a no-op.
    pub fn delete(&mut self, key: i32, _data: i32) -> Result<()> {
        let root_id = self.pager.root_id();
        if root_id == NO_NODE {
            return Ok(());
        }

        let root = self.pager.read_node(root_id)?;
        self.delete_from(root, key)?;

        // Root collapse: an internal root emptied by a child merge is
        // replaced by its only child and its page reclaimed.
        let root = self.pager.read_node(self.pager.root_id())?;
        if !root.is_leaf() && root.num_keys() == 0 {
            let orphan = root.id();
            self.pager.set_root_id(root.kid(0))?;
            self.pager.zero(orphan)?;
            self.pager.free(orphan)?;
            debug!("root collapse: {} -> {}", orphan, self.pager.root_id());
        }
        Ok(())
    }

    /// Removes `key` from the subtree rooted at `x`. On entry `x` is
    /// safe: it is the root, or it holds at least `t` keys.
    fn delete_from(&mut self, mut x: Node, key: i32) -> Result<()> {
        let i = x.search_index(key);
        let found = i < x.num_keys() && x.key(i).key == key;

        if x.is_leaf() {
            if found {
                x.leaf_remove(i);
                self.pager.write_node(&x)?;
            }
            return Ok(());
        }

        if found {
            // Replace with the predecessor or successor when a flanking
            // child can spare a key; otherwise merge the flanks and
            // push the deletion into the merged node.
            let left = self.pager.read_node(x.kid(i))?;
            if left.has_spare() {
                let pred = self.delete_max(left)?;
                x.set_key(i, pred);
                return self.pager.write_node(&x);
            }

            let right = self.pager.read_node(x.kid(i + 1))?;
            if right.has_spare() {
                let succ = self.delete_min(right)?;
                x.set_key(i, succ);
                return self.pager.write_node(&x);
            }

            let merged = self.merge_children(&mut x, i, left, right)?;
            let overfull = merged.num_keys() >= self.order();
            let merged_id = merged.id();
            self.delete_from(merged, key)?;
            if overfull {
                self.resolve_overfull(&mut x, i, merged_id)?;
            }
            return Ok(());
        }

        let (i, child) = self.fix_child(&mut x, i)?;
        let overfull = child.num_keys() >= self.order();
        let child_id = child.id();
        self.delete_from(child, key)?;
        if overfull {
            self.resolve_overfull(&mut x, i, child_id)?;
        }
        Ok(())
    }

    /// Removes and returns the largest element of the subtree at `x`,
    /// thickening each node along the rightmost spine before entering.
    fn delete_max(&mut self, mut x: Node) -> Result<Element> {
        if x.is_leaf() {
            let e = x.leaf_remove(x.num_keys() - 1);
            self.pager.write_node(&x)?;
            return Ok(e);
        }
        let i = x.num_keys();
        let (i, child) = self.fix_child(&mut x, i)?;
        let overfull = child.num_keys() >= self.order();
        let child_id = child.id();
        let e = self.delete_max(child)?;
        if overfull {
            self.resolve_overfull(&mut x, i, child_id)?;
        }
        Ok(e)
    }

    /// Mirror of [`BTree::delete_max`] along the leftmost spine.
    fn delete_min(&mut self, mut x: Node) -> Result<Element> {
        if x.is_leaf() {
            let e = x.leaf_remove(0);
            self.pager.write_node(&x)?;
            return Ok(e);
        }
        let (i, child) = self.fix_child(&mut x, 0)?;
        let overfull = child.num_keys() >= self.order();
        let child_id = child.id();
        let e = self.delete_min(child)?;
        if overfull {
            self.resolve_overfull(&mut x, i, child_id)?;
        }
        Ok(e)
    }

    /// Makes `x.kids[i]` safe to descend into: borrows through the
    /// parent from a sibling with a spare key, else merges with one
    /// (preferring the right sibling when it exists). Returns the
    /// possibly-shifted child index and the loaded child. Every node
    /// mutated here is persisted before returning.
    fn fix_child(&mut self, x: &mut Node, i: usize) -> Result<(usize, Node)> {
        if x.num_keys() == 0 {
            return Err(Error::corruption(format!(
                "internal node {} has no separators to rebalance through",
                x.id()
            )));
        }

        let mut i = i;
        let mut child = self.pager.read_node(x.kid(i))?;

        while child.is_minimal() {
            if i > 0 {
                let mut left = self.pager.read_node(x.kid(i - 1))?;
                if left.has_spare() {
                    // Right-rotation through the separator at i-1.
                    let (donor, donor_kid) = left.take_last();
                    child.push_front(x.key(i - 1), donor_kid);
                    x.set_key(i - 1, donor);
                    self.pager.write_node(&left)?;
                    self.pager.write_node(&child)?;
                    self.pager.write_node(x)?;
                    continue;
                }
            }

            if i < x.num_keys() {
                let mut right = self.pager.read_node(x.kid(i + 1))?;
                if right.has_spare() {
                    // Left-rotation through the separator at i.
                    let (donor, donor_kid) = right.take_first();
                    child.push_back(x.key(i), donor_kid);
                    x.set_key(i, donor);
                    self.pager.write_node(&right)?;
                    self.pager.write_node(&child)?;
                    self.pager.write_node(x)?;
                    continue;
                }
                child = self.merge_children(x, i, child, right)?;
                continue;
            }

            // Rightmost child with an unspareable left sibling.
            let left = self.pager.read_node(x.kid(i - 1))?;
            child = self.merge_children(x, i - 1, left, child)?;
            i -= 1;
        }

        Ok((i, child))
    }

    /// An odd-order merge puts its product at `m` keys, one over the
    /// steady-state bound (two minimal siblings plus their separator).
    /// Once the removal beneath it has finished, the node is re-read
    /// and, if still over the bound, split back through its parent —
    /// the parent has the room the merge vacated, and with the descent
    /// over the split cannot re-trigger the merge. A node that was
    /// already at `m` keys when its own parent stepped into it is
    /// resolved one level up by the same rule on the unwind.
    fn resolve_overfull(&mut self, x: &mut Node, i: usize, child_id: i32) -> Result<()> {
        let mut child = self.pager.read_node(child_id)?;
        if child.num_keys() >= self.order() {
            self.split_child(x, i, &mut child)?;
        }
        Ok(())
    }

    /// Merges `x.kids[i]` and `x.kids[i+1]` through the separator at
    /// `i`, retiring the right page. Returns the merged left node.
    fn merge_children(
        &mut self,
        x: &mut Node,
        i: usize,
        mut left: Node,
        right: Node,
    ) -> Result<Node> {
        let (sep, right_id) = x.remove_separator(i);
        debug_assert_eq!(right_id, right.id());
        left.merge_from(sep, &right);

        self.pager.write_node(&left)?;
        self.pager.write_node(x)?;
        self.pager.zero(right_id)?;
        self.pager.free(right_id)?;
        Ok(left)
    }

    /// Number of elements in the subtree rooted at `subroot`.
    pub fn count_keys(&self, subroot: i32) -> Result<u64> {
        if subroot == NO_NODE {
            return Ok(0);
        }
        let node = self.pager.read_node(subroot)?;
        let mut total = node.num_keys() as u64;
        if !node.is_leaf() {
            for j in 0..=node.num_keys() {
                total += self.count_keys(node.kid(j))?;
            }
        }
        Ok(total)
    }

    /// Lazy in-order traversal of all elements. Peak memory is
    /// proportional to tree height, not tree size.
    pub fn elements(&self) -> iter::Elements<'_> {
        iter::Elements::new(&self.pager)
    }

    /// Lazy in-order traversal of all keys.
    pub fn keys(&self) -> iter::Keys<'_> {
        iter::Keys::new(&self.pager)
    }

    /// Full structural audit from the root.
    pub fn perform_full_audit(&self) -> Result<audit::AuditReport> {
        audit::full_audit(&self.pager)
    }

    /// Verifies cycles, in-node key order, subtree key ranges, equal
    /// leaf depth, and the key-count upper bound in one pass.
    pub fn validate_integrity(&self) -> Result<()> {
        audit::validate(&self.pager)
    }

    /// Fails if any reachable non-root node holds zero keys.
    pub fn check_ghost(&self) -> Result<()> {
        audit::check_ghost(&self.pager)
    }

    /// Counts child references pointing outside `[0, node_count)`.
    pub fn count_ghost(&self) -> Result<u64> {
        audit::count_ghost(&self.pager)
    }

    /// Counts allocated ids that are neither reachable nor free.
    pub fn count_zombies(&self) -> Result<u64> {
        audit::count_zombies(&self.pager)
    }

    /// Fails if any reachable non-root node is below minimum occupancy.
    pub fn check_underflow(&self) -> Result<()> {
        audit::check_underflow(&self.pager)
    }

    /// Moves every zombie id onto the free list; returns how many.
    pub fn reclaim_orphans(&mut self) -> Result<u64> {
        audit::reclaim_orphans(&mut self.pager)
    }

    /// Rewrites the file with a contiguous live-node labeling, dropping
    /// zombies and the free list, then atomically swaps it in place.
    pub fn compact(&mut self) -> Result<()> {
        compact::compact(self)
    }
}
