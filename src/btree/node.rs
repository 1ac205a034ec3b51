//! # Node Page Image
//!
//! In-memory form of one on-disk node page. Capacity is fixed by the
//! tree order `m`: physically `m` key slots and `m + 1` child slots,
//! of which at most `m - 1` keys are logically live in steady state.
//! The spare key slot absorbs the transient overfull state a merge can
//! produce (two minimal siblings plus their separator reach `m` keys
//! when `m` is odd); the operation that created it splits the node
//! back under the limit before returning.
//!
//! ## Page Body Layout
//!
//! ```text
//! Offset        Size  Field
//! ------        ----  ----------------------------------
//! 0             4     leaf       i32, 0 or 1
//! 4             4     num_keys   i32
//! 8             4     id         i32
//! 12            8*m   keys       m x { key i32, data i32 }
//! 12 + 8m       4*(m+1)  kids    m+1 x child id i32
//! ```
//!
//! Little-endian throughout. Slots at and past the logical length hold
//! the sentinel `(-1, -1)` (keys) or `-1` (kids); leaf pages serialize
//! all child slots as `-1`. Every shifting helper below maintains that
//! invariant so a page can be encoded straight from the arrays.

use crate::btree::{min_degree, Element, SENTINEL};
use crate::error::{Error, Result};
use crate::storage::NO_NODE;

#[derive(Debug, Clone)]
pub struct Node {
    id: i32,
    leaf: bool,
    num_keys: usize,
    keys: Vec<Element>,
    kids: Vec<i32>,
}

impl Node {
    /// Empty node with all slots vacated.
    pub fn new(order: usize, id: i32, leaf: bool) -> Self {
        Self {
            id,
            leaf,
            num_keys: 0,
            keys: vec![SENTINEL; order],
            kids: vec![NO_NODE; order + 1],
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: i32) {
        self.id = id;
    }

    pub fn is_leaf(&self) -> bool {
        self.leaf
    }

    pub fn num_keys(&self) -> usize {
        self.num_keys
    }

    pub fn order(&self) -> usize {
        self.keys.len()
    }

    /// Logically live elements.
    pub fn elements(&self) -> &[Element] {
        &self.keys[..self.num_keys]
    }

    pub fn key(&self, i: usize) -> Element {
        debug_assert!(i < self.num_keys);
        self.keys[i]
    }

    pub(crate) fn set_key(&mut self, i: usize, e: Element) {
        debug_assert!(i < self.num_keys);
        self.keys[i] = e;
    }

    pub fn kid(&self, i: usize) -> i32 {
        debug_assert!(i <= self.num_keys);
        self.kids[i]
    }

    pub(crate) fn set_kid(&mut self, i: usize, id: i32) {
        self.kids[i] = id;
    }

    /// A node at or past `m - 1` keys must be split before descending.
    pub fn is_full(&self) -> bool {
        self.num_keys + 1 >= self.order()
    }

    /// Whether this node can donate a key (rotation) or source a
    /// predecessor/successor without pre-thickening: `num_keys >= t`.
    pub(crate) fn has_spare(&self) -> bool {
        self.num_keys >= min_degree(self.order())
    }

    /// Whether a non-root node is below the safe descent threshold.
    pub(crate) fn is_minimal(&self) -> bool {
        self.num_keys < min_degree(self.order())
    }

    /// Least index `i` with `keys[i].key >= key`; `num_keys` if none.
    pub fn search_index(&self, key: i32) -> usize {
        self.keys[..self.num_keys].partition_point(|e| e.key < key)
    }

    /// Inserts an element into a leaf at `pos`, shifting the tail right.
    pub(crate) fn leaf_insert(&mut self, pos: usize, e: Element) {
        debug_assert!(self.leaf && pos <= self.num_keys);
        for j in (pos..self.num_keys).rev() {
            self.keys[j + 1] = self.keys[j];
        }
        self.keys[pos] = e;
        self.num_keys += 1;
    }

    /// Removes the element at `pos` from a leaf, shifting the tail left.
    pub(crate) fn leaf_remove(&mut self, pos: usize) -> Element {
        debug_assert!(self.leaf && pos < self.num_keys);
        let removed = self.keys[pos];
        for j in pos..self.num_keys - 1 {
            self.keys[j] = self.keys[j + 1];
        }
        self.keys[self.num_keys - 1] = SENTINEL;
        self.num_keys -= 1;
        removed
    }

    /// Inserts a separator and its right child into an internal node.
    pub(crate) fn insert_separator(&mut self, pos: usize, e: Element, right_kid: i32) {
        debug_assert!(!self.leaf && pos <= self.num_keys);
        for j in (pos..self.num_keys).rev() {
            self.keys[j + 1] = self.keys[j];
        }
        for j in (pos + 1..=self.num_keys).rev() {
            self.kids[j + 1] = self.kids[j];
        }
        self.keys[pos] = e;
        self.kids[pos + 1] = right_kid;
        self.num_keys += 1;
    }

    /// Removes the separator at `pos` and its right child, shifting the
    /// tails left. Returns the removed pair.
    pub(crate) fn remove_separator(&mut self, pos: usize) -> (Element, i32) {
        debug_assert!(!self.leaf && pos < self.num_keys);
        let sep = self.keys[pos];
        let right_kid = self.kids[pos + 1];
        for j in pos..self.num_keys - 1 {
            self.keys[j] = self.keys[j + 1];
        }
        for j in pos + 1..self.num_keys {
            self.kids[j] = self.kids[j + 1];
        }
        self.keys[self.num_keys - 1] = SENTINEL;
        self.kids[self.num_keys] = NO_NODE;
        self.num_keys -= 1;
        (sep, right_kid)
    }

    /// Takes the last element and (if internal) the last child,
    /// vacating their slots. Donor side of a right-rotation.
    pub(crate) fn take_last(&mut self) -> (Element, i32) {
        debug_assert!(self.num_keys > 0);
        let e = self.keys[self.num_keys - 1];
        self.keys[self.num_keys - 1] = SENTINEL;
        let kid = self.kids[self.num_keys];
        self.kids[self.num_keys] = NO_NODE;
        self.num_keys -= 1;
        (e, kid)
    }

    /// Takes the first element and (if internal) the first child,
    /// shifting everything left. Donor side of a left-rotation.
    pub(crate) fn take_first(&mut self) -> (Element, i32) {
        debug_assert!(self.num_keys > 0);
        let e = self.keys[0];
        let kid = self.kids[0];
        for j in 0..self.num_keys - 1 {
            self.keys[j] = self.keys[j + 1];
        }
        for j in 0..self.num_keys {
            self.kids[j] = self.kids[j + 1];
        }
        self.keys[self.num_keys - 1] = SENTINEL;
        self.kids[self.num_keys] = NO_NODE;
        self.num_keys -= 1;
        (e, kid)
    }

    /// Prepends an element and (if internal) a leading child.
    /// Receiver side of a right-rotation.
    pub(crate) fn push_front(&mut self, e: Element, kid: i32) {
        for j in (0..self.num_keys).rev() {
            self.keys[j + 1] = self.keys[j];
        }
        for j in (0..=self.num_keys).rev() {
            self.kids[j + 1] = self.kids[j];
        }
        self.keys[0] = e;
        self.kids[0] = if self.leaf { NO_NODE } else { kid };
        self.num_keys += 1;
    }

    /// Appends an element and (if internal) a trailing child.
    /// Receiver side of a left-rotation.
    pub(crate) fn push_back(&mut self, e: Element, kid: i32) {
        self.keys[self.num_keys] = e;
        self.kids[self.num_keys + 1] = if self.leaf { NO_NODE } else { kid };
        self.num_keys += 1;
    }

    /// Splits off the upper half into a fresh right sibling, promoting
    /// the median. The receiver keeps `t - 1` elements; the sibling
    /// takes the `num_keys - t` above the median (and the matching
    /// children when internal). Handles both a full node (`m - 1`) and
    /// the transiently overfull `m`-key state a merge can leave behind.
    pub(crate) fn split_right(&mut self, sibling_id: i32) -> (Element, Node) {
        let t = min_degree(self.order());
        debug_assert!(self.num_keys >= t);

        let median = self.keys[t - 1];
        let mut sibling = Node::new(self.order(), sibling_id, self.leaf);

        for j in t..self.num_keys {
            sibling.keys[j - t] = self.keys[j];
            self.keys[j] = SENTINEL;
        }
        if !self.leaf {
            for j in t..=self.num_keys {
                sibling.kids[j - t] = self.kids[j];
                self.kids[j] = NO_NODE;
            }
        }
        sibling.num_keys = self.num_keys - t;

        self.keys[t - 1] = SENTINEL;
        self.num_keys = t - 1;

        (median, sibling)
    }

    /// Absorbs the pulled-down separator and the entire right sibling.
    pub(crate) fn merge_from(&mut self, sep: Element, right: &Node) {
        debug_assert_eq!(self.leaf, right.leaf);
        debug_assert!(self.num_keys + 1 + right.num_keys <= self.order());

        self.keys[self.num_keys] = sep;
        for j in 0..right.num_keys {
            self.keys[self.num_keys + 1 + j] = right.keys[j];
        }
        if !self.leaf {
            for j in 0..=right.num_keys {
                self.kids[self.num_keys + 1 + j] = right.kids[j];
            }
        }
        self.num_keys += 1 + right.num_keys;
    }

    /// Encodes the page body into `buf`, which must be exactly
    /// `page_size_for(order)` bytes.
    pub(crate) fn encode_into(&self, buf: &mut [u8]) {
        let m = self.order();
        debug_assert_eq!(buf.len(), crate::storage::page_size_for(m));

        buf[0..4].copy_from_slice(&(self.leaf as i32).to_le_bytes());
        buf[4..8].copy_from_slice(&(self.num_keys as i32).to_le_bytes());
        buf[8..12].copy_from_slice(&self.id.to_le_bytes());

        let mut off = 12;
        for e in &self.keys {
            buf[off..off + 4].copy_from_slice(&e.key.to_le_bytes());
            buf[off + 4..off + 8].copy_from_slice(&e.data.to_le_bytes());
            off += 8;
        }
        for kid in &self.kids {
            buf[off..off + 4].copy_from_slice(&kid.to_le_bytes());
            off += 4;
        }
    }

    /// Decodes a page body. `num_keys` outside `0..=order` marks the
    /// page as corrupt (the spare slot makes `order` itself legal).
    pub(crate) fn decode(buf: &[u8], order: usize) -> Result<Self> {
        debug_assert_eq!(buf.len(), crate::storage::page_size_for(order));

        let read_i32 =
            |off: usize| i32::from_le_bytes(buf[off..off + 4].try_into().unwrap());

        let leaf = match read_i32(0) {
            0 => false,
            1 => true,
            other => {
                return Err(Error::corruption(format!(
                    "node leaf flag must be 0 or 1, found {other}"
                )))
            }
        };

        let num_keys = read_i32(4);
        if num_keys < 0 || num_keys as usize > order {
            return Err(Error::corruption(format!(
                "node key count {num_keys} outside 0..={order}"
            )));
        }

        let id = read_i32(8);

        let mut keys = Vec::with_capacity(order);
        let mut off = 12;
        for _ in 0..order {
            keys.push(Element::new(read_i32(off), read_i32(off + 4)));
            off += 8;
        }

        let mut kids = Vec::with_capacity(order + 1);
        for _ in 0..=order {
            kids.push(read_i32(off));
            off += 4;
        }

        Ok(Self {
            id,
            leaf,
            num_keys: num_keys as usize,
            keys,
            kids,
        })
    }
}
