//! # Bulk Load
//!
//! Builds a fresh index file from a sorted, duplicate-free element
//! list, bypassing the insertion path entirely. The builder sizes the
//! tree from a target leaf occupancy:
//!
//! ```text
//! leaf_target = clamp(floor((m - 1) * fill), 1, m - 1)
//! height(n)   = least h >= 1 with leaf_target * m^(h-1) >= n
//! ```
//!
//! Every internal node carves its range into children that all build
//! to the same height, so every leaf lands at the same depth. The
//! fanout aims for capacity-sized children and is clamped so each
//! child stays within what its height can actually hold (at least
//! `2^(h-1) - 1` elements, at most `m^h - 1`); the elements are then
//! spread as evenly as the carve allows, never differing by more than
//! one between siblings. A sparse fill target can imply a height the
//! element count cannot populate; the height falls back until the
//! tree is realizable, letting leaves run past the target density
//! rather than the tree out of balance.
//!
//! Nodes are written in post-order, so ids increase monotonically and
//! the root carries the largest id. The builder owns its pager for the
//! duration of one load and releases it before returning.

use std::path::Path;

use log::debug;

use crate::btree::{Element, Node};
use crate::error::{Error, Result};
use crate::storage::{Pager, NO_NODE};

/// Default target leaf density.
pub const FILL_DEFAULT: f64 = 0.8;

/// Builds a B-Tree file at `path` from `elements`, which must be
/// strictly increasing by key. `fill` is the target leaf density in
/// `[0.5, 1.0]`. Any existing file at `path` is truncated.
pub fn build_from_sorted<P: AsRef<Path>>(
    elements: &[Element],
    path: P,
    order: usize,
    fill: f64,
) -> Result<()> {
    if !(0.5..=1.0).contains(&fill) {
        return Err(Error::invalid_argument(format!(
            "fill factor {fill} outside 0.5..=1.0"
        )));
    }
    for pair in elements.windows(2) {
        if pair[0].key >= pair[1].key {
            return Err(Error::invalid_argument(format!(
                "input not strictly increasing at key {}",
                pair[1].key
            )));
        }
    }

    let mut pager = Pager::create(path, order)?;
    let leaf_target = (((order - 1) as f64 * fill).floor() as usize).clamp(1, order - 1);

    let root = if elements.is_empty() {
        NO_NODE
    } else {
        let mut loader = Loader {
            pager: &mut pager,
            leaf_target,
        };
        let mut height = loader.height_for(elements.len());
        while height > 1 && (elements.len() as u64) < min_elements(height) {
            height -= 1;
        }
        loader.build(elements, height)?
    };

    pager.set_root_id(root)?;
    pager.close()?;
    debug!(
        "bulk loaded {} elements (order {order}, fill {fill})",
        elements.len()
    );
    Ok(())
}

/// Fewest elements a subtree of `height` can hold: one separator and
/// two minimal children at every internal level, `2^h - 1`.
fn min_elements(height: u32) -> u64 {
    (1u64 << height) - 1
}

/// Most elements a subtree of `height` can hold with every node full:
/// `m^h - 1`.
fn max_elements(order: usize, height: u32) -> u64 {
    (order as u64).saturating_pow(height) - 1
}

struct Loader<'a> {
    pager: &'a mut Pager,
    leaf_target: usize,
}

impl Loader<'_> {
    /// Least height whose target leaf capacity covers `n` elements.
    fn height_for(&self, n: usize) -> u32 {
        let m = self.pager.order() as u64;
        let mut height = 1;
        let mut cap = self.leaf_target as u64;
        while cap < n as u64 {
            height += 1;
            cap = cap.saturating_mul(m);
        }
        height
    }

    /// Builds a subtree of exactly `height` levels over `elems` and
    /// returns its root id. `elems` must fit that height:
    /// `min_elements(height) <= n <= max_elements(height)`.
    /// Post-order: children are allocated and written before parents.
    fn build(&mut self, elems: &[Element], height: u32) -> Result<i32> {
        let order = self.pager.order();
        let n = elems.len();

        if height == 1 {
            debug_assert!(n < order);
            let id = self.pager.allocate()?;
            let mut leaf = Node::new(order, id, true);
            for (pos, &e) in elems.iter().enumerate() {
                leaf.leaf_insert(pos, e);
            }
            self.pager.write_node(&leaf)?;
            return Ok(id);
        }

        // Children all build to height - 1. Aim for capacity-sized
        // children; clamp the fanout so every child stays inside that
        // height's element bounds, then spread the range evenly.
        let target =
            (self.leaf_target as u64).saturating_mul((order as u64).saturating_pow(height - 2));
        let child_min = min_elements(height - 1);
        let child_max = max_elements(order, height - 1);

        let wanted = (n as u64 + 1).div_ceil(target + 1);
        let lo = 2u64.max((n as u64 + 1).div_ceil(child_max + 1));
        let hi = (order as u64).min((n as u64 + 1) / (child_min + 1));
        let fanout = wanted.clamp(lo, hi) as usize;

        let spread = n - (fanout - 1);
        let base = spread / fanout;
        let extra = spread % fanout;

        let mut kid_ids = Vec::with_capacity(fanout);
        let mut seps = Vec::with_capacity(fanout - 1);
        let mut rest = elems;
        for c in 0..fanout {
            let take = base + usize::from(c < extra);
            kid_ids.push(self.build(&rest[..take], height - 1)?);
            if c + 1 < fanout {
                seps.push(rest[take]);
                rest = &rest[take + 1..];
            } else {
                rest = &rest[take..];
            }
        }
        debug_assert!(rest.is_empty());

        let id = self.pager.allocate()?;
        let mut node = Node::new(order, id, false);
        node.set_kid(0, kid_ids[0]);
        for (j, &sep) in seps.iter().enumerate() {
            node.insert_separator(j, sep, kid_ids[j + 1]);
        }
        self.pager.write_node(&node)?;
        Ok(id)
    }
}
