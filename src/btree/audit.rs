//! # Structural Audit
//!
//! Read-only checks over the on-disk tree, plus the one repair entry
//! point ([`reclaim_orphans`]). Three id populations matter:
//!
//! - **live**: reachable from the root by following child pointers;
//! - **free**: on the free list, awaiting reuse;
//! - **zombie**: allocated (below the `node_count` high-water mark)
//!   but in neither set — leaked capacity.
//!
//! Two distinct defects share the "ghost" name upstream of this module
//! and get separate counters here: a reachable non-root node with zero
//! keys ([`check_ghost`]), and a child reference pointing outside
//! `[0, node_count)` ([`count_ghost`]).
//!
//! The live set is tracked in a `RoaringBitmap`; re-marking an already
//! marked id means the "tree" has a cycle and the audit aborts with
//! `Corruption`. Counting walks skip out-of-range child references
//! (they are reported, not followed); [`validate`] treats them as
//! fatal instead.

use roaring::RoaringBitmap;

use crate::btree::min_degree;
use crate::error::{Error, Result};
use crate::storage::{Pager, NO_NODE};

/// Result of a full structural audit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuditReport {
    /// Levels from the root to the deepest leaf; 0 for an empty tree.
    pub height: u32,
    /// Nodes reachable from the root.
    pub reachable_nodes: u64,
    /// Elements stored across all reachable nodes.
    pub total_keys: u64,
    /// `total_keys / (reachable_nodes * (m - 1))`; 0.0 when empty.
    pub average_density: f64,
    /// Child references pointing outside `[0, node_count)`.
    pub ghost_count: u64,
    /// Allocated ids that are neither reachable nor free.
    pub zombie_count: u64,
}

#[derive(Default)]
struct ScanStats {
    reachable: u64,
    total_keys: u64,
    height: u32,
    ghosts: u64,
}

/// Single-pass audit from the root.
pub fn full_audit(pager: &Pager) -> Result<AuditReport> {
    let mut live = RoaringBitmap::new();
    let mut stats = ScanStats::default();

    let root = pager.root_id();
    if root != NO_NODE {
        scan(pager, root, 1, &mut live, &mut stats)?;
    }

    let max_keys = (pager.order() - 1) as u64;
    let average_density = if stats.reachable > 0 {
        stats.total_keys as f64 / (stats.reachable * max_keys) as f64
    } else {
        0.0
    };

    Ok(AuditReport {
        height: stats.height,
        reachable_nodes: stats.reachable,
        total_keys: stats.total_keys,
        average_density,
        ghost_count: stats.ghosts,
        zombie_count: zombies_against(pager, &live),
    })
}

fn scan(
    pager: &Pager,
    id: i32,
    depth: u32,
    live: &mut RoaringBitmap,
    stats: &mut ScanStats,
) -> Result<()> {
    if !live.insert(id as u32) {
        return Err(Error::corruption(format!("cycle: node {id} visited twice")));
    }

    let node = pager.read_node(id)?;
    stats.reachable += 1;
    stats.total_keys += node.num_keys() as u64;
    stats.height = stats.height.max(depth);

    if !node.is_leaf() {
        for j in 0..=node.num_keys() {
            let kid = node.kid(j);
            if kid < 0 || kid >= pager.node_count() {
                stats.ghosts += 1;
                continue;
            }
            scan(pager, kid, depth + 1, live, stats)?;
        }
    }
    Ok(())
}

/// The live set for this file: every id reachable from the root.
/// Unlike the counting scan, an out-of-range child reference is fatal
/// here; callers rewriting the file must not meet one.
pub(crate) fn live_set(pager: &Pager) -> Result<RoaringBitmap> {
    let mut live = RoaringBitmap::new();
    let root = pager.root_id();
    if root != NO_NODE {
        mark_live(pager, root, &mut live)?;
    }
    Ok(live)
}

fn mark_live(pager: &Pager, id: i32, live: &mut RoaringBitmap) -> Result<()> {
    if id < 0 || id >= pager.node_count() {
        return Err(Error::corruption(format!(
            "child reference {id} outside 0..{}",
            pager.node_count()
        )));
    }
    if !live.insert(id as u32) {
        return Err(Error::corruption(format!("cycle: node {id} visited twice")));
    }

    let node = pager.read_node(id)?;
    if !node.is_leaf() {
        for j in 0..=node.num_keys() {
            mark_live(pager, node.kid(j), live)?;
        }
    }
    Ok(())
}

fn zombies_against(pager: &Pager, live: &RoaringBitmap) -> u64 {
    let mut accounted = live.clone();
    for id in pager.free_ids() {
        accounted.insert(id as u32);
    }
    pager.node_count() as u64 - accounted.len()
}

/// Counts allocated ids that are neither reachable nor on the free list.
pub fn count_zombies(pager: &Pager) -> Result<u64> {
    let mut live = RoaringBitmap::new();
    let mut stats = ScanStats::default();
    let root = pager.root_id();
    if root != NO_NODE {
        scan(pager, root, 1, &mut live, &mut stats)?;
    }
    Ok(zombies_against(pager, &live))
}

/// Counts child references pointing outside `[0, node_count)`.
pub fn count_ghost(pager: &Pager) -> Result<u64> {
    let mut live = RoaringBitmap::new();
    let mut stats = ScanStats::default();
    let root = pager.root_id();
    if root != NO_NODE {
        scan(pager, root, 1, &mut live, &mut stats)?;
    }
    Ok(stats.ghosts)
}

/// Fails if any reachable non-root node holds zero keys.
pub fn check_ghost(pager: &Pager) -> Result<()> {
    let root = pager.root_id();
    if root == NO_NODE {
        return Ok(());
    }
    let mut live = RoaringBitmap::new();
    ghost_walk(pager, root, root, &mut live)
}

fn ghost_walk(pager: &Pager, id: i32, root: i32, live: &mut RoaringBitmap) -> Result<()> {
    if !live.insert(id as u32) {
        return Err(Error::corruption(format!("cycle: node {id} visited twice")));
    }

    let node = pager.read_node(id)?;
    if id != root && node.num_keys() == 0 {
        return Err(Error::corruption(format!("ghost node {id} holds no keys")));
    }

    if !node.is_leaf() {
        for j in 0..=node.num_keys() {
            let kid = node.kid(j);
            if kid < 0 || kid >= pager.node_count() {
                continue;
            }
            ghost_walk(pager, kid, root, live)?;
        }
    }
    Ok(())
}

/// Verifies the ordering invariants in one pass: keys strictly
/// increasing within each node, every key inside its subtree's open
/// interval, no node over the `m - 1` key maximum, all leaves at one
/// depth, no cycles, no out-of-range child references.
pub fn validate(pager: &Pager) -> Result<()> {
    let root = pager.root_id();
    if root == NO_NODE {
        return Ok(());
    }
    let mut live = RoaringBitmap::new();
    let mut leaf_depth = None;
    ordered_walk(pager, root, 1, None, None, &mut live, &mut leaf_depth)
}

fn ordered_walk(
    pager: &Pager,
    id: i32,
    depth: u32,
    lo: Option<i32>,
    hi: Option<i32>,
    live: &mut RoaringBitmap,
    leaf_depth: &mut Option<u32>,
) -> Result<()> {
    if id < 0 || id >= pager.node_count() {
        return Err(Error::corruption(format!(
            "child reference {id} outside 0..{}",
            pager.node_count()
        )));
    }
    if !live.insert(id as u32) {
        return Err(Error::corruption(format!("cycle: node {id} visited twice")));
    }

    let node = pager.read_node(id)?;
    if node.num_keys() > pager.order() - 1 {
        return Err(Error::corruption(format!(
            "node {id} holds {} keys, over the maximum of {}",
            node.num_keys(),
            pager.order() - 1
        )));
    }
    for j in 0..node.num_keys() {
        let k = node.key(j).key;
        if j > 0 && node.key(j - 1).key >= k {
            return Err(Error::corruption(format!(
                "keys not strictly increasing in node {id}"
            )));
        }
        if lo.is_some_and(|lo| k <= lo) || hi.is_some_and(|hi| k >= hi) {
            return Err(Error::corruption(format!(
                "key {k} in node {id} escapes its subtree interval"
            )));
        }
    }

    if node.is_leaf() {
        match *leaf_depth {
            None => *leaf_depth = Some(depth),
            Some(d) if d != depth => {
                return Err(Error::corruption(format!(
                    "leaf {id} at depth {depth}, expected {d}"
                )))
            }
            Some(_) => {}
        }
        return Ok(());
    }

    for j in 0..=node.num_keys() {
        let child_lo = if j == 0 { lo } else { Some(node.key(j - 1).key) };
        let child_hi = if j == node.num_keys() {
            hi
        } else {
            Some(node.key(j).key)
        };
        ordered_walk(pager, node.kid(j), depth + 1, child_lo, child_hi, live, leaf_depth)?;
    }
    Ok(())
}

/// Fails if any reachable non-root node is below minimum occupancy
/// (`t - 1` keys).
pub fn check_underflow(pager: &Pager) -> Result<()> {
    let root = pager.root_id();
    if root == NO_NODE {
        return Ok(());
    }
    let floor = min_degree(pager.order()) - 1;
    let mut live = RoaringBitmap::new();
    underflow_walk(pager, root, root, floor, &mut live)
}

fn underflow_walk(
    pager: &Pager,
    id: i32,
    root: i32,
    floor: usize,
    live: &mut RoaringBitmap,
) -> Result<()> {
    if !live.insert(id as u32) {
        return Err(Error::corruption(format!("cycle: node {id} visited twice")));
    }

    let node = pager.read_node(id)?;
    if id != root && node.num_keys() < floor {
        return Err(Error::corruption(format!(
            "node {id} underflows: {} keys < {floor}",
            node.num_keys()
        )));
    }

    if !node.is_leaf() {
        for j in 0..=node.num_keys() {
            let kid = node.kid(j);
            if kid < 0 || kid >= pager.node_count() {
                continue;
            }
            underflow_walk(pager, kid, root, floor, live)?;
        }
    }
    Ok(())
}

/// Moves every zombie id onto the free list. Returns how many were
/// reclaimed.
pub fn reclaim_orphans(pager: &mut Pager) -> Result<u64> {
    let live = {
        let mut live = RoaringBitmap::new();
        let mut stats = ScanStats::default();
        let root = pager.root_id();
        if root != NO_NODE {
            scan(pager, root, 1, &mut live, &mut stats)?;
        }
        live
    };

    let mut reclaimed = 0;
    for id in 0..pager.node_count() {
        if !live.contains(id as u32) && !pager.contains_free(id) {
            pager.free(id)?;
            reclaimed += 1;
        }
    }
    Ok(reclaimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::{BTree, Element, Node};
    use tempfile::tempdir;

    fn scratch(order: usize) -> (tempfile::TempDir, BTree) {
        let dir = tempdir().unwrap();
        let tree = BTree::open(dir.path().join("test.oak"), order).unwrap();
        (dir, tree)
    }

    fn populated(order: usize, n: i32) -> (tempfile::TempDir, BTree) {
        let (dir, mut tree) = scratch(order);
        for i in 1..=n {
            tree.insert(i, i * 10).unwrap();
        }
        (dir, tree)
    }

    #[test]
    fn empty_tree_audits_clean() {
        let (_dir, tree) = scratch(4);

        let report = tree.perform_full_audit().unwrap();

        assert_eq!(report.height, 0);
        assert_eq!(report.reachable_nodes, 0);
        assert_eq!(report.total_keys, 0);
        assert_eq!(report.average_density, 0.0);
        assert_eq!(report.ghost_count, 0);
        assert_eq!(report.zombie_count, 0);
    }

    #[test]
    fn healthy_tree_audits_clean() {
        let (_dir, tree) = populated(4, 100);

        let report = tree.perform_full_audit().unwrap();

        assert!(report.height >= 3);
        assert_eq!(report.total_keys, 100);
        assert!(report.reachable_nodes as i64 <= tree.node_count() as i64);
        assert!(report.average_density > 0.3 && report.average_density <= 1.0);
        assert_eq!(report.ghost_count, 0);
        assert_eq!(report.zombie_count, 0);

        tree.validate_integrity().unwrap();
        tree.check_ghost().unwrap();
        assert_eq!(tree.count_ghost().unwrap(), 0);
        assert_eq!(tree.count_zombies().unwrap(), 0);
    }

    #[test]
    fn churned_tree_stays_zombie_free() {
        let (_dir, mut tree) = populated(4, 80);
        for i in (1..=80).step_by(2) {
            tree.delete(i, 0).unwrap();
        }

        assert_eq!(tree.count_zombies().unwrap(), 0);
        tree.validate_integrity().unwrap();
        check_underflow(tree.pager()).unwrap();
    }

    #[test]
    fn zombie_is_detected_and_reclaimed() {
        let (_dir, mut tree) = populated(4, 10);

        // Allocate a page and reference it from nowhere.
        let orphan = tree.pager_mut().allocate().unwrap();
        let node = Node::new(4, orphan, true);
        tree.pager_mut().write_node(&node).unwrap();

        assert_eq!(tree.count_zombies().unwrap(), 1);

        let reclaimed = tree.reclaim_orphans().unwrap();
        assert_eq!(reclaimed, 1);
        assert_eq!(tree.count_zombies().unwrap(), 0);
        assert!(tree.pager().contains_free(orphan));
    }

    #[test]
    fn out_of_range_child_counts_as_ghost() {
        let (_dir, mut tree) = populated(4, 10);

        // Corrupt an internal node: point one child past the high-water mark.
        let root_id = tree.root_id();
        let mut root = tree.pager().read_node(root_id).unwrap();
        assert!(!root.is_leaf());
        root.set_kid(0, tree.node_count() + 50);
        tree.pager_mut().write_node(&root).unwrap();

        assert!(tree.count_ghost().unwrap() >= 1);
        assert!(matches!(
            tree.validate_integrity(),
            Err(crate::Error::Corruption(_))
        ));
    }

    #[test]
    fn zero_key_node_fails_ghost_check() {
        let (_dir, mut tree) = populated(4, 10);

        let root_id = tree.root_id();
        let root = tree.pager().read_node(root_id).unwrap();
        let victim_id = root.kid(0);
        let victim = Node::new(4, victim_id, true);
        tree.pager_mut().write_node(&victim).unwrap();

        assert!(matches!(
            tree.check_ghost(),
            Err(crate::Error::Corruption(_))
        ));
    }

    #[test]
    fn cycle_aborts_the_audit() {
        let (_dir, mut tree) = populated(4, 30);

        // Find an internal node below the root and point a child back
        // at the root.
        let root_id = tree.root_id();
        let root = tree.pager().read_node(root_id).unwrap();
        let mut inner = tree.pager().read_node(root.kid(0)).unwrap();
        assert!(!inner.is_leaf());
        inner.set_kid(0, root_id);
        tree.pager_mut().write_node(&inner).unwrap();

        assert!(matches!(
            tree.perform_full_audit(),
            Err(crate::Error::Corruption(_))
        ));
        assert!(matches!(
            tree.validate_integrity(),
            Err(crate::Error::Corruption(_))
        ));
    }

    #[test]
    fn key_order_violation_is_caught() {
        // Single fat leaf root so both swapped slots are guaranteed live.
        let (_dir, mut tree) = populated(8, 5);

        let mut root = tree.pager().read_node(tree.root_id()).unwrap();
        assert!(root.is_leaf());
        let a = root.key(0);
        let b = root.key(1);
        root.set_key(0, b);
        root.set_key(1, a);
        tree.pager_mut().write_node(&root).unwrap();

        assert!(matches!(
            tree.validate_integrity(),
            Err(crate::Error::Corruption(_))
        ));
    }

    #[test]
    fn subtree_interval_violation_is_caught() {
        let (_dir, mut tree) = populated(4, 30);

        let root_id = tree.root_id();
        let root = tree.pager().read_node(root_id).unwrap();
        let mut leafish = tree.pager().read_node(root.kid(0)).unwrap();
        while !leafish.is_leaf() {
            leafish = tree.pager().read_node(leafish.kid(0)).unwrap();
        }
        // A key far above every separator, planted in the leftmost leaf.
        leafish.set_key(0, Element::new(1_000_000, 0));
        tree.pager_mut().write_node(&leafish).unwrap();

        assert!(matches!(
            tree.validate_integrity(),
            Err(crate::Error::Corruption(_))
        ));
    }
}
