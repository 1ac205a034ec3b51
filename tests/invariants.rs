//! # Quantified Invariants
//!
//! Properties that must hold for any operation sequence: search
//! round-trips, strict key ordering, balance, zombie-freedom,
//! idempotent deletion, and the error contract of the public surface.

use oakdb::{build_from_sorted, BTree, Element, Error};
use rand::seq::SliceRandom;
use rand::Rng;
use tempfile::tempdir;

#[test]
fn search_roundtrip_over_random_key_set() {
    let dir = tempdir().unwrap();
    let mut tree = BTree::open(dir.path().join("t.oak"), 4).unwrap();

    let mut rng = rand::thread_rng();
    let mut keys: Vec<i32> = (0..500).map(|_| rng.gen_range(-10_000..10_000)).collect();
    keys.sort_unstable();
    keys.dedup();
    keys.shuffle(&mut rng);

    for &k in &keys {
        tree.insert(k, k ^ 0x5A5A).unwrap();
    }

    for &k in &keys {
        assert_eq!(
            tree.try_search(k).unwrap(),
            Some(Element::new(k, k ^ 0x5A5A)),
            "inserted key {k} not found"
        );
    }
    for probe in [-10_001, 10_001, 20_000] {
        assert!(tree.try_search(probe).unwrap().is_none());
    }
}

#[test]
fn keys_iterate_strictly_increasing_without_duplicates() {
    let dir = tempdir().unwrap();
    let mut tree = BTree::open(dir.path().join("t.oak"), 4).unwrap();

    let mut keys: Vec<i32> = (1..=300).collect();
    keys.shuffle(&mut rand::thread_rng());
    for &k in &keys {
        tree.insert(k, 0).unwrap();
        // A second insert of the same key must not duplicate it.
        tree.insert(k, 1).unwrap();
    }

    let walked: Vec<i32> = tree.keys().collect::<oakdb::Result<_>>().unwrap();
    assert_eq!(walked.len(), 300);
    for pair in walked.windows(2) {
        assert!(pair[0] < pair[1], "order violated at {pair:?}");
    }
}

#[test]
fn tree_stays_balanced_through_churn() {
    let dir = tempdir().unwrap();
    let mut tree = BTree::open(dir.path().join("t.oak"), 4).unwrap();

    for i in 1..=200 {
        tree.insert(i, i).unwrap();
    }
    tree.validate_integrity().unwrap();
    tree.check_underflow().unwrap();
    tree.check_ghost().unwrap();

    for i in (1..=200).filter(|i| i % 4 != 0) {
        tree.delete(i, 0).unwrap();
    }
    tree.validate_integrity().unwrap();
    tree.check_underflow().unwrap();
    tree.check_ghost().unwrap();
    assert_eq!(tree.count_zombies().unwrap(), 0);
}

#[test]
fn delete_of_absent_key_preserves_counts() {
    let dir = tempdir().unwrap();
    let mut tree = BTree::open(dir.path().join("t.oak"), 4).unwrap();

    for i in 1..=40 {
        tree.insert(i, i).unwrap();
    }
    let nodes = tree.node_count();
    let frees = tree.free_count();

    tree.delete(500, 0).unwrap();
    tree.delete(500, 0).unwrap();
    tree.delete(-7, 0).unwrap();

    assert_eq!(tree.count_keys(tree.root_id()).unwrap(), 40);
    assert_eq!(tree.node_count(), nodes);
    assert_eq!(tree.free_count(), frees);
}

#[test]
fn minus_one_is_a_legal_key() {
    let dir = tempdir().unwrap();
    let mut tree = BTree::open(dir.path().join("t.oak"), 4).unwrap();

    tree.insert(-1, -1).unwrap();
    for i in 0..20 {
        tree.insert(i, i).unwrap();
    }

    assert_eq!(tree.try_search(-1).unwrap(), Some(Element::new(-1, -1)));
    assert_eq!(tree.find_min().unwrap(), Some(Element::new(-1, -1)));

    tree.delete(-1, -1).unwrap();
    assert!(tree.try_search(-1).unwrap().is_none());
    assert_eq!(tree.find_min().unwrap(), Some(Element::new(0, 0)));
}

#[test]
fn zombie_free_after_arbitrary_mixed_sequence() {
    let dir = tempdir().unwrap();
    let mut tree = BTree::open(dir.path().join("t.oak"), 4).unwrap();
    let mut rng = rand::thread_rng();

    for _ in 0..600 {
        let k = rng.gen_range(0..120);
        if rng.gen_bool(0.6) {
            tree.insert(k, k).unwrap();
        } else {
            tree.delete(k, 0).unwrap();
        }
    }

    assert_eq!(tree.count_zombies().unwrap(), 0);
    assert_eq!(tree.count_ghost().unwrap(), 0);
    tree.validate_integrity().unwrap();
}

#[test]
fn compaction_is_idempotent_on_dense_files() {
    let dir = tempdir().unwrap();
    let mut tree = BTree::open(dir.path().join("t.oak"), 10).unwrap();
    for i in 1..=100 {
        tree.insert(i, i).unwrap();
    }

    tree.compact().unwrap();
    let len_first = tree.file_len();
    tree.compact().unwrap();

    assert_eq!(tree.file_len(), len_first);
    assert_eq!(tree.count_keys(tree.root_id()).unwrap(), 100);
}

#[test]
fn bulk_density_stays_within_bounds_at_full_fill() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.oak");
    let elems: Vec<Element> = (1..=1000).map(|i| Element::new(i, i)).collect();

    build_from_sorted(&elems, &path, 12, 1.0).unwrap();

    let tree = BTree::open(&path, 12).unwrap();
    tree.validate_integrity().unwrap();
    let report = tree.perform_full_audit().unwrap();
    assert!(report.average_density >= 0.35);
    assert!(report.average_density <= 1.0);
    assert_eq!(report.total_keys, 1000);
    assert_eq!(report.zombie_count, 0);
}

mod error_contract_tests {
    use super::*;

    #[test]
    fn order_below_four_is_rejected() {
        let dir = tempdir().unwrap();
        for order in [0, 1, 2, 3] {
            let result = BTree::open(dir.path().join("t.oak"), order);
            assert!(matches!(result, Err(Error::InvalidArgument(_))));
        }
    }

    #[test]
    fn reopening_with_wrong_order_is_a_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.oak");

        let mut tree = BTree::open(&path, 8).unwrap();
        tree.insert(1, 1).unwrap();
        tree.close().unwrap();

        assert!(matches!(BTree::open(&path, 16), Err(Error::Format(_))));
    }

    #[test]
    fn corrupted_magic_is_a_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.oak");

        let mut tree = BTree::open(&path, 4).unwrap();
        tree.insert(1, 1).unwrap();
        tree.close().unwrap();

        // Stamp over the magic.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(BTree::open(&path, 4), Err(Error::Format(_))));
    }

    #[test]
    fn using_a_closed_tree_is_invalid_state() {
        let dir = tempdir().unwrap();
        let mut tree = BTree::open(dir.path().join("t.oak"), 4).unwrap();
        tree.insert(1, 1).unwrap();
        tree.close().unwrap();
        tree.close().unwrap();

        assert!(matches!(tree.insert(2, 2), Err(Error::InvalidState(_))));
        assert!(matches!(tree.compact(), Err(Error::InvalidState(_))));
        assert!(matches!(
            tree.perform_full_audit(),
            Err(Error::InvalidState(_))
        ));
    }
}
