//! # Free List
//!
//! Tracks page ids that are allocated in the file but no longer
//! reachable from the root, so the pager can hand them out again
//! instead of growing the file.
//!
//! ## Semantics
//!
//! The free list is a set: adding an id twice is a no-op, and
//! allocation may pop any member. Members are always in
//! `0..node_count`.
//!
//! ## Persistence
//!
//! The set lives in memory while the file is open. On clean close the
//! pager appends the ids after the last node page (4 little-endian
//! bytes each, sorted ascending for a deterministic tail) and records
//! count and offset in the header. On open the tail is parsed back
//! into the set and the file is truncated to its pre-tail length, so
//! node pages are always the last thing in an open file.

use hashbrown::HashSet;

/// Deduplicating set of reclaimable page ids.
#[derive(Debug, Default)]
pub struct FreeList {
    ids: HashSet<i32>,
}

impl FreeList {
    pub fn new() -> Self {
        Self {
            ids: HashSet::new(),
        }
    }

    /// Parses a persisted tail of little-endian ids.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut ids = HashSet::with_capacity(bytes.len() / 4);
        for chunk in bytes.chunks_exact(4) {
            ids.insert(i32::from_le_bytes(chunk.try_into().unwrap()));
        }
        Self { ids }
    }

    /// Serializes the set, sorted ascending.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut sorted: Vec<i32> = self.ids.iter().copied().collect();
        sorted.sort_unstable();

        let mut bytes = Vec::with_capacity(sorted.len() * 4);
        for id in sorted {
            bytes.extend_from_slice(&id.to_le_bytes());
        }
        bytes
    }

    /// Adds an id. Idempotent.
    pub fn insert(&mut self, id: i32) {
        self.ids.insert(id);
    }

    /// Removes and returns an arbitrary member.
    pub fn pop(&mut self) -> Option<i32> {
        let id = self.ids.iter().next().copied()?;
        self.ids.remove(&id);
        Some(id)
    }

    pub fn contains(&self, id: i32) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.ids.iter().copied()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut list = FreeList::new();

        list.insert(3);
        list.insert(3);
        list.insert(3);

        assert_eq!(list.len(), 1);
        assert!(list.contains(3));
    }

    #[test]
    fn pop_drains_all_members() {
        let mut list = FreeList::new();
        list.insert(1);
        list.insert(5);
        list.insert(9);

        let mut drained = Vec::new();
        while let Some(id) = list.pop() {
            drained.push(id);
        }
        drained.sort_unstable();

        assert_eq!(drained, vec![1, 5, 9]);
        assert!(list.is_empty());
        assert!(list.pop().is_none());
    }

    #[test]
    fn persisted_tail_is_sorted() {
        let mut list = FreeList::new();
        list.insert(12);
        list.insert(3);
        list.insert(7);

        let bytes = list.to_bytes();

        assert_eq!(bytes.len(), 12);
        assert_eq!(i32::from_le_bytes(bytes[0..4].try_into().unwrap()), 3);
        assert_eq!(i32::from_le_bytes(bytes[4..8].try_into().unwrap()), 7);
        assert_eq!(i32::from_le_bytes(bytes[8..12].try_into().unwrap()), 12);
    }

    #[test]
    fn tail_roundtrip_preserves_set() {
        let mut list = FreeList::new();
        for id in [0, 4, 2, 4, 8] {
            list.insert(id);
        }

        let reloaded = FreeList::from_bytes(&list.to_bytes());

        assert_eq!(reloaded.len(), 4);
        for id in [0, 2, 4, 8] {
            assert!(reloaded.contains(id));
        }
    }
}
