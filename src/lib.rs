//! # oakdb - Single-File Classic B-Tree Index Engine
//!
//! oakdb is a disk-resident key/value index in the classic Bayer &
//! McCreight style: one file, fixed-size pages, and a B-Tree in which
//! every node carries payload data, internal nodes included. Keys and
//! payloads are 32-bit signed integers.
//!
//! ## Quick Start
//!
//! ```ignore
//! use oakdb::BTree;
//!
//! let mut tree = BTree::open("index.oak", 16)?;
//! tree.insert(42, 4200)?;
//! assert_eq!(tree.try_search(42)?.map(|e| e.data), Some(4200));
//! tree.delete(42, 0)?;
//! tree.close()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------+
//! |        Public API (BTree)            |
//! +--------------------------------------+
//! | Tree ops   | Bulk load | Maintenance |
//! | (search,   | (sorted   | (audit,     |
//! |  insert,   |  input)   |  compact)   |
//! |  delete)   |           |             |
//! +--------------------------------------+
//! |        Node page image (Node)        |
//! +--------------------------------------+
//! |   Pager (offsets, free list, ids)    |
//! +--------------------------------------+
//! |       Single file, 4096B header      |
//! +--------------------------------------+
//! ```
//!
//! All mutating operations flow tree -> pager -> file. Bulk load
//! writes through its own pager directly; compaction runs a source and
//! a destination pager side by side; audits only read.
//!
//! ## Balancing
//!
//! Mutations are single-pass and top-down. Insertion splits every full
//! node met on the descent, so splits never propagate back up.
//! Deletion thickens every minimal node met on the descent (borrow
//! from a sibling, else merge), so removals never underflow an
//! ancestor. An emptied internal root collapses onto its only child.
//!
//! ## File Format
//!
//! A 4096-byte header block (magic, order, root id, allocation
//! high-water mark, free-list locator) followed by `12*m + 16`-byte
//! node pages, where `m` is the branching order fixed at creation.
//! A cleanly closed file carries its free list as a tail after the
//! last page; opening loads the tail and truncates it away.
//!
//! ## Concurrency
//!
//! None. A tree is single-threaded and owns its file handle; callers
//! must ensure at most one writer per file. There is no WAL: a crash
//! mid-operation leaves a structurally valid but mutated tree.
//!
//! ## Module Overview
//!
//! - [`btree`]: tree operations, bulk load, audit, compaction
//! - [`storage`]: header, free list, pager
//! - [`error`]: the typed error enum shared crate-wide

pub mod btree;
pub mod error;
pub mod storage;

pub use btree::{build_from_sorted, AuditReport, BTree, Element, Elements, Keys, FILL_DEFAULT};
pub use error::{Error, Result};
