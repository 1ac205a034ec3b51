//! # File Header
//!
//! The first 4096 bytes of an oakdb file form the header block. Only the
//! leading 32 bytes carry data; the remainder is reserved and zero.
//!
//! ## Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -------------------------------------------
//! 0       4     magic            u32, 0x42542145
//! 4       4     order            i32, branching factor m >= 4
//! 8       4     root_id          i32, -1 when the tree is empty
//! 12      4     page_size        i32, must equal 12*m + 16
//! 16      4     node_count       i32, allocation high-water mark
//! 20      4     free_list_count  i32, ids in the persisted tail
//! 24      8     free_list_offset i64, byte offset of the tail
//! 32      4064  reserved, zero
//! ```
//!
//! All multi-byte fields are little-endian; the zerocopy
//! `U32<LittleEndian>`/`I32<LittleEndian>` types handle conversion, so a
//! header can be parsed in place from the block read off disk.
//!
//! The in-memory header owned by the pager is authoritative: every
//! mutation of `root_id`, `node_count`, or the free-list descriptor is
//! written through to disk immediately.

use zerocopy::little_endian::{I32, I64, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{Error, Result};
use crate::storage::page_size_for;

/// Magic constant identifying an oakdb file.
pub const MAGIC: u32 = 0x4254_2145;

/// Meaningful prefix of the header block.
pub const FILE_HEADER_SIZE: usize = 32;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FileHeader {
    magic: U32,
    order: I32,
    root_id: I32,
    page_size: I32,
    node_count: I32,
    free_list_count: I32,
    free_list_offset: I64,
}

const _: () = assert!(std::mem::size_of::<FileHeader>() == FILE_HEADER_SIZE);

impl FileHeader {
    /// Fresh header for an empty file of the given order.
    pub fn new(order: usize) -> Self {
        Self {
            magic: U32::new(MAGIC),
            order: I32::new(order as i32),
            root_id: I32::new(super::NO_NODE),
            page_size: I32::new(page_size_for(order) as i32),
            node_count: I32::new(0),
            free_list_count: I32::new(0),
            free_list_offset: I64::new(0),
        }
    }

    /// Parses and validates a header against the expected order.
    pub fn from_bytes(bytes: &[u8], order: usize) -> Result<&Self> {
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(Error::format(format!(
                "truncated header: {} < {} bytes",
                bytes.len(),
                FILE_HEADER_SIZE
            )));
        }

        let header = Self::ref_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| Error::format(format!("failed to parse file header: {e:?}")))?;

        if header.magic.get() != MAGIC {
            return Err(Error::format(format!(
                "invalid magic 0x{:08x} (expected 0x{MAGIC:08x})",
                header.magic.get()
            )));
        }

        if header.order.get() != order as i32 {
            return Err(Error::format(format!(
                "order mismatch: file has {}, caller requested {order}",
                header.order.get()
            )));
        }

        let expected = page_size_for(order) as i32;
        if header.page_size.get() != expected {
            return Err(Error::format(format!(
                "page size mismatch: file has {}, order {order} implies {expected}",
                header.page_size.get()
            )));
        }

        Ok(header)
    }

    pub fn order(&self) -> usize {
        self.order.get() as usize
    }

    pub fn page_size(&self) -> usize {
        self.page_size.get() as usize
    }

    pub fn root_id(&self) -> i32 {
        self.root_id.get()
    }

    pub fn set_root_id(&mut self, id: i32) {
        self.root_id = I32::new(id);
    }

    pub fn node_count(&self) -> i32 {
        self.node_count.get()
    }

    pub fn set_node_count(&mut self, count: i32) {
        self.node_count = I32::new(count);
    }

    pub fn free_list_count(&self) -> i32 {
        self.free_list_count.get()
    }

    pub fn free_list_offset(&self) -> i64 {
        self.free_list_offset.get()
    }

    pub fn set_free_list(&mut self, count: i32, offset: i64) {
        self.free_list_count = I32::new(count);
        self.free_list_offset = I64::new(offset);
    }
}
