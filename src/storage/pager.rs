//! # Pager
//!
//! Owns the database file and maps logical node ids to byte offsets:
//! node `id` lives at `4096 + id * page_size`. All node I/O, allocation,
//! and the file lifecycle (open, commit, close) go through here.
//!
//! ## Allocation
//!
//! Ids are handed out from the free list first; only when it is empty
//! does `node_count` (the high-water mark) grow. Freed ids are zeroed
//! on disk by the tree code and re-enter circulation through
//! [`Pager::free`].
//!
//! ## Write-Through Header
//!
//! The in-memory header is authoritative. Any mutation of `root_id`,
//! `node_count`, or the free-list descriptor is immediately written to
//! disk, so a reader of the file never sees a header older than the
//! pages it points at.
//!
//! ## Lifecycle
//!
//! `close()` appends the free list after the last node page, records
//! its locator in the header, flushes, and marks the pager closed;
//! closing twice is a no-op, and every other operation on a closed
//! pager fails with `InvalidState`. Dropping an open pager closes it
//! best-effort.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use log::{debug, trace};
use zerocopy::IntoBytes;

use crate::btree::Node;
use crate::error::{Error, Result};
use crate::storage::{FileHeader, FreeList, FILE_HEADER_SIZE, HEADER_BLOCK_SIZE, MIN_ORDER};

#[derive(Debug)]
pub struct Pager {
    file: File,
    path: PathBuf,
    header: FileHeader,
    free: FreeList,
    file_len: u64,
    closed: bool,
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "unexpected end of file",
                ))
            }
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl Pager {
    /// Opens (or initializes, when the file is empty) a database file.
    pub fn open<P: AsRef<Path>>(path: P, order: usize) -> Result<Self> {
        Self::open_inner(path.as_ref(), order, false)
    }

    /// Creates a fresh database file, truncating any existing content.
    /// Used by bulk load and by compaction for its destination.
    pub fn create<P: AsRef<Path>>(path: P, order: usize) -> Result<Self> {
        Self::open_inner(path.as_ref(), order, true)
    }

    fn open_inner(path: &Path, order: usize, truncate: bool) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(Error::invalid_argument("empty database path"));
        }
        if order < MIN_ORDER {
            return Err(Error::invalid_argument(format!(
                "order {order} below minimum {MIN_ORDER}"
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(path)?;
        let file_len = file.metadata()?.len();

        let pager = if file_len == 0 {
            let header = FileHeader::new(order);
            let mut block = vec![0u8; HEADER_BLOCK_SIZE];
            block[..FILE_HEADER_SIZE].copy_from_slice(header.as_bytes());
            write_all_at(&file, &block, 0)?;

            debug!("initialized {} (order {order})", path.display());
            Self {
                file,
                path: path.to_path_buf(),
                header,
                free: FreeList::new(),
                file_len: HEADER_BLOCK_SIZE as u64,
                closed: false,
            }
        } else {
            if file_len < HEADER_BLOCK_SIZE as u64 {
                return Err(Error::format(format!(
                    "file is {file_len} bytes, smaller than the header block"
                )));
            }

            let mut block = vec![0u8; HEADER_BLOCK_SIZE];
            read_exact_at(&file, &mut block, 0)?;
            let mut header = *FileHeader::from_bytes(&block, order)?;

            let mut free = FreeList::new();
            let mut file_len = file_len;
            let tail_count = header.free_list_count();
            if tail_count > 0 {
                let tail_offset = header.free_list_offset() as u64;
                let tail_len = tail_count as u64 * 4;
                if tail_offset + tail_len > file_len {
                    return Err(Error::format(format!(
                        "free-list tail at {tail_offset} (+{tail_len}) \
                         extends past file length {file_len}"
                    )));
                }
                let mut tail = vec![0u8; tail_len as usize];
                read_exact_at(&file, &mut tail, tail_offset)?;
                free = FreeList::from_bytes(&tail);

                // The tail is in-memory state now; node pages are again
                // the last thing in the file.
                file.set_len(tail_offset)?;
                file_len = tail_offset;
                header.set_free_list(0, 0);
                write_all_at(&file, header.as_bytes(), 0)?;
            }

            let pages_end = HEADER_BLOCK_SIZE as u64
                + header.node_count() as u64 * header.page_size() as u64;
            if pages_end > file_len {
                return Err(Error::format(format!(
                    "file truncated: {} nodes need {pages_end} bytes, found {file_len}",
                    header.node_count()
                )));
            }

            debug!(
                "opened {} (order {order}, {} nodes, {} free)",
                path.display(),
                header.node_count(),
                free.len()
            );
            Self {
                file,
                path: path.to_path_buf(),
                header,
                free,
                file_len,
                closed: false,
            }
        };

        pager.file.sync_all()?;
        Ok(pager)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::invalid_state("pager is closed"));
        }
        Ok(())
    }

    fn page_offset(&self, id: i32) -> Result<u64> {
        if id < 0 {
            return Err(Error::invalid_argument(format!("negative node id {id}")));
        }
        Ok(HEADER_BLOCK_SIZE as u64 + id as u64 * self.page_size() as u64)
    }

    /// Reads and decodes the node page at `id`.
    pub fn read_node(&self, id: i32) -> Result<Node> {
        self.ensure_open()?;
        let offset = self.page_offset(id)?;
        let page_size = self.page_size();
        if offset + page_size as u64 > self.file_len {
            return Err(Error::invalid_state(format!(
                "node {id} at offset {offset} lies outside the file"
            )));
        }

        let mut buf = vec![0u8; page_size];
        read_exact_at(&self.file, &mut buf, offset)?;
        Node::decode(&buf, self.order())
    }

    /// Encodes and writes a node to its page.
    pub fn write_node(&mut self, node: &Node) -> Result<()> {
        self.ensure_open()?;
        let id = node.id();
        let offset = self.page_offset(id)?;
        if id >= self.header.node_count() {
            return Err(Error::invalid_state(format!(
                "node {id} was never allocated (node_count {})",
                self.header.node_count()
            )));
        }

        let mut buf = vec![0u8; self.page_size()];
        node.encode_into(&mut buf);
        write_all_at(&self.file, &buf, offset)?;
        self.file_len = self.file_len.max(offset + buf.len() as u64);
        Ok(())
    }

    /// Overwrites the page at `id` with zero bytes.
    pub fn zero(&mut self, id: i32) -> Result<()> {
        self.ensure_open()?;
        let offset = self.page_offset(id)?;
        if id >= self.header.node_count() {
            return Err(Error::invalid_state(format!(
                "node {id} was never allocated (node_count {})",
                self.header.node_count()
            )));
        }

        trace!("zeroing page {id}");
        let buf = vec![0u8; self.page_size()];
        write_all_at(&self.file, &buf, offset)?;
        self.file_len = self.file_len.max(offset + buf.len() as u64);
        Ok(())
    }

    /// Pops a reclaimable id, or grows the high-water mark.
    pub fn allocate(&mut self) -> Result<i32> {
        self.ensure_open()?;
        if let Some(id) = self.free.pop() {
            trace!("allocating reclaimed page {id}");
            return Ok(id);
        }

        let id = self.header.node_count();
        self.header.set_node_count(id + 1);
        self.write_header()?;
        trace!("allocating fresh page {id}");
        Ok(id)
    }

    /// Marks `id` reclaimable. Idempotent.
    pub fn free(&mut self, id: i32) -> Result<()> {
        self.ensure_open()?;
        if id < 0 || id >= self.header.node_count() {
            return Err(Error::invalid_argument(format!(
                "cannot free id {id} outside 0..{}",
                self.header.node_count()
            )));
        }
        self.free.insert(id);
        Ok(())
    }

    /// Persists the header and flushes OS buffers.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.write_header()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Persists the free list and header, flushes, and releases the
    /// file. Closing an already-closed pager is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        if self.free.is_empty() {
            self.header.set_free_list(0, 0);
        } else {
            let tail = self.free.to_bytes();
            let tail_offset = self.file_len;
            write_all_at(&self.file, &tail, tail_offset)?;
            self.header
                .set_free_list(self.free.len() as i32, tail_offset as i64);
        }

        self.write_header()?;
        self.file.sync_all()?;
        self.closed = true;
        debug!(
            "closed {} ({} nodes, {} free)",
            self.path.display(),
            self.header.node_count(),
            self.free.len()
        );
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        write_all_at(&self.file, self.header.as_bytes(), 0)?;
        Ok(())
    }

    pub fn order(&self) -> usize {
        self.header.order()
    }

    pub fn page_size(&self) -> usize {
        self.header.page_size()
    }

    pub fn root_id(&self) -> i32 {
        self.header.root_id()
    }

    /// Updates the root id, writing the header through to disk.
    pub fn set_root_id(&mut self, id: i32) -> Result<()> {
        self.ensure_open()?;
        self.header.set_root_id(id);
        self.write_header()
    }

    pub fn node_count(&self) -> i32 {
        self.header.node_count()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn contains_free(&self, id: i32) -> bool {
        self.free.contains(id)
    }

    /// Ids currently on the free list, in no particular order.
    pub fn free_ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.free.iter()
    }

    /// Current physical file length in bytes.
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
