//! # Offline Compaction
//!
//! Rewrites the index file so that live nodes occupy the contiguous id
//! range `[0, reachable_count)` in ascending original-id order, with no
//! zombies and an empty free list. The rewrite goes through a second
//! pager onto a sibling temp file which then atomically replaces the
//! source:
//!
//! ```text
//! source.oak          --rename-->  source.oak.bak
//! source.oak.compact  --rename-->  source.oak
//! source.oak.bak      --remove
//! ```
//!
//! A crash before the first rename leaves the source untouched (plus a
//! stray temp file); a crash between the renames leaves the backup on
//! disk for manual recovery. The destination file ends exactly after
//! its last node page, so no stale bytes outlive the rewrite.

use hashbrown::HashMap;
use log::debug;

use crate::btree::{audit, BTree};
use crate::error::{Error, Result};
use crate::storage::{Pager, NO_NODE};

pub(crate) fn compact(tree: &mut BTree) -> Result<()> {
    if tree.pager().is_closed() {
        return Err(Error::invalid_state("pager is closed"));
    }

    let order = tree.order();
    let src_path = tree.pager().path().to_path_buf();
    let tmp_path = sibling(&src_path, ".compact");
    let bak_path = sibling(&src_path, ".bak");

    // Enumerate the live set; ascending original ids become 0, 1, ...
    let live = audit::live_set(tree.pager())?;
    let remap: HashMap<i32, i32> = live
        .iter()
        .enumerate()
        .map(|(new_id, old_id)| (old_id as i32, new_id as i32))
        .collect();

    {
        let mut dst = Pager::create(&tmp_path, order)?;
        for old_id in live.iter() {
            let mut node = tree.pager().read_node(old_id as i32)?;
            node.set_id(remap[&(old_id as i32)]);
            if !node.is_leaf() {
                for j in 0..=node.num_keys() {
                    let kid = node.kid(j);
                    let new_kid = remap.get(&kid).copied().ok_or_else(|| {
                        Error::corruption(format!(
                            "child {kid} of node {old_id} is not in the live set"
                        ))
                    })?;
                    node.set_kid(j, new_kid);
                }
            }

            let dst_id = dst.allocate()?;
            debug_assert_eq!(dst_id, node.id());
            dst.write_node(&node)?;
        }

        let root = tree.pager().root_id();
        if root != NO_NODE {
            dst.set_root_id(remap[&root])?;
        }
        dst.close()?;
    }

    // Swap the rewrite into place, keeping a backup across the window.
    tree.pager_mut().close()?;
    std::fs::rename(&src_path, &bak_path)?;
    std::fs::rename(&tmp_path, &src_path)?;
    std::fs::remove_file(&bak_path)?;

    *tree.pager_mut() = Pager::open(&src_path, order)?;
    debug!(
        "compacted {} to {} live nodes",
        src_path.display(),
        tree.node_count()
    );
    Ok(())
}

fn sibling(path: &std::path::Path, suffix: &str) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}
