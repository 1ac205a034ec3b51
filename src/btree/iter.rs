//! # In-Order Iteration
//!
//! Lazy traversal of the tree in key order. The iterator keeps an
//! explicit descent stack of at most `height` frames, so walking a
//! large index never materializes it: peak memory follows tree depth,
//! not tree size.
//!
//! Page reads can fail mid-walk, so the item type is
//! `Result<Element>`; the first error ends the sequence. The sequence
//! is finite and not restartable.

use smallvec::SmallVec;

use crate::btree::{Element, Node};
use crate::error::Result;
use crate::storage::{Pager, NO_NODE};

#[derive(Debug)]
struct Frame {
    node: Node,
    pos: usize,
    descended: bool,
}

impl Frame {
    fn new(node: Node) -> Self {
        Self {
            node,
            pos: 0,
            descended: false,
        }
    }
}

/// In-order iterator over all elements of a tree.
#[derive(Debug)]
pub struct Elements<'a> {
    pager: &'a Pager,
    stack: SmallVec<[Frame; 8]>,
    started: bool,
    done: bool,
}

impl<'a> Elements<'a> {
    pub(crate) fn new(pager: &'a Pager) -> Self {
        Self {
            pager,
            stack: SmallVec::new(),
            started: false,
            done: false,
        }
    }

    fn fail(&mut self, e: crate::Error) -> Option<Result<Element>> {
        self.done = true;
        self.stack.clear();
        Some(Err(e))
    }
}

impl Iterator for Elements<'_> {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if !self.started {
            self.started = true;
            let root = self.pager.root_id();
            if root != NO_NODE {
                match self.pager.read_node(root) {
                    Ok(node) => self.stack.push(Frame::new(node)),
                    Err(e) => return self.fail(e),
                }
            }
        }

        loop {
            let frame = self.stack.last_mut()?;

            if frame.node.is_leaf() {
                if frame.pos < frame.node.num_keys() {
                    let e = frame.node.key(frame.pos);
                    frame.pos += 1;
                    return Some(Ok(e));
                }
                self.stack.pop();
                continue;
            }

            if !frame.descended {
                // Child at pos comes before the element at pos.
                frame.descended = true;
                let child_id = frame.node.kid(frame.pos);
                match self.pager.read_node(child_id) {
                    Ok(child) => {
                        self.stack.push(Frame::new(child));
                        continue;
                    }
                    Err(e) => return self.fail(e),
                }
            }

            if frame.pos < frame.node.num_keys() {
                let e = frame.node.key(frame.pos);
                frame.pos += 1;
                frame.descended = false;
                return Some(Ok(e));
            }
            self.stack.pop();
        }
    }
}

/// In-order iterator over all keys of a tree.
#[derive(Debug)]
pub struct Keys<'a> {
    inner: Elements<'a>,
}

impl<'a> Keys<'a> {
    pub(crate) fn new(pager: &'a Pager) -> Self {
        Self {
            inner: Elements::new(pager),
        }
    }
}

impl Iterator for Keys<'_> {
    type Item = Result<i32>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|r| r.map(|e| e.key))
    }
}
