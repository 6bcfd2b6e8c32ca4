//! Lock-free intrusive list of pool blocks.
//!
//! The list threads blocks together through their link cells; no node
//! allocation of its own. It serves both as a generic structure (the pool's
//! free list is one) and as the chaining mechanism for queue segments.
//!
//! Iteration is forward-only and snapshot-consistent only to the extent
//! nodes are not concurrently unlinked. Concurrent mutation during
//! iteration is a documented hazard, not a data race: blocks stay valid
//! memory for the pool's whole lifetime.

use std::hint::spin_loop;
use std::sync::atomic::Ordering;

use super::link::{AtomicLink, Link};
use super::{BlockIndex, BlockPool};
use crate::util::CachePadded;

/// Lock-free singly-linked LIFO/FIFO list addressed by one atomic head.
#[derive(Debug)]
pub struct AtomicList {
    head: CachePadded<AtomicLink>,
}

impl AtomicList {
    pub const fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicLink::null()),
        }
    }

    /// Best-effort emptiness check; may race.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Prepend `idx` (LIFO).
    pub fn push_front(&self, pool: &BlockPool, idx: BlockIndex) {
        insert_next(&self.head, pool, idx);
    }

    /// Unlink and return the first element.
    pub fn pop_front(&self, pool: &BlockPool) -> Option<BlockIndex> {
        remove_next(&self.head, pool)
    }

    /// Link `idx` at the true tail (FIFO chain building).
    ///
    /// Walks to the terminal cell and CAS-inserts at null, restarting from
    /// the reached cell when another thread interleaves.
    pub fn append(&self, pool: &BlockPool, idx: BlockIndex) {
        pool.link(idx).store_bump(None, Ordering::Release);

        let mut cell: &AtomicLink = &self.head;
        loop {
            let cur = cell.load(Ordering::Acquire);
            match cur.index() {
                None => {
                    if cell.compare_exchange(cur, Some(idx)) {
                        return;
                    }
                    spin_loop();
                }
                Some(next) => cell = pool.link(next),
            }
        }
    }

    pub fn iter<'a>(&self, pool: &'a BlockPool) -> Iter<'a> {
        Iter {
            pool,
            cur: self.head.load(Ordering::Acquire),
        }
    }

    /// Snapshot length; O(n) and approximate under concurrent mutation.
    pub fn len(&self, pool: &BlockPool) -> usize {
        self.iter(pool).count()
    }
}

impl Default for AtomicList {
    fn default() -> Self {
        Self::new()
    }
}

/// CAS-loop prepend of `idx` after `cell`.
pub(crate) fn insert_next(cell: &AtomicLink, pool: &BlockPool, idx: BlockIndex) {
    let node = pool.link(idx);
    loop {
        let cur = cell.load(Ordering::Acquire);
        node.store_bump(cur.index(), Ordering::Release);
        if cell.compare_exchange(cur, Some(idx)) {
            return;
        }
        spin_loop();
    }
}

/// CAS-loop unlink of the immediate successor of `cell`.
pub(crate) fn remove_next(cell: &AtomicLink, pool: &BlockPool) -> Option<BlockIndex> {
    loop {
        let cur = cell.load(Ordering::Acquire);
        let idx = cur.index()?;
        let next = pool.link(idx).load(Ordering::Acquire);
        if cell.compare_exchange(cur, next.index()) {
            return Some(idx);
        }
        spin_loop();
    }
}

/// Forward-only iterator over block indices.
#[derive(Debug)]
pub struct Iter<'a> {
    pool: &'a BlockPool,
    cur: Link,
}

impl Iterator for Iter<'_> {
    type Item = BlockIndex;

    fn next(&mut self) -> Option<BlockIndex> {
        let idx = self.cur.index()?;
        self.cur = self.pool.link(idx).load(Ordering::Acquire);
        Some(idx)
    }
}
