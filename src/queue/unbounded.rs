//! Unbounded lock-free FIFO of chained ring-buffer segments.
//!
//! The queue is a Michael–Scott-style linked chain of segments drawn from
//! the shared [`BlockPool`]; each segment holds one [`RingBuffer`]. `head`
//! points at the oldest segment (never null while the queue lives), `tail`
//! at the newest. A full tail ring is sealed and a fresh segment linked
//! after it; a drained and sealed head segment is retired back to the pool.
//!
//! Retirement is deferred through `crossbeam_epoch`: a thread that loaded a
//! segment index before the head swung past it can still dereference the
//! segment safely, because the block is not returned to the free list until
//! no pinned thread can hold such a reference. Sealing (the ring's close
//! bit) guarantees a lagging producer cannot publish into a segment that is
//! about to be retired.

use std::hint::spin_loop;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_epoch as epoch;

use crate::pool::{AtomicLink, BlockIndex, BlockPool, PoolIdx, CHUNK_BLOCKS};
use crate::queue::ring::RingBuffer;
use crate::util::CachePadded;

/// One chain node: a ring buffer living inside a pool block.
struct Segment<T> {
    ring: RingBuffer<T>,
}

/// Logically infinite lock-free FIFO.
pub struct UnboundedQueue<T> {
    head: CachePadded<AtomicLink>,
    tail: CachePadded<AtomicLink>,
    pool: Arc<BlockPool>,
    segment_capacity: usize,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for UnboundedQueue<T> {}
unsafe impl<T: Send> Sync for UnboundedQueue<T> {}

impl<T: Send + 'static> UnboundedQueue<T> {
    /// A queue whose segments hold `segment_capacity` values each, drawn
    /// from `pool`. The first segment is allocated up front; `head` is
    /// never null afterwards.
    pub fn new(pool: Arc<BlockPool>, segment_capacity: usize) -> Self {
        let first = alloc_segment::<T>(&pool, segment_capacity);
        let head = CachePadded::new(AtomicLink::null());
        let tail = CachePadded::new(AtomicLink::null());
        head.store_bump(Some(first), Ordering::Release);
        tail.store_bump(Some(first), Ordering::Release);
        Self {
            head,
            tail,
            pool,
            segment_capacity,
            _marker: PhantomData,
        }
    }

    /// Append a value. Always succeeds; grows by one segment when the tail
    /// ring is full.
    pub fn enqueue(&self, value: T) {
        let _guard = epoch::pin();
        let mut value = value;
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let tidx = tail.index().expect("queue tail is never null");
            let seg = unsafe { self.segment(tidx) };

            match seg.ring.try_push(value) {
                Ok(()) => return,
                Err(e) => value = e.into_inner(),
            }

            // Tail ring full (or already sealed): seal it so nothing can
            // land there anymore, then link a successor.
            seg.ring.close();

            let link = self.pool.link(tidx);
            let next = link.load(Ordering::Acquire);
            if let Some(nidx) = next.index() {
                // another producer already linked; help the tail along
                let _ = self.tail.compare_exchange(tail, Some(nidx));
                continue;
            }

            let fresh = alloc_segment::<T>(&self.pool, self.segment_capacity);
            if link.compare_exchange(next, Some(fresh)) {
                let _ = self.tail.compare_exchange(tail, Some(fresh));
            } else {
                // lost the link race; the unused segment goes straight back
                self.pool.free(PoolIdx::<Segment<T>>::from_raw(fresh));
            }
        }
    }

    /// Pop the oldest value; `None` only when the queue is genuinely empty
    /// (head segment empty with no successor).
    pub fn dequeue(&self) -> Option<T> {
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire);
            let hidx = head.index().expect("queue head is never null");
            let seg = unsafe { self.segment(hidx) };

            if let Some(value) = seg.ring.try_pop() {
                return Some(value);
            }

            let next = self.pool.link(hidx).load(Ordering::Acquire);
            let Some(nidx) = next.index() else {
                return None;
            };

            // A successor exists, so the head ring is sealed. Wait out any
            // in-flight publisher, then retire the segment.
            if !seg.ring.is_drained() {
                if let Some(value) = seg.ring.try_pop() {
                    return Some(value);
                }
                spin_loop();
                continue;
            }

            // Keep the tail from lagging into the segment we retire.
            let tail = self.tail.load(Ordering::Acquire);
            if tail.index() == Some(hidx) {
                let _ = self.tail.compare_exchange(tail, Some(nidx));
            }

            if self.head.compare_exchange(head, Some(nidx)) {
                let pool = Arc::clone(&self.pool);
                let idx = PoolIdx::<Segment<T>>::from_raw(hidx);
                guard.defer(move || pool.free(idx));
            }
        }
    }

    /// Best-effort emptiness snapshot.
    pub fn is_empty(&self) -> bool {
        let _guard = epoch::pin();
        let head = self.head.load(Ordering::Acquire);
        let hidx = head.index().expect("queue head is never null");
        let seg = unsafe { self.segment(hidx) };
        seg.ring.is_empty() && self.pool.link(hidx).load(Ordering::Acquire).is_null()
    }

    /// Snapshot element count across all segments. O(segments); exact only
    /// without concurrent mutation.
    pub fn len(&self) -> usize {
        let _guard = epoch::pin();
        let mut total = 0;
        let mut cur = self.head.load(Ordering::Acquire).index();
        while let Some(idx) = cur {
            let seg = unsafe { self.segment(idx) };
            total += seg.ring.len();
            cur = self.pool.link(idx).load(Ordering::Acquire).index();
        }
        total
    }

    /// Detach the whole chain, substitute one fresh empty segment, and drop
    /// the detached values. Like the ring's `clear`, this is for controlled
    /// teardown: producers must be quiescent.
    pub fn clear(&self) {
        let guard = epoch::pin();
        let fresh = alloc_segment::<T>(&self.pool, self.segment_capacity);

        let old_head = loop {
            let head = self.head.load(Ordering::Acquire);
            if self.head.compare_exchange(head, Some(fresh)) {
                break head;
            }
        };
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            if self.tail.compare_exchange(tail, Some(fresh)) {
                break;
            }
        }

        let mut cur = old_head.index();
        while let Some(idx) = cur {
            cur = self.pool.link(idx).load(Ordering::Acquire).index();
            let pool = Arc::clone(&self.pool);
            let idx = PoolIdx::<Segment<T>>::from_raw(idx);
            guard.defer(move || pool.free(idx));
        }
    }

    unsafe fn segment(&self, idx: BlockIndex) -> &Segment<T> {
        self.pool.get(PoolIdx::<Segment<T>>::from_raw(idx))
    }
}

fn alloc_segment<T: Send + 'static>(pool: &Arc<BlockPool>, capacity: usize) -> BlockIndex {
    loop {
        let segment = Segment {
            ring: RingBuffer::<T>::with_capacity(capacity),
        };
        match pool.allocate(segment) {
            Some(idx) => return idx.raw(),
            None => {
                assert!(
                    pool.reserve(CHUNK_BLOCKS),
                    "block pool chunk directory exhausted"
                );
            }
        }
    }
}

impl<T> Drop for UnboundedQueue<T> {
    fn drop(&mut self) {
        // exclusive access: free the chain directly, dropping any values
        // still inside the rings
        let mut cur = self.head.load(Ordering::Acquire).index();
        while let Some(idx) = cur {
            cur = self.pool.link(idx).load(Ordering::Acquire).index();
            self.pool.free(PoolIdx::<Segment<T>>::from_raw(idx));
        }
    }
}

impl<T> std::fmt::Debug for UnboundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnboundedQueue")
            .field("segment_capacity", &self.segment_capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::thread;

    fn queue(segment_capacity: usize) -> UnboundedQueue<(usize, usize)> {
        UnboundedQueue::new(Arc::new(BlockPool::with_capacity(CHUNK_BLOCKS)), segment_capacity)
    }

    #[test]
    fn test_empty_queue() {
        let q = queue(4);
        assert!(q.is_empty());
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn test_fifo_across_segments() {
        let q = queue(4);
        // far more values than one segment holds
        for i in 0..100 {
            q.enqueue((0, i));
        }
        assert_eq!(q.len(), 100);
        for i in 0..100 {
            assert_eq!(q.dequeue(), Some((0, i)));
        }
        assert_eq!(q.dequeue(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_interleaved_enqueue_dequeue() {
        let q = queue(2);
        for round in 0..50 {
            q.enqueue((0, round));
            q.enqueue((0, round + 1000));
            assert_eq!(q.dequeue(), Some((0, round)));
            assert_eq!(q.dequeue(), Some((0, round + 1000)));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_clear_substitutes_fresh_segment() {
        let q = queue(4);
        for i in 0..20 {
            q.enqueue((0, i));
        }
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.dequeue(), None);

        q.enqueue((0, 7));
        assert_eq!(q.dequeue(), Some((0, 7)));
    }

    #[test]
    fn test_drop_releases_values() {
        let marker = Arc::new(());
        {
            let pool = Arc::new(BlockPool::with_capacity(CHUNK_BLOCKS));
            let q: UnboundedQueue<Arc<()>> = UnboundedQueue::new(pool, 4);
            for _ in 0..10 {
                q.enqueue(marker.clone());
            }
            assert_eq!(Arc::strong_count(&marker), 11);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_multi_producer_order_preserved_per_producer() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 5_000;

        let q = Arc::new(queue(8));
        let mut handles = Vec::new();
        for p in 0..PRODUCERS {
            let q = q.clone();
            handles.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    q.enqueue((p, i));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let mut next_expected: HashMap<usize, usize> = HashMap::new();
        let mut total = 0;
        while let Some((p, i)) = q.dequeue() {
            let expected = next_expected.entry(p).or_insert(0);
            assert_eq!(i, *expected, "producer {p} out of order");
            *expected += 1;
            total += 1;
        }
        assert_eq!(total, PRODUCERS * PER_PRODUCER);
    }

    #[test]
    fn test_mpmc_exactly_once() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: usize = 5_000;

        let q = Arc::new(queue(16));
        let done = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut producers = Vec::new();
        for p in 0..PRODUCERS {
            let q = q.clone();
            let done = done.clone();
            producers.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    q.enqueue((p, i));
                }
                done.fetch_add(1, Ordering::Release);
            }));
        }

        let mut consumers = Vec::new();
        for _ in 0..CONSUMERS {
            let q = q.clone();
            let done = done.clone();
            consumers.push(thread::spawn(move || {
                let mut got = Vec::new();
                loop {
                    match q.dequeue() {
                        Some(v) => got.push(v),
                        None => {
                            if done.load(Ordering::Acquire) == PRODUCERS && q.is_empty() {
                                break;
                            }
                            thread::yield_now();
                        }
                    }
                }
                got
            }));
        }

        for h in producers {
            h.join().unwrap();
        }
        let mut seen = HashSet::new();
        let mut total = 0;
        for c in consumers {
            for v in c.join().unwrap() {
                assert!(seen.insert(v), "{v:?} dequeued twice");
                total += 1;
            }
        }
        assert_eq!(total, PRODUCERS * PER_PRODUCER);
    }
}
