//! Lock-free bounded MPMC ring buffer.
//!
//! Four monotonically-advancing cursors drive a two-phase reserve/publish
//! protocol:
//!
//! - `init`: next position reserved by a writer (also carries the close bit)
//! - `end`: next position visible to readers (committed)
//! - `start`: next position reserved by a reader
//! - `clean`: next position free for writer reuse
//!
//! Invariant: `clean <= start <= end <= init`. A push CAS-reserves on
//! `init`, writes the slot, then publishes by CAS-advancing `end` in
//! reservation order; a pop mirrors this with `start` and `clean`. A writer
//! preempted between reserve and publish stalls only readers of that slot;
//! other producers and consumers proceed at their own cursors, bounded by
//! the publish spin.
//!
//! Positions never wrap in practice (the close bit caps them at 2^63 on
//! 64-bit targets); the slot index is `position % slots`.

use std::cell::UnsafeCell;
use std::fmt;
use std::hint::spin_loop;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::{Backoff, CachePadded};

/// High bit of the `init` word: the ring is sealed against new reservations.
const CLOSED: usize = 1 << (usize::BITS - 1);

/// Failed push, handing the value back.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// All slots reserved or awaiting cleanup.
    Full(T),
    /// The ring was closed; no reservation can win anymore.
    Closed(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(v) | PushError::Closed(v) => v,
        }
    }
}

struct Slot<T>(UnsafeCell<MaybeUninit<T>>);

/// Fixed-capacity lock-free circular buffer.
///
/// Capacity N is served by N+1 slots; the spare slot disambiguates full
/// from empty.
pub struct RingBuffer<T> {
    slots: Box<[Slot<T>]>,
    init: CachePadded<AtomicUsize>,
    end: CachePadded<AtomicUsize>,
    start: CachePadded<AtomicUsize>,
    clean: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity >= 1, "ring buffer capacity must be >= 1");
        let slots: Box<[Slot<T>]> = (0..capacity + 1)
            .map(|_| Slot(UnsafeCell::new(MaybeUninit::uninit())))
            .collect();
        Self {
            slots,
            init: CachePadded::new(AtomicUsize::new(0)),
            end: CachePadded::new(AtomicUsize::new(0)),
            start: CachePadded::new(AtomicUsize::new(0)),
            clean: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Snapshot element count; exact only without concurrent mutation.
    pub fn len(&self) -> usize {
        let start = self.start.load(Ordering::Acquire);
        let end = self.end.load(Ordering::Acquire);
        end.saturating_sub(start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Non-blocking push; gives the value back when full or closed.
    pub fn try_push(&self, value: T) -> Result<(), PushError<T>> {
        loop {
            let word = self.init.load(Ordering::Acquire);
            if word & CLOSED != 0 {
                return Err(PushError::Closed(value));
            }
            let pos = word;
            let clean = self.clean.load(Ordering::Acquire);
            if pos.wrapping_sub(clean) >= self.capacity() {
                return Err(PushError::Full(value));
            }
            if self
                .init
                .compare_exchange_weak(pos, pos + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                unsafe { self.slot(pos).write(value) };
                // publish in reservation order; bounded wait on slower
                // writers ahead of us
                while self
                    .end
                    .compare_exchange_weak(pos, pos + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    spin_loop();
                }
                return Ok(());
            }
            spin_loop();
        }
    }

    /// Spinning push for blocking-acceptable call sites.
    ///
    /// # Panics
    ///
    /// Panics if the ring is closed; a closed ring would spin forever.
    pub fn push(&self, value: T) {
        let mut value = value;
        let mut backoff = Backoff::new();
        loop {
            match self.try_push(value) {
                Ok(()) => return,
                Err(PushError::Full(v)) => {
                    value = v;
                    backoff.spin();
                }
                Err(PushError::Closed(_)) => panic!("push on closed ring buffer"),
            }
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<T> {
        loop {
            let start = self.start.load(Ordering::Acquire);
            let end = self.end.load(Ordering::Acquire);
            if start == end {
                return None;
            }
            if self
                .start
                .compare_exchange_weak(start, start + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let value = unsafe { self.slot(start).read() };
                // release the slot for writer reuse, in reservation order
                while self
                    .clean
                    .compare_exchange_weak(start, start + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    spin_loop();
                }
                return Some(value);
            }
            spin_loop();
        }
    }

    /// Spinning pop for blocking-acceptable call sites.
    pub fn pop(&self) -> T {
        let mut backoff = Backoff::new();
        loop {
            if let Some(value) = self.try_pop() {
                return value;
            }
            backoff.snooze();
        }
    }

    /// Seal the ring: no new push reservation can win. In-flight
    /// reservations still publish and remain poppable. Idempotent.
    pub fn close(&self) {
        self.init.fetch_or(CLOSED, Ordering::AcqRel);
    }

    pub fn is_closed(&self) -> bool {
        self.init.load(Ordering::Acquire) & CLOSED != 0
    }

    /// Whether the ring is closed and every pre-close reservation has been
    /// popped. Only then may a segment holding this ring be retired.
    pub fn is_drained(&self) -> bool {
        let word = self.init.load(Ordering::Acquire);
        if word & CLOSED == 0 {
            return false;
        }
        self.start.load(Ordering::Acquire) == word & !CLOSED
    }

    /// Pop until empty. Not atomic as a whole; controlled teardown only.
    pub fn clear(&self) {
        while self.try_pop().is_some() {}
    }

    fn slot(&self, pos: usize) -> *mut T {
        self.slots[pos % self.slots.len()].0.get().cast()
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        let mut pos = *self.start.get_mut();
        let end = *self.end.get_mut();
        while pos != end {
            unsafe { self.slot(pos).drop_in_place() };
            pos += 1;
        }
    }
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_round_trip_in_order() {
        let ring = RingBuffer::with_capacity(8);
        for k in 0..=8 {
            for i in 0..k {
                ring.try_push(i).unwrap();
            }
            for i in 0..k {
                assert_eq!(ring.try_pop(), Some(i));
            }
            assert_eq!(ring.try_pop(), None);
        }
    }

    #[test]
    fn test_full_gives_value_back() {
        let ring = RingBuffer::with_capacity(2);
        ring.try_push(1).unwrap();
        ring.try_push(2).unwrap();
        assert!(ring.is_full());
        assert_eq!(ring.try_push(3), Err(PushError::Full(3)));

        assert_eq!(ring.try_pop(), Some(1));
        ring.try_push(3).unwrap();
        assert_eq!(ring.try_pop(), Some(2));
        assert_eq!(ring.try_pop(), Some(3));
    }

    #[test]
    fn test_wraparound() {
        let ring = RingBuffer::with_capacity(3);
        for i in 0..100 {
            ring.try_push(i).unwrap();
            assert_eq!(ring.try_pop(), Some(i));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_close_rejects_new_pushes() {
        let ring = RingBuffer::with_capacity(4);
        ring.try_push(1).unwrap();
        ring.close();

        assert!(ring.is_closed());
        assert!(!ring.is_drained());
        assert_eq!(ring.try_push(2), Err(PushError::Closed(2)));

        assert_eq!(ring.try_pop(), Some(1));
        assert!(ring.is_drained());
    }

    #[test]
    fn test_clear() {
        let ring = RingBuffer::with_capacity(4);
        for i in 0..4 {
            ring.try_push(i).unwrap();
        }
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.try_pop(), None);
    }

    #[test]
    fn test_drop_releases_remaining() {
        let marker = Arc::new(());
        {
            let ring = RingBuffer::with_capacity(4);
            ring.try_push(marker.clone()).unwrap();
            ring.try_push(marker.clone()).unwrap();
            assert_eq!(Arc::strong_count(&marker), 3);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_spsc_fifo_order() {
        let ring = Arc::new(RingBuffer::with_capacity(16));
        const COUNT: usize = 10_000;

        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                for i in 0..COUNT {
                    ring.push(i);
                }
            })
        };

        let consumer = {
            let ring = ring.clone();
            thread::spawn(move || {
                let mut expected = 0;
                while expected < COUNT {
                    if let Some(v) = ring.try_pop() {
                        assert_eq!(v, expected);
                        expected += 1;
                    }
                }
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();
    }

    #[test]
    fn test_mpmc_each_value_once() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: usize = 2_500;

        let ring = Arc::new(RingBuffer::with_capacity(32));
        let mut handles = Vec::new();

        for p in 0..PRODUCERS {
            let ring = ring.clone();
            handles.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    ring.push(p * PER_PRODUCER + i);
                }
            }));
        }

        let mut consumers = Vec::new();
        for _ in 0..CONSUMERS {
            let ring = ring.clone();
            consumers.push(thread::spawn(move || {
                let mut got = Vec::new();
                loop {
                    match ring.try_pop() {
                        Some(v) => got.push(v),
                        None if ring.is_closed() => break,
                        None => thread::yield_now(),
                    }
                }
                got
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
        ring.close();

        let mut seen = HashSet::new();
        let mut total = 0;
        for c in consumers {
            for v in c.join().unwrap() {
                assert!(seen.insert(v), "value {v} popped twice");
                total += 1;
            }
        }
        assert_eq!(total, PRODUCERS * PER_PRODUCER);
    }

    #[test]
    fn test_len_never_exceeds_capacity() {
        let ring = Arc::new(RingBuffer::with_capacity(8));
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let churn = {
            let ring = ring.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut i = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let _ = ring.try_push(i);
                    let _ = ring.try_pop();
                    i += 1;
                }
            })
        };

        for _ in 0..50_000 {
            assert!(ring.len() <= ring.capacity());
        }
        stop.store(true, Ordering::Relaxed);
        churn.join().unwrap();
        ring.clear();
    }
}
