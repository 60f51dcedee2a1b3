//! Snapshot buffers (C7): a lock-free double buffer with a monotone
//! sequence number, single producer, many readers.
//!
//! Two full `Snapshot` records are boxed once at startup; a single
//! atomic pointer marks which one is reader-visible ("front"). The
//! producer only ever mutates the other one ("back") and publishes with
//! a release-store swap. Readers copy the front record field-wise under
//! a seqlock retry, with no locking and no blocking of the producer.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::model::Snapshot;

/// Cache-line-sized wrapper, used only to pad the pointer-sized control
/// block apart from neighboring allocations — the large `Snapshot`
/// record itself is heap-allocated regardless.
#[repr(align(64))]
struct CacheAligned<T>(UnsafeCell<T>);

pub struct SnapshotBuffers {
    a: Box<CacheAligned<Snapshot>>,
    b: Box<CacheAligned<Snapshot>>,
    front: AtomicPtr<Snapshot>,
}

// SAFETY: `front` is the only cross-thread-visible field; `a`/`b` are
// reached through `back_mut`/`publish`, which the single producer thread
// alone is permitted to call, and through `front`'s Acquire load for
// readers. No two threads ever write the same record concurrently.
unsafe impl Send for SnapshotBuffers {}
unsafe impl Sync for SnapshotBuffers {}

impl SnapshotBuffers {
    pub fn new() -> Self {
        let a = Box::new(CacheAligned(UnsafeCell::new(Snapshot::default())));
        let b = Box::new(CacheAligned(UnsafeCell::new(Snapshot::default())));
        let front_ptr: *mut Snapshot = a.0.get();
        Self { a, b, front: AtomicPtr::new(front_ptr) }
    }

    /// Current published sequence number (Acquire load).
    pub fn seq(&self) -> u64 {
        // SAFETY: front always points at one of `a`/`b`, both alive for `self`'s lifetime.
        unsafe { (*self.front.load(Ordering::Acquire)).sequence_number }
    }

    /// Copies the front snapshot out under a seqlock retry. Never blocks
    /// the producer; on a torn read (sequence changed mid-copy) it retries.
    pub fn read(&self) -> Snapshot {
        loop {
            let ptr = self.front.load(Ordering::Acquire);
            // SAFETY: ptr is one of the two owned records, alive for `self`'s lifetime.
            let seq_before = unsafe { (*ptr).sequence_number };
            let copy = unsafe { (*ptr).clone() };
            let seq_after = unsafe { (*self.front.load(Ordering::Acquire)).sequence_number };
            if seq_before == seq_after {
                return copy;
            }
        }
    }

    /// Returns a mutable handle to the back buffer for the producer to
    /// populate. Callers must guarantee only the single producer thread
    /// ever calls this or `publish`.
    #[allow(clippy::mut_from_ref)]
    pub fn back_mut(&self) -> &mut Snapshot {
        let front_ptr = self.front.load(Ordering::Relaxed);
        let back_cell = if front_ptr == self.a.0.get() { &self.b.0 } else { &self.a.0 };
        // SAFETY: the single-producer invariant means no concurrent writer
        // or reader is dereferencing this cell as `&mut` right now.
        unsafe { &mut *back_cell.get() }
    }

    /// Publishes the back buffer: bumps its sequence number to
    /// `front.sequence_number + 1` and swaps `front` to point at it.
    pub fn publish(&self) {
        let front_seq = self.seq();
        let front_ptr = self.front.load(Ordering::Relaxed);
        let back_cell = if front_ptr == self.a.0.get() { &self.b.0 } else { &self.a.0 };
        let back_ptr = back_cell.get();
        // SAFETY: single-producer invariant, see `back_mut`.
        unsafe { (*back_ptr).sequence_number = front_seq + 1 };
        self.front.store(back_ptr, Ordering::Release);
    }
}

impl Default for SnapshotBuffers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_increments_sequence_monotonically() {
        let buffers = SnapshotBuffers::new();
        assert_eq!(buffers.seq(), 0);
        buffers.back_mut().cpu.total_pct = 10.0;
        buffers.publish();
        assert_eq!(buffers.seq(), 1);
        buffers.back_mut().cpu.total_pct = 20.0;
        buffers.publish();
        assert_eq!(buffers.seq(), 2);
    }

    #[test]
    fn reader_sees_published_contents() {
        let buffers = SnapshotBuffers::new();
        buffers.back_mut().cpu.total_pct = 42.0;
        buffers.publish();
        let snapshot = buffers.read();
        assert_eq!(snapshot.cpu.total_pct, 42.0);
        assert_eq!(snapshot.sequence_number, 1);
    }

    #[test]
    fn back_buffer_alternates_between_publishes() {
        let buffers = SnapshotBuffers::new();
        buffers.back_mut().cpu.total_pct = 1.0;
        buffers.publish();
        // After publishing, back_mut should now point at the *other* record,
        // which still carries whatever state it was last given (here: default).
        assert_eq!(buffers.back_mut().cpu.total_pct, 0.0);
    }
}
