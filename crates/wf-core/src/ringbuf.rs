//! Lock-free sample ring buffers
//!
//! Two single-producer single-consumer rings over a channel of float32
//! samples:
//! - `CircularBuffer` applies back-pressure: pushes beyond the capacity are
//!   truncated and reported to the caller.
//! - `OverwritingCircularBuffer` drops the oldest samples instead, so a
//!   producer that outruns the consumer keeps the most recent window.
//!
//! Wait-free for both sides. The audio thread must never block on these.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::Sample;

struct RingStorage {
    slots: Box<[UnsafeCell<Sample>]>,
    mask: usize,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

// One writer and one reader, coordinated through write_pos/read_pos.
unsafe impl Sync for RingStorage {}
unsafe impl Send for RingStorage {}

impl RingStorage {
    fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.next_power_of_two();
        Self {
            slots: (0..capacity).map(|_| UnsafeCell::new(0.0)).collect(),
            mask: capacity - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    unsafe fn write_slot(&self, index: usize, value: Sample) {
        *self.slots[index & self.mask].get() = value;
    }

    #[inline]
    unsafe fn read_slot(&self, index: usize) -> Sample {
        *self.slots[index & self.mask].get()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CIRCULAR BUFFER (back-pressure)
// ═══════════════════════════════════════════════════════════════════════════════

/// SPSC sample ring with back-pressure semantics.
pub struct CircularBuffer {
    ring: RingStorage,
}

impl CircularBuffer {
    /// Create a ring with at least `min_capacity` slots (rounded up to a power of two).
    pub fn new(min_capacity: usize) -> Self {
        Self {
            ring: RingStorage::new(min_capacity),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Samples available for reading.
    #[inline]
    pub fn available_read(&self) -> usize {
        let write = self.ring.write_pos.load(Ordering::Acquire);
        let read = self.ring.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    /// Free slots available for writing.
    #[inline]
    pub fn available_write(&self) -> usize {
        self.ring.capacity() - self.available_read()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    /// Push samples, truncating at capacity. Returns the number written.
    pub fn push(&self, samples: &[Sample]) -> usize {
        let write = self.ring.write_pos.load(Ordering::Relaxed);
        let read = self.ring.read_pos.load(Ordering::Acquire);
        let free = self.ring.capacity() - write.wrapping_sub(read);
        let to_write = samples.len().min(free);

        for (i, &s) in samples[..to_write].iter().enumerate() {
            unsafe { self.ring.write_slot(write.wrapping_add(i), s) };
        }

        self.ring
            .write_pos
            .store(write.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Pop samples into `out`. Returns the number read.
    pub fn pop(&self, out: &mut [Sample]) -> usize {
        let write = self.ring.write_pos.load(Ordering::Acquire);
        let read = self.ring.read_pos.load(Ordering::Relaxed);
        let to_read = out.len().min(write.wrapping_sub(read));

        for (i, s) in out[..to_read].iter_mut().enumerate() {
            *s = unsafe { self.ring.read_slot(read.wrapping_add(i)) };
        }

        self.ring
            .read_pos
            .store(read.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    /// Drop all buffered samples.
    pub fn clear(&self) {
        let write = self.ring.write_pos.load(Ordering::Acquire);
        self.ring.read_pos.store(write, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OVERWRITING CIRCULAR BUFFER
// ═══════════════════════════════════════════════════════════════════════════════

/// SPSC sample ring that overwrites the oldest samples when full.
///
/// The consumer tolerates the producer lapping it: a concurrent overwrite can
/// tear the oldest frames of a read, never the newest. Used where the latest
/// window matters more than completeness (recorder feeds, analyser history).
pub struct OverwritingCircularBuffer {
    ring: RingStorage,
}

impl OverwritingCircularBuffer {
    pub fn new(min_capacity: usize) -> Self {
        Self {
            ring: RingStorage::new(min_capacity),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Samples available for reading.
    #[inline]
    pub fn available_read(&self) -> usize {
        let write = self.ring.write_pos.load(Ordering::Acquire);
        let read = self.ring.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read).min(self.ring.capacity())
    }

    /// Push samples unconditionally, discarding the oldest on overflow.
    pub fn push(&self, samples: &[Sample]) {
        let mut write = self.ring.write_pos.load(Ordering::Relaxed);

        for &s in samples {
            let read = self.ring.read_pos.load(Ordering::Acquire);
            if write.wrapping_sub(read) >= self.ring.capacity() {
                // Claim the oldest slot; a concurrent pop may have advanced
                // read_pos already, which is fine either way.
                let _ = self.ring.read_pos.compare_exchange(
                    read,
                    read.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
            }
            unsafe { self.ring.write_slot(write, s) };
            write = write.wrapping_add(1);
        }

        self.ring.write_pos.store(write, Ordering::Release);
    }

    /// Pop up to `out.len()` samples. Returns the number read.
    pub fn pop(&self, out: &mut [Sample]) -> usize {
        let write = self.ring.write_pos.load(Ordering::Acquire);
        let mut read = self.ring.read_pos.load(Ordering::Relaxed);

        // Skip anything the producer has already lapped.
        if write.wrapping_sub(read) > self.ring.capacity() {
            read = write.wrapping_sub(self.ring.capacity());
        }

        let to_read = out.len().min(write.wrapping_sub(read));
        for (i, s) in out[..to_read].iter_mut().enumerate() {
            *s = unsafe { self.ring.read_slot(read.wrapping_add(i)) };
        }

        self.ring
            .read_pos
            .store(read.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    /// Copy the most recent `out.len()` samples without consuming them.
    ///
    /// When fewer samples have ever been written, the head of `out` is zeroed.
    pub fn peek_latest(&self, out: &mut [Sample]) {
        let write = self.ring.write_pos.load(Ordering::Acquire);
        let available = write.min(self.ring.capacity());
        let n = out.len().min(available);
        let pad = out.len() - n;

        out[..pad].fill(0.0);
        let start = write.wrapping_sub(n);
        for i in 0..n {
            out[pad + i] = unsafe { self.ring.read_slot(start.wrapping_add(i)) };
        }
    }

    pub fn clear(&self) {
        let write = self.ring.write_pos.load(Ordering::Acquire);
        self.ring.read_pos.store(write, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
