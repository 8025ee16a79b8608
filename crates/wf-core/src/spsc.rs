//! Typed single-producer / single-consumer channel
//!
//! Every cross-thread hand-off in the engine goes through one of these:
//! topology events, automation events, decoded PCM blocks, released
//! resources. Capacity is fixed at creation; two policies govern a full
//! channel (`WaitOnFull`, `OverwriteOnFull`) and two govern how a blocked
//! side waits (`BusyLoop`, `AtomicWait`).
//!
//! The audio thread only ever uses the non-blocking `try_*` operations.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Behavior of `send` when the channel is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// Block the producer until a slot frees up.
    WaitOnFull,
    /// Drop the oldest queued item and enqueue the new one.
    OverwriteOnFull,
}

/// How a blocked side waits for the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Spin with a CPU hint. Lowest latency, burns a core while waiting.
    BusyLoop,
    /// Park on a condition variable, woken by the opposite side.
    AtomicWait,
}

/// Error returned by `try_send`, handing the item back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum TrySendError<T> {
    Full(T),
    Disconnected(T),
}

/// Error returned by `try_receive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
    Disconnected,
}

// Condvar wait slice; bounds the damage of a missed wakeup.
const PARK_INTERVAL: Duration = Duration::from_millis(5);

struct Shared<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Consumer cursor. The producer may also bump it under `OverwriteOnFull`.
    head: AtomicUsize,
    /// Producer cursor.
    tail: AtomicUsize,
    overflow: OverflowStrategy,
    wait: WaitStrategy,
    tx_alive: AtomicBool,
    rx_alive: AtomicBool,
    park: Mutex<()>,
    not_empty: Condvar,
    not_full: Condvar,
}

unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        for i in head..tail {
            unsafe {
                (*self.slots[i & self.mask].get()).assume_init_drop();
            }
        }
    }
}

impl<T> Shared<T> {
    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn wake_consumer(&self) {
        if self.wait == WaitStrategy::AtomicWait {
            self.not_empty.notify_one();
        }
    }

    fn wake_producer(&self) {
        if self.wait == WaitStrategy::AtomicWait {
            self.not_full.notify_one();
        }
    }

    fn park_until_progress(&self) {
        match self.wait {
            WaitStrategy::BusyLoop => std::hint::spin_loop(),
            WaitStrategy::AtomicWait => {
                let mut guard = self.park.lock();
                self.not_empty.wait_for(&mut guard, PARK_INTERVAL);
            }
        }
    }

    fn park_until_space(&self) {
        match self.wait {
            WaitStrategy::BusyLoop => std::hint::spin_loop(),
            WaitStrategy::AtomicWait => {
                let mut guard = self.park.lock();
                self.not_full.wait_for(&mut guard, PARK_INTERVAL);
            }
        }
    }
}

/// Create an SPSC channel with the given capacity (rounded up to a power of two).
pub fn spsc_channel<T: Send>(
    min_capacity: usize,
    overflow: OverflowStrategy,
    wait: WaitStrategy,
) -> (SpscSender<T>, SpscReceiver<T>) {
    let capacity = min_capacity.next_power_of_two().max(2);
    let shared = Arc::new(Shared {
        slots: (0..capacity).map(|_| UnsafeCell::new(MaybeUninit::uninit())).collect(),
        mask: capacity - 1,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
        overflow,
        wait,
        tx_alive: AtomicBool::new(true),
        rx_alive: AtomicBool::new(true),
        park: Mutex::new(()),
        not_empty: Condvar::new(),
        not_full: Condvar::new(),
    });
    (
        SpscSender {
            shared: Arc::clone(&shared),
            _single: std::marker::PhantomData,
        },
        SpscReceiver {
            shared,
            _single: std::marker::PhantomData,
        },
    )
}

// Endpoints are Send but deliberately !Sync: each side belongs to exactly
// one thread at a time. The Cell marker suppresses the auto impl.
type SingleThreadMarker = std::marker::PhantomData<std::cell::Cell<()>>;

/// Producing endpoint. Exactly one per channel.
pub struct SpscSender<T> {
    shared: Arc<Shared<T>>,
    _single: SingleThreadMarker,
}

impl<T: Send> SpscSender<T> {
    /// Non-blocking send. Under `OverwriteOnFull` this never reports `Full`.
    pub fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
        if !self.shared.rx_alive.load(Ordering::Acquire) {
            return Err(TrySendError::Disconnected(item));
        }

        let tail = self.shared.tail.load(Ordering::Relaxed);
        loop {
            let head = self.shared.head.load(Ordering::Acquire);

            if tail.wrapping_sub(head) < self.shared.capacity() {
                // The consumer's head CAS releases its slot copy before we
                // can observe the new head, so reusing the slot is safe.
                unsafe {
                    (*self.shared.slots[tail & self.shared.mask].get()).write(item);
                }
                self.shared.tail.store(tail.wrapping_add(1), Ordering::Release);
                self.shared.wake_consumer();
                return Ok(());
            }

            match self.shared.overflow {
                OverflowStrategy::WaitOnFull => return Err(TrySendError::Full(item)),
                OverflowStrategy::OverwriteOnFull => {
                    // Claim the oldest slot. Losing the race means the
                    // consumer took it, so the channel is no longer full.
                    if self
                        .shared
                        .head
                        .compare_exchange(head, head.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                    {
                        unsafe {
                            (*self.shared.slots[head & self.shared.mask].get()).assume_init_drop();
                        }
                    }
                }
            }
        }
    }

    /// Send, blocking per the channel's wait strategy while full.
    ///
    /// Returns the item if the receiver has gone away.
    pub fn send(&self, item: T) -> Result<(), T> {
        let mut item = item;
        loop {
            match self.try_send(item) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(v)) => return Err(v),
                Err(TrySendError::Full(v)) => {
                    item = v;
                    self.shared.park_until_space();
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        let tail = self.shared.tail.load(Ordering::Relaxed);
        let head = self.shared.head.load(Ordering::Acquire);
        tail.wrapping_sub(head).min(self.shared.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

impl<T> Drop for SpscSender<T> {
    fn drop(&mut self) {
        self.shared.tx_alive.store(false, Ordering::Release);
        self.shared.wake_consumer();
    }
}

/// Consuming endpoint. Exactly one per channel.
pub struct SpscReceiver<T> {
    shared: Arc<Shared<T>>,
    _single: SingleThreadMarker,
}

impl<T: Send> SpscReceiver<T> {
    /// Non-blocking receive.
    pub fn try_receive(&self) -> Result<T, TryRecvError> {
        loop {
            let head = self.shared.head.load(Ordering::Relaxed);
            let tail = self.shared.tail.load(Ordering::Acquire);

            if head == tail {
                return if self.shared.tx_alive.load(Ordering::Acquire) {
                    Err(TryRecvError::Empty)
                } else {
                    Err(TryRecvError::Disconnected)
                };
            }

            // Copy the slot bytes first and only then claim the head. An
            // overwriting producer races us for the head CAS; whoever wins
            // owns the slot, so on a lost race the copy is discarded without
            // ever materialising a value.
            let bytes =
                unsafe { std::ptr::read(self.shared.slots[head & self.shared.mask].get()) };

            if self
                .shared
                .head
                .compare_exchange(head, head.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let value = unsafe { bytes.assume_init() };
                self.shared.wake_producer();
                return Ok(value);
            }
        }
    }

    /// Receive, blocking per the wait strategy. `None` once the producer is
    /// gone and the channel drained.
    pub fn receive(&self) -> Option<T> {
        loop {
            match self.try_receive() {
                Ok(v) => return Some(v),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => self.shared.park_until_progress(),
            }
        }
    }

    /// Receive with a deadline. `None` on timeout or disconnect.
    pub fn receive_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_receive() {
                Ok(v) => return Some(v),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    self.shared.park_until_progress();
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        let tail = self.shared.tail.load(Ordering::Acquire);
        let head = self.shared.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head).min(self.shared.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for SpscReceiver<T> {
    fn drop(&mut self) {
        self.shared.rx_alive.store(false, Ordering::Release);
        self.shared.wake_producer();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_preserves_order() {
        let (tx, rx) = spsc_channel(8, OverflowStrategy::WaitOnFull, WaitStrategy::BusyLoop);
        for i in 0..5 {
            tx.try_send(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(rx.try_receive(), Ok(i));
        }
        assert_eq!(rx.try_receive(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_wait_on_full_reports_full() {
        let (tx, rx) = spsc_channel(2, OverflowStrategy::WaitOnFull, WaitStrategy::BusyLoop);
        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        assert_eq!(tx.try_send(3), Err(TrySendError::Full(3)));

        assert_eq!(rx.try_receive(), Ok(1));
        tx.try_send(3).unwrap();
        assert_eq!(rx.try_receive(), Ok(2));
        assert_eq!(rx.try_receive(), Ok(3));
    }

    #[test]
    fn test_overwrite_on_full_drops_oldest() {
        let (tx, rx) = spsc_channel(2, OverflowStrategy::OverwriteOnFull, WaitStrategy::BusyLoop);
        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        tx.try_send(3).unwrap();

        assert_eq!(rx.try_receive(), Ok(2));
        assert_eq!(rx.try_receive(), Ok(3));
        assert_eq!(rx.try_receive(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_disconnect_detection() {
        let (tx, rx) = spsc_channel::<u32>(4, OverflowStrategy::WaitOnFull, WaitStrategy::BusyLoop);
        tx.try_send(7).unwrap();
        drop(tx);

        assert_eq!(rx.try_receive(), Ok(7));
        assert_eq!(rx.try_receive(), Err(TryRecvError::Disconnected));
        assert!(rx.receive().is_none());
    }

    #[test]
    fn test_receiver_drop_bounces_send() {
        let (tx, rx) = spsc_channel::<u32>(4, OverflowStrategy::WaitOnFull, WaitStrategy::AtomicWait);
        drop(rx);
        assert_eq!(tx.send(42), Err(42));
    }

    #[test]
    fn test_threaded_hand_off() {
        let (tx, rx) = spsc_channel(16, OverflowStrategy::WaitOnFull, WaitStrategy::AtomicWait);

        let producer = std::thread::spawn(move || {
            for i in 0..1000u64 {
                tx.send(i).unwrap();
            }
        });

        let mut expected = 0;
        while let Some(v) = rx.receive() {
            assert_eq!(v, expected);
            expected += 1;
        }
        assert_eq!(expected, 1000);
        producer.join().unwrap();
    }

    #[test]
    fn test_boxed_payloads_dropped_on_channel_drop() {
        let (tx, _rx) = spsc_channel(4, OverflowStrategy::WaitOnFull, WaitStrategy::BusyLoop);
        tx.try_send(Box::new(1usize)).unwrap();
        tx.try_send(Box::new(2usize)).unwrap();
        // Dropping both endpoints must free the queued boxes (checked by miri/asan).
    }
}
