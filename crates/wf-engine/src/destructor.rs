//! Deferred destruction off the audio thread
//!
//! The audio thread must never run destructors: freed nodes, buffers and
//! engines are handed to an `AsyncDestructor`, whose only job is to receive
//! them on a worker thread and let them drop there.

use std::thread::JoinHandle;

use wf_core::spsc::{spsc_channel, OverflowStrategy, SpscSender, TrySendError, WaitStrategy};

/// Consumes values on a dedicated thread so their destructors never run on
/// the sender's thread. Shutdown is a `None` sentinel followed by a join.
pub struct AsyncDestructor<T: Send + 'static> {
    tx: SpscSender<Option<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> AsyncDestructor<T> {
    const CHANNEL_CAPACITY: usize = 1024;

    pub fn new(name: &str) -> Self {
        let (tx, rx) = spsc_channel::<Option<T>>(
            Self::CHANNEL_CAPACITY,
            OverflowStrategy::WaitOnFull,
            WaitStrategy::AtomicWait,
        );

        let worker = std::thread::Builder::new()
            .name(format!("wf-destructor-{name}"))
            .spawn(move || {
                while let Some(item) = rx.receive() {
                    match item {
                        Some(value) => drop(value),
                        None => break,
                    }
                }
            })
            .expect("failed to spawn destructor thread");

        Self {
            tx,
            worker: Some(worker),
        }
    }

    /// Hand `item` to the worker. On a full channel the item is returned so
    /// the caller can retry next block.
    pub fn try_consign(&self, item: T) -> Result<(), T> {
        match self.tx.try_send(Some(item)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(Some(v))) | Err(TrySendError::Disconnected(Some(v))) => Err(v),
            Err(_) => unreachable!("sentinel is only sent on drop"),
        }
    }

    /// True when `try_consign` is guaranteed to succeed. Reliable because the
    /// caller is the channel's only producer.
    pub fn has_capacity(&self) -> bool {
        self.tx.len() + 1 < self.tx.capacity()
    }
}

impl<T: Send + 'static> Drop for AsyncDestructor<T> {
    fn drop(&mut self) {
        let _ = self.tx.send(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct DropProbe(Arc<AtomicUsize>);

    impl Drop for DropProbe {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_items_dropped_on_worker() {
        let drops = Arc::new(AtomicUsize::new(0));
        let destructor = AsyncDestructor::new("test");

        for _ in 0..10 {
            destructor.try_consign(DropProbe(Arc::clone(&drops))).ok();
        }
        drop(destructor);

        assert_eq!(drops.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_shutdown_joins_cleanly() {
        let destructor: AsyncDestructor<Vec<u8>> = AsyncDestructor::new("empty");
        drop(destructor);
    }
}
