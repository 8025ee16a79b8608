//! Generic task offloading
//!
//! Thin wrapper that spawns a worker thread consuming items from an SPSC
//! channel. Recorder callbacks, file writers and streamer decoders all run
//! through one of these so their work never touches the audio thread.

use std::thread::JoinHandle;

use wf_core::spsc::{spsc_channel, OverflowStrategy, SpscSender, TrySendError, WaitStrategy};

/// Worker thread fed by an SPSC channel. Dropping the offloader sends a
/// sentinel and joins the worker.
pub struct TaskOffloader<T: Send + 'static> {
    tx: SpscSender<Option<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> TaskOffloader<T> {
    pub fn new<F>(name: &str, capacity: usize, mut handler: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (tx, rx) = spsc_channel::<Option<T>>(
            capacity,
            OverflowStrategy::WaitOnFull,
            WaitStrategy::AtomicWait,
        );

        let worker = std::thread::Builder::new()
            .name(format!("wf-offload-{name}"))
            .spawn(move || {
                while let Some(item) = rx.receive() {
                    match item {
                        Some(value) => handler(value),
                        None => break,
                    }
                }
            })
            .expect("failed to spawn offload thread");

        Self {
            tx,
            worker: Some(worker),
        }
    }

    /// Non-blocking submit; the item comes back if the worker is saturated.
    pub fn try_submit(&self, item: T) -> Result<(), T> {
        match self.tx.try_send(Some(item)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(Some(v))) | Err(TrySendError::Disconnected(Some(v))) => Err(v),
            Err(_) => unreachable!("sentinel is only sent on drop"),
        }
    }

    /// Blocking submit for control-thread producers.
    pub fn submit(&self, item: T) -> Result<(), T> {
        self.tx.send(Some(item)).map_err(|v| match v {
            Some(item) => item,
            None => unreachable!("sentinel is only sent on drop"),
        })
    }
}

impl<T: Send + 'static> Drop for TaskOffloader<T> {
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

    #[test]
    fn test_worker_processes_all_items() {
        let sum = Arc::new(AtomicUsize::new(0));
        let sum_clone = Arc::clone(&sum);

        let offloader = TaskOffloader::new("sum", 16, move |v: usize| {
            sum_clone.fetch_add(v, Ordering::SeqCst);
        });

        for i in 1..=10 {
            offloader.submit(i).unwrap();
        }
        drop(offloader);

        assert_eq!(sum.load(Ordering::SeqCst), 55);
    }
}
