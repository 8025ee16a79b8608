//! Event handler registry
//!
//! Routes typed events from the audio thread to host-registered handlers.
//! The audio thread pushes fixed-size messages onto an SPSC channel; a
//! dedicated dispatch thread drains it and invokes the handlers, so handler
//! code never runs on (or blocks) the render callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::RwLock;

use wf_core::spsc::{spsc_channel, OverflowStrategy, SpscSender, WaitStrategy};

/// Event kinds surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioEvent {
    /// A scheduled source reached its `Finished` state.
    Ended,
    /// A queued buffer finished playing.
    BufferEnded,
    /// Periodic playback-position report from a buffer source.
    PositionChanged,
    /// The platform driver is ready and producing audio.
    AudioReady,
    /// The recorder feeding a recorder-adapter node failed.
    RecorderError,
    /// The platform device failed; the context fell back to `Suspended`.
    DeviceError,
}

/// Payload delivered to handlers.
///
/// Fields irrelevant to an event kind stay `None`. The audio thread only
/// ever fills `Copy` fields; `message` is reserved for control-side emits.
#[derive(Debug, Clone, Default)]
pub struct EventBody {
    pub buffer_id: Option<u64>,
    pub is_last_in_queue: Option<bool>,
    pub position: Option<f64>,
    pub message: Option<String>,
}

/// Message crossing from the audio thread to the dispatcher.
#[derive(Debug)]
struct EventMessage {
    event: AudioEvent,
    /// Deliver to a single listener, or to every handler of the kind.
    listener: Option<u64>,
    body: EventBody,
}

type Handler = Box<dyn Fn(&EventBody) + Send + Sync>;

/// Sending half handed to the render graph. Fire-and-forget; events are
/// dropped (counted, not blocked on) when the dispatch thread falls behind.
pub struct EventEmitter {
    tx: SpscSender<EventMessage>,
}

impl EventEmitter {
    pub fn emit(&self, event: AudioEvent, listener: Option<u64>, body: EventBody) {
        let _ = self.tx.try_send(EventMessage {
            event,
            listener,
            body,
        });
    }
}

/// Registry of host handlers plus the dispatch thread.
pub struct EventHandlerRegistry {
    handlers: Arc<RwLock<HashMap<AudioEvent, HashMap<u64, Handler>>>>,
    next_listener: AtomicU64,
    emitter: parking_lot::Mutex<Option<EventEmitter>>,
    worker: Option<JoinHandle<()>>,
}

impl EventHandlerRegistry {
    const CHANNEL_CAPACITY: usize = 256;

    pub fn new() -> Self {
        let (tx, rx) = spsc_channel::<EventMessage>(
            Self::CHANNEL_CAPACITY,
            OverflowStrategy::WaitOnFull,
            WaitStrategy::AtomicWait,
        );
        let handlers: Arc<RwLock<HashMap<AudioEvent, HashMap<u64, Handler>>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let dispatch_map = Arc::clone(&handlers);
        let worker = std::thread::Builder::new()
            .name("wf-events".into())
            .spawn(move || {
                while let Some(message) = rx.receive() {
                    let map = dispatch_map.read();
                    if let Some(listeners) = map.get(&message.event) {
                        match message.listener {
                            Some(id) => {
                                if let Some(handler) = listeners.get(&id) {
                                    handler(&message.body);
                                }
                            }
                            None => {
                                for handler in listeners.values() {
                                    handler(&message.body);
                                }
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn event dispatch thread");

        Self {
            handlers,
            next_listener: AtomicU64::new(1),
            emitter: parking_lot::Mutex::new(Some(EventEmitter { tx })),
            worker: Some(worker),
        }
    }

    /// Take the audio-thread emitter. Valid exactly once per registry.
    pub(crate) fn take_emitter(&self) -> Option<EventEmitter> {
        self.emitter.lock().take()
    }

    /// Register a handler; the returned listener id addresses targeted emits.
    pub fn register<F>(&self, event: AudioEvent, handler: F) -> u64
    where
        F: Fn(&EventBody) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(event)
            .or_default()
            .insert(id, Box::new(handler));
        id
    }

    pub fn unregister(&self, event: AudioEvent, listener: u64) {
        if let Some(listeners) = self.handlers.write().get_mut(&event) {
            listeners.remove(&listener);
        }
    }

    /// Invoke handlers synchronously from a control thread (driver errors,
    /// decode completions). Bypasses the audio-thread channel.
    pub fn dispatch_direct(&self, event: AudioEvent, listener: Option<u64>, body: &EventBody) {
        let map = self.handlers.read();
        if let Some(listeners) = map.get(&event) {
            match listener {
                Some(id) => {
                    if let Some(handler) = listeners.get(&id) {
                        handler(body);
                    }
                }
                None => {
                    for handler in listeners.values() {
                        handler(body);
                    }
                }
            }
        }
    }
}

impl Default for EventHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventHandlerRegistry {
    fn drop(&mut self) {
        // Dropping the emitter (if never taken) disconnects the channel and
        // lets the worker drain out. If the render graph still owns the
        // emitter the worker exits when the graph is torn down.
        self.emitter.lock().take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
