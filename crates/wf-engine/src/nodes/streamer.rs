//! Streamer: plays decoded PCM blocks pushed from a background thread
//!
//! A bounded SPSC channel carries blocks from the decoder; back-pressure on
//! the channel bounds how far the decoder runs ahead. Underflow renders
//! silence until the next block arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wf_core::spsc::{spsc_channel, OverflowStrategy, SpscReceiver, SpscSender, TryRecvError, WaitStrategy};
use wf_core::SampleBuffer;

use crate::context::{AudioNode, BaseContext, NodeHandle};
use crate::error::{EngineError, EngineResult};
use crate::events::EventBody;
use crate::node::{
    finish_if_stop_scheduled, update_playback_info, AudioProcessor, NodeConfig, PlaybackState,
    ProcessScope, ProcessStatus, RetireStash, RetiredResource,
};

#[derive(Debug, Clone)]
pub struct StreamerOptions {
    pub channel_count: usize,
    /// Decoded blocks buffered ahead of playback.
    pub queue_capacity: usize,
}

impl Default for StreamerOptions {
    fn default() -> Self {
        Self {
            channel_count: 2,
            queue_capacity: 16,
        }
    }
}

pub(crate) struct StreamerProcessor {
    rx: SpscReceiver<SampleBuffer>,
    current: Option<SampleBuffer>,
    read_offset: usize,
    killed: Arc<AtomicBool>,
    drained: bool,
    stash: RetireStash,
}

impl AudioProcessor for StreamerProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus {
        if self.killed.load(Ordering::Acquire) {
            // Forced teardown skips the state machine and fires no ENDED.
            buf.zero();
            scope.state().set_playback_state(PlaybackState::Finished);
            return ProcessStatus::Finished;
        }

        let window = update_playback_info(
            scope.state(),
            buf,
            scope.frames,
            scope.sample_rate,
            scope.current_frame,
        );
        if window.is_silent() {
            buf.zero();
            return finish_if_stop_scheduled(scope);
        }

        self.stash.flush(scope);
        let start = window.start_offset;
        let end = (start + window.frame_count).min(scope.frames);
        let mut i = start;

        while i < end {
            if self.current.is_none() {
                match self.rx.try_receive() {
                    Ok(block) => {
                        self.current = Some(block);
                        self.read_offset = 0;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.drained = true;
                        break;
                    }
                }
            }

            let Some(block) = self.current.as_ref() else {
                break;
            };
            let available = block.frames() - self.read_offset;
            let to_copy = available.min(end - i);
            buf.copy_range(block, self.read_offset, i, to_copy);

            self.read_offset += to_copy;
            i += to_copy;
            if available == to_copy {
                if let Some(block) = self.current.take() {
                    // The drained block's storage is freed off-thread.
                    self.stash.retire(scope, RetiredResource::Block(block));
                }
            }
        }

        // Decoder underflow: emit zeros for the remainder.
        if i < end {
            buf.zero_range(i, end - i);
        }

        if self.drained
            && self.current.is_none()
            && scope.state().playback_state() == PlaybackState::Playing
        {
            scope.state().set_playback_state(PlaybackState::StopScheduled);
        }
        finish_if_stop_scheduled(scope)
    }
}

/// Control handle for a streamer.
pub struct StreamerNode {
    node: NodeHandle,
    tx: Option<SpscSender<SampleBuffer>>,
    killed: Arc<AtomicBool>,
}

impl StreamerNode {
    /// Push a decoded block; blocks briefly when the queue is full, which is
    /// the decoder's back-pressure.
    pub fn push_block(&self, block: SampleBuffer) -> EngineResult<()> {
        match &self.tx {
            Some(tx) => tx
                .send(block)
                .map_err(|_| EngineError::InvalidState("streamer has been torn down".into())),
            None => Err(EngineError::InvalidState(
                "streamer input already finished".into(),
            )),
        }
    }

    /// Signal the end of the stream: playback finishes after the queue
    /// drains and fires `ENDED` normally.
    pub fn finish(&mut self) {
        self.tx = None;
    }

    /// Immediate teardown without the normal state machine; no `ENDED`.
    pub fn cleanup(&self) {
        self.killed.store(true, Ordering::Release);
    }

    pub fn start(&self, when: f64) -> EngineResult<()> {
        self.node.schedule_start(when)
    }

    pub fn stop(&self, when: f64) -> EngineResult<()> {
        self.node.schedule_stop(when)
    }

    pub fn set_on_ended<F>(&self, handler: F) -> u64
    where
        F: Fn(&EventBody) + Send + Sync + 'static,
    {
        self.node.register_ended_handler(handler)
    }
}

impl AudioNode for StreamerNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl BaseContext {
    pub fn create_streamer(&self, options: StreamerOptions) -> EngineResult<StreamerNode> {
        let id = self.alloc_node_id();
        let (tx, rx) = spsc_channel(
            options.queue_capacity.max(2),
            OverflowStrategy::WaitOnFull,
            WaitStrategy::AtomicWait,
        );
        let killed = Arc::new(AtomicBool::new(false));

        let node = self.register_node(
            id,
            Box::new(StreamerProcessor {
                rx,
                current: None,
                read_offset: 0,
                killed: Arc::clone(&killed),
                drained: false,
                stash: RetireStash::default(),
            }),
            NodeConfig {
                channel_count: options.channel_count.clamp(1, wf_core::MAX_CHANNEL_COUNT),
                is_source: true,
                ..NodeConfig::default()
            },
        )?;

        Ok(StreamerNode {
            node,
            tx: Some(tx),
            killed,
        })
    }
}
