//! Recorder adapter: feeds externally captured audio into the graph
//!
//! An external recorder pushes frames into one overwriting ring per channel;
//! each block the node drains a quantum into its output. If the recorder
//! stalls, the shortfall renders as silence.

use std::sync::Arc;

use wf_core::{OverwritingCircularBuffer, SampleBuffer};

use crate::context::{AudioNode, BaseContext, NodeHandle};
use crate::error::EngineResult;
use crate::events::{AudioEvent, EventBody};
use crate::node::{AudioProcessor, NodeConfig, ProcessScope, ProcessStatus};

/// Ring capacity per channel, in frames (~185 ms at 44.1 kHz).
const RING_CAPACITY: usize = 8192;

struct RecorderRings {
    channels: Vec<OverwritingCircularBuffer>,
}

/// Producer handle given to the external recorder. Push from any single
/// thread; overruns overwrite the oldest frames.
pub struct RecorderFeed {
    rings: Arc<RecorderRings>,
    registry: Arc<crate::events::EventHandlerRegistry>,
}

impl RecorderFeed {
    /// Push planar frames, one slice per channel.
    pub fn push_planar(&self, channels: &[&[f32]]) {
        for (ring, data) in self.rings.channels.iter().zip(channels) {
            ring.push(data);
        }
    }

    /// Push interleaved frames.
    pub fn push_interleaved(&self, interleaved: &[f32]) {
        let channels = self.rings.channels.len();
        if channels == 1 {
            self.rings.channels[0].push(interleaved);
            return;
        }
        for (c, ring) in self.rings.channels.iter().enumerate() {
            for frame in interleaved.chunks_exact(channels) {
                ring.push(&frame[c..c + 1]);
            }
        }
    }

    /// Surface a recorder failure to host handlers.
    pub fn report_error(&self, message: impl Into<String>) {
        self.registry.dispatch_direct(
            AudioEvent::RecorderError,
            None,
            &EventBody {
                message: Some(message.into()),
                ..EventBody::default()
            },
        );
    }
}

pub(crate) struct RecorderAdapterProcessor {
    rings: Arc<RecorderRings>,
}

impl AudioProcessor for RecorderAdapterProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus {
        let channels = self.rings.channels.len();
        buf.set_channel_count(channels);

        for (c, ring) in self.rings.channels.iter().enumerate() {
            let out = &mut buf.channel_mut(c)[..scope.frames];
            let read = ring.pop(out);
            out[read..].fill(0.0);
        }
        ProcessStatus::Active
    }
}

/// Control handle for a recorder adapter.
pub struct RecorderAdapterNode {
    node: NodeHandle,
    rings: Arc<RecorderRings>,
}

impl RecorderAdapterNode {
    /// Split off the producer side for the external recorder thread.
    pub fn feed(&self) -> RecorderFeed {
        RecorderFeed {
            rings: Arc::clone(&self.rings),
            registry: Arc::clone(&self.node.registry),
        }
    }
}

impl AudioNode for RecorderAdapterNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl BaseContext {
    pub fn create_recorder_adapter(&self, channel_count: usize) -> EngineResult<RecorderAdapterNode> {
        let channel_count = channel_count.clamp(1, wf_core::MAX_CHANNEL_COUNT);
        let id = self.alloc_node_id();

        let rings = Arc::new(RecorderRings {
            channels: (0..channel_count)
                .map(|_| OverwritingCircularBuffer::new(RING_CAPACITY))
                .collect(),
        });

        let node = self.register_node(
            id,
            Box::new(RecorderAdapterProcessor {
                rings: Arc::clone(&rings),
            }),
            NodeConfig {
                channel_count,
                ..NodeConfig::default()
            },
        )?;

        Ok(RecorderAdapterNode { node, rings })
    }
}
