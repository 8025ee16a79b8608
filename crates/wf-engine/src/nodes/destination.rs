//! Destination node: the graph's single sink
//!
//! Pulled only by the render loop. By the time `process` runs the buffer
//! already holds the mixed input chain, so the only work left is taming
//! clipped signals before interleaving.

use wf_core::SampleBuffer;

use crate::context::{AudioNode, NodeHandle};
use crate::node::{AudioProcessor, ProcessScope, ProcessStatus};

pub(crate) struct DestinationProcessor;

impl AudioProcessor for DestinationProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, _scope: &ProcessScope) -> ProcessStatus {
        // Attenuate by the peak when above unity; quiet blocks pass as-is.
        buf.normalize();
        ProcessStatus::Active
    }
}

/// Control handle for the destination sink.
pub struct DestinationNode {
    node: NodeHandle,
}

impl DestinationNode {
    pub(crate) fn new(node: NodeHandle) -> Self {
        Self { node }
    }
}

impl AudioNode for DestinationNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}
