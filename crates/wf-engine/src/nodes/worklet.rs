//! Worklet node: hands blocks to a host callback on its own runtime thread
//!
//! The audio thread ships a pre-allocated job (input copy + output storage)
//! to the runtime thread and waits synchronously for the result with a
//! strict deadline. A missed deadline renders silence for that block; the
//! late job is reclaimed when it finally comes back. Two jobs circulate at
//! steady state, so the exchange never allocates.
//!
//! The runtime thread exits on its own once the node is torn down and the
//! job channel disconnects.

use std::time::Duration;

use wf_core::spsc::{spsc_channel, OverflowStrategy, SpscReceiver, SpscSender, WaitStrategy};
use wf_core::{Sample, SampleBuffer, MAX_CHANNEL_COUNT, RENDER_QUANTUM_SIZE};

use crate::context::{AudioNode, BaseContext, NodeHandle};
use crate::error::{EngineError, EngineResult};
use crate::node::{AudioProcessor, NodeConfig, ProcessScope, ProcessStatus};

/// Host-side render callback, invoked on the worklet runtime thread.
///
/// Receives the input channel lanes, writable output lanes, the frame count
/// and the block's start time. Returns `false` to signal failure; the
/// engine then zeroes the block.
pub type WorkletProcessorCallback =
    Box<dyn FnMut(&[Vec<Sample>], &mut [Vec<Sample>], usize, f64) -> bool + Send>;

/// Budget for one block's round trip. Roughly two thirds of a quantum at
/// 48 kHz; a slower callback misses blocks rather than stalling the device.
const WORKLET_DEADLINE: Duration = Duration::from_micros(1800);

struct WorkletJob {
    inputs: Vec<Vec<Sample>>,
    outputs: Vec<Vec<Sample>>,
    frames: usize,
    time: f64,
    ok: bool,
}

impl WorkletJob {
    fn new() -> Self {
        Self {
            inputs: (0..MAX_CHANNEL_COUNT)
                .map(|_| vec![0.0; RENDER_QUANTUM_SIZE])
                .collect(),
            outputs: (0..MAX_CHANNEL_COUNT)
                .map(|_| vec![0.0; RENDER_QUANTUM_SIZE])
                .collect(),
            frames: 0,
            time: 0.0,
            ok: true,
        }
    }
}

pub(crate) struct WorkletProcessor {
    job_tx: SpscSender<WorkletJob>,
    result_rx: SpscReceiver<WorkletJob>,
    spare: Option<WorkletJob>,
}

impl AudioProcessor for WorkletProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus {
        // Reclaim a job that came back late.
        if self.spare.is_none() {
            if let Ok(job) = self.result_rx.try_receive() {
                self.spare = Some(job);
            }
        }

        let Some(mut job) = self.spare.take() else {
            // Every job still in flight: the runtime is badly behind.
            buf.zero();
            return ProcessStatus::Active;
        };

        let channels = buf.channel_count();
        job.frames = scope.frames;
        job.time = scope.current_time;
        for (c, lane) in job.inputs.iter_mut().take(channels).enumerate() {
            lane[..scope.frames].copy_from_slice(&buf.channel(c)[..scope.frames]);
        }
        for lane in job.outputs.iter_mut() {
            lane[..scope.frames].fill(0.0);
        }

        if self.job_tx.try_send(job).is_err() {
            buf.zero();
            return ProcessStatus::Active;
        }

        match self.result_rx.receive_timeout(WORKLET_DEADLINE) {
            Some(job) => {
                if job.ok {
                    for (c, lane) in job.outputs.iter().take(channels).enumerate() {
                        buf.channel_mut(c)[..scope.frames]
                            .copy_from_slice(&lane[..scope.frames]);
                    }
                } else {
                    buf.zero();
                }
                self.spare = Some(job);
            }
            None => {
                // Deadline missed; the job returns through result_rx later.
                buf.zero();
            }
        }
        ProcessStatus::Active
    }
}

/// Control handle for a worklet processing node.
pub struct WorkletNode {
    node: NodeHandle,
}

impl AudioNode for WorkletNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl BaseContext {
    /// Create a node that routes each block through `callback` on a
    /// dedicated runtime thread. With no inputs connected it acts as a
    /// worklet source; with inputs it is an in-place processing node.
    pub fn create_worklet_node(
        &self,
        mut callback: WorkletProcessorCallback,
    ) -> EngineResult<WorkletNode> {
        let id = self.alloc_node_id();

        let (job_tx, job_rx) =
            spsc_channel::<WorkletJob>(4, OverflowStrategy::WaitOnFull, WaitStrategy::AtomicWait);
        let (result_tx, result_rx) =
            spsc_channel::<WorkletJob>(4, OverflowStrategy::WaitOnFull, WaitStrategy::AtomicWait);

        std::thread::Builder::new()
            .name("wf-worklet".into())
            .spawn(move || {
                while let Some(mut job) = job_rx.receive() {
                    job.ok = callback(&job.inputs, &mut job.outputs, job.frames, job.time);
                    if result_tx.send(job).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| EngineError::Device(format!("failed to spawn worklet runtime: {e}")))?;

        let node = self.register_node(
            id,
            Box::new(WorkletProcessor {
                job_tx,
                result_rx,
                spare: Some(WorkletJob::new()),
            }),
            NodeConfig::default(),
        )?;

        Ok(WorkletNode { node })
    }
}
