//! Convolution reverb: partitioned FFT convolution per IR channel
//!
//! One `PartitionedConvolver` lane per impulse-response channel, dispatched
//! across a fixed pool of four worker threads; the audio thread spins on a
//! completion latch bounded by one block of convolution work. Banks are
//! built on the control thread and swapped in whole, so `set_buffer` never
//! allocates on the audio path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use wf_core::mix::{self, ChannelCountMode, ChannelInterpretation};
use wf_core::spsc::{spsc_channel, OverflowStrategy, SpscReceiver, SpscSender, WaitStrategy};
use wf_core::{Sample, SampleBuffer, RENDER_QUANTUM_SIZE};
use wf_dsp::PartitionedConvolver;

use crate::context::{AudioNode, BaseContext, NodeHandle};
use crate::error::{EngineError, EngineResult};
use crate::node::{
    AudioProcessor, NodeConfig, ProcessScope, ProcessStatus, RetireStash, RetiredResource,
};

/// Attenuation applied on top of the power normalisation so wet and dry
/// signals sit at roughly the same level.
const GAIN_CALIBRATION_DB: f32 = -58.0;
const MIN_IR_POWER: f32 = 0.000125;
const WORKER_COUNT: usize = 4;

#[derive(Clone, Default)]
pub struct ConvolverOptions {
    pub buffer: Option<Arc<SampleBuffer>>,
    pub disable_normalization: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// WORKER POOL
// ═══════════════════════════════════════════════════════════════════════════════

struct Job {
    lane: *mut ConvolverLane,
    pending: Arc<AtomicUsize>,
}

// The audio thread guarantees the pointed-to lane outlives the job by
// spinning on `pending` before touching the lanes again.
unsafe impl Send for Job {}

struct WorkerPool {
    senders: Vec<SpscSender<Job>>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<AtomicUsize>,
    next_worker: usize,
}

impl WorkerPool {
    fn new() -> Self {
        let mut senders = Vec::with_capacity(WORKER_COUNT);
        let mut workers = Vec::with_capacity(WORKER_COUNT);

        for index in 0..WORKER_COUNT {
            let (tx, rx): (SpscSender<Job>, SpscReceiver<Job>) =
                spsc_channel(16, OverflowStrategy::WaitOnFull, WaitStrategy::AtomicWait);
            senders.push(tx);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("wf-convolver-{index}"))
                    .spawn(move || {
                        while let Some(job) = rx.receive() {
                            // SAFETY: the scheduling thread waits on the
                            // latch before invalidating the lane.
                            unsafe { (*job.lane).run() };
                            job.pending.fetch_sub(1, Ordering::AcqRel);
                        }
                    })
                    .expect("failed to spawn convolver worker"),
            );
        }

        Self {
            senders,
            workers,
            pending: Arc::new(AtomicUsize::new(0)),
            next_worker: 0,
        }
    }

    fn schedule(&mut self, lane: &mut ConvolverLane) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let job = Job {
            lane: lane as *mut ConvolverLane,
            pending: Arc::clone(&self.pending),
        };
        let worker = self.next_worker;
        self.next_worker = (self.next_worker + 1) % self.senders.len();

        if self.senders[worker].try_send(job).is_err() {
            // Queue full: run inline rather than stall the block.
            self.pending.fetch_sub(1, Ordering::AcqRel);
            lane.run();
        }
    }

    /// Spin until every scheduled lane finished. Bounded by one block of
    /// convolution work per lane.
    fn wait(&self) {
        while self.pending.load(Ordering::Acquire) != 0 {
            std::hint::spin_loop();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.wait();
        self.senders.clear();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVOLVER BANK
// ═══════════════════════════════════════════════════════════════════════════════

// Staging room per lane: worst-case carry between partial blocks stays well
// under two quanta on each side.
const STAGE_FRAMES: usize = RENDER_QUANTUM_SIZE * 4;

struct ConvolverLane {
    convolver: PartitionedConvolver,
    /// Input frames waiting to fill a whole quantum.
    stage_in: Vec<Sample>,
    /// Convolved frames not yet handed out.
    stage_out: Vec<Sample>,
    chunk_in: Vec<Sample>,
    chunk_out: Vec<Sample>,
}

impl ConvolverLane {
    fn run(&mut self) {
        self.convolver.process(&self.chunk_in, &mut self.chunk_out);
    }
}

/// Everything derived from one impulse response, built control-side.
pub(crate) struct ConvolverBank {
    lanes: Vec<ConvolverLane>,
    /// Input channel feeding each lane when the input is stereo.
    input_map: Vec<usize>,
    /// Intermediate channel each lane lands on before the final down-mix.
    output_map: Vec<usize>,
    intermediate: SampleBuffer,
    scale: f32,
    segment_count: usize,
    /// Frames currently staged in every lane's `stage_in`.
    staged: usize,
    /// Convolved frames available in every lane's `stage_out`.
    available: usize,
}

impl ConvolverBank {
    fn build(
        ir: &SampleBuffer,
        normalize: bool,
        context_sample_rate: f32,
    ) -> EngineResult<Self> {
        let ir_channels = ir.channel_count();
        if !matches!(ir_channels, 1 | 2 | 4) {
            return Err(EngineError::InvalidArgument(format!(
                "convolver impulse responses must have 1, 2 or 4 channels, got {ir_channels}"
            )));
        }

        // Mono IRs are replicated so a stereo input convolves both sides.
        let lane_channels: Vec<usize> = match ir_channels {
            1 => vec![0, 0],
            2 => vec![0, 1],
            _ => vec![0, 1, 2, 3],
        };
        let (input_map, output_map) = match ir_channels {
            4 => (vec![0, 0, 1, 1], vec![0, 3, 2, 1]),
            _ => (vec![0, 1], vec![0, 1]),
        };

        let lanes: Vec<ConvolverLane> = lane_channels
            .iter()
            .map(|&c| ConvolverLane {
                convolver: PartitionedConvolver::new(RENDER_QUANTUM_SIZE, ir.channel(c)),
                stage_in: vec![0.0; STAGE_FRAMES],
                stage_out: vec![0.0; STAGE_FRAMES],
                chunk_in: vec![0.0; RENDER_QUANTUM_SIZE],
                chunk_out: vec![0.0; RENDER_QUANTUM_SIZE],
            })
            .collect();
        let segment_count = lanes[0].convolver.segment_count();

        let scale = if normalize {
            let mut power = 0.0f32;
            for c in 0..ir_channels {
                for s in ir.channel(c) {
                    power += s * s;
                }
            }
            let power = (power / (ir_channels * ir.frames()) as f32)
                .sqrt()
                .max(MIN_IR_POWER);
            (1.0 / power)
                * 10.0f32.powf(GAIN_CALIBRATION_DB * 0.05)
                * (context_sample_rate / ir.sample_rate())
        } else {
            1.0
        };

        Ok(Self {
            intermediate: SampleBuffer::new(lanes.len(), RENDER_QUANTUM_SIZE, context_sample_rate),
            lanes,
            input_map,
            output_map,
            scale,
            segment_count,
            staged: 0,
            available: 0,
        })
    }
}

pub(crate) struct ConvolverProcessor {
    rx: SpscReceiver<Box<ConvolverBank>>,
    bank: Option<Box<ConvolverBank>>,
    pool: WorkerPool,
    signalled_stop: bool,
    remaining_segments: usize,
    stash: RetireStash,
}

impl AudioProcessor for ConvolverProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus {
        self.stash.flush(scope);
        while let Ok(bank) = self.rx.try_receive() {
            if let Some(old) = self.bank.replace(bank) {
                self.stash.retire(scope, RetiredResource::Engine(old));
            }
        }

        let Some(bank) = self.bank.as_mut() else {
            buf.zero();
            return ProcessStatus::Active;
        };

        if self.signalled_stop {
            if self.remaining_segments == 0 {
                self.signalled_stop = false;
                return ProcessStatus::Finished;
            }
            self.remaining_segments -= 1;
        }

        // Stage the input: mono drives every lane, stereo uses the map. The
        // partitioned FFT is fixed to the quantum size, so partial blocks
        // accumulate here until a whole quantum is ready.
        let frames = scope.frames;
        let mono_input = buf.channel_count() == 1;
        let staged = bank.staged;
        for (index, lane) in bank.lanes.iter_mut().enumerate() {
            let source = if mono_input { 0 } else { bank.input_map[index] };
            let source = source.min(buf.channel_count() - 1);
            lane.stage_in[staged..staged + frames]
                .copy_from_slice(&buf.channel(source)[..frames]);
        }
        bank.staged += frames;

        // Convolve every complete quantum that is now buffered.
        while bank.staged >= RENDER_QUANTUM_SIZE {
            for lane in bank.lanes.iter_mut() {
                lane.chunk_in
                    .copy_from_slice(&lane.stage_in[..RENDER_QUANTUM_SIZE]);
            }
            for lane in bank.lanes.iter_mut() {
                self.pool.schedule(lane);
            }
            self.pool.wait();

            let staged = bank.staged;
            let available = bank.available;
            for lane in bank.lanes.iter_mut() {
                lane.stage_in.copy_within(RENDER_QUANTUM_SIZE..staged, 0);
                lane.stage_out[available..available + RENDER_QUANTUM_SIZE]
                    .copy_from_slice(&lane.chunk_out);
            }
            bank.staged -= RENDER_QUANTUM_SIZE;
            bank.available += RENDER_QUANTUM_SIZE;
        }

        // Hand out what this block asked for; a short warm-up after partial
        // blocks renders as leading silence, never as misaligned history.
        let emit = frames.min(bank.available);
        bank.intermediate.zero();
        for (index, lane) in bank.lanes.iter().enumerate() {
            bank.intermediate.channel_mut(bank.output_map[index])[..emit]
                .copy_from_slice(&lane.stage_out[..emit]);
        }
        let available = bank.available;
        for lane in bank.lanes.iter_mut() {
            lane.stage_out.copy_within(emit..available, 0);
        }
        bank.available -= emit;

        // Down-mix the mapped lanes to the stereo output and apply the
        // normalisation scale.
        buf.set_channel_count(2);
        buf.zero();
        mix::sum_into(buf, &bank.intermediate, ChannelInterpretation::Speakers);
        buf.scale(bank.scale);

        ProcessStatus::Active
    }

    fn on_inputs_disabled(&mut self) {
        self.signalled_stop = true;
        self.remaining_segments = self
            .bank
            .as_ref()
            .map(|bank| bank.segment_count)
            .unwrap_or(0);
    }
}

/// Control handle for a convolver.
pub struct ConvolverNode {
    node: NodeHandle,
    tx: SpscSender<Box<ConvolverBank>>,
    normalize: bool,
    sample_rate: f32,
    buffer: parking_lot::Mutex<Option<Arc<SampleBuffer>>>,
}

impl ConvolverNode {
    /// Install a new impulse response. The frequency-domain bank is built
    /// here, on the control thread, and swapped in at the next block.
    pub fn set_buffer(&self, buffer: Arc<SampleBuffer>) -> EngineResult<()> {
        let bank = ConvolverBank::build(&buffer, self.normalize, self.sample_rate)?;
        self.tx
            .try_send(Box::new(bank))
            .map_err(|_| EngineError::ResourceExhausted("convolver bank queue full"))?;
        *self.buffer.lock() = Some(buffer);
        Ok(())
    }

    pub fn buffer(&self) -> Option<Arc<SampleBuffer>> {
        self.buffer.lock().clone()
    }

    pub fn normalize(&self) -> bool {
        self.normalize
    }
}

impl AudioNode for ConvolverNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl BaseContext {
    pub fn create_convolver(&self, options: ConvolverOptions) -> EngineResult<ConvolverNode> {
        let id = self.alloc_node_id();
        let normalize = !options.disable_normalization;
        let sample_rate = self.sample_rate();

        let (tx, rx) = spsc_channel(4, OverflowStrategy::WaitOnFull, WaitStrategy::BusyLoop);

        let node = self.register_node(
            id,
            Box::new(ConvolverProcessor {
                rx,
                bank: None,
                pool: WorkerPool::new(),
                signalled_stop: false,
                remaining_segments: 0,
                stash: RetireStash::default(),
            }),
            NodeConfig {
                channel_count: 2,
                mode: ChannelCountMode::ClampedMax,
                requires_tail: true,
                ..NodeConfig::default()
            },
        )?;

        let convolver = ConvolverNode {
            node,
            tx,
            normalize,
            sample_rate,
            buffer: parking_lot::Mutex::new(None),
        };
        if let Some(buffer) = options.buffer {
            convolver.set_buffer(buffer)?;
        }
        Ok(convolver)
    }
}
