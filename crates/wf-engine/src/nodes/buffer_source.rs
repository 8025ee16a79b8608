//! Buffer source: plays one decoded PCM buffer
//!
//! A fractional read head advances by `|playback_rate * 2^(detune/1200)|`
//! (scaled by the buffer/context rate ratio) with linear interpolation
//! between frames. Loop points wrap the head; with pitch correction enabled
//! the frames route through a `Stretcher` instead.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use wf_core::spsc::{spsc_channel, OverflowStrategy, SpscReceiver, SpscSender, WaitStrategy};
use wf_core::{Sample, SampleBuffer};
use wf_dsp::vector::{detune_ratio, linear_interpolate};

use crate::context::{AudioNode, BaseContext, NodeHandle};
use crate::error::{EngineError, EngineResult};
use crate::events::{AudioEvent, EventBody};
use crate::node::{
    finish_if_stop_scheduled, update_playback_info, AudioProcessor, NodeConfig, PlaybackState,
    ProcessScope, ProcessStatus, RetireStash, RetiredResource,
};
use crate::param::{AudioParam, ParamRenderer, ParamTag};
use crate::stretch::{FallbackStretcher, Stretcher};

#[derive(Clone, Default)]
pub struct BufferSourceOptions {
    pub buffer: Option<Arc<SampleBuffer>>,
    pub looping: bool,
    pub loop_start: f64,
    pub loop_end: f64,
    pub playback_rate: f32,
    pub detune: f32,
    /// Route through the time-stretcher to keep pitch under rate changes.
    pub pitch_correction: bool,
}

/// Shared pieces for position reporting, reused by the queue source.
pub(crate) struct PlaybackEventShared {
    pub position_listener: AtomicU64,
    /// Frames between POSITION_CHANGED reports; 0 disables reporting.
    pub position_interval: AtomicU32,
}

impl PlaybackEventShared {
    pub fn new() -> Self {
        Self {
            position_listener: AtomicU64::new(0),
            position_interval: AtomicU32::new(0),
        }
    }
}

pub(crate) enum BufferCommand {
    SetBuffer(Option<Arc<SampleBuffer>>),
    SetLoop(bool),
    SetLoopStart(f64),
    SetLoopEnd(f64),
}

const COMMAND_CHANNEL_CAPACITY: usize = 16;
const MAX_PLAYBACK_RATE: f32 = 16.0;

pub(crate) struct BufferSourceProcessor {
    rx: SpscReceiver<BufferCommand>,
    buffer: Option<Arc<SampleBuffer>>,
    looping: bool,
    loop_start: f64,
    loop_end: f64,
    v_read: f64,
    playback_rate: ParamRenderer,
    detune: ParamRenderer,
    stretcher: Option<Box<dyn Stretcher>>,
    stretch_input: Vec<Vec<Sample>>,
    shared: Arc<PlaybackEventShared>,
    position_counter: u32,
    stash: RetireStash,
}

impl BufferSourceProcessor {
    fn drain_commands(&mut self, scope: &ProcessScope) {
        while let Ok(command) = self.rx.try_receive() {
            match command {
                BufferCommand::SetBuffer(buffer) => {
                    let old = std::mem::replace(&mut self.buffer, buffer);
                    if let Some(old) = old {
                        self.stash.retire(scope, RetiredResource::Buffer(old));
                    }
                    self.v_read = 0.0;
                }
                BufferCommand::SetLoop(looping) => self.looping = looping,
                BufferCommand::SetLoopStart(start) => self.loop_start = start,
                BufferCommand::SetLoopEnd(end) => self.loop_end = end,
            }
        }
    }

    fn computed_rate(&mut self, scope: &ProcessScope, buffer_rate: f32) -> f32 {
        let rate = self
            .playback_rate
            .process_k_rate(scope.current_time, scope.block);
        let detune = self.detune.process_k_rate(scope.current_time, scope.block);
        let ratio = buffer_rate / scope.sample_rate;
        (rate * detune_ratio(detune) * ratio)
            .abs()
            .min(MAX_PLAYBACK_RATE)
    }

    fn loop_frames(&self, len: usize, buffer_rate: f32) -> (f64, f64) {
        let start = (self.loop_start * buffer_rate as f64).clamp(0.0, len as f64);
        let end = if self.loop_end <= 0.0 {
            len as f64
        } else {
            (self.loop_end * buffer_rate as f64).clamp(0.0, len as f64)
        };
        if end <= start {
            (0.0, len as f64)
        } else {
            (start, end)
        }
    }

    fn report_position(&mut self, scope: &ProcessScope, position_seconds: f64) {
        let listener = self.shared.position_listener.load(Ordering::Acquire);
        let interval = self.shared.position_interval.load(Ordering::Acquire);
        if listener == 0 || interval == 0 {
            return;
        }

        self.position_counter += scope.frames as u32;
        if self.position_counter >= interval {
            self.position_counter = 0;
            scope.emit(
                AudioEvent::PositionChanged,
                listener,
                EventBody {
                    position: Some(position_seconds),
                    ..EventBody::default()
                },
            );
        }
    }

    /// Interpolating read of the live span; returns true when a non-looping
    /// buffer ran out inside this block.
    fn render_interpolated(
        &mut self,
        buf: &mut SampleBuffer,
        start: usize,
        end: usize,
        rate: f32,
        buffer: &SampleBuffer,
    ) -> bool {
        let len = buffer.frames();
        let (loop_start, loop_end) = self.loop_frames(len, buffer.sample_rate());
        let mut v = self.v_read;
        let mut exhausted = false;

        for i in start..end {
            if v >= len as f64 {
                if self.looping {
                    v = loop_start + (v - loop_end).max(0.0);
                } else {
                    buf.zero_range(i, end - i);
                    exhausted = true;
                    break;
                }
            }

            let index = v as usize;
            let next = (index + 1).min(len - 1);
            let factor = (v - index as f64) as f32;

            for c in 0..buf.channel_count() {
                let source = buffer.channel(c.min(buffer.channel_count() - 1));
                buf.channel_mut(c)[i] = linear_interpolate(source, index, next, factor);
            }

            v += rate as f64;
            if self.looping && v >= loop_end {
                v = loop_start + (v - loop_end);
            }
        }

        self.v_read = v;
        exhausted
    }

    /// Pitch-corrected path: advance the read head by `rate` frames per
    /// output frame and let the stretcher rebuild the block.
    fn render_stretched(
        &mut self,
        buf: &mut SampleBuffer,
        start: usize,
        end: usize,
        rate: f32,
        buffer: &SampleBuffer,
    ) -> bool {
        let frames_out = end - start;
        let needed = (frames_out as f64 * rate as f64).ceil() as usize;
        let len = buffer.frames();
        let (loop_start, loop_end) = self.loop_frames(len, buffer.sample_rate());
        let channels = buf.channel_count();

        let mut v = self.v_read;
        let mut exhausted = false;
        for lane in self.stretch_input.iter_mut().take(channels) {
            lane[..needed].fill(0.0);
        }
        for i in 0..needed {
            if v >= len as f64 {
                if self.looping {
                    v = loop_start + (v - loop_end).max(0.0);
                } else {
                    exhausted = true;
                    break;
                }
            }
            let index = (v as usize).min(len - 1);
            for (c, lane) in self.stretch_input.iter_mut().take(channels).enumerate() {
                lane[i] = buffer.channel(c.min(buffer.channel_count() - 1))[index];
            }
            v += 1.0;
            if self.looping && v >= loop_end {
                v = loop_start + (v - loop_end);
            }
        }
        self.v_read = v;

        let input_refs: SmallVec<[&[Sample]; 6]> = self
            .stretch_input
            .iter()
            .take(channels)
            .map(|lane| &lane[..needed])
            .collect();
        let mut output_refs: SmallVec<[&mut [Sample]; 6]> = buf
            .channels_iter_mut()
            .map(|ch| &mut ch[start..end])
            .collect();

        if let Some(stretcher) = self.stretcher.as_mut() {
            stretcher.process(&input_refs, &mut output_refs, rate);
        }
        exhausted
    }
}

impl AudioProcessor for BufferSourceProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus {
        self.stash.flush(scope);
        self.drain_commands(scope);

        let Some(buffer) = self.buffer.clone() else {
            buf.zero();
            return finish_if_stop_scheduled(scope);
        };
        if buffer.frames() == 0 {
            buf.zero();
            return finish_if_stop_scheduled(scope);
        }

        buf.set_channel_count(buffer.channel_count());
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

        let rate = self.computed_rate(scope, buffer.sample_rate());
        let start = window.start_offset;
        let end = (start + window.frame_count).min(scope.frames);

        let exhausted = if self.stretcher.is_some() {
            self.render_stretched(buf, start, end, rate, &buffer)
        } else {
            self.render_interpolated(buf, start, end, rate, &buffer)
        };

        let position = self.v_read / buffer.sample_rate() as f64;
        self.report_position(scope, position);

        if exhausted && scope.state().playback_state() == PlaybackState::Playing {
            scope.state().set_playback_state(PlaybackState::StopScheduled);
        }
        finish_if_stop_scheduled(scope)
    }

    fn param_mut(&mut self, tag: ParamTag) -> Option<&mut ParamRenderer> {
        match tag {
            ParamTag::PlaybackRate => Some(&mut self.playback_rate),
            ParamTag::Detune => Some(&mut self.detune),
            _ => None,
        }
    }
}

/// Control handle for a buffer source.
pub struct BufferSourceNode {
    node: NodeHandle,
    playback_rate: AudioParam,
    detune: AudioParam,
    tx: SpscSender<BufferCommand>,
    shared: Arc<PlaybackEventShared>,
}

impl BufferSourceNode {
    pub fn playback_rate(&self) -> &AudioParam {
        &self.playback_rate
    }

    pub fn detune(&self) -> &AudioParam {
        &self.detune
    }

    pub fn set_buffer(&self, buffer: Arc<SampleBuffer>) -> EngineResult<()> {
        self.send(BufferCommand::SetBuffer(Some(buffer)))
    }

    pub fn clear_buffer(&self) -> EngineResult<()> {
        self.send(BufferCommand::SetBuffer(None))
    }

    pub fn set_looping(&self, looping: bool) -> EngineResult<()> {
        self.send(BufferCommand::SetLoop(looping))
    }

    pub fn set_loop_start(&self, seconds: f64) -> EngineResult<()> {
        self.send(BufferCommand::SetLoopStart(seconds))
    }

    pub fn set_loop_end(&self, seconds: f64) -> EngineResult<()> {
        self.send(BufferCommand::SetLoopEnd(seconds))
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

    /// Report playback position roughly every `interval_frames` frames.
    pub fn set_on_position_changed<F>(&self, interval_frames: u32, handler: F) -> u64
    where
        F: Fn(&EventBody) + Send + Sync + 'static,
    {
        let listener = self
            .node
            .registry
            .register(AudioEvent::PositionChanged, handler);
        let old = self
            .shared
            .position_listener
            .swap(listener, Ordering::AcqRel);
        if old != 0 {
            self.node
                .registry
                .unregister(AudioEvent::PositionChanged, old);
        }
        self.shared
            .position_interval
            .store(interval_frames, Ordering::Release);
        listener
    }

    fn send(&self, command: BufferCommand) -> EngineResult<()> {
        self.tx
            .try_send(command)
            .map_err(|_| EngineError::ResourceExhausted("buffer source command queue full"))
    }
}

impl AudioNode for BufferSourceNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl BaseContext {
    pub fn create_buffer_source(
        &self,
        options: BufferSourceOptions,
    ) -> EngineResult<BufferSourceNode> {
        let id = self.alloc_node_id();

        let rate_default = if options.playback_rate != 0.0 {
            options.playback_rate
        } else {
            1.0
        };
        let (rate_renderer, playback_rate) = self.make_param(
            id,
            ParamTag::PlaybackRate,
            rate_default,
            -MAX_PLAYBACK_RATE,
            MAX_PLAYBACK_RATE,
        )?;
        let (detune_renderer, detune) =
            self.make_param(id, ParamTag::Detune, options.detune, -153600.0, 153600.0)?;

        let channels = options
            .buffer
            .as_ref()
            .map(|b| b.channel_count())
            .unwrap_or(2);
        let stretcher: Option<Box<dyn Stretcher>> = options
            .pitch_correction
            .then(|| Box::new(FallbackStretcher::new(channels)) as Box<dyn Stretcher>);
        let stretch_capacity =
            (wf_core::RENDER_QUANTUM_SIZE as f64 * MAX_PLAYBACK_RATE as f64).ceil() as usize + 1;

        let shared = Arc::new(PlaybackEventShared::new());
        let (tx, rx) = spsc_channel(
            COMMAND_CHANNEL_CAPACITY,
            OverflowStrategy::WaitOnFull,
            WaitStrategy::BusyLoop,
        );

        let node = self.register_node(
            id,
            Box::new(BufferSourceProcessor {
                rx,
                buffer: options.buffer,
                looping: options.looping,
                loop_start: options.loop_start,
                loop_end: options.loop_end,
                v_read: 0.0,
                playback_rate: rate_renderer,
                detune: detune_renderer,
                stretcher,
                stretch_input: (0..wf_core::MAX_CHANNEL_COUNT)
                    .map(|_| vec![0.0; stretch_capacity])
                    .collect(),
                shared: Arc::clone(&shared),
                position_counter: 0,
                stash: RetireStash::default(),
            }),
            NodeConfig {
                is_source: true,
                ..NodeConfig::default()
            },
        )?;

        Ok(BufferSourceNode {
            node,
            playback_rate,
            detune,
            tx,
            shared,
        })
    }
}
