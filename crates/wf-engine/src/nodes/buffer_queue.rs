//! Buffer-queue source: gapless playback of a FIFO of buffers
//!
//! Buffers are enqueued from the control thread and drained in order on the
//! audio thread under a try-lock; a failed try-lock renders silence for that
//! block. Each drained buffer fires `BUFFER_ENDED` with its id and whether
//! it was the last. Pausing returns the node to `Unscheduled`, keeping the
//! read position for a later `start`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use wf_core::{Sample, SampleBuffer, RENDER_QUANTUM_SIZE};
use wf_dsp::vector::detune_ratio;

use crate::context::{AudioNode, BaseContext, NodeHandle};
use crate::error::EngineResult;
use crate::events::{AudioEvent, EventBody};
use crate::node::{
    finish_if_stop_scheduled, update_playback_info, AudioProcessor, NodeConfig, PlaybackState,
    ProcessScope, ProcessStatus,
};
use crate::nodes::buffer_source::PlaybackEventShared;
use crate::param::{AudioParam, ParamRenderer, ParamTag};
use crate::stretch::{FallbackStretcher, Stretcher};

#[derive(Clone, Default)]
pub struct BufferQueueSourceOptions {
    pub playback_rate: f32,
    pub detune: f32,
    pub pitch_correction: bool,
}

struct QueueState {
    entries: VecDeque<(u64, Arc<SampleBuffer>)>,
    next_id: u64,
    played_duration: f64,
    v_read: f64,
    /// Enqueue the latency-flush tail once the queue drains.
    add_tail: bool,
}

struct QueueShared {
    queue: Mutex<QueueState>,
    paused: AtomicBool,
    events: PlaybackEventShared,
    buffer_ended_listener: std::sync::atomic::AtomicU64,
}

const MAX_PLAYBACK_RATE: f32 = 16.0;

pub(crate) struct BufferQueueProcessor {
    shared: Arc<QueueShared>,
    playback_rate: ParamRenderer,
    detune: ParamRenderer,
    stretcher: Option<Box<dyn Stretcher>>,
    stretch_input: Vec<Vec<Sample>>,
    /// Pre-allocated zeros flushing the stretcher latency; enqueued once
    /// when the queue drains.
    tail_buffer: Option<Arc<SampleBuffer>>,
    sample_rate: f32,
    position_counter: u32,
}

impl BufferQueueProcessor {
    fn computed_rate(&mut self, scope: &ProcessScope) -> f32 {
        let rate = self
            .playback_rate
            .process_k_rate(scope.current_time, scope.block);
        let detune = self.detune.process_k_rate(scope.current_time, scope.block);
        // Queue sources always advance forward.
        (rate * detune_ratio(detune)).abs().min(MAX_PLAYBACK_RATE)
    }

    /// Pop the finished front buffer, fire `BUFFER_ENDED` and install the
    /// flush tail when the queue just drained.
    fn advance_queue(&self, state: &mut QueueState, scope: &ProcessScope, tail: &Option<Arc<SampleBuffer>>) {
        let Some((id, buffer)) = state.entries.pop_front() else {
            return;
        };
        state.played_duration += buffer.duration();

        if state.entries.is_empty() && state.add_tail {
            if let Some(tail) = tail {
                state.entries.push_back((id, Arc::clone(tail)));
                state.add_tail = false;
                return;
            }
        }

        let listener = self.shared.buffer_ended_listener.load(Ordering::Acquire);
        scope.emit(
            AudioEvent::BufferEnded,
            listener,
            EventBody {
                buffer_id: Some(id),
                is_last_in_queue: Some(state.entries.is_empty()),
                ..EventBody::default()
            },
        );
    }

    fn render_plain(
        &mut self,
        buf: &mut SampleBuffer,
        state: &mut QueueState,
        start: usize,
        end: usize,
        rate: f32,
        scope: &ProcessScope,
        tail: &Option<Arc<SampleBuffer>>,
    ) {
        let channels = buf.channel_count();
        let mut i = start;

        while i < end {
            let Some((_, buffer)) = state.entries.front().map(|(id, b)| (*id, Arc::clone(b)))
            else {
                buf.zero_range(i, end - i);
                state.v_read = 0.0;
                break;
            };

            let len = buffer.frames();
            if state.v_read >= len as f64 {
                state.v_read -= len as f64;
                self.advance_queue(state, scope, tail);
                continue;
            }

            let index = state.v_read as usize;
            let next = (index + 1).min(len - 1);
            let factor = (state.v_read - index as f64) as f32;

            for c in 0..channels {
                let source = buffer.channel(c.min(buffer.channel_count() - 1));
                buf.channel_mut(c)[i] =
                    source[index] + factor * (source[next] - source[index]);
            }

            state.v_read += rate as f64;
            i += 1;
        }
    }

    fn render_stretched(
        &mut self,
        buf: &mut SampleBuffer,
        state: &mut QueueState,
        start: usize,
        end: usize,
        rate: f32,
        scope: &ProcessScope,
        tail: &Option<Arc<SampleBuffer>>,
    ) {
        let frames_out = end - start;
        let needed = (frames_out as f64 * rate as f64).ceil() as usize;
        let channels = buf.channel_count();

        for lane in self.stretch_input.iter_mut().take(channels) {
            lane[..needed].fill(0.0);
        }

        for i in 0..needed {
            let Some(buffer) = state.entries.front().map(|(_, b)| Arc::clone(b)) else {
                break;
            };
            let len = buffer.frames();
            if state.v_read >= len as f64 {
                state.v_read -= len as f64;
                self.advance_queue(state, scope, tail);
                continue;
            }
            let index = state.v_read as usize;
            for (c, lane) in self.stretch_input.iter_mut().take(channels).enumerate() {
                lane[i] = buffer.channel(c.min(buffer.channel_count() - 1))[index];
            }
            state.v_read += 1.0;
        }

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
            stretcher.process(&input_refs, &mut output_refs, 1.0);
        }
    }
}

impl AudioProcessor for BufferQueueProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus {
        let window = update_playback_info(
            scope.state(),
            buf,
            scope.frames,
            scope.sample_rate,
            scope.current_frame,
        );

        let shared = Arc::clone(&self.shared);
        let tail = self.tail_buffer.clone();

        let finish = |scope: &ProcessScope, shared: &QueueShared| -> ProcessStatus {
            if scope.state().playback_state() == PlaybackState::StopScheduled
                && shared.paused.load(Ordering::Acquire)
            {
                // Pause: back to Unscheduled, position held, no ENDED.
                scope.state().set_playback_state(PlaybackState::Unscheduled);
                scope.state().clear_schedule();
                shared.paused.store(false, Ordering::Release);
                return ProcessStatus::Active;
            }
            finish_if_stop_scheduled(scope)
        };

        if window.is_silent() {
            buf.zero();
            return finish(scope, &shared);
        }

        let Some(mut state) = shared.queue.try_lock() else {
            buf.zero();
            return ProcessStatus::Active;
        };

        if state.entries.is_empty() {
            buf.zero();
            return finish(scope, &shared);
        }

        let rate = self.computed_rate(scope);
        let start = window.start_offset;
        let end = (start + window.frame_count).min(scope.frames);

        if self.stretcher.is_some() {
            self.render_stretched(buf, &mut state, start, end, rate, scope, &tail);
        } else {
            self.render_plain(buf, &mut state, start, end, rate, scope, &tail);
        }

        // Position reporting: total played time plus the head in the front buffer.
        let position = state.played_duration + state.v_read / self.sample_rate as f64;
        let listener = shared.events.position_listener.load(Ordering::Acquire);
        let interval = shared.events.position_interval.load(Ordering::Acquire);
        if listener != 0 && interval != 0 {
            self.position_counter += scope.frames as u32;
            if self.position_counter >= interval {
                self.position_counter = 0;
                scope.emit(
                    AudioEvent::PositionChanged,
                    listener,
                    EventBody {
                        position: Some(position),
                        ..EventBody::default()
                    },
                );
            }
        }

        let status = finish(scope, &shared);
        if status == ProcessStatus::Finished {
            state.entries.clear();
            state.v_read = 0.0;
        }
        status
    }

    fn param_mut(&mut self, tag: ParamTag) -> Option<&mut ParamRenderer> {
        match tag {
            ParamTag::PlaybackRate => Some(&mut self.playback_rate),
            ParamTag::Detune => Some(&mut self.detune),
            _ => None,
        }
    }
}

/// Control handle for a buffer-queue source.
pub struct BufferQueueSourceNode {
    node: NodeHandle,
    playback_rate: AudioParam,
    detune: AudioParam,
    shared: Arc<QueueShared>,
    pitch_correction: bool,
}

impl BufferQueueSourceNode {
    pub fn playback_rate(&self) -> &AudioParam {
        &self.playback_rate
    }

    pub fn detune(&self) -> &AudioParam {
        &self.detune
    }

    /// Append a buffer; the returned id shows up in `BUFFER_ENDED` events.
    pub fn enqueue_buffer(&self, buffer: Arc<SampleBuffer>) -> u64 {
        let mut state = self.shared.queue.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.entries.push_back((id, buffer));
        if self.pitch_correction {
            state.add_tail = true;
        }
        id
    }

    /// Remove a queued buffer by id. Removing the front resets the head.
    pub fn dequeue_buffer(&self, buffer_id: u64) {
        let mut state = self.shared.queue.lock();
        if let Some(front) = state.entries.front() {
            if front.0 == buffer_id {
                state.entries.pop_front();
                state.v_read = 0.0;
                return;
            }
        }
        state.entries.retain(|(id, _)| *id != buffer_id);
    }

    pub fn clear_buffers(&self) {
        let mut state = self.shared.queue.lock();
        state.entries.clear();
        state.v_read = 0.0;
    }

    pub fn start(&self, when: f64) -> EngineResult<()> {
        self.shared.paused.store(false, Ordering::Release);
        self.node.state.reset_stop();
        self.node.schedule_start(when)
    }

    /// Start from `offset` seconds into the front buffer.
    pub fn start_with_offset(&self, when: f64, offset: f64) -> EngineResult<()> {
        self.start(when)?;
        let mut state = self.shared.queue.lock();
        if let Some((_, front)) = state.entries.front() {
            let offset = offset.min(front.duration());
            state.v_read = offset * front.sample_rate() as f64;
        }
        Ok(())
    }

    pub fn stop(&self, when: f64) -> EngineResult<()> {
        self.shared.paused.store(false, Ordering::Release);
        self.node.schedule_stop(when)
    }

    /// Stop at the current position and return to `Unscheduled`; a later
    /// `start` resumes from the held read index.
    pub fn pause(&self) -> EngineResult<()> {
        self.shared.paused.store(true, Ordering::Release);
        self.node.schedule_stop(0.0)
    }

    pub fn set_on_ended<F>(&self, handler: F) -> u64
    where
        F: Fn(&EventBody) + Send + Sync + 'static,
    {
        self.node.register_ended_handler(handler)
    }

    pub fn set_on_buffer_ended<F>(&self, handler: F) -> u64
    where
        F: Fn(&EventBody) + Send + Sync + 'static,
    {
        let listener = self
            .node
            .registry
            .register(AudioEvent::BufferEnded, handler);
        let old = self
            .shared
            .buffer_ended_listener
            .swap(listener, Ordering::AcqRel);
        if old != 0 {
            self.node.registry.unregister(AudioEvent::BufferEnded, old);
        }
        listener
    }

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
            .events
            .position_listener
            .swap(listener, Ordering::AcqRel);
        if old != 0 {
            self.node
                .registry
                .unregister(AudioEvent::PositionChanged, old);
        }
        self.shared
            .events
            .position_interval
            .store(interval_frames, Ordering::Release);
        listener
    }
}

impl AudioNode for BufferQueueSourceNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl BaseContext {
    pub fn create_buffer_queue_source(
        &self,
        options: BufferQueueSourceOptions,
    ) -> EngineResult<BufferQueueSourceNode> {
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

        let shared = Arc::new(QueueShared {
            queue: Mutex::new(QueueState {
                entries: VecDeque::new(),
                next_id: 0,
                played_duration: 0.0,
                v_read: 0.0,
                add_tail: false,
            }),
            paused: AtomicBool::new(false),
            events: PlaybackEventShared::new(),
            buffer_ended_listener: std::sync::atomic::AtomicU64::new(0),
        });

        let stretcher: Option<Box<dyn Stretcher>> = options
            .pitch_correction
            .then(|| Box::new(FallbackStretcher::new(2)) as Box<dyn Stretcher>);
        let tail_buffer = stretcher.as_ref().map(|stretcher| {
            let latency = stretcher.input_latency() + stretcher.output_latency();
            Arc::new(SampleBuffer::new(2, latency.max(1), self.sample_rate()))
        });
        let stretch_capacity =
            (RENDER_QUANTUM_SIZE as f64 * MAX_PLAYBACK_RATE as f64).ceil() as usize + 1;

        let node = self.register_node(
            id,
            Box::new(BufferQueueProcessor {
                shared: Arc::clone(&shared),
                playback_rate: rate_renderer,
                detune: detune_renderer,
                stretcher,
                stretch_input: (0..wf_core::MAX_CHANNEL_COUNT)
                    .map(|_| vec![0.0; stretch_capacity])
                    .collect(),
                tail_buffer,
                sample_rate: self.sample_rate(),
                position_counter: 0,
            }),
            NodeConfig {
                is_source: true,
                ..NodeConfig::default()
            },
        )?;

        Ok(BufferQueueSourceNode {
            node,
            playback_rate,
            detune,
            shared,
            pitch_correction: options.pitch_correction,
        })
    }
}
