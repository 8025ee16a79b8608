//! Node abstractions shared by the graph and every processor
//!
//! A node is split like a parameter: `NodeState` is the atomic bundle both
//! sides observe (enable flag, playback state, scheduling times), while the
//! render-side behavior lives in an `AudioProcessor` owned by the graph.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use wf_core::mix::{ChannelCountMode, ChannelInterpretation};
use wf_core::{time_to_sample_frame, SampleBuffer};

use crate::destructor::AsyncDestructor;
use crate::events::{AudioEvent, EventBody, EventEmitter};
use crate::param::{ParamRenderer, ParamTag};

/// Scheduled-source lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackState {
    Unscheduled = 0,
    Scheduled = 1,
    Playing = 2,
    StopScheduled = 3,
    Finished = 4,
}

impl PlaybackState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PlaybackState::Scheduled,
            2 => PlaybackState::Playing,
            3 => PlaybackState::StopScheduled,
            4 => PlaybackState::Finished,
            _ => PlaybackState::Unscheduled,
        }
    }
}

const TIME_UNSET: f64 = -1.0;

/// Atomic node state shared between control handles, the registry and the
/// render entry.
pub struct NodeState {
    enabled: AtomicBool,
    playback: AtomicU8,
    start_time: AtomicU64,
    stop_time: AtomicU64,
    ended_listener: AtomicU64,
}

impl NodeState {
    pub(crate) fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            playback: AtomicU8::new(PlaybackState::Unscheduled as u8),
            start_time: AtomicU64::new(TIME_UNSET.to_bits()),
            stop_time: AtomicU64::new(TIME_UNSET.to_bits()),
            ended_listener: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    #[inline]
    pub fn playback_state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.playback.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_playback_state(&self, state: PlaybackState) {
        self.playback.store(state as u8, Ordering::Release);
    }

    pub(crate) fn schedule_start(&self, when: f64) {
        self.start_time.store(when.to_bits(), Ordering::Release);
        self.set_playback_state(PlaybackState::Scheduled);
    }

    pub(crate) fn schedule_stop(&self, when: f64) {
        self.stop_time.store(when.to_bits(), Ordering::Release);
    }

    pub(crate) fn reset_stop(&self) {
        self.stop_time.store(TIME_UNSET.to_bits(), Ordering::Release);
    }

    pub(crate) fn clear_schedule(&self) {
        self.start_time.store(TIME_UNSET.to_bits(), Ordering::Release);
        self.stop_time.store(TIME_UNSET.to_bits(), Ordering::Release);
    }

    #[inline]
    pub fn start_time(&self) -> f64 {
        f64::from_bits(self.start_time.load(Ordering::Acquire))
    }

    #[inline]
    pub fn stop_time(&self) -> f64 {
        f64::from_bits(self.stop_time.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn ended_listener(&self) -> u64 {
        self.ended_listener.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_ended_listener(&self, listener: u64) -> u64 {
        self.ended_listener.swap(listener, Ordering::AcqRel)
    }
}

/// Static per-node configuration captured at creation time.
#[derive(Debug, Clone, Copy)]
pub struct NodeConfig {
    pub channel_count: usize,
    pub mode: ChannelCountMode,
    pub interpretation: ChannelInterpretation,
    pub requires_tail: bool,
    pub is_source: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            channel_count: 2,
            mode: ChannelCountMode::Max,
            interpretation: ChannelInterpretation::Speakers,
            requires_tail: false,
            is_source: false,
        }
    }
}

/// Resources the audio thread must not deallocate itself. Variants exist so
/// that consigning never has to box on the render path; `Engine` carries
/// pre-boxed state built on the control thread.
pub enum RetiredResource {
    Buffer(Arc<SampleBuffer>),
    Block(SampleBuffer),
    Wave(Arc<crate::periodic_wave::PeriodicWave>),
    Param(Arc<crate::param::ParamState>),
    Engine(Box<dyn Any + Send>),
}

/// Per-block context handed to a processor.
pub struct ProcessScope<'a> {
    pub frames: usize,
    pub sample_rate: f32,
    /// Context time at the first frame of this block.
    pub current_time: f64,
    pub current_frame: u64,
    pub block: u64,
    pub(crate) state: &'a NodeState,
    pub(crate) events: &'a EventEmitter,
    pub(crate) retire: &'a AsyncDestructor<RetiredResource>,
}

impl ProcessScope<'_> {
    #[inline]
    pub fn state(&self) -> &NodeState {
        self.state
    }

    /// Emit an event to a specific listener. No-op for listener 0.
    pub fn emit(&self, event: AudioEvent, listener: u64, body: EventBody) {
        if listener != 0 {
            self.events.emit(event, Some(listener), body);
        }
    }

    /// Hand a resource to the destructor thread; returned on a full queue so
    /// the caller can retry next block.
    pub fn retire(&self, resource: RetiredResource) -> Result<(), RetiredResource> {
        self.retire.try_consign(resource)
    }
}

/// What the graph should do with the node after this block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Active,
    /// Disable the node and cascade to its outputs (source finished or tail
    /// fully drained).
    Finished,
}

/// Render-side behavior of a node.
///
/// `process` receives the node's processing buffer already holding the
/// summed, channel-adapted input (zeroed for sources) and must leave the
/// node's output in the same buffer, adjusting the active channel count if
/// the node reshapes its output.
pub trait AudioProcessor: Send {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus;

    /// Expose a parameter renderer for modulation routing.
    fn param_mut(&mut self, _tag: ParamTag) -> Option<&mut ParamRenderer> {
        None
    }

    /// Called when the node's last enabled input disappears. Tail-processing
    /// nodes start draining here instead of disabling immediately.
    fn on_inputs_disabled(&mut self) {}
}

/// Holding pen for resources the destructor queue could not take yet.
/// Drained opportunistically at the top of each process call.
pub(crate) struct RetireStash {
    items: Vec<RetiredResource>,
}

impl Default for RetireStash {
    fn default() -> Self {
        Self {
            items: Vec::with_capacity(4),
        }
    }
}

impl RetireStash {
    pub fn retire(&mut self, scope: &ProcessScope, resource: RetiredResource) {
        if let Err(resource) = scope.retire(resource) {
            self.items.push(resource);
        }
    }

    pub fn flush(&mut self, scope: &ProcessScope) {
        while let Some(resource) = self.items.pop() {
            if let Err(resource) = scope.retire(resource) {
                self.items.push(resource);
                break;
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCHEDULED-SOURCE STATE MACHINE
// ═══════════════════════════════════════════════════════════════════════════════

/// The frame span a source should actually fill this block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackWindow {
    pub start_offset: usize,
    pub frame_count: usize,
}

impl PlaybackWindow {
    pub const SILENT: Self = Self {
        start_offset: 0,
        frame_count: 0,
    };

    #[inline]
    pub fn is_silent(&self) -> bool {
        self.frame_count == 0
    }
}

/// Advance the source state machine for this block and zero the frames
/// outside the live span. Runs at the top of every source's `process`.
pub(crate) fn update_playback_info(
    state: &NodeState,
    buf: &mut SampleBuffer,
    frames: usize,
    sample_rate: f32,
    current_frame: u64,
) -> PlaybackWindow {
    let first_frame = current_frame;
    let last_frame = first_frame + frames as u64 - 1;

    let start_time = state.start_time();
    let stop_time = state.stop_time();
    let start_frame = if start_time < 0.0 {
        first_frame
    } else {
        time_to_sample_frame(start_time, sample_rate).max(first_frame)
    };
    let stop_frame = if stop_time < 0.0 {
        u64::MAX
    } else {
        time_to_sample_frame(stop_time, sample_rate)
    };

    match state.playback_state() {
        PlaybackState::Finished | PlaybackState::Unscheduled => PlaybackWindow::SILENT,
        PlaybackState::Scheduled => {
            if start_frame > last_frame {
                return PlaybackWindow::SILENT;
            }

            state.set_playback_state(PlaybackState::Playing);
            let start_offset = (start_frame - first_frame) as usize;
            let live_end_exclusive = (last_frame.min(stop_frame) + 1).max(start_frame);
            let frame_count = (live_end_exclusive - start_frame) as usize;

            if stop_frame <= last_frame && stop_frame >= first_frame {
                state.set_playback_state(PlaybackState::StopScheduled);
                let stop_offset = (stop_frame - first_frame) as usize;
                buf.zero_range(stop_offset, frames - stop_offset);
            }

            buf.zero_range(0, start_offset);
            PlaybackWindow {
                start_offset,
                frame_count: frame_count.min(frames),
            }
        }
        PlaybackState::Playing | PlaybackState::StopScheduled => {
            if stop_frame <= last_frame && stop_frame >= first_frame {
                state.set_playback_state(PlaybackState::StopScheduled);
                let stop_offset = (stop_frame - first_frame) as usize;
                buf.zero_range(stop_offset, frames - stop_offset);
                return PlaybackWindow {
                    start_offset: 0,
                    frame_count: stop_offset,
                };
            }

            if stop_frame < first_frame {
                // First fully silent quantum after the stop.
                state.set_playback_state(PlaybackState::StopScheduled);
                return PlaybackWindow::SILENT;
            }

            PlaybackWindow {
                start_offset: 0,
                frame_count: frames,
            }
        }
    }
}

/// Finalise a stop scheduled earlier in this block: transition to
/// `Finished`, fire `ENDED` exactly once and tell the graph to disable.
pub(crate) fn finish_if_stop_scheduled(scope: &ProcessScope) -> ProcessStatus {
    if scope.state.playback_state() == PlaybackState::StopScheduled {
        scope.state.set_playback_state(PlaybackState::Finished);
        scope.emit(
            AudioEvent::Ended,
            scope.state.ended_listener(),
            EventBody::default(),
        );
        ProcessStatus::Finished
    } else {
        ProcessStatus::Active
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44100.0;
    const Q: usize = 128;

    fn buf() -> SampleBuffer {
        SampleBuffer::new(1, Q, SR)
    }

    #[test]
    fn test_unscheduled_source_is_silent() {
        let state = NodeState::new();
        let mut b = buf();
        let window = update_playback_info(&state, &mut b, Q, SR, 0);
        assert!(window.is_silent());
        assert_eq!(state.playback_state(), PlaybackState::Unscheduled);
    }

    #[test]
    fn test_start_mid_block_prefills_zeros() {
        let state = NodeState::new();
        // Start 64 frames into the first block.
        state.schedule_start(64.0 / SR as f64);

        let mut b = buf();
        b.channel_mut(0).fill(1.0);
        let window = update_playback_info(&state, &mut b, Q, SR, 0);

        assert_eq!(state.playback_state(), PlaybackState::Playing);
        assert_eq!(window.start_offset, 64);
        assert_eq!(window.frame_count, 64);
        assert!(b.channel(0)[..64].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_start_in_future_block_stays_scheduled() {
        let state = NodeState::new();
        state.schedule_start(1.0);

        let mut b = buf();
        let window = update_playback_info(&state, &mut b, Q, SR, 0);
        assert!(window.is_silent());
        assert_eq!(state.playback_state(), PlaybackState::Scheduled);
    }

    #[test]
    fn test_stop_mid_block_zeroes_tail() {
        let state = NodeState::new();
        state.schedule_start(0.0);
        state.schedule_stop(96.0 / SR as f64);

        let mut b = buf();
        b.channel_mut(0).fill(1.0);
        let window = update_playback_info(&state, &mut b, Q, SR, 0);

        assert_eq!(state.playback_state(), PlaybackState::StopScheduled);
        assert_eq!(window.frame_count, 96);
        assert!(b.channel(0)[96..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_stop_before_block_goes_silent() {
        let state = NodeState::new();
        state.schedule_start(0.0);
        let mut b = buf();
        update_playback_info(&state, &mut b, Q, SR, 0);
        assert_eq!(state.playback_state(), PlaybackState::Playing);

        // Stop time already passed when the next block starts.
        state.schedule_stop(100.0 / SR as f64);
        let window = update_playback_info(&state, &mut b, Q, SR, 256);
        assert!(window.is_silent());
        assert_eq!(state.playback_state(), PlaybackState::StopScheduled);
    }

    #[test]
    fn test_finish_fires_once() {
        let state = NodeState::new();
        state.set_playback_state(PlaybackState::StopScheduled);

        let emitter_parts = crate::events::EventHandlerRegistry::new();
        let emitter = emitter_parts.take_emitter().unwrap();
        let retire = AsyncDestructor::new("test");

        let scope = ProcessScope {
            frames: Q,
            sample_rate: SR,
            current_time: 0.0,
            current_frame: 0,
            block: 0,
            state: &state,
            events: &emitter,
            retire: &retire,
        };

        assert_eq!(finish_if_stop_scheduled(&scope), ProcessStatus::Finished);
        assert_eq!(state.playback_state(), PlaybackState::Finished);
        // Second call is a no-op: the transition already happened.
        assert_eq!(finish_if_stop_scheduled(&scope), ProcessStatus::Active);
    }
}
