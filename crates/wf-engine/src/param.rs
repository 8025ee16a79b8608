//! Audio parameters with scheduled automation
//!
//! A parameter is split across the thread boundary: the control half
//! (`AudioParam`) owns atomics for the user-visible scalar and a sender for
//! automation requests; the render half (`ParamRenderer`) owns the event
//! timeline, evaluates the active segment per sample and sums any connected
//! modulation inputs.
//!
//! Scheduling guards run on the audio thread while draining, because they
//! depend on the live end of the timeline.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use wf_core::mix::{self, ChannelInterpretation};
use wf_core::spsc::{spsc_channel, OverflowStrategy, SpscReceiver, SpscSender, WaitStrategy};
use wf_core::SampleBuffer;

use crate::error::{EngineError, EngineResult};
use crate::graph::NodeId;

/// Which parameter of a node a connection or renderer refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamTag {
    Frequency,
    Detune,
    Gain,
    Pan,
    Offset,
    DelayTime,
    PlaybackRate,
    Q,
}

// ═══════════════════════════════════════════════════════════════════════════════
// MESSAGES AND SEGMENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AutomationKind {
    SetValue,
    LinearRamp,
    ExponentialRamp,
    SetTarget,
    ValueCurve,
}

struct AutomationRequest {
    kind: AutomationKind,
    value: f32,
    /// Start time for SetValue/SetTarget/ValueCurve, end time for ramps.
    time: f64,
    time_constant: f64,
    duration: f64,
    curve: Option<Arc<[f32]>>,
}

enum ParamMessage {
    Automation(AutomationRequest),
    CancelScheduled(f64),
    CancelAndHold(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    /// No automation: track the control-side scalar.
    Static,
    SetValue,
    LinearRamp,
    ExponentialRamp,
    SetTarget,
    ValueCurve,
}

#[derive(Clone)]
struct Segment {
    kind: SegmentKind,
    start_time: f64,
    end_time: f64,
    start_value: f32,
    end_value: f32,
    /// SetTarget destination value.
    target: f32,
    time_constant: f64,
    curve: Option<Arc<[f32]>>,
}

impl Segment {
    fn static_default() -> Self {
        Self {
            kind: SegmentKind::Static,
            start_time: 0.0,
            end_time: 0.0,
            start_value: 0.0,
            end_value: 0.0,
            target: 0.0,
            time_constant: 0.0,
            curve: None,
        }
    }

    fn evaluate(&self, time: f64, static_value: f32) -> f32 {
        match self.kind {
            SegmentKind::Static => static_value,
            SegmentKind::SetValue => {
                if time < self.start_time {
                    self.start_value
                } else {
                    self.end_value
                }
            }
            SegmentKind::LinearRamp => {
                if time < self.start_time {
                    self.start_value
                } else if time < self.end_time {
                    let progress = (time - self.start_time) / (self.end_time - self.start_time);
                    self.start_value + (self.end_value - self.start_value) * progress as f32
                } else {
                    self.end_value
                }
            }
            SegmentKind::ExponentialRamp => {
                if time < self.start_time {
                    self.start_value
                } else if time < self.end_time {
                    let progress = (time - self.start_time) / (self.end_time - self.start_time);
                    self.start_value * (self.end_value / self.start_value).powf(progress as f32)
                } else {
                    self.end_value
                }
            }
            SegmentKind::SetTarget => {
                if time < self.start_time {
                    self.start_value
                } else {
                    let decay = (-(time - self.start_time) / self.time_constant).exp() as f32;
                    self.target + (self.start_value - self.target) * decay
                }
            }
            SegmentKind::ValueCurve => {
                if time < self.start_time {
                    return self.start_value;
                }
                if time >= self.end_time {
                    return self.end_value;
                }
                let curve = match &self.curve {
                    Some(c) if c.len() >= 2 => c,
                    _ => return self.end_value,
                };
                let span = self.end_time - self.start_time;
                let position = (time - self.start_time) * (curve.len() - 1) as f64 / span;
                let k = (position as usize).min(curve.len() - 2);
                let factor = (position - k as f64) as f32;
                curve[k] + factor * (curve[k + 1] - curve[k])
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED STATE AND CONTROL HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Atomics shared between the handle and the renderer.
pub struct ParamState {
    value: AtomicU32,
    default_value: f32,
    min_value: f32,
    max_value: f32,
}

impl ParamState {
    fn new(default_value: f32, min_value: f32, max_value: f32) -> Self {
        Self {
            value: AtomicU32::new(default_value.to_bits()),
            default_value,
            min_value,
            max_value,
        }
    }

    #[inline]
    fn get(&self) -> f32 {
        f32::from_bits(self.value.load(Ordering::Relaxed))
    }

    #[inline]
    fn set(&self, v: f32) {
        self.value.store(v.to_bits(), Ordering::Relaxed);
    }
}

/// Control-thread handle to one parameter.
pub struct AudioParam {
    state: Arc<ParamState>,
    tx: SpscSender<ParamMessage>,
    owner: NodeId,
    tag: ParamTag,
}

impl AudioParam {
    pub fn value(&self) -> f32 {
        self.state.get()
    }

    /// Immediate assignment, outside the automation timeline.
    pub fn set_value(&self, value: f32) {
        self.state
            .set(value.clamp(self.state.min_value, self.state.max_value));
    }

    pub fn default_value(&self) -> f32 {
        self.state.default_value
    }

    pub fn min_value(&self) -> f32 {
        self.state.min_value
    }

    pub fn max_value(&self) -> f32 {
        self.state.max_value
    }

    pub(crate) fn endpoint(&self) -> (NodeId, ParamTag) {
        (self.owner, self.tag)
    }

    pub fn set_value_at_time(&self, value: f32, start_time: f64) -> EngineResult<()> {
        self.schedule(AutomationRequest {
            kind: AutomationKind::SetValue,
            value,
            time: validated_time(start_time)?,
            time_constant: 0.0,
            duration: 0.0,
            curve: None,
        })
    }

    pub fn linear_ramp_to_value_at_time(&self, value: f32, end_time: f64) -> EngineResult<()> {
        self.schedule(AutomationRequest {
            kind: AutomationKind::LinearRamp,
            value,
            time: validated_time(end_time)?,
            time_constant: 0.0,
            duration: 0.0,
            curve: None,
        })
    }

    pub fn exponential_ramp_to_value_at_time(&self, value: f32, end_time: f64) -> EngineResult<()> {
        if value == 0.0 {
            return Err(EngineError::InvalidArgument(
                "exponential ramp target must be non-zero".into(),
            ));
        }
        self.schedule(AutomationRequest {
            kind: AutomationKind::ExponentialRamp,
            value,
            time: validated_time(end_time)?,
            time_constant: 0.0,
            duration: 0.0,
            curve: None,
        })
    }

    pub fn set_target_at_time(
        &self,
        target: f32,
        start_time: f64,
        time_constant: f64,
    ) -> EngineResult<()> {
        if time_constant <= 0.0 {
            return Err(EngineError::InvalidArgument(
                "time constant must be positive".into(),
            ));
        }
        self.schedule(AutomationRequest {
            kind: AutomationKind::SetTarget,
            value: target,
            time: validated_time(start_time)?,
            time_constant,
            duration: 0.0,
            curve: None,
        })
    }

    pub fn set_value_curve_at_time(
        &self,
        values: &[f32],
        start_time: f64,
        duration: f64,
    ) -> EngineResult<()> {
        if values.len() < 2 {
            return Err(EngineError::InvalidArgument(
                "value curve needs at least two points".into(),
            ));
        }
        if duration <= 0.0 {
            return Err(EngineError::InvalidArgument(
                "value curve duration must be positive".into(),
            ));
        }
        self.schedule(AutomationRequest {
            kind: AutomationKind::ValueCurve,
            value: values[values.len() - 1],
            time: validated_time(start_time)?,
            time_constant: 0.0,
            duration,
            curve: Some(values.to_vec().into()),
        })
    }

    pub fn cancel_scheduled_values(&self, cancel_time: f64) -> EngineResult<()> {
        self.send(ParamMessage::CancelScheduled(validated_time(cancel_time)?))
    }

    pub fn cancel_and_hold_at_time(&self, cancel_time: f64) -> EngineResult<()> {
        self.send(ParamMessage::CancelAndHold(validated_time(cancel_time)?))
    }

    fn schedule(&self, request: AutomationRequest) -> EngineResult<()> {
        self.send(ParamMessage::Automation(request))
    }

    fn send(&self, message: ParamMessage) -> EngineResult<()> {
        self.tx
            .try_send(message)
            .map_err(|_| EngineError::ResourceExhausted("parameter event queue full"))
    }
}

fn validated_time(time: f64) -> EngineResult<f64> {
    if !time.is_finite() || time < 0.0 {
        return Err(EngineError::InvalidArgument(format!(
            "automation time must be finite and non-negative, got {time}"
        )));
    }
    Ok(time)
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDER HALF
// ═══════════════════════════════════════════════════════════════════════════════

/// Render-thread half: timeline, per-block scratch and modulation inbox.
pub struct ParamRenderer {
    state: Arc<ParamState>,
    rx: SpscReceiver<ParamMessage>,
    queue: VecDeque<Segment>,
    active: Segment,
    queue_end_time: f64,
    queue_end_value: f32,
    values: Vec<f32>,
    mod_buf: SampleBuffer,
    mod_block: u64,
}

const EVENT_CHANNEL_CAPACITY: usize = 32;

impl ParamRenderer {
    /// Build a renderer and its matching (ownerless) control parts. The node
    /// factory assigns `owner`/`tag` via [`ParamRenderer::bind_handle`].
    pub(crate) fn new(
        default_value: f32,
        min_value: f32,
        max_value: f32,
        frames: usize,
        sample_rate: f32,
    ) -> (Self, ParamHandleParts) {
        let (tx, rx) = spsc_channel(
            EVENT_CHANNEL_CAPACITY,
            OverflowStrategy::WaitOnFull,
            WaitStrategy::BusyLoop,
        );
        let state = Arc::new(ParamState::new(default_value, min_value, max_value));
        let mut active = Segment::static_default();
        active.start_value = default_value;
        active.end_value = default_value;

        let renderer = Self {
            state: Arc::clone(&state),
            rx,
            queue: VecDeque::with_capacity(EVENT_CHANNEL_CAPACITY),
            active,
            queue_end_time: 0.0,
            queue_end_value: default_value,
            values: vec![0.0; frames],
            mod_buf: SampleBuffer::new(1, frames, sample_rate),
            mod_block: u64::MAX,
        };
        (renderer, ParamHandleParts { state, tx })
    }

    /// Sum a modulating input's block into the inbox, down-mixed to mono.
    pub(crate) fn add_modulation(&mut self, block: u64, src: &SampleBuffer) {
        if self.mod_block != block {
            self.mod_buf.zero();
            self.mod_block = block;
        }
        mix::sum_into(&mut self.mod_buf, src, ChannelInterpretation::Speakers);
    }

    /// Per-sample values for the block: modulation sum plus automation.
    pub fn process_a_rate(
        &mut self,
        frames: usize,
        start_time: f64,
        sample_rate: f32,
        block: u64,
    ) -> &[f32] {
        self.drain();
        let modulated = self.mod_block == block;
        let dt = 1.0 / sample_rate as f64;

        for i in 0..frames {
            let automated = self.value_at(start_time + i as f64 * dt);
            self.values[i] = if modulated {
                self.mod_buf.channel(0)[i] + automated
            } else {
                automated
            };
        }
        &self.values[..frames]
    }

    /// Single value for the block: first modulation sample plus automation
    /// at the block start.
    pub fn process_k_rate(&mut self, time: f64, block: u64) -> f32 {
        self.drain();
        let modulation = if self.mod_block == block {
            self.mod_buf.channel(0)[0]
        } else {
            0.0
        };
        modulation + self.value_at(time)
    }

    /// Most recently evaluated value (automation only).
    pub fn last_value(&self) -> f32 {
        self.state.get()
    }

    fn value_at(&mut self, time: f64) -> f32 {
        while self.active.end_time < time && !self.queue.is_empty() {
            if let Some(next) = self.queue.pop_front() {
                self.active = next;
            }
        }
        let raw = self.active.evaluate(time, self.state.get());
        let clamped = raw.clamp(self.state.min_value, self.state.max_value);
        if self.active.kind != SegmentKind::Static {
            self.state.set(clamped);
        }
        clamped
    }

    fn drain(&mut self) {
        while let Ok(message) = self.rx.try_receive() {
            match message {
                ParamMessage::Automation(request) => self.apply(request),
                ParamMessage::CancelScheduled(t) => self.cancel_scheduled(t),
                ParamMessage::CancelAndHold(t) => self.cancel_and_hold(t),
            }
        }
    }

    fn apply(&mut self, request: AutomationRequest) {
        match request.kind {
            AutomationKind::SetValue => {
                // The single kind allowed to land exactly on the queue end.
                if request.time < self.queue_end_time {
                    return;
                }
                self.push_segment(Segment {
                    kind: SegmentKind::SetValue,
                    start_time: request.time,
                    end_time: request.time,
                    start_value: self.queue_end_value,
                    end_value: request.value,
                    target: 0.0,
                    time_constant: 0.0,
                    curve: None,
                });
                self.queue_end_time = request.time;
                self.queue_end_value = request.value;
            }
            AutomationKind::LinearRamp => {
                if request.time < self.queue_end_time {
                    return;
                }
                self.push_segment(Segment {
                    kind: SegmentKind::LinearRamp,
                    start_time: self.queue_end_time,
                    end_time: request.time,
                    start_value: self.queue_end_value,
                    end_value: request.value,
                    target: 0.0,
                    time_constant: 0.0,
                    curve: None,
                });
                self.queue_end_time = request.time;
                self.queue_end_value = request.value;
            }
            AutomationKind::ExponentialRamp => {
                if request.time <= self.queue_end_time {
                    return;
                }
                if self.queue_end_value <= 0.0 || request.value <= 0.0 {
                    return;
                }
                self.push_segment(Segment {
                    kind: SegmentKind::ExponentialRamp,
                    start_time: self.queue_end_time,
                    end_time: request.time,
                    start_value: self.queue_end_value,
                    end_value: request.value,
                    target: 0.0,
                    time_constant: 0.0,
                    curve: None,
                });
                self.queue_end_time = request.time;
                self.queue_end_value = request.value;
            }
            AutomationKind::SetTarget => {
                if request.time <= self.queue_end_time {
                    return;
                }
                // Conceptually infinite; superseded by whatever comes next.
                self.push_segment(Segment {
                    kind: SegmentKind::SetTarget,
                    start_time: request.time,
                    end_time: request.time,
                    start_value: self.queue_end_value,
                    end_value: self.queue_end_value,
                    target: request.value,
                    time_constant: request.time_constant,
                    curve: None,
                });
                self.queue_end_time = request.time;
            }
            AutomationKind::ValueCurve => {
                if request.time <= self.queue_end_time {
                    return;
                }
                let end_time = request.time + request.duration;
                self.push_segment(Segment {
                    kind: SegmentKind::ValueCurve,
                    start_time: request.time,
                    end_time,
                    start_value: self.queue_end_value,
                    end_value: request.value,
                    target: 0.0,
                    time_constant: 0.0,
                    curve: request.curve,
                });
                self.queue_end_time = end_time;
                self.queue_end_value = request.value;
            }
        }
    }

    fn push_segment(&mut self, segment: Segment) {
        self.queue.push_back(segment);
    }

    fn cancel_scheduled(&mut self, cancel_time: f64) {
        self.queue.retain(|s| s.start_time < cancel_time);
        self.recompute_queue_end();
    }

    fn cancel_and_hold(&mut self, cancel_time: f64) {
        let hold = self.peek_value_at(cancel_time);
        self.queue.retain(|s| s.start_time < cancel_time);
        self.push_segment(Segment {
            kind: SegmentKind::SetValue,
            start_time: cancel_time,
            end_time: cancel_time,
            start_value: hold,
            end_value: hold,
            target: 0.0,
            time_constant: 0.0,
            curve: None,
        });
        self.queue_end_time = cancel_time;
        self.queue_end_value = hold;
    }

    fn recompute_queue_end(&mut self) {
        if let Some(last) = self.queue.back() {
            self.queue_end_time = last.end_time;
            self.queue_end_value = last.end_value;
        } else {
            self.queue_end_time = self.active.end_time;
            self.queue_end_value = self
                .active
                .evaluate(self.active.end_time, self.state.get());
        }
    }

    /// Evaluate the timeline at `time` without mutating it.
    fn peek_value_at(&self, time: f64) -> f32 {
        let mut candidate = &self.active;
        for segment in &self.queue {
            if segment.start_time <= time {
                candidate = segment;
            } else {
                break;
            }
        }
        candidate
            .evaluate(time, self.state.get())
            .clamp(self.state.min_value, self.state.max_value)
    }
}

/// Pieces a node factory assembles into a public [`AudioParam`].
pub(crate) struct ParamHandleParts {
    state: Arc<ParamState>,
    tx: SpscSender<ParamMessage>,
}

impl ParamHandleParts {
    pub(crate) fn state_arc(&self) -> Arc<ParamState> {
        Arc::clone(&self.state)
    }

    pub(crate) fn into_param(self, owner: NodeId, tag: ParamTag) -> AudioParam {
        AudioParam {
            state: self.state,
            tx: self.tx,
            owner,
            tag,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    const Q: usize = 128;
    const SR: f32 = 44100.0;

    fn pair(default: f32, min: f32, max: f32) -> (ParamRenderer, AudioParam) {
        let (renderer, parts) = ParamRenderer::new(default, min, max, Q, SR);
        (renderer, parts.into_param(NodeId(1), ParamTag::Gain))
    }

    #[test]
    fn test_default_before_first_event() {
        let (mut renderer, param) = pair(0.25, -1.0, 1.0);
        param.set_value_at_time(0.9, 1.0).unwrap();

        // Strictly earlier than the first event's start: default value.
        let v = renderer.process_k_rate(0.5, 0);
        assert!((v - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_linear_ramp_midpoint_and_terminal() {
        let (mut renderer, param) = pair(0.0, -1.0, 1.0);
        param.set_value_at_time(0.0, 0.0).unwrap();
        param.linear_ramp_to_value_at_time(1.0, 1.0).unwrap();

        let mid = renderer.process_a_rate(1, 0.5, SR, 0)[0];
        assert!((mid - 0.5).abs() < 1e-6);

        let at_end = renderer.process_a_rate(1, 1.0, SR, 1)[0];
        assert!((at_end - 1.0).abs() < 1e-6);

        let after = renderer.process_a_rate(1, 2.0, SR, 2)[0];
        assert!((after - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_exponential_ramp_rejects_nonpositive_endpoints() {
        let (mut renderer, param) = pair(0.0, -10.0, 10.0);
        // Queue end value is 0: the ramp must be discarded on drain.
        param.exponential_ramp_to_value_at_time(2.0, 1.0).unwrap();
        let v = renderer.process_k_rate(0.5, 0);
        assert!((v - 0.0).abs() < 1e-6);

        assert!(param.exponential_ramp_to_value_at_time(0.0, 2.0).is_err());
    }

    #[test]
    fn test_exponential_ramp_curve() {
        let (mut renderer, param) = pair(1.0, 0.0, 100.0);
        param.set_value_at_time(1.0, 0.0).unwrap();
        param.exponential_ramp_to_value_at_time(8.0, 3.0).unwrap();

        // 1 * (8/1)^(t/3): at t=1 -> 2, t=2 -> 4, t=3 -> 8.
        assert!((renderer.process_k_rate(1.0, 0) - 2.0).abs() < 1e-4);
        assert!((renderer.process_k_rate(2.0, 1) - 4.0).abs() < 1e-4);
        assert!((renderer.process_k_rate(3.0, 2) - 8.0).abs() < 1e-4);
    }

    #[test]
    fn test_set_target_decay() {
        let (mut renderer, param) = pair(1.0, 0.0, 10.0);
        param.set_value_at_time(1.0, 0.0).unwrap();
        param.set_target_at_time(0.0, 1.0, 0.5).unwrap();

        // After one time constant: 1 * e^-1.
        let v = renderer.process_k_rate(1.5, 0);
        assert!((v - (-1.0f32).exp()).abs() < 1e-4);
    }

    #[test]
    fn test_value_curve_interpolation() {
        let (mut renderer, param) = pair(0.0, -10.0, 10.0);
        param
            .set_value_curve_at_time(&[0.0, 2.0, 1.0], 1.0, 2.0)
            .unwrap();

        // Curve spans [1, 3]; three points -> knots at t=1, 2, 3.
        assert!((renderer.process_k_rate(1.0, 0) - 0.0).abs() < 1e-5);
        assert!((renderer.process_k_rate(1.5, 1) - 1.0).abs() < 1e-5);
        assert!((renderer.process_k_rate(2.0, 2) - 2.0).abs() < 1e-5);
        assert!((renderer.process_k_rate(2.5, 3) - 1.5).abs() < 1e-5);
        assert!((renderer.process_k_rate(4.0, 4) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_events_before_queue_end_are_rejected() {
        let (mut renderer, param) = pair(0.0, -1.0, 1.0);
        param.set_value_at_time(0.5, 2.0).unwrap();
        // Start strictly before the queue end: ignored.
        param.set_value_at_time(0.9, 1.0).unwrap();

        let v = renderer.process_k_rate(3.0, 0);
        assert!((v - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_cancel_scheduled_values() {
        let (mut renderer, param) = pair(0.0, -1.0, 1.0);
        param.set_value_at_time(0.3, 1.0).unwrap();
        param.set_value_at_time(0.9, 2.0).unwrap();
        param.cancel_scheduled_values(1.5).unwrap();

        let v = renderer.process_k_rate(3.0, 0);
        assert!((v - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_cancel_and_hold_freezes_ramp() {
        let (mut renderer, param) = pair(0.0, -1.0, 1.0);
        param.set_value_at_time(0.0, 0.0).unwrap();
        param.linear_ramp_to_value_at_time(1.0, 2.0).unwrap();
        param.cancel_and_hold_at_time(1.0).unwrap();

        // Held at the ramp's halfway value.
        let v = renderer.process_k_rate(3.0, 0);
        assert!((v - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_a_rate_adds_modulation() {
        let (mut renderer, param) = pair(0.5, -10.0, 10.0);
        let _ = param;

        let mut modulation = SampleBuffer::new(1, Q, SR);
        modulation.channel_mut(0).fill(0.25);
        renderer.add_modulation(7, &modulation);

        let values = renderer.process_a_rate(Q, 0.0, SR, 7);
        assert!((values[0] - 0.75).abs() < 1e-6);
        assert!((values[Q - 1] - 0.75).abs() < 1e-6);

        // Next block without fresh modulation: automation only.
        let values = renderer.process_a_rate(Q, 1.0, SR, 8);
        assert!((values[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_set_value_allowed_at_exact_queue_end() {
        let (mut renderer, param) = pair(0.0, -1.0, 1.0);
        param.set_value_at_time(0.3, 1.0).unwrap();
        // Equal to queue end: allowed for SetValue.
        param.set_value_at_time(0.7, 1.0).unwrap();

        let v = renderer.process_k_rate(2.0, 0);
        assert!((v - 0.7).abs() < 1e-6);
    }
}
