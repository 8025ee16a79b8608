//! Audio contexts and node handles
//!
//! `BaseContext` owns the control-side halves: the graph manager, the event
//! registry, the clock and the per-context periodic-wave cache. The realtime
//! `AudioContext` moves its render graph into a platform driver callback;
//! the offline context (see [`crate::offline`]) keeps the graph and pulls it
//! at arbitrary speed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use wf_core::mix::{ChannelCountMode, ChannelInterpretation};
use wf_core::RENDER_QUANTUM_SIZE;

use crate::clock::{ContextClock, ContextState};
use crate::device::AudioDriver;
use crate::error::{EngineError, EngineResult};
use crate::events::{AudioEvent, EventBody, EventHandlerRegistry};
use crate::graph::{GraphManager, NewNode, NodeId, RenderGraph, TopologyEvent};
use crate::node::{AudioProcessor, NodeConfig, NodeState};
use crate::nodes::destination::{DestinationNode, DestinationProcessor};
use crate::param::{AudioParam, ParamRenderer, ParamTag};
use crate::periodic_wave::{OscillatorType, PeriodicWave};

/// Anything that can sit in the graph: exposes its control handle.
pub trait AudioNode {
    fn node(&self) -> &NodeHandle;
}

/// Control-thread handle to one graph node.
pub struct NodeHandle {
    pub(crate) id: NodeId,
    pub(crate) state: Arc<NodeState>,
    pub(crate) manager: Arc<GraphManager>,
    pub(crate) clock: Arc<ContextClock>,
    pub(crate) registry: Arc<EventHandlerRegistry>,
}

impl NodeHandle {
    /// Queue a connection to another node; applied at the next render block.
    pub fn connect(&self, dst: &dyn AudioNode) -> EngineResult<()> {
        self.ensure_open()?;
        self.manager.send(TopologyEvent::Connect {
            from: self.id,
            to: dst.node().id,
        })
    }

    /// Queue a connection into a parameter's modulation inputs.
    pub fn connect_param(&self, param: &AudioParam) -> EngineResult<()> {
        self.ensure_open()?;
        let (to, tag) = param.endpoint();
        self.manager.send(TopologyEvent::ConnectParam {
            from: self.id,
            to,
            tag,
        })
    }

    pub fn disconnect(&self, dst: &dyn AudioNode) -> EngineResult<()> {
        self.manager.send(TopologyEvent::Disconnect {
            from: self.id,
            to: dst.node().id,
        })
    }

    pub fn disconnect_param(&self, param: &AudioParam) -> EngineResult<()> {
        let (to, tag) = param.endpoint();
        self.manager.send(TopologyEvent::DisconnectParam {
            from: self.id,
            to,
            tag,
        })
    }

    /// Remove every outgoing connection (node and parameter targets).
    pub fn disconnect_all(&self) -> EngineResult<()> {
        self.manager
            .send(TopologyEvent::DisconnectAll { from: self.id })
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    pub(crate) fn ensure_open(&self) -> EngineResult<()> {
        if self.clock.state() == ContextState::Closed {
            return Err(EngineError::InvalidState("context is closed".into()));
        }
        Ok(())
    }

    // Scheduled-source plumbing, re-exposed by the source node handles.

    pub(crate) fn schedule_start(&self, when: f64) -> EngineResult<()> {
        self.ensure_open()?;
        if !when.is_finite() || when < 0.0 {
            return Err(EngineError::InvalidArgument(format!(
                "start time must be finite and non-negative, got {when}"
            )));
        }
        self.state.schedule_start(when);
        Ok(())
    }

    pub(crate) fn schedule_stop(&self, when: f64) -> EngineResult<()> {
        self.ensure_open()?;
        if !when.is_finite() || when < 0.0 {
            return Err(EngineError::InvalidArgument(format!(
                "stop time must be finite and non-negative, got {when}"
            )));
        }
        self.state.schedule_stop(when);
        Ok(())
    }

    pub(crate) fn register_ended_handler<F>(&self, handler: F) -> u64
    where
        F: Fn(&EventBody) + Send + Sync + 'static,
    {
        let listener = self.registry.register(AudioEvent::Ended, handler);
        let old = self.state.set_ended_listener(listener);
        if old != 0 {
            self.registry.unregister(AudioEvent::Ended, old);
        }
        listener
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BASE CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// State and factories shared by the realtime and offline contexts.
pub struct BaseContext {
    clock: Arc<ContextClock>,
    manager: Arc<GraphManager>,
    registry: Arc<EventHandlerRegistry>,
    destination: DestinationNode,
    channel_count: usize,
    basic_waves: Mutex<HashMap<u8, Arc<PeriodicWave>>>,
}

impl BaseContext {
    /// Build the control half plus the render graph the caller will drive.
    pub(crate) fn new(sample_rate: f32, channel_count: usize) -> (Self, RenderGraph) {
        let clock = Arc::new(ContextClock::new(sample_rate));
        let registry = Arc::new(EventHandlerRegistry::new());
        let emitter = registry
            .take_emitter()
            .expect("fresh registry always has its emitter");

        let destination_id = NodeId(0);
        let destination_state = Arc::new(NodeState::new());
        let destination_node = NewNode {
            id: destination_id,
            processor: Box::new(DestinationProcessor),
            state: Arc::clone(&destination_state),
            config: NodeConfig {
                channel_count,
                mode: ChannelCountMode::Explicit,
                interpretation: ChannelInterpretation::Speakers,
                requires_tail: false,
                is_source: false,
            },
        };

        let (graph, manager) =
            RenderGraph::new(Arc::clone(&clock), emitter, destination_id, destination_node);
        let manager = Arc::new(manager);

        let destination = DestinationNode::new(NodeHandle {
            id: destination_id,
            state: destination_state,
            manager: Arc::clone(&manager),
            clock: Arc::clone(&clock),
            registry: Arc::clone(&registry),
        });

        (
            Self {
                clock,
                manager,
                registry,
                destination,
                channel_count,
                basic_waves: Mutex::new(HashMap::new()),
            },
            graph,
        )
    }

    pub fn sample_rate(&self) -> f32 {
        self.clock.sample_rate()
    }

    pub fn nyquist_frequency(&self) -> f32 {
        self.clock.nyquist_frequency()
    }

    pub fn current_time(&self) -> f64 {
        self.clock.current_time()
    }

    pub fn current_sample_frame(&self) -> u64 {
        self.clock.current_sample_frame()
    }

    pub fn state(&self) -> ContextState {
        self.clock.state()
    }

    pub fn destination(&self) -> &DestinationNode {
        &self.destination
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn event_registry(&self) -> &Arc<EventHandlerRegistry> {
        &self.registry
    }

    pub(crate) fn clock(&self) -> &Arc<ContextClock> {
        &self.clock
    }

    /// Per-context cache of the four basic band-limited waves.
    pub fn basic_wave(&self, wave_type: OscillatorType) -> EngineResult<Arc<PeriodicWave>> {
        if wave_type == OscillatorType::Custom {
            return Err(EngineError::InvalidArgument(
                "custom waves are created, not cached".into(),
            ));
        }
        let mut cache = self.basic_waves.lock();
        let wave = cache.entry(wave_type as u8).or_insert_with(|| {
            Arc::new(PeriodicWave::from_oscillator_type(
                self.sample_rate(),
                wave_type,
            ))
        });
        Ok(Arc::clone(wave))
    }

    /// Build a custom periodic wave from Fourier coefficients.
    pub fn create_periodic_wave(
        &self,
        real: &[f32],
        imag: &[f32],
        disable_normalization: bool,
    ) -> EngineResult<Arc<PeriodicWave>> {
        if real.len() != imag.len() || real.len() < 2 {
            return Err(EngineError::InvalidArgument(
                "periodic wave needs matching real/imag arrays of length >= 2".into(),
            ));
        }
        Ok(Arc::new(PeriodicWave::new(
            self.sample_rate(),
            real,
            imag,
            disable_normalization,
        )))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // NODE FACTORY PLUMBING
    // ═══════════════════════════════════════════════════════════════════════════

    pub(crate) fn alloc_node_id(&self) -> NodeId {
        self.manager.alloc_id()
    }

    pub(crate) fn register_node(
        &self,
        id: NodeId,
        processor: Box<dyn AudioProcessor>,
        config: NodeConfig,
    ) -> EngineResult<NodeHandle> {
        let state = Arc::new(NodeState::new());
        self.manager.send(TopologyEvent::AddNode(Box::new(NewNode {
            id,
            processor,
            state: Arc::clone(&state),
            config,
        })))?;

        Ok(NodeHandle {
            id,
            state,
            manager: Arc::clone(&self.manager),
            clock: Arc::clone(&self.clock),
            registry: Arc::clone(&self.registry),
        })
    }

    pub(crate) fn make_param(
        &self,
        owner: NodeId,
        tag: ParamTag,
        default_value: f32,
        min_value: f32,
        max_value: f32,
    ) -> EngineResult<(ParamRenderer, AudioParam)> {
        let (renderer, parts) = ParamRenderer::new(
            default_value,
            min_value,
            max_value,
            RENDER_QUANTUM_SIZE,
            self.sample_rate(),
        );
        self.manager
            .send(TopologyEvent::AddParam(parts.state_arc()))?;
        Ok((renderer, parts.into_param(owner, tag)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REALTIME AUDIO CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Options for [`AudioContext::new`].
#[derive(Debug, Clone)]
pub struct AudioContextOptions {
    pub sample_rate: f32,
    pub channel_count: usize,
}

impl Default for AudioContextOptions {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            channel_count: 2,
        }
    }
}

/// Realtime context: the render graph lives inside the driver's callback.
///
/// Field order matters: the driver (and with it the render graph and its
/// event emitter) must drop before the base context joins the event
/// dispatch thread.
pub struct AudioContext {
    driver: Mutex<Box<dyn AudioDriver>>,
    base: BaseContext,
}

impl AudioContext {
    pub fn new(options: AudioContextOptions, mut driver: Box<dyn AudioDriver>) -> EngineResult<Self> {
        if options.channel_count == 0 || options.channel_count > wf_core::MAX_CHANNEL_COUNT {
            return Err(EngineError::InvalidArgument(format!(
                "unsupported channel count {}",
                options.channel_count
            )));
        }

        let (base, mut graph) = BaseContext::new(options.sample_rate, options.channel_count);

        let clock = Arc::clone(base.clock());
        let channels = options.channel_count;
        driver.open(
            options.sample_rate,
            channels,
            Box::new(move |output: &mut [f32], frames: usize| {
                let span = frames * channels;
                if clock.state() == ContextState::Running {
                    graph.render_interleaved(&mut output[..span], channels);
                } else {
                    output[..span].fill(0.0);
                }
            }),
        )?;

        log::info!(
            "audio context opened: {} Hz, {} channels",
            options.sample_rate,
            channels
        );

        Ok(Self {
            base,
            driver: Mutex::new(driver),
        })
    }

    /// Start (or restart) rendering. A failing driver is cleaned up and the
    /// context falls back to `Suspended` with a `DeviceError` event.
    pub fn resume(&self) -> EngineResult<()> {
        if self.base.state() == ContextState::Closed {
            return Err(EngineError::InvalidState("context is closed".into()));
        }

        let mut driver = self.driver.lock();
        let result = if driver.is_running() {
            driver.resume()
        } else {
            driver.start()
        };

        if let Err(err) = result {
            driver.cleanup();
            self.base.clock().set_state(ContextState::Suspended);
            self.base.event_registry().dispatch_direct(
                AudioEvent::DeviceError,
                None,
                &EventBody {
                    message: Some(err.to_string()),
                    ..EventBody::default()
                },
            );
            log::error!("driver start failed: {err}");
            return Err(err);
        }

        self.base.clock().set_state(ContextState::Running);
        self.base.event_registry().dispatch_direct(
            AudioEvent::AudioReady,
            None,
            &EventBody::default(),
        );
        Ok(())
    }

    /// Pause rendering; the graph and clock freeze in place.
    pub fn suspend(&self) -> EngineResult<()> {
        if self.base.state() == ContextState::Closed {
            return Err(EngineError::InvalidState("context is closed".into()));
        }
        self.driver.lock().suspend()?;
        self.base.clock().set_state(ContextState::Suspended);
        Ok(())
    }

    /// Terminal shutdown: flush the driver and tear the graph down.
    pub fn close(&self) -> EngineResult<()> {
        if self.base.state() == ContextState::Closed {
            return Ok(());
        }
        {
            let mut driver = self.driver.lock();
            let _ = driver.stop();
            driver.cleanup();
        }
        self.base.clock().set_state(ContextState::Closed);
        log::info!("audio context closed");
        Ok(())
    }
}

impl std::ops::Deref for AudioContext {
    type Target = BaseContext;

    fn deref(&self) -> &BaseContext {
        &self.base
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
