//! wf-engine: the WaveForge audio graph engine
//!
//! A real-time audio graph in the Web Audio mould: a context owns a directed
//! graph of nodes, pulls fixed 128-frame quanta from a single destination
//! sink, and hands interleaved PCM to a platform driver. An offline context
//! renders the same graph into a buffer at arbitrary speed.
//!
//! ## Thread model
//!
//! - Control threads create nodes, connect them and schedule automation.
//!   Everything crosses to the render side through SPSC channels drained at
//!   block boundaries, so topology never changes mid-block.
//! - The audio thread renders. It does not lock (two documented try-locks
//!   aside), allocate, or free: released resources travel to dedicated
//!   destructor threads.
//! - Worker threads (event dispatch, convolver lanes, worklet runtimes,
//!   offloaded tasks) are bounded and owned by their subsystems.
//!
//! ## Example
//!
//! ```no_run
//! use wf_engine::offline::OfflineAudioContext;
//! use wf_engine::nodes::{GainOptions, OscillatorOptions};
//! use wf_engine::context::AudioNode;
//!
//! let ctx = OfflineAudioContext::new(2, 44100, 44100.0)?;
//! let osc = ctx.create_oscillator(OscillatorOptions::default())?;
//! let gain = ctx.create_gain(GainOptions { gain: 0.5 })?;
//!
//! osc.node().connect(&gain)?;
//! gain.node().connect(ctx.destination())?;
//! osc.start(0.0)?;
//!
//! let rendered = ctx.start_rendering()?;
//! assert_eq!(rendered.frames(), 44100);
//! # Ok::<(), wf_engine::EngineError>(())
//! ```

pub mod clock;
pub mod context;
pub mod destructor;
pub mod device;
pub mod error;
pub mod events;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod offline;
pub mod offload;
pub mod param;
pub mod periodic_wave;
pub mod stretch;

pub use clock::ContextState;
pub use context::{AudioContext, AudioContextOptions, AudioNode, BaseContext, NodeHandle};
pub use device::{AudioDriver, RenderCallback};
pub use error::{EngineError, EngineResult};
pub use events::{AudioEvent, EventBody, EventHandlerRegistry};
pub use graph::NodeId;
pub use node::PlaybackState;
pub use offline::OfflineAudioContext;
pub use param::{AudioParam, ParamTag};
pub use periodic_wave::{OscillatorType, PeriodicWave};
pub use stretch::{FallbackStretcher, Stretcher};

// Re-exported so hosts rarely need the lower crates directly.
pub use wf_core::{Sample, SampleBuffer, RENDER_QUANTUM_SIZE};
pub use wf_dsp::FilterType;
