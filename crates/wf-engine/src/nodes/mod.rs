//! Concrete node processors and their control handles

pub mod analyser;
pub mod biquad;
pub mod buffer_queue;
pub mod buffer_source;
pub mod constant;
pub mod convolver;
pub mod delay;
pub mod destination;
pub mod gain;
pub mod iir;
pub mod oscillator;
pub mod recorder;
pub mod stereo_panner;
pub mod streamer;
pub mod waveshaper;
pub mod worklet;

pub use analyser::{AnalyserNode, AnalyserOptions, AnalyserWindow};
pub use biquad::{BiquadFilterNode, BiquadFilterOptions};
pub use buffer_queue::{BufferQueueSourceNode, BufferQueueSourceOptions};
pub use buffer_source::{BufferSourceNode, BufferSourceOptions};
pub use constant::{ConstantSourceNode, ConstantSourceOptions};
pub use convolver::{ConvolverNode, ConvolverOptions};
pub use delay::{DelayNode, DelayOptions};
pub use destination::DestinationNode;
pub use gain::{GainNode, GainOptions};
pub use iir::{IirFilterNode, IirFilterOptions};
pub use oscillator::{OscillatorNode, OscillatorOptions};
pub use recorder::{RecorderAdapterNode, RecorderFeed};
pub use stereo_panner::{StereoPannerNode, StereoPannerOptions};
pub use streamer::{StreamerNode, StreamerOptions};
pub use waveshaper::{OverSampleType, WaveShaperNode, WaveShaperOptions};
pub use worklet::{WorkletNode, WorkletProcessorCallback};
