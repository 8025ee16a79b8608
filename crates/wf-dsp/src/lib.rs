//! wf-dsp: DSP primitives for WaveForge
//!
//! Performance-critical building blocks used by the engine's nodes:
//! - `fft` - real FFT wrapper (RealFFT for 2x efficiency over complex FFT)
//! - `windows` - Blackman/Hann analysis windows, WOLA normalisation
//! - `vector` - element-wise buffer math and dB/ratio conversions
//! - `biquad` - TDF-II biquad coefficients and per-channel state
//! - `convolution` - uniform partitioned FFT convolution (overlap-save)
//! - `oversampling` - 2x/4x windowed-sinc up/down sampling chains
//! - `resampler` - linear sample-rate conversion for decoded buffers

pub mod biquad;
pub mod convolution;
pub mod fft;
pub mod oversampling;
pub mod resampler;
pub mod vector;
pub mod windows;

// Spectrum element type, re-exported so dependents need no direct
// num-complex dependency.
pub use num_complex::Complex;

pub use biquad::{BiquadCoeffs, BiquadState, FilterType};
pub use convolution::PartitionedConvolver;
pub use fft::RealFft;
pub use oversampling::{OversampleFactor, Oversampler};
pub use resampler::resample_linear;
