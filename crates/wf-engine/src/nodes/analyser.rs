//! Analyser: taps the signal for spectral and time-domain inspection
//!
//! The render side only down-mixes to mono and appends to a lock-free ring;
//! all FFT work happens on the control thread when the host asks for data.
//! Magnitudes are smoothed across analyses with `m' = t*m + (1-t)*|X|/N`.

use std::sync::Arc;

use parking_lot::Mutex;

use wf_core::mix::{self, ChannelCountMode, ChannelInterpretation};
use wf_core::{OverwritingCircularBuffer, SampleBuffer, RENDER_QUANTUM_SIZE};
use wf_dsp::{windows, RealFft};
use wf_dsp::vector::linear_to_decibels;

use crate::context::{AudioNode, BaseContext, NodeHandle};
use crate::error::{EngineError, EngineResult};
use crate::node::{AudioProcessor, NodeConfig, ProcessScope, ProcessStatus};

pub const MIN_FFT_SIZE: usize = 32;
pub const MAX_FFT_SIZE: usize = 32768;

/// Analysis window selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalyserWindow {
    #[default]
    Blackman,
    Hann,
}

#[derive(Debug, Clone)]
pub struct AnalyserOptions {
    pub fft_size: usize,
    pub min_decibels: f32,
    pub max_decibels: f32,
    pub smoothing_time_constant: f32,
    pub window: AnalyserWindow,
    /// Apply WOLA perfect-reconstruction normalisation to the window.
    pub wola_normalised: bool,
}

impl Default for AnalyserOptions {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            min_decibels: -100.0,
            max_decibels: -30.0,
            smoothing_time_constant: 0.8,
            window: AnalyserWindow::Blackman,
            wola_normalised: false,
        }
    }
}

struct Analysis {
    fft_size: usize,
    window_kind: AnalyserWindow,
    wola: bool,
    window: Vec<f32>,
    fft: RealFft,
    spectrum: Vec<wf_dsp::Complex<f32>>,
    magnitudes: Vec<f32>,
    temp: Vec<f32>,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
}

impl Analysis {
    fn new(options: &AnalyserOptions) -> Self {
        let mut analysis = Self {
            fft_size: options.fft_size,
            window_kind: options.window,
            wola: options.wola_normalised,
            window: Vec::new(),
            fft: RealFft::new(options.fft_size),
            spectrum: Vec::new(),
            magnitudes: vec![0.0; options.fft_size / 2],
            temp: vec![0.0; options.fft_size],
            smoothing: options.smoothing_time_constant,
            min_decibels: options.min_decibels,
            max_decibels: options.max_decibels,
        };
        analysis.spectrum = analysis.fft.make_spectrum();
        analysis.rebuild_window();
        analysis
    }

    fn rebuild_window(&mut self) {
        self.window.resize(self.fft_size, 0.0);
        match self.window_kind {
            AnalyserWindow::Blackman => windows::blackman(&mut self.window, 1.0),
            AnalyserWindow::Hann => windows::hann(&mut self.window, 1.0),
        }
        if self.wola {
            windows::force_perfect_reconstruction(&mut self.window, self.fft_size / 2);
        }
    }

    fn set_fft_size(&mut self, fft_size: usize) {
        self.fft_size = fft_size;
        self.fft = RealFft::new(fft_size);
        self.spectrum = self.fft.make_spectrum();
        self.magnitudes = vec![0.0; fft_size / 2];
        self.temp = vec![0.0; fft_size];
        self.rebuild_window();
    }

    fn analyse(&mut self, ring: &OverwritingCircularBuffer) {
        ring.peek_latest(&mut self.temp);
        for (s, w) in self.temp.iter_mut().zip(&self.window) {
            *s *= w;
        }
        self.fft.forward(&mut self.temp, &mut self.spectrum);

        let scale = 1.0 / self.fft_size as f32;
        for (m, bin) in self.magnitudes.iter_mut().zip(self.spectrum.iter()) {
            let magnitude = bin.norm() * scale;
            *m = self.smoothing * *m + (1.0 - self.smoothing) * magnitude;
        }
    }
}

struct AnalyserShared {
    ring: OverwritingCircularBuffer,
    analysis: Mutex<Analysis>,
}

pub(crate) struct AnalyserProcessor {
    shared: Arc<AnalyserShared>,
    mono: SampleBuffer,
}

impl AudioProcessor for AnalyserProcessor {
    fn process(&mut self, buf: &mut SampleBuffer, scope: &ProcessScope) -> ProcessStatus {
        // Snoop only: the input continues through untouched.
        self.mono.zero();
        mix::sum_into(&mut self.mono, buf, ChannelInterpretation::Speakers);
        self.shared
            .ring
            .push(&self.mono.channel(0)[..scope.frames]);
        ProcessStatus::Active
    }
}

/// Control handle for an analyser.
pub struct AnalyserNode {
    node: NodeHandle,
    shared: Arc<AnalyserShared>,
}

impl AnalyserNode {
    pub fn fft_size(&self) -> usize {
        self.shared.analysis.lock().fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size() / 2
    }

    pub fn set_fft_size(&self, fft_size: usize) -> EngineResult<()> {
        if !fft_size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size) {
            return Err(EngineError::InvalidArgument(format!(
                "fft size must be a power of two in [{MIN_FFT_SIZE}, {MAX_FFT_SIZE}], got {fft_size}"
            )));
        }
        let mut analysis = self.shared.analysis.lock();
        if analysis.fft_size != fft_size {
            analysis.set_fft_size(fft_size);
        }
        Ok(())
    }

    pub fn smoothing_time_constant(&self) -> f32 {
        self.shared.analysis.lock().smoothing
    }

    pub fn set_smoothing_time_constant(&self, value: f32) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(EngineError::InvalidArgument(
                "smoothing time constant must be in [0, 1]".into(),
            ));
        }
        self.shared.analysis.lock().smoothing = value;
        Ok(())
    }

    pub fn min_decibels(&self) -> f32 {
        self.shared.analysis.lock().min_decibels
    }

    pub fn max_decibels(&self) -> f32 {
        self.shared.analysis.lock().max_decibels
    }

    pub fn set_min_decibels(&self, value: f32) {
        self.shared.analysis.lock().min_decibels = value;
    }

    pub fn set_max_decibels(&self, value: f32) {
        self.shared.analysis.lock().max_decibels = value;
    }

    pub fn set_window(&self, window: AnalyserWindow, wola_normalised: bool) {
        let mut analysis = self.shared.analysis.lock();
        analysis.window_kind = window;
        analysis.wola = wola_normalised;
        analysis.rebuild_window();
    }

    /// Smoothed magnitude spectrum in dB.
    pub fn get_float_frequency_data(&self, data: &mut [f32]) {
        let mut analysis = self.shared.analysis.lock();
        analysis.analyse(&self.shared.ring);
        let len = data.len().min(analysis.magnitudes.len());
        for (out, m) in data[..len].iter_mut().zip(&analysis.magnitudes) {
            *out = linear_to_decibels(*m);
        }
    }

    /// Magnitude spectrum scaled to bytes between min/max decibels.
    pub fn get_byte_frequency_data(&self, data: &mut [u8]) {
        let mut analysis = self.shared.analysis.lock();
        analysis.analyse(&self.shared.ring);

        let range = analysis.max_decibels - analysis.min_decibels;
        let range_scale = if range == 0.0 { 1.0 } else { 1.0 / range };
        let len = data.len().min(analysis.magnitudes.len());

        for (out, m) in data[..len].iter_mut().zip(&analysis.magnitudes) {
            let db = if *m == 0.0 {
                analysis.min_decibels
            } else {
                linear_to_decibels(*m)
            };
            let scaled = 255.0 * (db - analysis.min_decibels) * range_scale;
            *out = scaled.clamp(0.0, 255.0) as u8;
        }
    }

    /// Most recent `fft_size` input samples, unscaled.
    pub fn get_float_time_domain_data(&self, data: &mut [f32]) {
        let analysis = self.shared.analysis.lock();
        let len = data.len().min(analysis.fft_size);
        self.shared.ring.peek_latest(&mut data[..len]);
    }

    /// Most recent samples scaled to unsigned bytes around 128.
    pub fn get_byte_time_domain_data(&self, data: &mut [u8]) {
        let mut analysis = self.shared.analysis.lock();
        let len = data.len().min(analysis.fft_size);
        let temp_len = analysis.temp.len().min(len);
        let temp = &mut analysis.temp[..temp_len];
        self.shared.ring.peek_latest(temp);

        for (out, s) in data[..temp_len].iter_mut().zip(temp.iter()) {
            let scaled = 128.0 * (s + 1.0);
            *out = scaled.clamp(0.0, 255.0) as u8;
        }
    }
}

impl AudioNode for AnalyserNode {
    fn node(&self) -> &NodeHandle {
        &self.node
    }
}

impl BaseContext {
    pub fn create_analyser(&self, options: AnalyserOptions) -> EngineResult<AnalyserNode> {
        if !options.fft_size.is_power_of_two()
            || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&options.fft_size)
        {
            return Err(EngineError::InvalidArgument(format!(
                "fft size must be a power of two in [{MIN_FFT_SIZE}, {MAX_FFT_SIZE}], got {}",
                options.fft_size
            )));
        }

        let id = self.alloc_node_id();
        let shared = Arc::new(AnalyserShared {
            ring: OverwritingCircularBuffer::new(MAX_FFT_SIZE * 2),
            analysis: Mutex::new(Analysis::new(&options)),
        });

        let node = self.register_node(
            id,
            Box::new(AnalyserProcessor {
                shared: Arc::clone(&shared),
                mono: SampleBuffer::new(1, RENDER_QUANTUM_SIZE, self.sample_rate()),
            }),
            NodeConfig {
                mode: ChannelCountMode::Max,
                ..NodeConfig::default()
            },
        )?;

        Ok(AnalyserNode { node, shared })
    }
}
