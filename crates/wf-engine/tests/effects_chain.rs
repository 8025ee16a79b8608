//! Effect, analysis and adapter nodes through the offline context

use std::sync::Arc;

use wf_engine::context::AudioNode;
use wf_engine::nodes::{
    AnalyserOptions, BiquadFilterOptions, BufferSourceOptions, ConstantSourceOptions,
    ConvolverOptions, GainOptions, IirFilterOptions, OscillatorOptions, StreamerOptions,
    WaveShaperOptions,
};
use wf_engine::offline::OfflineAudioContext;
use wf_engine::{FilterType, SampleBuffer, RENDER_QUANTUM_SIZE};

const SR: f32 = 44100.0;
const Q: usize = RENDER_QUANTUM_SIZE;

fn mono_buffer(samples: &[f32]) -> Arc<SampleBuffer> {
    let mut buffer = SampleBuffer::new(1, samples.len(), SR);
    buffer.channel_mut(0).copy_from_slice(samples);
    Arc::new(buffer)
}

fn sine(frequency: f32, frames: usize, amplitude: f32) -> Vec<f32> {
    (0..frames)
        .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / SR).sin() * amplitude)
        .collect()
}

#[test]
fn biquad_lowpass_attenuates_high_tone() {
    let frames = Q * 16;
    let ctx = OfflineAudioContext::new(1, frames, SR).unwrap();

    let source = ctx
        .create_buffer_source(BufferSourceOptions {
            buffer: Some(mono_buffer(&sine(12000.0, frames, 0.5))),
            ..BufferSourceOptions::default()
        })
        .unwrap();
    let filter = ctx
        .create_biquad_filter(BiquadFilterOptions {
            filter_type: FilterType::Lowpass,
            frequency: 500.0,
            ..BiquadFilterOptions::default()
        })
        .unwrap();

    source.node().connect(&filter).unwrap();
    filter.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();
    let tail_peak = out.channel(0)[frames / 2..]
        .iter()
        .fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(tail_peak < 0.01, "12 kHz leaked through: {tail_peak}");
}

#[test]
fn biquad_frequency_response_nan_out_of_range() {
    let ctx = OfflineAudioContext::new(1, Q, SR).unwrap();
    let filter = ctx
        .create_biquad_filter(BiquadFilterOptions::default())
        .unwrap();

    let freqs = [1000.0, -10.0, 30000.0];
    let mut mag = [0.0f32; 3];
    let mut phase = [0.0f32; 3];
    filter.get_frequency_response(&freqs, &mut mag, &mut phase);

    assert!(mag[0].is_finite());
    assert!(mag[1].is_nan() && phase[1].is_nan());
    assert!(mag[2].is_nan() && phase[2].is_nan());
}

#[test]
fn iir_single_pole_matches_reference() {
    // y[n] = 0.5 x[n] + 0.5 y[n-1]
    let input = [0.5f32, 0.0, 0.0, 0.0, 0.0, 0.0];
    let frames = Q;

    let ctx = OfflineAudioContext::new(1, frames, SR).unwrap();
    let source = ctx
        .create_buffer_source(BufferSourceOptions {
            buffer: Some(mono_buffer(&input)),
            ..BufferSourceOptions::default()
        })
        .unwrap();
    let filter = ctx
        .create_iir_filter(IirFilterOptions {
            feedforward: vec![0.5],
            feedback: vec![1.0, -0.5],
        })
        .unwrap();

    source.node().connect(&filter).unwrap();
    filter.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();
    let mut expected = 0.25f32;
    assert!((out.channel(0)[0] - 0.25).abs() < 1e-6);
    for i in 1..6 {
        expected *= 0.5;
        assert!(
            (out.channel(0)[i] - expected).abs() < 1e-6,
            "frame {i}: {} vs {expected}",
            out.channel(0)[i]
        );
    }
}

#[test]
fn waveshaper_identity_curve_passes_through() {
    let input = [0.5f32, -0.25, 0.125, 0.0];

    let ctx = OfflineAudioContext::new(1, Q, SR).unwrap();
    let source = ctx
        .create_buffer_source(BufferSourceOptions {
            buffer: Some(mono_buffer(&input)),
            ..BufferSourceOptions::default()
        })
        .unwrap();
    let shaper = ctx
        .create_wave_shaper(WaveShaperOptions {
            curve: Some(vec![-1.0, 1.0]),
            ..WaveShaperOptions::default()
        })
        .unwrap();

    source.node().connect(&shaper).unwrap();
    shaper.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();
    for (i, e) in input.iter().enumerate() {
        assert!(
            (out.channel(0)[i] - e).abs() < 1e-6,
            "frame {i}: {} vs {e}",
            out.channel(0)[i]
        );
    }
}

#[test]
fn waveshaper_hard_clip_curve() {
    let input = [0.9f32, -0.9, 0.2];

    let ctx = OfflineAudioContext::new(1, Q, SR).unwrap();
    let source = ctx
        .create_buffer_source(BufferSourceOptions {
            buffer: Some(mono_buffer(&input)),
            ..BufferSourceOptions::default()
        })
        .unwrap();
    // Clamp to +-0.5: three-point curve.
    let shaper = ctx
        .create_wave_shaper(WaveShaperOptions {
            curve: Some(vec![-0.5, 0.0, 0.5]),
            ..WaveShaperOptions::default()
        })
        .unwrap();

    source.node().connect(&shaper).unwrap();
    shaper.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();
    // curve maps x linearly to x/2 across [-1, 1].
    assert!((out.channel(0)[0] - 0.45).abs() < 1e-6);
    assert!((out.channel(0)[1] + 0.45).abs() < 1e-6);
    assert!((out.channel(0)[2] - 0.1).abs() < 1e-6);
}

#[test]
fn analyser_sees_oscillator_peak() {
    let ctx = OfflineAudioContext::new(1, Q * 32, SR).unwrap();
    let osc = ctx
        .create_oscillator(OscillatorOptions {
            frequency: 1378.125, // exactly bin 64 at fft 2048 / 44100
            ..OscillatorOptions::default()
        })
        .unwrap();
    let analyser = ctx
        .create_analyser(AnalyserOptions::default())
        .unwrap();

    osc.node().connect(&analyser).unwrap();
    analyser.node().connect(ctx.destination()).unwrap();
    osc.start(0.0).unwrap();

    let _ = ctx.start_rendering().unwrap();

    let mut spectrum = vec![0.0f32; analyser.frequency_bin_count()];
    analyser.get_float_frequency_data(&mut spectrum);

    let peak_bin = spectrum
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap();
    assert!(
        (63..=65).contains(&peak_bin),
        "peak at bin {peak_bin}, expected ~64"
    );
}

#[test]
fn analyser_time_domain_returns_recent_input() {
    let ctx = OfflineAudioContext::new(1, Q * 4, SR).unwrap();
    let source = ctx
        .create_constant_source(ConstantSourceOptions { offset: 0.25 })
        .unwrap();
    let analyser = ctx
        .create_analyser(AnalyserOptions {
            fft_size: 256,
            ..AnalyserOptions::default()
        })
        .unwrap();

    source.node().connect(&analyser).unwrap();
    analyser.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let _ = ctx.start_rendering().unwrap();

    let mut data = vec![0.0f32; 256];
    analyser.get_float_time_domain_data(&mut data);
    for (i, s) in data.iter().enumerate() {
        assert!((s - 0.25).abs() < 1e-6, "sample {i}: {s}");
    }
}

#[test]
fn convolver_unit_impulse_without_normalization_is_identity() {
    let input = sine(440.0, Q * 2, 0.25);

    let ctx = OfflineAudioContext::new(2, Q * 2, SR).unwrap();
    let source = ctx
        .create_buffer_source(BufferSourceOptions {
            buffer: Some(mono_buffer(&input)),
            ..BufferSourceOptions::default()
        })
        .unwrap();
    let convolver = ctx
        .create_convolver(ConvolverOptions {
            buffer: Some(mono_buffer(&[1.0, 0.0, 0.0, 0.0])),
            disable_normalization: true,
        })
        .unwrap();

    source.node().connect(&convolver).unwrap();
    convolver.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();
    for c in 0..2 {
        for (i, e) in input.iter().enumerate() {
            assert!(
                (out.channel(c)[i] - e).abs() < 1e-3,
                "ch {c}, frame {i}: {} vs {e}",
                out.channel(c)[i]
            );
        }
    }
}

#[test]
fn streamer_plays_pushed_blocks_and_zero_fills_underflow() {
    let ctx = OfflineAudioContext::new(1, Q * 2, SR).unwrap();
    let streamer = ctx
        .create_streamer(StreamerOptions {
            channel_count: 1,
            queue_capacity: 8,
        })
        .unwrap();
    streamer.node().connect(ctx.destination()).unwrap();

    let mut block = SampleBuffer::new(1, Q, SR);
    for (i, s) in block.channel_mut(0).iter_mut().enumerate() {
        *s = (i + 1) as f32 / 1000.0;
    }
    streamer.push_block(block).unwrap();
    streamer.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();
    for i in 0..Q {
        let expected = (i + 1) as f32 / 1000.0;
        assert!(
            (out.channel(0)[i] - expected).abs() < 1e-6,
            "frame {i}: {}",
            out.channel(0)[i]
        );
    }
    // Decoder starvation renders silence.
    assert!(out.channel(0)[Q..].iter().all(|s| s.abs() < 1e-6));
}

#[test]
fn recorder_adapter_drains_pushed_frames() {
    let ctx = OfflineAudioContext::new(1, Q, SR).unwrap();
    let recorder = ctx.create_recorder_adapter(1).unwrap();
    recorder.node().connect(ctx.destination()).unwrap();

    let captured: Vec<f32> = (0..Q).map(|i| (i as f32 * 0.001).min(0.5)).collect();
    recorder.feed().push_planar(&[&captured]);

    let out = ctx.start_rendering().unwrap();
    for (i, e) in captured.iter().enumerate() {
        assert!(
            (out.channel(0)[i] - e).abs() < 1e-6,
            "frame {i}: {} vs {e}",
            out.channel(0)[i]
        );
    }
}

#[test]
fn worklet_doubles_its_input() {
    let blocks = 8;
    let ctx = OfflineAudioContext::new(1, Q * blocks, SR).unwrap();
    let source = ctx
        .create_constant_source(ConstantSourceOptions { offset: 0.25 })
        .unwrap();
    let worklet = ctx
        .create_worklet_node(Box::new(|inputs, outputs, frames, _time| {
            for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
                for i in 0..frames {
                    output[i] = input[i] * 2.0;
                }
            }
            true
        }))
        .unwrap();

    source.node().connect(&worklet).unwrap();
    worklet.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();

    // Allow the runtime thread a warm-up block or two (missed deadlines
    // render silence); the steady state must be doubled input.
    let steady = &out.channel(0)[Q * (blocks / 2)..];
    for (i, s) in steady.iter().enumerate() {
        assert!((s - 0.5).abs() < 1e-6, "steady frame {i}: {s}");
    }
}

#[test]
fn chained_effects_keep_dc_path_consistent() {
    // constant -> gain(0.5) -> waveshaper(identity) -> gain(0.5) -> out
    let ctx = OfflineAudioContext::new(1, Q, SR).unwrap();
    let source = ctx
        .create_constant_source(ConstantSourceOptions { offset: 0.8 })
        .unwrap();
    let gain_a = ctx.create_gain(GainOptions { gain: 0.5 }).unwrap();
    let shaper = ctx
        .create_wave_shaper(WaveShaperOptions {
            curve: Some(vec![-1.0, 1.0]),
            ..WaveShaperOptions::default()
        })
        .unwrap();
    let gain_b = ctx.create_gain(GainOptions { gain: 0.5 }).unwrap();

    source.node().connect(&gain_a).unwrap();
    gain_a.node().connect(&shaper).unwrap();
    shaper.node().connect(&gain_b).unwrap();
    gain_b.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();
    for (i, s) in out.channel(0).iter().enumerate() {
        assert!((s - 0.2).abs() < 1e-5, "frame {i}: {s}");
    }
}
