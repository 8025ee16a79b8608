//! End-to-end render scenarios through the offline context

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wf_engine::context::AudioNode;
use wf_engine::nodes::{
    BufferSourceOptions, ConstantSourceOptions, DelayOptions, GainOptions, OscillatorOptions,
    StereoPannerOptions,
};
use wf_engine::offline::OfflineAudioContext;
use wf_engine::{OscillatorType, SampleBuffer, RENDER_QUANTUM_SIZE};

const SR: f32 = 44100.0;
const Q: usize = RENDER_QUANTUM_SIZE;

fn mono_buffer(samples: &[f32]) -> Arc<SampleBuffer> {
    let mut buffer = SampleBuffer::new(1, samples.len(), SR);
    buffer.channel_mut(0).copy_from_slice(samples);
    Arc::new(buffer)
}

#[test]
fn constant_source_renders_unity_then_half() {
    let ctx = OfflineAudioContext::new(2, Q * 2, SR).unwrap();
    let source = ctx
        .create_constant_source(ConstantSourceOptions { offset: 1.0 })
        .unwrap();
    source.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    // Second block drops to 0.5 via a scheduled step.
    source
        .offset()
        .set_value_at_time(0.5, Q as f64 / SR as f64)
        .unwrap();

    let out = ctx.start_rendering().unwrap();

    for c in 0..2 {
        for i in 0..Q {
            assert!(
                (out.channel(c)[i] - 1.0).abs() < 1e-6,
                "block 1, ch {c}, sample {i}: {}",
                out.channel(c)[i]
            );
        }
        for i in Q..Q * 2 {
            assert!(
                (out.channel(c)[i] - 0.5).abs() < 1e-6,
                "block 2, ch {c}, sample {i}: {}",
                out.channel(c)[i]
            );
        }
    }
}

#[test]
fn gain_scales_buffer_source() {
    let ctx = OfflineAudioContext::new(1, Q, SR).unwrap();

    let source = ctx
        .create_buffer_source(BufferSourceOptions {
            buffer: Some(mono_buffer(&[0.1, 0.2, 0.3, 0.4])),
            ..BufferSourceOptions::default()
        })
        .unwrap();
    let gain = ctx.create_gain(GainOptions { gain: 0.5 }).unwrap();

    source.node().connect(&gain).unwrap();
    gain.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();
    let expected = [0.05, 0.1, 0.15, 0.2];
    for (i, e) in expected.iter().enumerate() {
        assert!(
            (out.channel(0)[i] - e).abs() < 1e-6,
            "sample {i}: {} vs {e}",
            out.channel(0)[i]
        );
    }
    assert!(out.channel(0)[4..].iter().all(|s| s.abs() < 1e-6));
}

#[test]
fn gain_at_unity_is_identity() {
    let input: Vec<f32> = (0..Q).map(|i| ((i as f32) * 0.05).sin() * 0.5).collect();

    let ctx = OfflineAudioContext::new(1, Q, SR).unwrap();
    let source = ctx
        .create_buffer_source(BufferSourceOptions {
            buffer: Some(mono_buffer(&input)),
            ..BufferSourceOptions::default()
        })
        .unwrap();
    let gain = ctx.create_gain(GainOptions { gain: 1.0 }).unwrap();

    source.node().connect(&gain).unwrap();
    gain.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();
    for (a, b) in out.channel(0).iter().zip(&input) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn delay_shifts_looped_ramp_by_64_frames() {
    // Ramp kept below unity so destination normalisation stays inert.
    let ramp: Vec<f32> = (0..Q).map(|i| (i + 1) as f32 / 200.0).collect();

    let ctx = OfflineAudioContext::new(1, Q * 2, SR).unwrap();
    let source = ctx
        .create_buffer_source(BufferSourceOptions {
            buffer: Some(mono_buffer(&ramp)),
            looping: true,
            ..BufferSourceOptions::default()
        })
        .unwrap();
    let delay = ctx
        .create_delay(DelayOptions {
            delay_time: 64.0 / SR as f64,
            max_delay_time: 1.0,
        })
        .unwrap();

    source.node().connect(&delay).unwrap();
    delay.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();
    let ch = out.channel(0);

    // First block: leading 64 zeros, then ramp[0..64].
    for i in 0..64 {
        assert!(ch[i].abs() < 1e-6, "frame {i} should be silent: {}", ch[i]);
    }
    for i in 64..Q {
        let expected = ramp[i - 64];
        assert!((ch[i] - expected).abs() < 1e-5, "frame {i}: {} vs {expected}", ch[i]);
    }
    // Second block: ramp[64..128] then the loop restart ramp[0..64].
    for i in 0..64 {
        let expected = ramp[64 + i];
        assert!((ch[Q + i] - expected).abs() < 1e-5, "frame {}: {}", Q + i, ch[Q + i]);
    }
    for i in 64..Q {
        let expected = ramp[i - 64];
        assert!((ch[Q + i] - expected).abs() < 1e-5, "frame {}: {}", Q + i, ch[Q + i]);
    }
}

#[test]
fn delay_of_zero_is_identity() {
    let input: Vec<f32> = (0..Q).map(|i| ((i as f32) * 0.11).sin() * 0.25).collect();

    let ctx = OfflineAudioContext::new(1, Q, SR).unwrap();
    let source = ctx
        .create_buffer_source(BufferSourceOptions {
            buffer: Some(mono_buffer(&input)),
            ..BufferSourceOptions::default()
        })
        .unwrap();
    let delay = ctx
        .create_delay(DelayOptions {
            delay_time: 0.0,
            max_delay_time: 1.0,
        })
        .unwrap();

    source.node().connect(&delay).unwrap();
    delay.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();
    for (i, (a, b)) in out.channel(0).iter().zip(&input).enumerate() {
        assert!((a - b).abs() < 1e-6, "frame {i}: {a} vs {b}");
    }
}

#[test]
fn stereo_pan_half_right_on_mono_input() {
    let input = [0.01f32, 0.02, 0.03, 0.04];

    let ctx = OfflineAudioContext::new(2, Q, SR).unwrap();
    let source = ctx
        .create_buffer_source(BufferSourceOptions {
            buffer: Some(mono_buffer(&input)),
            ..BufferSourceOptions::default()
        })
        .unwrap();
    let panner = ctx
        .create_stereo_panner(StereoPannerOptions { pan: 0.5 })
        .unwrap();

    source.node().connect(&panner).unwrap();
    panner.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();

    // x = 0.75: cos ~= 0.3827, sin ~= 0.9239.
    let (cos, sin) = {
        let angle = 0.75 * std::f32::consts::FRAC_PI_2;
        (angle.cos(), angle.sin())
    };
    for (i, s) in input.iter().enumerate() {
        assert!((out.channel(0)[i] - s * cos).abs() < 1e-6, "L frame {i}");
        assert!((out.channel(1)[i] - s * sin).abs() < 1e-6, "R frame {i}");
    }
}

#[test]
fn stereo_pan_extremes_silence_one_side() {
    for (pan, silent_channel) in [(-1.0f32, 1usize), (1.0, 0)] {
        let input: Vec<f32> = (0..Q).map(|i| ((i as f32) * 0.07).sin() * 0.5).collect();

        let ctx = OfflineAudioContext::new(2, Q, SR).unwrap();
        let source = ctx
            .create_buffer_source(BufferSourceOptions {
                buffer: Some(mono_buffer(&input)),
                ..BufferSourceOptions::default()
            })
            .unwrap();
        let panner = ctx.create_stereo_panner(StereoPannerOptions { pan }).unwrap();

        source.node().connect(&panner).unwrap();
        panner.node().connect(ctx.destination()).unwrap();
        source.start(0.0).unwrap();

        let out = ctx.start_rendering().unwrap();
        let peak = out.channel(silent_channel).iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak < 1e-6, "pan {pan}: channel {silent_channel} peak {peak}");
    }
}

#[test]
fn stereo_pan_zero_passes_stereo_through() {
    let mut buffer = SampleBuffer::new(2, 4, SR);
    buffer.channel_mut(0).copy_from_slice(&[0.1, 0.2, 0.3, 0.4]);
    buffer.channel_mut(1).copy_from_slice(&[0.4, 0.3, 0.2, 0.1]);

    let ctx = OfflineAudioContext::new(2, Q, SR).unwrap();
    let source = ctx
        .create_buffer_source(BufferSourceOptions {
            buffer: Some(Arc::new(buffer)),
            ..BufferSourceOptions::default()
        })
        .unwrap();
    let panner = ctx
        .create_stereo_panner(StereoPannerOptions { pan: 0.0 })
        .unwrap();

    source.node().connect(&panner).unwrap();
    panner.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();
    let expected_l = [0.1, 0.2, 0.3, 0.4];
    let expected_r = [0.4, 0.3, 0.2, 0.1];
    for i in 0..4 {
        assert!((out.channel(0)[i] - expected_l[i]).abs() < 1e-6);
        assert!((out.channel(1)[i] - expected_r[i]).abs() < 1e-6);
    }
}

#[test]
fn max_mode_widens_mono_input_to_configured_stereo() {
    // A mono source through a default (Max mode, 2-channel) gain processes
    // at max(1, 2) = 2 channels. Into a 5.1 destination the widened stereo
    // lands on L/R; a raw mono feed would take the centre channel instead.
    let ctx = OfflineAudioContext::new(6, Q, SR).unwrap();
    let source = ctx
        .create_constant_source(ConstantSourceOptions { offset: 0.5 })
        .unwrap();
    let gain = ctx.create_gain(GainOptions { gain: 1.0 }).unwrap();

    source.node().connect(&gain).unwrap();
    gain.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();
    for i in 0..Q {
        assert!((out.channel(0)[i] - 0.5).abs() < 1e-6, "L frame {i}");
        assert!((out.channel(1)[i] - 0.5).abs() < 1e-6, "R frame {i}");
    }
    for c in 2..6 {
        let peak = out.channel(c).iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak < 1e-6, "channel {c} should be silent, peak {peak}");
    }
}

#[test]
fn linear_ramp_reaches_midpoint_and_holds() {
    let seconds = 2.0;
    let length = (SR as f64 * seconds) as usize;

    let ctx = OfflineAudioContext::new(1, length, SR).unwrap();
    let source = ctx
        .create_constant_source(ConstantSourceOptions { offset: 1.0 })
        .unwrap();
    let gain = ctx.create_gain(GainOptions { gain: 0.0 }).unwrap();

    source.node().connect(&gain).unwrap();
    gain.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    gain.gain().set_value_at_time(0.0, 0.0).unwrap();
    gain.gain().linear_ramp_to_value_at_time(1.0, 1.0).unwrap();

    let out = ctx.start_rendering().unwrap();
    let at = |t: f64| out.channel(0)[(t * SR as f64) as usize];

    assert!((at(0.5) - 0.5).abs() < 1e-4, "t=0.5: {}", at(0.5));
    assert!((at(1.0) - 1.0).abs() < 1e-4, "t=1.0: {}", at(1.0));
    assert!((at(1.9) - 1.0).abs() < 1e-4, "t=1.9: {}", at(1.9));
}

#[test]
fn fan_out_renders_each_node_once_per_block() {
    // An oscillator feeding two unity gains sums to exactly twice the
    // single-path render; double-processing would advance the phase twice
    // and decorrelate the signal instead.
    let single = {
        let ctx = OfflineAudioContext::new(1, Q * 4, SR).unwrap();
        let osc = ctx
            .create_oscillator(OscillatorOptions {
                oscillator_type: OscillatorType::Sine,
                frequency: 440.0,
                ..OscillatorOptions::default()
            })
            .unwrap();
        let gain = ctx.create_gain(GainOptions { gain: 0.25 }).unwrap();
        osc.node().connect(&gain).unwrap();
        gain.node().connect(ctx.destination()).unwrap();
        osc.start(0.0).unwrap();
        ctx.start_rendering().unwrap()
    };

    let doubled = {
        let ctx = OfflineAudioContext::new(1, Q * 4, SR).unwrap();
        let osc = ctx
            .create_oscillator(OscillatorOptions {
                oscillator_type: OscillatorType::Sine,
                frequency: 440.0,
                ..OscillatorOptions::default()
            })
            .unwrap();
        let gain_a = ctx.create_gain(GainOptions { gain: 0.25 }).unwrap();
        let gain_b = ctx.create_gain(GainOptions { gain: 0.25 }).unwrap();
        osc.node().connect(&gain_a).unwrap();
        osc.node().connect(&gain_b).unwrap();
        gain_a.node().connect(ctx.destination()).unwrap();
        gain_b.node().connect(ctx.destination()).unwrap();
        osc.start(0.0).unwrap();
        ctx.start_rendering().unwrap()
    };

    for (i, (a, b)) in single.channel(0).iter().zip(doubled.channel(0)).enumerate() {
        assert!((a * 2.0 - b).abs() < 1e-5, "frame {i}: {} vs {}", a * 2.0, b);
    }
}

#[test]
fn oscillator_stop_fires_ended_exactly_once() {
    let ctx = OfflineAudioContext::new(1, Q * 8, SR).unwrap();
    let osc = ctx
        .create_oscillator(OscillatorOptions::default())
        .unwrap();
    osc.node().connect(ctx.destination()).unwrap();

    let ended = Arc::new(AtomicUsize::new(0));
    let ended_clone = Arc::clone(&ended);
    osc.set_on_ended(move |_| {
        ended_clone.fetch_add(1, Ordering::SeqCst);
    });

    osc.start(0.0).unwrap();
    osc.stop(Q as f64 * 2.0 / SR as f64).unwrap();

    let out = ctx.start_rendering().unwrap();

    // Audio stops after the stop frame.
    let tail_peak = out.channel(0)[Q * 3..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(tail_peak < 1e-6, "tail peak {tail_peak}");

    // Event dispatch is asynchronous.
    for _ in 0..200 {
        if ended.load(Ordering::SeqCst) > 0 {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(ended.load(Ordering::SeqCst), 1);
}

#[test]
fn dropped_source_handle_keeps_playing_until_stop() {
    let ctx = OfflineAudioContext::new(1, Q * 4, SR).unwrap();
    let osc = ctx
        .create_oscillator(OscillatorOptions::default())
        .unwrap();
    osc.node().connect(ctx.destination()).unwrap();
    osc.start(0.0).unwrap();
    osc.stop(Q as f64 * 2.0 / SR as f64).unwrap();

    // Host releases its reference; the registry keeps the node alive while
    // it is playing and reclaims it after it finishes.
    drop(osc);

    let out = ctx.start_rendering().unwrap();
    let head_peak = out.channel(0)[..Q * 2].iter().fold(0.0f32, |m, s| m.max(s.abs()));
    let tail_peak = out.channel(0)[Q * 3..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(head_peak > 0.1, "head peak {head_peak}");
    assert!(tail_peak < 1e-6, "tail peak {tail_peak}");
}

#[test]
fn modulated_gain_adds_constant_source() {
    // gain = 0.25 (intrinsic) + 0.25 (modulation) = 0.5.
    let ctx = OfflineAudioContext::new(1, Q, SR).unwrap();

    let source = ctx
        .create_buffer_source(BufferSourceOptions {
            buffer: Some(mono_buffer(&[0.8; 16])),
            ..BufferSourceOptions::default()
        })
        .unwrap();
    let gain = ctx.create_gain(GainOptions { gain: 0.25 }).unwrap();
    let modulator = ctx
        .create_constant_source(ConstantSourceOptions { offset: 0.25 })
        .unwrap();

    source.node().connect(&gain).unwrap();
    gain.node().connect(ctx.destination()).unwrap();
    modulator.node().connect_param(gain.gain()).unwrap();
    source.start(0.0).unwrap();
    modulator.start(0.0).unwrap();

    let out = ctx.start_rendering().unwrap();
    for i in 0..16 {
        assert!(
            (out.channel(0)[i] - 0.4).abs() < 1e-5,
            "frame {i}: {}",
            out.channel(0)[i]
        );
    }
}

#[test]
fn offline_suspend_point_allows_graph_mutation() {
    let mut ctx = OfflineAudioContext::new(1, Q * 4, SR).unwrap();
    let suspend_time = (Q * 2) as f64 / SR as f64;
    ctx.suspend_at(suspend_time).unwrap();

    let out = ctx
        .start_rendering_with(|ctx, time| {
            assert!((time - suspend_time).abs() < 1e-9);
            // Wire up a source only for the second half.
            let source = ctx
                .create_constant_source(ConstantSourceOptions { offset: 0.5 })
                .unwrap();
            source.node().connect(ctx.destination()).unwrap();
            source.start(time).unwrap();
            // The handle drops here; the registry keeps the scheduled node
            // alive until it finishes.
        })
        .unwrap();

    let head_peak = out.channel(0)[..Q * 2].iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(head_peak < 1e-6, "head should be silent, peak {head_peak}");
    for i in Q * 2..Q * 4 {
        assert!(
            (out.channel(0)[i] - 0.5).abs() < 1e-6,
            "frame {i}: {}",
            out.channel(0)[i]
        );
    }
}

#[test]
fn disconnect_silences_downstream() {
    let ctx = OfflineAudioContext::new(1, Q * 2, SR).unwrap();
    let source = ctx
        .create_constant_source(ConstantSourceOptions { offset: 0.5 })
        .unwrap();
    source.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();

    let mut suspendable = ctx;
    suspendable.suspend_at(Q as f64 / SR as f64).unwrap();

    let source_ref = &source;
    let out = suspendable
        .start_rendering_with(move |ctx, _| {
            source_ref.node().disconnect(ctx.destination()).unwrap();
        })
        .unwrap();

    for i in 0..Q {
        assert!((out.channel(0)[i] - 0.5).abs() < 1e-6);
    }
    let tail_peak = out.channel(0)[Q..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(tail_peak < 1e-6, "tail peak {tail_peak}");
}
