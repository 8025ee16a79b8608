//! Realtime context driven through a mock driver
//!
//! Device callbacks rarely align with the render quantum; these tests feed
//! the callback odd-sized chunks and check that node read heads stay in
//! lockstep with the context clock.

use std::sync::Arc;

use parking_lot::Mutex;

use wf_engine::context::AudioNode;
use wf_engine::nodes::BufferSourceOptions;
use wf_engine::{
    AudioContext, AudioContextOptions, AudioDriver, EngineResult, RenderCallback, SampleBuffer,
};

const SR: f32 = 44100.0;

/// Captures the render callback instead of opening a device, so the test
/// can invoke it with arbitrary frame counts.
struct MockDriver {
    slot: Arc<Mutex<Option<RenderCallback>>>,
    running: bool,
}

impl AudioDriver for MockDriver {
    fn open(
        &mut self,
        _sample_rate: f32,
        _channel_count: usize,
        callback: RenderCallback,
    ) -> EngineResult<()> {
        *self.slot.lock() = Some(callback);
        Ok(())
    }

    fn start(&mut self) -> EngineResult<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.running = false;
        Ok(())
    }

    fn suspend(&mut self) -> EngineResult<()> {
        self.stop()
    }

    fn resume(&mut self) -> EngineResult<()> {
        self.start()
    }

    fn cleanup(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

#[test]
fn non_quantum_callback_sizes_stay_contiguous() {
    let slot = Arc::new(Mutex::new(None));
    let ctx = AudioContext::new(
        AudioContextOptions {
            sample_rate: SR,
            channel_count: 1,
        },
        Box::new(MockDriver {
            slot: Arc::clone(&slot),
            running: false,
        }),
    )
    .unwrap();

    let ramp: Vec<f32> = (0..1024).map(|i| (i + 1) as f32 / 2048.0).collect();
    let mut buffer = SampleBuffer::new(1, 1024, SR);
    buffer.channel_mut(0).copy_from_slice(&ramp);

    let source = ctx
        .create_buffer_source(BufferSourceOptions {
            buffer: Some(Arc::new(buffer)),
            ..BufferSourceOptions::default()
        })
        .unwrap();
    source.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();
    ctx.resume().unwrap();

    let mut callback = slot.lock().take().unwrap();

    // 100-frame requests never align with the 128-frame quantum; the output
    // must still be one gapless ramp and the clock must match it exactly.
    let mut rendered = Vec::new();
    for _ in 0..10 {
        let mut chunk = vec![0.0f32; 100];
        callback(&mut chunk, 100);
        rendered.extend(chunk);
    }

    assert_eq!(ctx.current_sample_frame(), 1000);
    for (i, s) in rendered.iter().enumerate() {
        assert!(
            (s - ramp[i]).abs() < 1e-6,
            "frame {i}: {s} vs {} (read head drifted from the clock)",
            ramp[i]
        );
    }

    drop(callback);
}

#[test]
fn mixed_callback_sizes_keep_clock_and_output_aligned() {
    let slot = Arc::new(Mutex::new(None));
    let ctx = AudioContext::new(
        AudioContextOptions {
            sample_rate: SR,
            channel_count: 1,
        },
        Box::new(MockDriver {
            slot: Arc::clone(&slot),
            running: false,
        }),
    )
    .unwrap();

    let ramp: Vec<f32> = (0..2048).map(|i| (i + 1) as f32 / 4096.0).collect();
    let mut buffer = SampleBuffer::new(1, 2048, SR);
    buffer.channel_mut(0).copy_from_slice(&ramp);

    let source = ctx
        .create_buffer_source(BufferSourceOptions {
            buffer: Some(Arc::new(buffer)),
            ..BufferSourceOptions::default()
        })
        .unwrap();
    source.node().connect(ctx.destination()).unwrap();
    source.start(0.0).unwrap();
    ctx.resume().unwrap();

    let mut callback = slot.lock().take().unwrap();

    // A spread of sizes below, at and above the quantum.
    let mut rendered = Vec::new();
    for &frames in &[7usize, 128, 100, 256, 1, 333] {
        let mut chunk = vec![0.0f32; frames];
        callback(&mut chunk, frames);
        rendered.extend(chunk);
    }

    let total: usize = [7usize, 128, 100, 256, 1, 333].iter().sum();
    assert_eq!(ctx.current_sample_frame(), total as u64);
    for (i, s) in rendered.iter().enumerate() {
        assert!(
            (s - ramp[i]).abs() < 1e-6,
            "frame {i}: {s} vs {}",
            ramp[i]
        );
    }

    drop(callback);
}
