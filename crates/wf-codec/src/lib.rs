//! wf-codec: decoded PCM in, `SampleBuffer` out
//!
//! Wraps symphonia for container/codec handling (WAV, FLAC, MP3, AAC, OGG)
//! and adds a raw path for base64-encoded s16le PCM. Decoded audio is
//! resampled to the caller's target rate with the wf-dsp linear resampler.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer as SymphoniaSampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use base64::Engine as _;
use thiserror::Error;

use wf_core::SampleBuffer;
use wf_dsp::resample_linear;

/// Decoder error type.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("No audio track found")]
    NoAudioTrack,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid PCM payload: {0}")]
    InvalidPcm(String),
}

/// Result type alias
pub type CodecResult<T> = Result<T, CodecError>;

/// Decode an audio file, resampled to `target_sample_rate`.
pub fn decode_file(path: impl AsRef<Path>, target_sample_rate: f32) -> CodecResult<SampleBuffer> {
    let path = path.as_ref();
    let file = File::open(path)?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    decode_stream(mss, hint, target_sample_rate)
}

/// Decode an in-memory encoded payload, resampled to `target_sample_rate`.
pub fn decode_bytes(data: Vec<u8>, target_sample_rate: f32) -> CodecResult<SampleBuffer> {
    let cursor = std::io::Cursor::new(data);
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());
    decode_stream(mss, Hint::new(), target_sample_rate)
}

/// Decode base64-encoded interleaved s16le PCM.
pub fn decode_base64_pcm(
    payload: &str,
    sample_rate: f32,
    channel_count: usize,
    target_sample_rate: f32,
) -> CodecResult<SampleBuffer> {
    if channel_count == 0 {
        return Err(CodecError::InvalidPcm("channel count must be positive".into()));
    }

    let raw = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| CodecError::InvalidPcm(e.to_string()))?;
    if raw.len() % (2 * channel_count) != 0 {
        return Err(CodecError::InvalidPcm(format!(
            "payload length {} is not a whole number of s16 frames",
            raw.len()
        )));
    }

    let frames = raw.len() / (2 * channel_count);
    let mut buffer = SampleBuffer::new(channel_count, frames, sample_rate);

    for frame in 0..frames {
        for c in 0..channel_count {
            let offset = (frame * channel_count + c) * 2;
            let value = i16::from_le_bytes([raw[offset], raw[offset + 1]]);
            buffer.channel_mut(c)[frame] = value as f32 / 32768.0;
        }
    }

    Ok(resample_linear(&buffer, target_sample_rate))
}

fn decode_stream(
    mss: MediaSourceStream,
    hint: Hint,
    target_sample_rate: f32,
) -> CodecResult<SampleBuffer> {
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| CodecError::Probe(e.to_string()))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(CodecError::NoAudioTrack)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params.sample_rate.unwrap_or(44100) as f32;
    let channel_count = codec_params.channels.map(|c| c.count()).unwrap_or(2);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| CodecError::Decode(e.to_string()))?;

    let mut channels: Vec<Vec<f32>> = vec![Vec::new(); channel_count];
    let mut conversion_buf: Option<SymphoniaSampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(symphonia::core::errors::Error::ResetRequired) => break,
            Err(e) => return Err(CodecError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let duration = decoded.capacity() as u64;
                let needed = decoded.capacity() * channel_count;
                if conversion_buf
                    .as_ref()
                    .map(|b| b.capacity() < needed)
                    .unwrap_or(true)
                {
                    conversion_buf = Some(SymphoniaSampleBuffer::new(duration, spec));
                }
                if let Some(buf) = conversion_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    for frame in buf.samples().chunks_exact(channel_count) {
                        for (c, s) in frame.iter().enumerate() {
                            channels[c].push(*s);
                        }
                    }
                }
            }
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                // Corrupt packets are skipped, not fatal.
                log::warn!("skipping undecodable packet: {e}");
            }
            Err(e) => return Err(CodecError::Decode(e.to_string())),
        }
    }

    let buffer = SampleBuffer::from_channels(channels, sample_rate)
        .map_err(|e| CodecError::Decode(e.to_string()))?;
    Ok(resample_linear(&buffer, target_sample_rate))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
