//! Output device binding
//!
//! Negotiates a stream config on the default output device and builds
//! the render callback. The callback renders mono through the shared
//! render state and duplicates it across however many channels the
//! device wants.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use crate::types::MAX_BLOCK_FRAMES;

use super::context::RenderState;
use super::error::{AudioError, AudioResult};

/// Build and return an output stream on the default device
///
/// Prefers f32 at `preferred_rate`; falls back to whatever the device
/// supports, with a warning. Returns the stream (not yet playing) and
/// the negotiated sample rate.
pub(crate) fn build_default_output(
    render: Arc<RenderState>,
    preferred_rate: u32,
) -> AudioResult<(Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio output device: {}", device_name);

    let supported_configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();

    if supported_configs.is_empty() {
        return Err(AudioError::ConfigError(
            "No supported output configurations".to_string(),
        ));
    }

    // Prefer f32 and the requested rate; degrade gracefully from there
    let best_config = supported_configs
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .find(|c| {
            preferred_rate >= c.min_sample_rate().0 && preferred_rate <= c.max_sample_rate().0
        })
        .or_else(|| {
            supported_configs
                .iter()
                .find(|c| c.sample_format() == SampleFormat::F32)
        })
        .or_else(|| supported_configs.first())
        .ok_or_else(|| {
            AudioError::ConfigError("No suitable output configuration found".to_string())
        })?;

    if best_config.sample_format() != SampleFormat::F32 {
        return Err(AudioError::UnsupportedFormat(format!(
            "{:?}",
            best_config.sample_format()
        )));
    }

    let sample_rate = if preferred_rate >= best_config.min_sample_rate().0
        && preferred_rate <= best_config.max_sample_rate().0
    {
        cpal::SampleRate(preferred_rate)
    } else {
        let fallback = best_config.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            preferred_rate,
            fallback.0
        );
        fallback
    };

    let supported = best_config.clone().with_sample_rate(sample_rate);
    let stream_config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    log::info!(
        "Output config: {} channels, {}Hz",
        stream_config.channels,
        stream_config.sample_rate.0
    );

    let stream = build_output_stream(&device, &stream_config, render)?;
    Ok((stream, stream_config.sample_rate.0))
}

fn build_output_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    render: Arc<RenderState>,
) -> AudioResult<Stream> {
    let channels = config.channels as usize;
    let mut mono = vec![0.0f32; MAX_BLOCK_FRAMES];

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let n_frames = (data.len() / channels).min(MAX_BLOCK_FRAMES);

                render.render(&mut mono[..n_frames]);

                for (i, frame) in data.chunks_mut(channels).enumerate() {
                    let sample = if i < n_frames { mono[i] } else { 0.0 };
                    for ch in frame.iter_mut() {
                        *ch = sample;
                    }
                }
            },
            move |err| {
                log::error!("Audio output stream error: {}", err);
            },
            None, // No timeout (blocking)
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    Ok(stream)
}
