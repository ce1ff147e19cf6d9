//! Microphone capture and the rolling analysis window
//!
//! The engine only requires that a mono window of recent input exists
//! and is refreshed at a bounded rate; where the samples come from is
//! the caller's business. [`MicCapture`] therefore runs in one of two
//! modes: headless (the caller feeds samples directly) or bound to the
//! default capture device, in which case the device callback pushes
//! samples over a lock-free ring and the control thread drains it.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;

use crate::types::{Sample, ANALYSIS_WINDOW};

use super::error::{AudioError, AudioResult};

/// Cutoff for the rumble high-pass applied to all captured audio
const HP_CUTOFF_HZ: f32 = 80.0;

/// Ring capacity between the capture callback and the control thread:
/// one second of audio absorbs any realistic polling gap.
const CAPTURE_RING_SECS: usize = 1;

/// Rolling window of the most recent high-passed input samples
pub struct InputWindow {
    samples: Vec<Sample>,
    write: usize,
    filled: usize,
    hp_state: f32,
    hp_coeff: f32,
}

impl InputWindow {
    pub fn new(sample_rate: u32) -> Self {
        let rc = 1.0 / (2.0 * std::f32::consts::PI * HP_CUTOFF_HZ);
        let dt = 1.0 / sample_rate as f32;
        Self {
            samples: vec![0.0; ANALYSIS_WINDOW],
            write: 0,
            filled: 0,
            hp_state: 0.0,
            hp_coeff: dt / (rc + dt),
        }
    }

    /// Append samples, high-passing them on the way in
    pub fn push(&mut self, samples: &[Sample]) {
        for &x in samples {
            self.hp_state += self.hp_coeff * (x - self.hp_state);
            let y = x - self.hp_state;

            self.samples[self.write] = y;
            self.write = (self.write + 1) % self.samples.len();
            self.filled = (self.filled + 1).min(self.samples.len());
        }
    }

    /// Whether a full window of input has been seen
    pub fn is_warm(&self) -> bool {
        self.filled == self.samples.len()
    }

    /// Copy the window into `out`, oldest sample first
    ///
    /// `out` must hold [`ANALYSIS_WINDOW`] samples. Unfilled leading
    /// positions are zero.
    pub fn snapshot(&self, out: &mut [Sample]) {
        assert_eq!(out.len(), self.samples.len());
        let len = self.samples.len();
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.samples[(self.write + i) % len];
        }
    }

    /// RMS amplitude of the current window contents
    pub fn rms(&self) -> f32 {
        crate::graph::meter::rms(&self.samples[..self.filled.max(1).min(self.samples.len())])
    }
}

/// Microphone input, headless or device-bound
pub struct MicCapture {
    window: InputWindow,
    ring: Option<rtrb::Consumer<Sample>>,
    stream: Option<cpal::Stream>,
    sample_rate: u32,
}

impl MicCapture {
    /// Capture with no device attached; samples arrive via [`MicCapture::feed`]
    pub fn headless(sample_rate: u32) -> Self {
        Self {
            window: InputWindow::new(sample_rate),
            ring: None,
            stream: None,
            sample_rate,
        }
    }

    /// Open the default capture device
    ///
    /// Prefers `preferred_rate`; otherwise takes the device's default
    /// rate, which callers can observe via [`MicCapture::sample_rate`].
    pub fn open_default(preferred_rate: u32) -> AudioResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioError::NoInputDevice)?;

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("Using audio capture device: {}", device_name);

        let default_config = device
            .default_input_config()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?;

        if default_config.sample_format() != SampleFormat::F32 {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?}",
                default_config.sample_format()
            )));
        }

        // Ask for the preferred rate when the device range allows it
        let sample_rate = device
            .supported_input_configs()
            .ok()
            .and_then(|mut configs| {
                configs.find(|c| {
                    c.sample_format() == SampleFormat::F32
                        && preferred_rate >= c.min_sample_rate().0
                        && preferred_rate <= c.max_sample_rate().0
                })
            })
            .map(|_| preferred_rate)
            .unwrap_or_else(|| {
                let fallback = default_config.sample_rate().0;
                if fallback != preferred_rate {
                    log::warn!(
                        "Capture device doesn't support {}Hz, using {}Hz",
                        preferred_rate,
                        fallback
                    );
                }
                fallback
            });

        let channels = default_config.channels() as usize;
        let stream_config = cpal::StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (mut producer, consumer) =
            rtrb::RingBuffer::<Sample>::new(sample_rate as usize * CAPTURE_RING_SECS);

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    // Mono contract: keep channel 0, drop the rest.
                    // A full ring means the control side stalled; dropping
                    // the newest samples here is RT-safe.
                    for frame in data.chunks(channels) {
                        if producer.push(frame[0]).is_err() {
                            break;
                        }
                    }
                },
                move |err| {
                    log::error!("Audio capture stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

        log::info!("Capture stream started at {}Hz", sample_rate);

        Ok(Self {
            window: InputWindow::new(sample_rate),
            ring: Some(consumer),
            stream: Some(stream),
            sample_rate,
        })
    }

    /// Rate the window is being filled at
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Feed samples directly (headless mode, or in addition to a device)
    pub fn feed(&mut self, samples: &[Sample]) {
        self.window.push(samples);
    }

    /// Pull everything the device has captured since the last drain into
    /// the window. `tap` sees each drained chunk, post-filter ordering
    /// aside, and is how take recording observes the input.
    pub fn drain<F: FnMut(&[Sample])>(&mut self, mut tap: F) -> usize {
        let Some(ring) = self.ring.as_mut() else {
            return 0;
        };

        let mut total = 0;
        let mut chunk = [0.0f32; 256];
        loop {
            let mut n = 0;
            while n < chunk.len() {
                match ring.pop() {
                    Ok(s) => {
                        chunk[n] = s;
                        n += 1;
                    }
                    Err(_) => break,
                }
            }
            if n == 0 {
                break;
            }
            self.window.push(&chunk[..n]);
            tap(&chunk[..n]);
            total += n;
        }
        total
    }

    /// The rolling analysis window
    pub fn window(&self) -> &InputWindow {
        &self.window
    }

    /// Stop and release the capture stream, keeping the window contents
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            log::info!("Capture stream stopped");
        }
        self.ring = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_fills_and_orders() {
        let mut win = InputWindow::new(44_100);
        assert!(!win.is_warm());

        // A window of silence followed by half a window of tone: the
        // snapshot must put the silence first and the tone last.
        win.push(&vec![0.0; ANALYSIS_WINDOW]);
        assert!(win.is_warm());
        let tone: Vec<Sample> = (0..ANALYSIS_WINDOW / 2)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 440.0 / 44_100.0).sin() * 0.5)
            .collect();
        win.push(&tone);

        let mut out = vec![0.0; ANALYSIS_WINDOW];
        win.snapshot(&mut out);
        let head = crate::graph::meter::rms(&out[..ANALYSIS_WINDOW / 2]);
        let tail = crate::graph::meter::rms(&out[ANALYSIS_WINDOW / 2..]);
        assert!(tail > head * 10.0);
    }

    #[test]
    fn test_high_pass_removes_dc() {
        let mut win = InputWindow::new(44_100);
        win.push(&vec![0.5; ANALYSIS_WINDOW * 4]);

        let mut out = vec![0.0; ANALYSIS_WINDOW];
        win.snapshot(&mut out);
        // A constant offset decays to nearly nothing
        assert!(out[ANALYSIS_WINDOW - 1].abs() < 0.01);
    }

    #[test]
    fn test_headless_feed() {
        let mut mic = MicCapture::headless(44_100);
        let tone: Vec<Sample> = (0..ANALYSIS_WINDOW)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 440.0 / 44_100.0).sin() * 0.5)
            .collect();
        mic.feed(&tone);
        assert!(mic.window().is_warm());
        assert!(mic.window().rms() > 0.1);
    }
}
