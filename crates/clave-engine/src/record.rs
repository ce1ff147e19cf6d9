//! Take recording
//!
//! Collects microphone audio during a session and, on finish, encodes
//! it to an in-memory 16-bit WAV and hands the blob to an upload sink.
//! Where the blob goes (and under what name) is entirely the sink's
//! concern.

use std::io::Cursor;

use anyhow::Context;

use crate::types::Sample;

/// Receiver of a finished, encoded take
pub trait UploadSink {
    fn submit(&mut self, blob: Vec<u8>) -> anyhow::Result<()>;
}

impl<F> UploadSink for F
where
    F: FnMut(Vec<u8>) -> anyhow::Result<()>,
{
    fn submit(&mut self, blob: Vec<u8>) -> anyhow::Result<()> {
        self(blob)
    }
}

/// Accumulates one take of mono audio
pub struct TakeRecorder {
    samples: Vec<Sample>,
    sample_rate: u32,
}

impl TakeRecorder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
        }
    }

    /// Append captured audio
    pub fn extend(&mut self, samples: &[Sample]) {
        self.samples.extend_from_slice(samples);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Encode the take and hand it off
    pub fn finish(self, sink: &mut dyn UploadSink) -> anyhow::Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let duration = self.duration_secs();
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer =
                hound::WavWriter::new(&mut cursor, spec).context("creating WAV writer")?;
            for &sample in &self.samples {
                let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer.write_sample(value).context("encoding take")?;
            }
            writer.finalize().context("finalizing take")?;
        }

        let blob = cursor.into_inner();
        log::info!(
            "Take finished: {:.1}s, {} bytes encoded",
            duration,
            blob.len()
        );
        sink.submit(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_take_is_valid_wav() {
        let recorder = TakeRecorder::new(44_100);
        let mut blobs = Vec::new();
        let mut sink = |blob: Vec<u8>| -> anyhow::Result<()> {
            blobs.push(blob);
            Ok(())
        };
        recorder.finish(&mut sink).unwrap();
        assert_eq!(&blobs[0][..4], b"RIFF");
        assert_eq!(&blobs[0][8..12], b"WAVE");
    }

    #[test]
    fn test_take_roundtrips_through_hound() {
        let mut recorder = TakeRecorder::new(44_100);
        let tone: Vec<Sample> = (0..4410)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 220.0 / 44_100.0).sin() * 0.5)
            .collect();
        recorder.extend(&tone);
        assert!((recorder.duration_secs() - 0.1).abs() < 1e-6);

        let mut blobs = Vec::new();
        let mut sink = |blob: Vec<u8>| -> anyhow::Result<()> {
            blobs.push(blob);
            Ok(())
        };
        recorder.finish(&mut sink).unwrap();

        let reader = hound::WavReader::new(Cursor::new(blobs.remove(0))).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(reader.len(), 4410);
    }

    #[test]
    fn test_sink_error_propagates() {
        let recorder = TakeRecorder::new(44_100);
        let mut sink = |_blob: Vec<u8>| -> anyhow::Result<()> { anyhow::bail!("upload refused") };
        assert!(recorder.finish(&mut sink).is_err());
    }
}
