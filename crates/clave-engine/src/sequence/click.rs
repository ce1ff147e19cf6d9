//! Click and percussion synthesis
//!
//! All sounds are short pre-rendered bursts generated at bank creation
//! time, so the render path only copies samples. Downbeats get a higher,
//! louder burst of the same timbre.

use serde::{Deserialize, Serialize};

use crate::types::Sample;

use super::pattern::{StepInstrument, NUM_STEP_INSTRUMENTS};

/// Metronome click character
///
/// Each variant maps to a fixed synthesis recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Timbre {
    /// Bright sine burst, the product default
    #[default]
    Classic,
    /// Darker, shorter knock
    Wood,
    /// Soft sustained beep
    Beep,
    /// Very short, very high tick
    Clave,
}

/// Parameters for one synthesized burst
#[derive(Debug, Clone, Copy)]
struct ToneSpec {
    freq: f32,
    duration: f32,
    gain: f32,
    decay: f32,
}

impl Timbre {
    fn tone(self, accent: bool) -> ToneSpec {
        match (self, accent) {
            (Timbre::Classic, true) => ToneSpec { freq: 1000.0, duration: 0.015, gain: 0.8, decay: 40.0 },
            (Timbre::Classic, false) => ToneSpec { freq: 800.0, duration: 0.012, gain: 0.5, decay: 40.0 },
            (Timbre::Wood, true) => ToneSpec { freq: 640.0, duration: 0.010, gain: 0.9, decay: 90.0 },
            (Timbre::Wood, false) => ToneSpec { freq: 480.0, duration: 0.008, gain: 0.6, decay: 90.0 },
            (Timbre::Beep, true) => ToneSpec { freq: 880.0, duration: 0.060, gain: 0.6, decay: 12.0 },
            (Timbre::Beep, false) => ToneSpec { freq: 660.0, duration: 0.050, gain: 0.4, decay: 12.0 },
            (Timbre::Clave, true) => ToneSpec { freq: 2500.0, duration: 0.006, gain: 0.9, decay: 150.0 },
            (Timbre::Clave, false) => ToneSpec { freq: 2100.0, duration: 0.005, gain: 0.6, decay: 150.0 },
        }
    }
}

/// A pre-rendered mono burst
#[derive(Debug, Clone)]
pub struct ClickSound {
    samples: Vec<Sample>,
}

impl ClickSound {
    /// Sine burst with exponential decay
    fn tone(spec: ToneSpec, sample_rate: u32) -> Self {
        let num_samples = (sample_rate as f32 * spec.duration) as usize;
        let mut samples = Vec::with_capacity(num_samples);
        for i in 0..num_samples {
            let t = i as f32 / sample_rate as f32;
            let envelope = (-t * spec.decay).exp();
            samples.push((t * spec.freq * std::f32::consts::TAU).sin() * envelope * spec.gain);
        }
        Self { samples }
    }

    /// Pitch-swept sine thump
    fn kick(sample_rate: u32) -> Self {
        let duration = 0.12;
        let num_samples = (sample_rate as f32 * duration) as usize;
        let mut samples = Vec::with_capacity(num_samples);
        let mut phase = 0.0f32;
        for i in 0..num_samples {
            let t = i as f32 / sample_rate as f32;
            let freq = 45.0 + 85.0 * (-t * 35.0).exp();
            phase += freq * std::f32::consts::TAU / sample_rate as f32;
            samples.push(phase.sin() * (-t * 18.0).exp() * 0.9);
        }
        Self { samples }
    }

    /// Noise burst over a 180 Hz body
    fn snare(sample_rate: u32) -> Self {
        let duration = 0.09;
        let num_samples = (sample_rate as f32 * duration) as usize;
        let mut noise = Noise::new(0x5eed);
        let mut samples = Vec::with_capacity(num_samples);
        for i in 0..num_samples {
            let t = i as f32 / sample_rate as f32;
            let body = (t * 180.0 * std::f32::consts::TAU).sin() * 0.4;
            let hiss = noise.next() * 0.6;
            samples.push((body + hiss) * (-t * 35.0).exp() * 0.7);
        }
        Self { samples }
    }

    /// Short bright noise tick; first-differencing the noise tilts its
    /// spectrum toward the top
    fn hat(sample_rate: u32) -> Self {
        let duration = 0.03;
        let num_samples = (sample_rate as f32 * duration) as usize;
        let mut noise = Noise::new(0xca7);
        let mut prev = 0.0f32;
        let mut samples = Vec::with_capacity(num_samples);
        for i in 0..num_samples {
            let t = i as f32 / sample_rate as f32;
            let n = noise.next();
            samples.push((n - prev) * (-t * 120.0).exp() * 0.5);
            prev = n;
        }
        Self { samples }
    }

    /// Noise with three re-triggered envelope bumps
    fn clap(sample_rate: u32) -> Self {
        let duration = 0.10;
        let num_samples = (sample_rate as f32 * duration) as usize;
        let mut noise = Noise::new(0xc1a9);
        let mut samples = Vec::with_capacity(num_samples);
        let retrigger = 0.012f32;
        for i in 0..num_samples {
            let t = i as f32 / sample_rate as f32;
            let local = if t < retrigger * 3.0 { t % retrigger } else { t };
            samples.push(noise.next() * (-local * 60.0).exp() * 0.6);
        }
        Self { samples }
    }

    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Deterministic white noise (xorshift32), good enough for percussion
struct Noise {
    state: u32,
}

impl Noise {
    fn new(seed: u32) -> Self {
        Self { state: seed.max(1) }
    }

    fn next(&mut self) -> f32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        (x as f32 / u32::MAX as f32) * 2.0 - 1.0
    }
}

/// Which pre-rendered sound an event plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceSound {
    Accent,
    Beat,
    Step(StepInstrument),
}

/// All sounds one graph needs, rendered once at the current sample rate
pub struct ClickBank {
    accent: ClickSound,
    beat: ClickSound,
    steps: [ClickSound; NUM_STEP_INSTRUMENTS],
}

impl ClickBank {
    pub fn new(timbre: Timbre, sample_rate: u32) -> Self {
        Self {
            accent: ClickSound::tone(timbre.tone(true), sample_rate),
            beat: ClickSound::tone(timbre.tone(false), sample_rate),
            steps: [
                ClickSound::kick(sample_rate),
                ClickSound::snare(sample_rate),
                ClickSound::hat(sample_rate),
                ClickSound::clap(sample_rate),
            ],
        }
    }

    pub fn sound(&self, voice: VoiceSound) -> &ClickSound {
        match voice {
            VoiceSound::Accent => &self.accent,
            VoiceSound::Beat => &self.beat,
            VoiceSound::Step(instrument) => &self.steps[instrument as usize],
        }
    }
}

/// A sound in flight on the render path
struct ActiveVoice {
    start_frame: u64,
    sound: VoiceSound,
    pos: usize,
}

/// Render-path consumer of scheduled sound commands
///
/// Pops timestamped commands off the sequencer ring and mixes each
/// pre-rendered sound into the output starting at its exact frame.
/// Commands whose time already passed (a late control loop) start at
/// the head of the current block instead of being dropped.
pub struct ClickRenderer {
    commands: rtrb::Consumer<super::scheduler::SoundCommand>,
    bank: ClickBank,
    active: Vec<ActiveVoice>,
}

impl ClickRenderer {
    pub fn new(commands: rtrb::Consumer<super::scheduler::SoundCommand>, bank: ClickBank) -> Self {
        Self {
            commands,
            bank,
            active: Vec::with_capacity(16),
        }
    }

    /// Mix due voices into `out`, whose first sample sits at `start_frame`
    pub fn render(&mut self, out: &mut [Sample], start_frame: u64, sample_rate: u32) {
        use super::scheduler::SoundCommand;

        while let Ok(command) = self.commands.pop() {
            let (at, sound) = match command {
                SoundCommand::Click { at, accent: true } => (at, VoiceSound::Accent),
                SoundCommand::Click { at, accent: false } => (at, VoiceSound::Beat),
                SoundCommand::Step { at, instrument } => (at, VoiceSound::Step(instrument)),
            };
            self.active.push(ActiveVoice {
                start_frame: (at.max(0.0) * sample_rate as f64).round() as u64,
                sound,
                pos: 0,
            });
        }

        let end_frame = start_frame + out.len() as u64;
        let bank = &self.bank;
        for voice in self.active.iter_mut() {
            if voice.start_frame >= end_frame {
                continue; // not due yet
            }
            let samples = bank.sound(voice.sound).samples();
            let mut i = voice.start_frame.saturating_sub(start_frame) as usize;
            while i < out.len() && voice.pos < samples.len() {
                out[i] += samples[voice.pos];
                voice.pos += 1;
                i += 1;
            }
        }
        let bank = &self.bank;
        self.active
            .retain(|v| v.pos < bank.sound(v.sound).len());
    }

    /// Whether any sound is still playing or pending
    pub fn is_quiet(&self) -> bool {
        self.active.is_empty()
    }
}
