//! The per-tool mixing graph
//!
//! One [`MixGraph`] per tool instance: a music bus fed by up to five
//! stem channels, a metronome bus fed by the sequencer, and a
//! microphone channel used for analysis and metering only. Everything
//! sums through the graph's master gain into the shared context.
//!
//! The struct is split across threads the usual way: the control half
//! (this type) owns rings, the sequencer, the mic and the session; the
//! render half lives inside the context as an attached source and never
//! allocates or blocks beyond the source-table lock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::bail;

use crate::audio::{AccessLease, AudioContext, AudioResult, AudioService, MicCapture, RenderSource, SourceId};
use crate::config::EngineConfig;
use crate::pitch::{DetectorConfig, PitchDetector, PitchSample};
use crate::record::{TakeRecorder, UploadSink};
use crate::sequence::{
    BeatReceiver, ClickBank, ClickRenderer, SequenceMode, Sequencer, SoundCommand, StepPattern,
    Subdivision,
};
use crate::types::{MonoBuffer, Sample, Stem, ANALYSIS_WINDOW, MAX_BLOCK_FRAMES, NUM_STEMS};

use super::meter::{self, ChannelLevels, MeterConfig};
use super::session::{Grade, NoteAttempt, NoteStat, SessionStats, SessionTracker};

/// Command ring depth (control -> render)
const COMMAND_RING: usize = 64;

/// Sound command ring depth (sequencer -> render)
const SOUND_RING: usize = 256;

/// Gain-controlled channels of the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphChannel {
    Master,
    Music,
    Microphone,
    Metronome,
    Stem(Stem),
}

/// Commands applied by the render half at block boundaries
enum GraphCommand {
    LoadStem { stem: Stem, samples: Vec<Sample> },
    ClearStem { stem: Stem },
    Play,
    Stop,
    Rewind,
}

/// Channel gains shared between the control and render halves
///
/// f32 values stored as bits in relaxed atomics; the render path reads
/// them once per block.
struct GraphGains {
    master: AtomicU32,
    music: AtomicU32,
    mic: AtomicU32,
    metronome: AtomicU32,
    stems: [AtomicU32; NUM_STEMS],
}

fn gain_bits(value: f32) -> u32 {
    value.clamp(0.0, 1.0).to_bits()
}

impl GraphGains {
    fn new(master: f32, music: f32, mic: f32, metronome: f32) -> Self {
        Self {
            master: AtomicU32::new(gain_bits(master)),
            music: AtomicU32::new(gain_bits(music)),
            mic: AtomicU32::new(gain_bits(mic)),
            metronome: AtomicU32::new(gain_bits(metronome)),
            stems: std::array::from_fn(|_| AtomicU32::new(gain_bits(1.0))),
        }
    }

    fn slot(&self, channel: GraphChannel) -> &AtomicU32 {
        match channel {
            GraphChannel::Master => &self.master,
            GraphChannel::Music => &self.music,
            GraphChannel::Microphone => &self.mic,
            GraphChannel::Metronome => &self.metronome,
            GraphChannel::Stem(stem) => &self.stems[stem as usize],
        }
    }

    fn get(&self, channel: GraphChannel) -> f32 {
        f32::from_bits(self.slot(channel).load(Ordering::Relaxed))
    }

    fn set(&self, channel: GraphChannel, value: f32) {
        self.slot(channel).store(gain_bits(value), Ordering::Relaxed);
    }
}

/// Bus levels published by whichever side measures them
#[derive(Default)]
struct GraphLevels {
    music_rms: AtomicU32,
    mic_rms: AtomicU32,
}

impl GraphLevels {
    fn set_music(&self, rms: f32) {
        self.music_rms.store(rms.to_bits(), Ordering::Relaxed);
    }

    fn music(&self) -> f32 {
        f32::from_bits(self.music_rms.load(Ordering::Relaxed))
    }

    fn set_mic(&self, rms: f32) {
        self.mic_rms.store(rms.to_bits(), Ordering::Relaxed);
    }

    fn mic(&self) -> f32 {
        f32::from_bits(self.mic_rms.load(Ordering::Relaxed))
    }
}

/// A loaded stem and its play position
struct StemVoice {
    samples: Vec<Sample>,
    pos: usize,
}

/// Render half of the graph, attached to the context as a source
struct GraphRenderCore {
    commands: rtrb::Consumer<GraphCommand>,
    clicks: ClickRenderer,
    stems: [Option<StemVoice>; NUM_STEMS],
    playing: bool,
    gains: Arc<GraphGains>,
    levels: Arc<GraphLevels>,
    music_bus: MonoBuffer,
    graph_bus: MonoBuffer,
}

impl GraphRenderCore {
    fn new(
        commands: rtrb::Consumer<GraphCommand>,
        clicks: ClickRenderer,
        gains: Arc<GraphGains>,
        levels: Arc<GraphLevels>,
    ) -> Self {
        Self {
            commands,
            clicks,
            stems: std::array::from_fn(|_| None),
            playing: false,
            gains,
            levels,
            music_bus: MonoBuffer::silence(MAX_BLOCK_FRAMES),
            graph_bus: MonoBuffer::silence(MAX_BLOCK_FRAMES),
        }
    }

    fn process_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                GraphCommand::LoadStem { stem, samples } => {
                    self.stems[stem as usize] = Some(StemVoice { samples, pos: 0 });
                }
                GraphCommand::ClearStem { stem } => {
                    self.stems[stem as usize] = None;
                }
                GraphCommand::Play => self.playing = true,
                GraphCommand::Stop => self.playing = false,
                GraphCommand::Rewind => {
                    for voice in self.stems.iter_mut().flatten() {
                        voice.pos = 0;
                    }
                }
            }
        }
    }
}

impl RenderSource for GraphRenderCore {
    fn render(&mut self, out: &mut [Sample], start_frame: u64, sample_rate: u32) {
        self.process_commands();

        let n = out.len().min(MAX_BLOCK_FRAMES);
        self.music_bus.set_len_from_capacity(n);
        self.music_bus.fill_silence();

        if self.playing {
            let music = self.music_bus.as_mut_slice();
            for (idx, voice) in self.stems.iter_mut().enumerate() {
                let Some(voice) = voice else { continue };
                let gain = self.gains.get(GraphChannel::Stem(Stem::ALL[idx]));
                let remaining = voice.samples.len() - voice.pos;
                let take = remaining.min(n);
                for j in 0..take {
                    music[j] += voice.samples[voice.pos + j] * gain;
                }
                voice.pos += take;
            }
        }

        let music_gain = self.gains.get(GraphChannel::Music);
        self.music_bus.scale(music_gain);
        self.levels.set_music(self.music_bus.rms());

        self.graph_bus.set_len_from_capacity(n);
        self.graph_bus.fill_silence();
        self.clicks
            .render(self.graph_bus.as_mut_slice(), start_frame, sample_rate);
        self.graph_bus
            .scale(self.gains.get(GraphChannel::Metronome));

        let graph = self.graph_bus.as_mut_slice();
        let music = self.music_bus.as_slice();
        for j in 0..n {
            graph[j] += music[j];
        }

        // The master gain scales only this graph's contribution; other
        // sources share the output buffer.
        let master = self.gains.get(GraphChannel::Master);
        for j in 0..n {
            out[j] += graph[j] * master;
        }
    }
}

/// Control handle for one tool's audio
///
/// Construction leases the shared context and attaches the render half;
/// dropping (or the explicit [`MixGraph::dispose`]) detaches it, stops
/// the sequencer and the microphone, and releases the lease. Sound the
/// hardware already accepted decays naturally.
pub struct MixGraph {
    lease: AccessLease,
    context: Arc<AudioContext>,
    source_id: SourceId,
    commands: rtrb::Producer<GraphCommand>,
    gains: Arc<GraphGains>,
    levels: Arc<GraphLevels>,
    mic: MicCapture,
    detector: PitchDetector,
    detector_config: DetectorConfig,
    meter_config: MeterConfig,
    sequencer: Sequencer,
    subdivision: Subdivision,
    session: SessionTracker,
    recorder: Option<TakeRecorder>,
    analysis: Vec<Sample>,
}

impl MixGraph {
    /// Build a graph for `component`, leasing the shared context
    pub fn new(
        service: &AudioService,
        config: &EngineConfig,
        component: &str,
    ) -> AudioResult<Self> {
        let lease = service.request_access(component)?;
        let context = lease.context().clone();
        let clock = context.clock();
        let sample_rate = clock.sample_rate();

        let (commands, command_rx) = rtrb::RingBuffer::<GraphCommand>::new(COMMAND_RING);
        let (sound_tx, sound_rx) = rtrb::RingBuffer::<SoundCommand>::new(SOUND_RING);

        let gains = Arc::new(GraphGains::new(
            config.gains.master,
            config.gains.music,
            config.gains.microphone,
            config.gains.metronome,
        ));
        let levels = Arc::new(GraphLevels::default());

        let core = GraphRenderCore::new(
            command_rx,
            ClickRenderer::new(sound_rx, ClickBank::new(config.timbre, sample_rate)),
            gains.clone(),
            levels.clone(),
        );
        let source_id = context.attach_source(Box::new(core));

        let mut sequencer = Sequencer::new(clock.clone(), sound_tx);
        sequencer.set_bpm(config.bpm);

        log::info!("Mix graph attached for {} (context {})", component, context.id());

        Ok(Self {
            lease,
            context,
            source_id,
            commands,
            gains,
            levels,
            mic: MicCapture::headless(sample_rate),
            detector: PitchDetector::new(sample_rate, config.detector),
            detector_config: config.detector,
            meter_config: config.meter,
            sequencer,
            subdivision: config.subdivision,
            session: SessionTracker::new(config.scoring),
            recorder: None,
            analysis: vec![0.0; ANALYSIS_WINDOW],
        })
    }

    /// The leased context, for callers that render headless or need the clock
    pub fn context(&self) -> &Arc<AudioContext> {
        &self.context
    }

    /// Component this graph leases audio under
    pub fn component(&self) -> &str {
        self.lease.component()
    }

    // ── Gains ───────────────────────────────────────────────────────

    pub fn set_gain(&self, channel: GraphChannel, value: f32) {
        self.gains.set(channel, value);
    }

    pub fn gain(&self, channel: GraphChannel) -> f32 {
        self.gains.get(channel)
    }

    // ── Music bed ───────────────────────────────────────────────────

    /// Load (or replace) a stem's audio
    pub fn load_stem(&mut self, stem: Stem, samples: Vec<Sample>) {
        self.push_command(GraphCommand::LoadStem { stem, samples });
    }

    pub fn clear_stem(&mut self, stem: Stem) {
        self.push_command(GraphCommand::ClearStem { stem });
    }

    pub fn play_music(&mut self) {
        self.push_command(GraphCommand::Play);
    }

    pub fn stop_music(&mut self) {
        self.push_command(GraphCommand::Stop);
    }

    pub fn rewind_music(&mut self) {
        self.push_command(GraphCommand::Rewind);
    }

    fn push_command(&mut self, command: GraphCommand) {
        if self.commands.push(command).is_err() {
            log::warn!("Graph command ring full, command dropped");
        }
    }

    // ── Rhythm ──────────────────────────────────────────────────────

    /// Start the metronome at the configured subdivision
    pub fn start_metronome(&mut self) {
        self.sequencer
            .start(SequenceMode::Click, self.subdivision);
    }

    /// Start a 16-step pattern (sixteenth-note grid)
    pub fn start_pattern(&mut self, pattern: StepPattern) {
        self.sequencer
            .start(SequenceMode::Pattern(pattern), Subdivision::Sixteenth);
    }

    /// Swap the live pattern without restarting the clock
    pub fn update_pattern(&mut self, pattern: StepPattern) {
        self.sequencer.set_mode(SequenceMode::Pattern(pattern));
    }

    pub fn stop_sequence(&mut self) {
        self.sequencer.stop();
    }

    pub fn sequence_running(&self) -> bool {
        self.sequencer.is_running()
    }

    pub fn set_bpm(&self, bpm: f64) {
        self.sequencer.set_bpm(bpm);
    }

    pub fn bpm(&self) -> f64 {
        self.sequencer.bpm()
    }

    pub fn set_subdivision(&mut self, subdivision: Subdivision) {
        self.subdivision = subdivision;
    }

    /// Subscribe to beat notifications. Drop the receiver to unsubscribe.
    pub fn on_beat(&self) -> BeatReceiver {
        self.sequencer.subscribe()
    }

    // ── Microphone and pitch ────────────────────────────────────────

    /// Bind the default capture device to this graph's mic channel
    pub fn open_microphone(&mut self) -> AudioResult<()> {
        self.mic.stop();
        self.mic = MicCapture::open_default(self.context.clock().sample_rate())?;
        // The device may have negotiated its own rate
        self.detector = PitchDetector::new(self.mic.sample_rate(), self.detector_config);
        Ok(())
    }

    /// Feed microphone samples directly (no capture device needed)
    pub fn feed_microphone(&mut self, samples: &[Sample]) {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.extend(samples);
        }
        self.mic.feed(samples);
    }

    /// Drain pending capture, update the mic meter, and analyze pitch
    ///
    /// Call once per UI tick; each call is independent.
    pub fn pitch(&mut self) -> PitchSample {
        let recorder = &mut self.recorder;
        self.mic.drain(|chunk| {
            if let Some(rec) = recorder.as_mut() {
                rec.extend(chunk);
            }
        });

        let mic_gain = self.gains.get(GraphChannel::Microphone);
        self.levels.set_mic(self.mic.window().rms() * mic_gain);

        self.mic.window().snapshot(&mut self.analysis);
        self.detector
            .analyze(&self.analysis, self.context.clock().now_ms())
    }

    // ── Telemetry ───────────────────────────────────────────────────

    /// Current normalized bus levels
    pub fn levels(&self) -> ChannelLevels {
        ChannelLevels {
            music: meter::normalized(self.levels.music(), &self.meter_config),
            mic: meter::normalized(self.levels.mic(), &self.meter_config),
        }
    }

    /// Sample the resonance proxy and fold it into the session average
    pub fn sample_resonance(&mut self) -> f32 {
        let r = meter::resonance(self.levels.music(), self.levels.mic(), &self.meter_config);
        self.session.observe_resonance(r);
        r
    }

    /// Grade a note attempt and fold it into the session
    pub fn record_attempt(&mut self, attempt: &NoteAttempt) -> Grade {
        self.session.record_attempt(attempt)
    }

    /// Heatmap entry for a pitch class, if observed this session
    pub fn note_stat(&self, pitch_class: usize) -> Option<NoteStat> {
        self.session.note_stat(pitch_class)
    }

    /// All observed heatmap entries
    pub fn heatmap(&self) -> Vec<(usize, NoteStat)> {
        self.session.heatmap()
    }

    pub fn session_stats(&self) -> SessionStats {
        self.session.stats()
    }

    pub fn reset_session(&mut self) {
        self.session.reset();
    }

    // ── Recording ───────────────────────────────────────────────────

    /// Start collecting microphone audio into a take
    pub fn start_recording(&mut self) {
        self.recorder = Some(TakeRecorder::new(self.mic.sample_rate()));
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    /// Encode the take and hand the blob to the upload sink
    pub fn finish_recording(&mut self, sink: &mut dyn UploadSink) -> anyhow::Result<()> {
        // Pick up anything still sitting in the capture ring
        self.pitch();
        match self.recorder.take() {
            Some(recorder) => recorder.finish(sink),
            None => bail!("no take in progress"),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Tear the graph down: sequencer, microphone, render source, lease.
    ///
    /// Equivalent to dropping the graph; spelled out so call sites pair
    /// construction with teardown visibly.
    pub fn dispose(self) {
        drop(self);
    }
}

impl Drop for MixGraph {
    fn drop(&mut self) {
        self.sequencer.stop();
        self.mic.stop();
        self.context.detach_source(self.source_id);
        log::info!(
            "Mix graph for {} detached from context {}",
            self.lease.component(),
            self.context.id()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SAMPLE_RATE;

    fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<Sample> {
        (0..len)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * freq / SAMPLE_RATE as f32).sin() * amplitude)
            .collect()
    }

    fn graph(service: &AudioService) -> MixGraph {
        MixGraph::new(service, &EngineConfig::default(), "test-tool").unwrap()
    }

    #[test]
    fn test_idle_graph_renders_silence() {
        let service = AudioService::new();
        let g = graph(&service);

        let mut out = vec![0.0; 512];
        g.context().render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_stem_playback_reaches_master() {
        let service = AudioService::new();
        let mut g = graph(&service);

        g.load_stem(Stem::Backing, sine(220.0, 0.5, 4096));
        g.play_music();

        let mut out = vec![0.0; 1024];
        g.context().render(&mut out);
        assert!(out.iter().any(|&s| s.abs() > 0.01));
        assert!(g.levels().music > 0.0);

        g.stop_music();
        g.context().render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_master_gain_scales_contribution() {
        let service = AudioService::new();
        let mut g = graph(&service);

        g.load_stem(Stem::Drums, sine(220.0, 0.5, 4096));
        g.play_music();
        g.set_gain(GraphChannel::Master, 0.0);

        let mut out = vec![0.0; 1024];
        g.context().render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        // The music bus itself still metered
        assert!(g.levels().music > 0.0);
    }

    #[test]
    fn test_metronome_click_is_audible() {
        let service = AudioService::new();
        let mut g = graph(&service);

        g.start_metronome();
        // Let the control loop enqueue the t=0 click
        std::thread::sleep(std::time::Duration::from_millis(150));

        let mut out = vec![0.0; 2048];
        g.context().render(&mut out);
        assert!(out.iter().any(|&s| s.abs() > 0.01));
        g.stop_sequence();
    }

    #[test]
    fn test_pitch_through_fed_microphone() {
        let service = AudioService::new();
        let mut g = graph(&service);

        g.feed_microphone(&sine(440.0, 0.5, ANALYSIS_WINDOW * 2));
        let sample = g.pitch();
        assert!(sample.detected);
        assert_eq!(sample.note_index, 69);
        assert!(g.levels().mic > 0.0);
    }

    #[test]
    fn test_resonance_of_silent_buses() {
        let service = AudioService::new();
        let mut g = graph(&service);
        assert_eq!(g.sample_resonance(), 1.0);
        assert!(g.session_stats().resonance > 0.99);
    }

    #[test]
    fn test_dispose_releases_everything() {
        let service = AudioService::new();
        let g = graph(&service);
        let context = g.context().clone();
        assert_eq!(context.source_count(), 1);
        assert_eq!(service.lease_count(), 1);

        g.dispose();
        assert_eq!(context.source_count(), 0);
        assert_eq!(service.lease_count(), 0);
        assert!(!context.is_running());

        // A fresh graph builds cleanly against the same service
        let g2 = graph(&service);
        assert_eq!(g2.context().source_count(), 1);
        assert!(g2.context().is_running());
    }

    #[test]
    fn test_recording_hands_blob_to_sink() {
        let service = AudioService::new();
        let mut g = graph(&service);

        g.start_recording();
        assert!(g.is_recording());
        g.feed_microphone(&sine(330.0, 0.4, SAMPLE_RATE as usize / 10));

        let mut blobs: Vec<Vec<u8>> = Vec::new();
        let mut sink = |blob: Vec<u8>| -> anyhow::Result<()> {
            blobs.push(blob);
            Ok(())
        };
        g.finish_recording(&mut sink).unwrap();

        assert!(!g.is_recording());
        assert_eq!(blobs.len(), 1);
        assert_eq!(&blobs[0][..4], b"RIFF");
        assert!(blobs[0].len() > 44);
    }
}
