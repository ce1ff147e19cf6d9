//! Lookahead event scheduling
//!
//! Host timers are coarse and jittery, so rhythm is never timed by
//! them. A ~25 ms control loop only *enqueues* events up to 100 ms
//! ahead, each stamped with its exact hardware time; the render path
//! starts every sound on the stamped frame. The control loop being late
//! delays enqueuing, never execution, as long as the stall stays inside
//! the lookahead window.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::audio::AudioClock;

use super::pattern::{StepInstrument, StepPattern, NUM_STEPS};

/// Tempo bounds exposed to the product
pub const MIN_BPM: f64 = 40.0;
pub const MAX_BPM: f64 = 240.0;
pub const DEFAULT_BPM: f64 = 120.0;

/// How far ahead of the hardware clock events are enqueued
pub const LOOKAHEAD_SECS: f64 = 0.100;

/// Period of the control loop that refills the lookahead window
pub const TIMER_INTERVAL: Duration = Duration::from_millis(25);

/// Capacity of a beat subscription channel
const BEAT_CHANNEL_CAPACITY: usize = 32;

/// Events per beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Subdivision {
    #[default]
    Quarter,
    Eighth,
    Triplet,
    Sixteenth,
}

impl Subdivision {
    pub fn events_per_beat(self) -> u32 {
        match self {
            Subdivision::Quarter => 1,
            Subdivision::Eighth => 2,
            Subdivision::Triplet => 3,
            Subdivision::Sixteenth => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Subdivision::Quarter => "1/4",
            Subdivision::Eighth => "1/8",
            Subdivision::Triplet => "1/12",
            Subdivision::Sixteenth => "1/16",
        }
    }
}

/// One scheduled rhythmic event. Immutable once emitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledEvent {
    /// Monotonic event counter since the last start
    pub beat_index: u64,
    /// Exact hardware time the event plays at, in seconds
    pub hardware_time: f64,
    /// Whether this event opens a bar
    pub accent: bool,
}

/// The pure lookahead state machine
///
/// Owns no clock and spawns nothing; callers hand it `now` and a sink.
/// This is the piece the timing properties are tested against.
pub struct SchedulerCore {
    bpm: f64,
    subdivision: Subdivision,
    beats_per_bar: u32,
    lookahead: f64,
    next_event_time: f64,
    beat_counter: u64,
}

impl SchedulerCore {
    pub fn new(bpm: f64, subdivision: Subdivision, beats_per_bar: u32) -> Self {
        Self {
            bpm: bpm.clamp(MIN_BPM, MAX_BPM),
            subdivision,
            beats_per_bar: beats_per_bar.max(1),
            lookahead: LOOKAHEAD_SECS,
            next_event_time: 0.0,
            beat_counter: 0,
        }
    }

    /// Anchor the first event at `now` and restart the counter
    pub fn prime(&mut self, now: f64) {
        self.next_event_time = now;
        self.beat_counter = 0;
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn beat_counter(&self) -> u64 {
        self.beat_counter
    }

    fn seconds_per_event(&self) -> f64 {
        60.0 / self.bpm / self.subdivision.events_per_beat() as f64
    }

    fn events_per_bar(&self) -> u64 {
        self.subdivision.events_per_beat() as u64 * self.beats_per_bar as u64
    }

    /// Emit every event due inside the lookahead window
    ///
    /// Emitted times are strictly increasing. If the host stalled past
    /// the window the backlog is emitted in order and plays late; that
    /// degradation is accepted until the next explicit start.
    pub fn pass<F: FnMut(ScheduledEvent)>(&mut self, now: f64, mut emit: F) -> usize {
        if self.next_event_time + self.lookahead < now {
            log::debug!(
                "Lookahead loop behind by {:.0} ms",
                (now - self.next_event_time) * 1000.0
            );
        }

        let horizon = now + self.lookahead;
        let mut emitted = 0;
        while self.next_event_time < horizon {
            emit(ScheduledEvent {
                beat_index: self.beat_counter,
                hardware_time: self.next_event_time,
                accent: self.beat_counter % self.events_per_bar() == 0,
            });
            self.next_event_time += self.seconds_per_event();
            self.beat_counter += 1;
            emitted += 1;
        }
        emitted
    }
}

/// Synthesis instruction handed to the render path
#[derive(Debug, Clone, Copy)]
pub enum SoundCommand {
    Click { at: f64, accent: bool },
    Step { at: f64, instrument: StepInstrument },
}

/// What the sequencer plays
#[derive(Debug, Clone)]
pub enum SequenceMode {
    /// Flat metronome click
    Click,
    /// One-bar step pattern, indexed by `beat_index % 16`
    Pattern(StepPattern),
}

/// Beat notification delivered to subscribers
///
/// Fires once per scheduled event, close to (but not at) the hardware
/// time; consumers must not assume sample accuracy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatNotice {
    pub beat_in_bar: u32,
    pub hardware_time: f64,
}

/// Subscription to beat notifications. Drop to unsubscribe.
pub struct BeatReceiver {
    rx: Receiver<BeatNotice>,
}

impl BeatReceiver {
    /// Next pending notice, if any
    pub fn poll(&self) -> Option<BeatNotice> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next notice
    pub fn recv_timeout(&self, timeout: Duration) -> Option<BeatNotice> {
        self.rx.recv_timeout(timeout).ok()
    }
}

struct SequencerShared {
    running: AtomicBool,
    bpm_bits: AtomicU64,
    mode: Mutex<SequenceMode>,
    subscribers: Mutex<Vec<Sender<BeatNotice>>>,
}

impl SequencerShared {
    fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm_bits.load(Ordering::Relaxed))
    }
}

/// Drives a [`SchedulerCore`] from a control-loop thread
///
/// Emitted events become [`SoundCommand`]s on a lock-free ring whose
/// consumer lives in the render path, plus notices on every beat
/// subscription. Stopping halts enqueuing; commands already in the ring
/// play out rather than being cut off.
pub struct Sequencer {
    shared: Arc<SequencerShared>,
    clock: Arc<AudioClock>,
    subdivision: Subdivision,
    beats_per_bar: u32,
    producer: Option<rtrb::Producer<SoundCommand>>,
    worker: Option<JoinHandle<rtrb::Producer<SoundCommand>>>,
}

impl Sequencer {
    pub fn new(clock: Arc<AudioClock>, producer: rtrb::Producer<SoundCommand>) -> Self {
        Self {
            shared: Arc::new(SequencerShared {
                running: AtomicBool::new(false),
                bpm_bits: AtomicU64::new(DEFAULT_BPM.to_bits()),
                mode: Mutex::new(SequenceMode::Click),
                subscribers: Mutex::new(Vec::new()),
            }),
            clock,
            subdivision: Subdivision::Quarter,
            beats_per_bar: 4,
            producer: Some(producer),
            worker: None,
        }
    }

    /// Set tempo, clamped to the product range. Safe mid-run; the next
    /// scheduled event uses the new spacing.
    pub fn set_bpm(&self, bpm: f64) {
        self.shared
            .bpm_bits
            .store(bpm.clamp(MIN_BPM, MAX_BPM).to_bits(), Ordering::Relaxed);
    }

    pub fn bpm(&self) -> f64 {
        self.shared.bpm()
    }

    /// Swap what is being played without stopping the clock
    pub fn set_mode(&self, mode: SequenceMode) {
        *self.shared.mode.lock().unwrap() = mode;
    }

    /// Subdivision of the current or most recent run
    pub fn subdivision(&self) -> Subdivision {
        self.subdivision
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }

    pub fn set_beats_per_bar(&mut self, beats: u32) {
        self.beats_per_bar = beats.clamp(1, 16);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    /// Subscribe to beat notifications
    pub fn subscribe(&self) -> BeatReceiver {
        let (tx, rx) = channel::bounded(BEAT_CHANNEL_CAPACITY);
        self.shared.subscribers.lock().unwrap().push(tx);
        BeatReceiver { rx }
    }

    /// Start the control loop
    ///
    /// No-op while already running. Re-starting after a stop re-anchors
    /// the event timeline at the current hardware time.
    pub fn start(&mut self, mode: SequenceMode, subdivision: Subdivision) {
        if self.is_running() {
            return;
        }
        let Some(mut producer) = self.producer.take() else {
            return;
        };
        self.subdivision = subdivision;
        *self.shared.mode.lock().unwrap() = mode;
        self.shared.running.store(true, Ordering::Relaxed);

        let shared = self.shared.clone();
        let clock = self.clock.clone();
        let beats_per_bar = self.beats_per_bar;

        let worker = thread::Builder::new()
            .name("lookahead-clock".to_string())
            .spawn(move || {
                let mut core = SchedulerCore::new(shared.bpm(), subdivision, beats_per_bar);
                core.prime(clock.now());
                log::debug!("Lookahead clock started at {:.1} BPM", core.bpm());

                let events_per_beat = subdivision.events_per_beat() as u64;
                while shared.running.load(Ordering::Relaxed) {
                    core.set_bpm(shared.bpm());
                    let mode = shared.mode.lock().unwrap().clone();

                    core.pass(clock.now(), |event| {
                        match &mode {
                            SequenceMode::Click => push_command(
                                &mut producer,
                                SoundCommand::Click {
                                    at: event.hardware_time,
                                    accent: event.accent,
                                },
                            ),
                            SequenceMode::Pattern(pattern) => {
                                let step = (event.beat_index % NUM_STEPS as u64) as usize;
                                for instrument in StepInstrument::ALL {
                                    if pattern.is_set(instrument, step) {
                                        push_command(
                                            &mut producer,
                                            SoundCommand::Step {
                                                at: event.hardware_time,
                                                instrument,
                                            },
                                        );
                                    }
                                }
                            }
                        }

                        let notice = BeatNotice {
                            beat_in_bar: ((event.beat_index / events_per_beat)
                                % beats_per_bar as u64) as u32,
                            hardware_time: event.hardware_time,
                        };
                        let mut subscribers = shared.subscribers.lock().unwrap();
                        subscribers.retain(|tx| match tx.try_send(notice) {
                            Ok(()) => true,
                            // Slow consumer: this notice is lost, the
                            // subscription stays
                            Err(TrySendError::Full(_)) => true,
                            Err(TrySendError::Disconnected(_)) => false,
                        });
                    });

                    thread::sleep(TIMER_INTERVAL);
                }

                log::debug!("Lookahead clock stopped");
                producer
            })
            .expect("Failed to spawn lookahead clock thread");

        self.worker = Some(worker);
    }

    /// Stop enqueuing and join the control loop
    ///
    /// Sounds already handed to the render path finish on their own.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if let Ok(producer) = worker.join() {
                self.producer = Some(producer);
            }
        }
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn push_command(producer: &mut rtrb::Producer<SoundCommand>, command: SoundCommand) {
    if producer.push(command).is_err() {
        // Ring full means the render path stalled for several windows;
        // dropping the command is the quiet failure mode.
        log::debug!("Sound command ring full, dropping event");
    }
}
