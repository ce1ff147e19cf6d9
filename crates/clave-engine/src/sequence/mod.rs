//! Sample-accurate rhythm
//!
//! Three pieces: the lookahead scheduler that decides *when* events
//! happen, the pattern/timbre data that decides *what* plays, and the
//! render-side consumer that starts each sound on its exact frame.

mod click;
mod pattern;
mod scheduler;

pub use click::{ClickBank, ClickRenderer, ClickSound, Timbre, VoiceSound};
pub use pattern::{StepInstrument, StepPattern, NUM_STEPS, NUM_STEP_INSTRUMENTS};
pub use scheduler::{
    BeatNotice, BeatReceiver, ScheduledEvent, SchedulerCore, SequenceMode, Sequencer,
    SoundCommand, Subdivision, DEFAULT_BPM, LOOKAHEAD_SECS, MAX_BPM, MIN_BPM, TIMER_INTERVAL,
};
