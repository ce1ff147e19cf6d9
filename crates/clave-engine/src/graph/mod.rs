//! Mixing and session telemetry

mod mixer;
pub mod meter;
mod session;

pub use meter::{ChannelLevels, MeterConfig};
pub use mixer::{GraphChannel, MixGraph};
pub use session::{Grade, NoteAttempt, NoteStat, ScoringConfig, SessionStats, SessionTracker};
