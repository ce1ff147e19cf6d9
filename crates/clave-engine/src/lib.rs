//! Clave engine - real-time audio for the practice tools
//!
//! The engine does four things: detects the pitch of a live microphone
//! signal, schedules sample-accurate rhythm (metronome and step
//! patterns), manages the single shared hardware context by lease
//! counting, and mixes music/mic/metronome buses while accumulating
//! session telemetry. Everything UI-shaped lives elsewhere; the engine
//! exposes plain data and consumes plain audio.

pub mod audio;
pub mod config;
pub mod graph;
pub mod pitch;
pub mod record;
pub mod sequence;
pub mod types;

pub use types::*;
