//! Hardware audio layer
//!
//! One shared rendering context per process, lease-counted by
//! [`AudioService`]. The context exposes a frame-derived clock as the
//! engine's time authority and a registry of render sources that tools
//! attach and detach freely.
//!
//! # Architecture
//!
//! - **Control thread**: owns the service and context, sends commands
//!   over lock-free rings
//! - **Device callbacks**: render registered sources / push captured
//!   samples, advance the clock
//! - **Atomics**: gains, levels and the clock are read without locks
//!
//! Everything runs headless when no device is bound: tests drive
//! [`AudioContext::render`] directly and the clock behaves identically.

mod clock;
mod context;
mod error;
mod input;
mod output;
mod service;

pub use clock::AudioClock;
pub use context::{AudioContext, ContextState, RenderSource, SourceId};
pub use error::{AudioError, AudioResult};
pub use input::{InputWindow, MicCapture};
pub use service::{AccessLease, AudioService};
