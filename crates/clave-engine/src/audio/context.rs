//! The shared hardware rendering context
//!
//! At most one context is live per [`AudioService`](super::AudioService).
//! Tools never create one directly; they hold leases and attach render
//! sources. The context owns the device stream (when bound), the source
//! registry, and the frame clock.
//!
//! The render entry point is usable without hardware: tests and offline
//! callers invoke [`AudioContext::render`] with their own buffers and get
//! identical clock semantics.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::StreamTrait;

use crate::types::Sample;

use super::clock::AudioClock;
use super::error::{AudioError, AudioResult};
use super::output;

/// A producer of audio mixed into the master output
///
/// Sources add into the block they are given; the block arrives
/// pre-silenced at the start of each render pass. `start_frame` is the
/// clock position of the first sample in `out`.
pub trait RenderSource: Send {
    fn render(&mut self, out: &mut [Sample], start_frame: u64, sample_rate: u32);
}

/// Identifier for an attached render source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

/// Lifecycle state of the context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Created or parked: device stream paused, clock frozen, warm state kept
    Suspended,
    /// Rendering; the clock advances
    Running,
    /// Fully torn down; a fresh context must be minted to continue
    Closed,
}

/// State shared with the device callback
///
/// The callback captures this (not the context itself) so the stream can
/// outlive borrows of the control side.
pub(crate) struct RenderState {
    clock: Arc<AudioClock>,
    running: AtomicBool,
    next_source_id: AtomicU64,
    sources: Mutex<Vec<(SourceId, Box<dyn RenderSource>)>>,
}

impl RenderState {
    fn new(sample_rate: u32) -> Self {
        Self {
            clock: Arc::new(AudioClock::new(sample_rate)),
            running: AtomicBool::new(false),
            next_source_id: AtomicU64::new(0),
            sources: Mutex::new(Vec::new()),
        }
    }

    /// Render one block: silence the buffer, mix all sources, advance the clock.
    ///
    /// While suspended the buffer stays silent and the clock does not move,
    /// mirroring a paused device stream.
    pub(crate) fn render(&self, out: &mut [Sample]) {
        out.fill(0.0);
        if !self.running.load(Ordering::Relaxed) {
            return;
        }

        let start_frame = self.clock.frames();
        let sample_rate = self.clock.sample_rate();
        {
            let mut sources = self.sources.lock().unwrap();
            for (_, source) in sources.iter_mut() {
                source.render(out, start_frame, sample_rate);
            }
        }
        self.clock.advance(out.len() as u64);
    }

    pub(crate) fn clock(&self) -> &Arc<AudioClock> {
        &self.clock
    }
}

/// Control-side state guarded by a single mutex
struct Control {
    state: ContextState,
    stream: Option<cpal::Stream>,
}

/// The single live hardware rendering context
///
/// Identity (`id`) is stable across suspend/resume cycles; only a full
/// `close` retires it. The contained device stream keeps the context on
/// its creating thread; cross-thread consumers hold the clock instead.
pub struct AudioContext {
    id: u64,
    render: Arc<RenderState>,
    control: Mutex<Control>,
}

impl AudioContext {
    pub(crate) fn new(id: u64, sample_rate: u32) -> Self {
        Self {
            id,
            render: Arc::new(RenderState::new(sample_rate)),
            control: Mutex::new(Control {
                state: ContextState::Suspended,
                stream: None,
            }),
        }
    }

    /// Stable identity of this context
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The hardware clock. Cheap to clone and safe to hand to other threads.
    pub fn clock(&self) -> Arc<AudioClock> {
        self.render.clock().clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ContextState {
        self.control.lock().unwrap().state
    }

    /// Whether the context is currently rendering
    pub fn is_running(&self) -> bool {
        self.render.running.load(Ordering::Relaxed)
    }

    /// Attach a render source to the master output
    pub fn attach_source(&self, source: Box<dyn RenderSource>) -> SourceId {
        let id = SourceId(self.render.next_source_id.fetch_add(1, Ordering::Relaxed));
        self.render.sources.lock().unwrap().push((id, source));
        id
    }

    /// Detach a render source. Returns false if it was already gone.
    ///
    /// Detaching is immediate at the graph level; sound the device has
    /// already pulled may still decay naturally.
    pub fn detach_source(&self, id: SourceId) -> bool {
        let mut sources = self.render.sources.lock().unwrap();
        let before = sources.len();
        sources.retain(|(sid, _)| *sid != id);
        sources.len() != before
    }

    /// Number of attached render sources
    pub fn source_count(&self) -> usize {
        self.render.sources.lock().unwrap().len()
    }

    /// Render one block into `out`
    ///
    /// The device callback goes through the same path; calling this
    /// directly is the headless/offline entry point.
    pub fn render(&self, out: &mut [Sample]) {
        self.render.render(out);
    }

    /// Bind the default output device and start pulling audio
    ///
    /// Idempotent once bound. Returns the negotiated sample rate, which
    /// is also published through the clock.
    pub fn bind_default_output(&self) -> AudioResult<u32> {
        let mut control = self.control.lock().unwrap();
        if control.state == ContextState::Closed {
            return Err(AudioError::ContextClosed);
        }
        if control.stream.is_some() {
            return Ok(self.render.clock().sample_rate());
        }

        let preferred = self.render.clock().sample_rate();
        let (stream, sample_rate) = output::build_default_output(self.render.clone(), preferred)?;
        self.render.clock().set_sample_rate(sample_rate);

        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;
        control.stream = Some(stream);
        control.state = ContextState::Running;
        self.render.running.store(true, Ordering::Relaxed);

        log::info!("Audio output bound at {}Hz (context {})", sample_rate, self.id);
        Ok(sample_rate)
    }

    /// Resume rendering, restarting the device stream if one is bound
    pub(crate) fn resume(&self) -> AudioResult<()> {
        let mut control = self.control.lock().unwrap();
        match control.state {
            ContextState::Closed => return Err(AudioError::ContextClosed),
            ContextState::Running => return Ok(()),
            ContextState::Suspended => {}
        }

        if let Some(stream) = &control.stream {
            stream
                .play()
                .map_err(|e| AudioError::ResumeBlocked(e.to_string()))?;
        }
        control.state = ContextState::Running;
        self.render.running.store(true, Ordering::Relaxed);
        log::debug!("Audio context {} resumed", self.id);
        Ok(())
    }

    /// Park the context, pausing the device stream but keeping warm state
    pub(crate) fn suspend(&self) {
        let mut control = self.control.lock().unwrap();
        if control.state != ContextState::Running {
            return;
        }

        if let Some(stream) = &control.stream {
            if let Err(e) = stream.pause() {
                // Some backends cannot pause; the running flag still
                // silences rendering and freezes the clock.
                log::debug!("Stream pause not supported: {}", e);
            }
        }
        control.state = ContextState::Suspended;
        self.render.running.store(false, Ordering::Relaxed);
        log::debug!("Audio context {} suspended", self.id);
    }

    /// Full teardown: drop the device stream and retire this identity
    pub(crate) fn close(&self) {
        let mut control = self.control.lock().unwrap();
        control.stream = None;
        control.state = ContextState::Closed;
        self.render.running.store(false, Ordering::Relaxed);
        log::info!("Audio context {} closed", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dc(Sample);

    impl RenderSource for Dc {
        fn render(&mut self, out: &mut [Sample], _start_frame: u64, _sample_rate: u32) {
            for s in out.iter_mut() {
                *s += self.0;
            }
        }
    }

    #[test]
    fn test_render_mixes_sources_and_advances_clock() {
        let ctx = AudioContext::new(0, 44_100);
        ctx.resume().unwrap();
        ctx.attach_source(Box::new(Dc(0.25)));
        ctx.attach_source(Box::new(Dc(0.25)));

        let mut out = vec![0.0; 512];
        ctx.render(&mut out);

        assert_eq!(out[0], 0.5);
        assert_eq!(ctx.clock().frames(), 512);
    }

    #[test]
    fn test_suspended_render_is_silent_and_frozen() {
        let ctx = AudioContext::new(0, 44_100);
        ctx.attach_source(Box::new(Dc(1.0)));

        let mut out = vec![0.7; 64];
        ctx.render(&mut out);

        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(ctx.clock().frames(), 0);
    }

    #[test]
    fn test_detach_source() {
        let ctx = AudioContext::new(0, 44_100);
        let id = ctx.attach_source(Box::new(Dc(1.0)));
        assert_eq!(ctx.source_count(), 1);

        assert!(ctx.detach_source(id));
        assert!(!ctx.detach_source(id));
        assert_eq!(ctx.source_count(), 0);
    }

    #[test]
    fn test_resume_after_close_is_an_error() {
        let ctx = AudioContext::new(3, 44_100);
        ctx.close();
        assert!(matches!(ctx.resume(), Err(AudioError::ContextClosed)));
        assert_eq!(ctx.state(), ContextState::Closed);
    }
}
