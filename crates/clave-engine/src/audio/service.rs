//! Lease-counted ownership of the hardware context
//!
//! Exactly one [`AudioContext`] is live per service. Tools request
//! access and hold the returned [`AccessLease`]; the first lease creates
//! or resumes the context, and dropping the last one suspends it so warm
//! state survives for a fast restart. Only an explicit [`AudioService::close`]
//! retires a context identity.
//!
//! The service is an ordinary value passed by reference to whoever needs
//! audio. There is deliberately no global instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::types::SAMPLE_RATE;

use super::context::AudioContext;
use super::error::AudioResult;

struct ServiceInner {
    context: Option<Arc<AudioContext>>,
    leases: HashMap<String, usize>,
    next_id: u64,
}

impl ServiceInner {
    fn ensure_context(&mut self, sample_rate: u32) -> Arc<AudioContext> {
        let needs_new = match &self.context {
            None => true,
            Some(ctx) => ctx.state() == super::context::ContextState::Closed,
        };
        if needs_new {
            let id = self.next_id;
            self.next_id += 1;
            log::info!("Creating audio context {}", id);
            self.context = Some(Arc::new(AudioContext::new(id, sample_rate)));
        }
        self.context.as_ref().unwrap().clone()
    }

    fn lease_count(&self) -> usize {
        self.leases.values().sum()
    }
}

/// Process-wide audio resource manager
///
/// Cheap to clone; clones share the same context and lease set.
#[derive(Clone)]
pub struct AudioService {
    inner: Arc<Mutex<ServiceInner>>,
    sample_rate: u32,
}

impl AudioService {
    pub fn new() -> Self {
        Self::with_sample_rate(SAMPLE_RATE)
    }

    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ServiceInner {
                context: None,
                leases: HashMap::new(),
                next_id: 0,
            })),
            sample_rate,
        }
    }

    /// Register `component` as a holder of the context and hand back a
    /// lease. Re-requesting under the same name nests; release stays
    /// symmetric because each lease releases exactly once on drop.
    ///
    /// Resume refusals that need a user gesture are tolerated here (the
    /// lease is still granted) and retried on the next request.
    pub fn request_access(&self, component: impl Into<String>) -> AudioResult<AccessLease> {
        let component = component.into();
        let mut inner = self.inner.lock().unwrap();
        let context = inner.ensure_context(self.sample_rate);
        *inner.leases.entry(component.clone()).or_insert(0) += 1;

        if let Err(e) = context.resume() {
            if e.is_retryable() {
                log::debug!("Audio resume deferred for {}: {}", component, e);
            } else {
                let count = inner.leases.get_mut(&component).unwrap();
                *count -= 1;
                if *count == 0 {
                    inner.leases.remove(&component);
                }
                return Err(e);
            }
        }

        log::debug!(
            "Component {} leased audio context {} ({} leases)",
            component,
            context.id(),
            inner.lease_count()
        );

        Ok(AccessLease {
            component,
            inner: self.inner.clone(),
            context,
        })
    }

    /// The current context, created if absent. No lease is registered;
    /// callers that need the context kept alive must hold one.
    pub fn handle(&self) -> Arc<AudioContext> {
        self.inner.lock().unwrap().ensure_context(self.sample_rate)
    }

    /// Total outstanding leases across all components
    pub fn lease_count(&self) -> usize {
        self.inner.lock().unwrap().lease_count()
    }

    /// Fully close the current context. Outstanding leases keep their
    /// (now dead) handle; the next request mints a fresh identity.
    pub fn close(&self) {
        let inner = self.inner.lock().unwrap();
        if let Some(ctx) = &inner.context {
            ctx.close();
        }
    }
}

impl Default for AudioService {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII grant of access to the shared context
///
/// Dropping the lease releases it; when the last lease goes the context
/// is suspended, never closed.
pub struct AccessLease {
    component: String,
    inner: Arc<Mutex<ServiceInner>>,
    context: Arc<AudioContext>,
}

impl AccessLease {
    /// The leased context
    pub fn context(&self) -> &Arc<AudioContext> {
        &self.context
    }

    /// Name the lease was requested under
    pub fn component(&self) -> &str {
        &self.component
    }
}

impl Drop for AccessLease {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(count) = inner.leases.get_mut(&self.component) {
            *count -= 1;
            if *count == 0 {
                inner.leases.remove(&self.component);
            }
        }
        if inner.lease_count() == 0 {
            self.context.suspend();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_lease_starts_last_release_suspends() {
        let service = AudioService::new();
        assert_eq!(service.lease_count(), 0);

        let lease = service.request_access("tuner").unwrap();
        assert!(lease.context().is_running());
        assert_eq!(service.lease_count(), 1);

        drop(lease);
        assert_eq!(service.lease_count(), 0);
        assert!(!service.handle().is_running());
    }

    #[test]
    fn test_context_identity_stable_across_suspend() {
        let service = AudioService::new();
        let first_id = {
            let lease = service.request_access("trainer").unwrap();
            lease.context().id()
        };
        // Suspended now; a new request must resume the same context
        let lease = service.request_access("trainer").unwrap();
        assert_eq!(lease.context().id(), first_id);
        assert!(lease.context().is_running());
    }

    #[test]
    fn test_close_mints_new_identity() {
        let service = AudioService::new();
        let old_id = service.request_access("game").unwrap().context().id();

        service.close();
        let lease = service.request_access("game").unwrap();
        assert_ne!(lease.context().id(), old_id);
        assert!(lease.context().is_running());
    }

    #[test]
    fn test_nested_leases_release_symmetrically() {
        let service = AudioService::new();
        let a = service.request_access("looper").unwrap();
        let b = service.request_access("looper").unwrap();
        assert_eq!(service.lease_count(), 2);

        drop(a);
        assert!(b.context().is_running());
        drop(b);
        assert!(!service.handle().is_running());
    }

    #[test]
    fn test_handle_does_not_lease() {
        let service = AudioService::new();
        let ctx = service.handle();
        assert_eq!(service.lease_count(), 0);
        assert!(!ctx.is_running());
    }
}
