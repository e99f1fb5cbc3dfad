// Readiness coordination for the Whisper-AT API
//
// The service accepts connections before the model finishes loading into GPU
// memory. This handle tracks the LOADING -> READY transition so the health
// endpoint (and any launcher polling it) can tell the difference between
// "process is up" and "service can actually transcribe".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;

/// Shared readiness state, cloned into the health handler and the startup
/// task. Starts in LOADING and transitions to READY exactly once; it never
/// reverts (a model instance that dies later ends the process instead).
#[derive(Clone, Default)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    /// Create a new readiness handle in the LOADING state
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the service has finished loading its model instances
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Transition to READY. Returns true on the first call; repeated calls
    /// are no-ops and return false.
    pub fn mark_ready(&self) -> bool {
        let first = self
            .ready
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            info!("Service marked ready");
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_loading_state() {
        let readiness = Readiness::new();
        assert!(!readiness.is_ready());
    }

    #[test]
    fn mark_ready_transitions_once() {
        let readiness = Readiness::new();
        assert!(readiness.mark_ready());
        assert!(readiness.is_ready());

        // Second call is a no-op and the state never reverts
        assert!(!readiness.mark_ready());
        assert!(readiness.is_ready());
    }

    #[test]
    fn clones_share_state() {
        let readiness = Readiness::new();
        let health_view = readiness.clone();
        readiness.mark_ready();
        assert!(health_view.is_ready());
    }
}
