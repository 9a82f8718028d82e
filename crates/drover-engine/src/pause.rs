use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide pause switch. Pausing suppresses outbound behavior and
/// dispatch but never closes a session.
#[derive(Clone, Debug, Default)]
pub struct PauseGate(Arc<AtomicBool>);

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns `true` if the gate changed.
    pub fn pause(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    /// Returns `true` if the gate changed.
    pub fn resume(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}
