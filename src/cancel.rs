use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag for abandoning a synthesis request.
///
/// The search polls it at stage boundaries only; a stage that has started
/// always completes.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
