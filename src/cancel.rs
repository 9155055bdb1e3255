//! Cooperative cancellation shared by the scheduler, worker pool, and
//! network scanner. A cheap `Arc<AtomicBool>` clone rather than
//! `tokio_util::sync::CancellationToken`, since every consumer here only
//! ever polls it, never awaits a cancellation future.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
