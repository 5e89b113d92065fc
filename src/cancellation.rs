#![allow(dead_code)]

//! The ambient cancellation/deadline token referenced throughout SPEC_FULL.md §5: any
//! suspension point (filesystem, C5) must check it and fail promptly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::SyncError;

#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns [`SyncError::Cancelled`] if cancellation has been requested. Call at every
    /// suspension point (between directory entries, between remote results).
    pub fn check(&self) -> Result<(), SyncError> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}
