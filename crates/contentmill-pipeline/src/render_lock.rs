//! Process-wide limiter for heavy render operations.

use contentmill_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// At most one render holds the lock at a time. Waiters are not queued
/// fairly; whoever the semaphore wakes first wins.
#[derive(Clone)]
pub struct RenderLock {
    slots: Arc<Semaphore>,
}

impl Default for RenderLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderLock {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait up to `timeout` for the lock.
    ///
    /// Fails with [`Error::RenderContention`] when the timeout elapses, never
    /// with a collaborator error, so "too busy" stays distinguishable from
    /// "render broke". A render that is still running when a waiter gives up
    /// keeps the lock until it finishes.
    pub async fn acquire(&self, timeout: Duration) -> Result<RenderPermit> {
        match tokio::time::timeout(timeout, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => {
                debug!("render lock acquired");
                Ok(RenderPermit {
                    permit: Some(permit),
                })
            }
            Ok(Err(_closed)) => Err(Error::Internal("render lock closed".to_string())),
            Err(_elapsed) => {
                warn!(waited_secs = timeout.as_secs_f64(), "render lock contention");
                Err(Error::RenderContention { waited: timeout })
            }
        }
    }

    /// Number of renders currently holding the lock (0 or 1).
    pub fn in_flight(&self) -> usize {
        1 - self.slots.available_permits()
    }
}

/// Proof of holding the render lock. Dropping it releases the lock, so every
/// exit path of a render gives the slot back.
#[derive(Debug)]
pub struct RenderPermit {
    permit: Option<OwnedSemaphorePermit>,
}

impl RenderPermit {
    /// Release early. Calling it more than once, or dropping afterwards, is
    /// a no-op.
    pub fn release(&mut self) {
        if self.permit.take().is_some() {
            debug!("render lock released");
        }
    }

    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }
}

impl Drop for RenderPermit {
    fn drop(&mut self) {
        self.release();
    }
}
