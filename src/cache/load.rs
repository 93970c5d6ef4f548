//! Single-flight load coordination
//!
//! Each cache dimension (stats, children) is guarded by a [`LoadGate`]: the
//! first caller to claim a not-loaded gate becomes the loader and performs
//! exactly one remote call; everyone else waits on a notification until the
//! load completes. Waiting is bounded: a waiter that outlives the timeout
//! resets the gate with a warning and takes the load over instead of hanging
//! forever. Abandoning callers leave the in-flight load to finish for the
//! benefit of the remaining waiters.

use crate::types::LoadState;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout, Instant};
use tracing::warn;

/// Outcome of claiming a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller is the loader and must call [`LoadGate::complete`] or
    /// [`LoadGate::abort`] when done.
    Load,
    /// The state is already loaded; proceed with the cached data.
    Ready,
}

/// One load-once gate.
pub struct LoadGate {
    state: Mutex<LoadState>,
    notify: Notify,
}

/// Re-check interval while waiting on another loader. Guards against a
/// completion slipping in between the state check and the wait registration.
const WAIT_SLICE: Duration = Duration::from_millis(250);

impl Default for LoadGate {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadGate {
    pub fn new() -> Self {
        LoadGate {
            state: Mutex::new(LoadState::NotLoaded),
            notify: Notify::new(),
        }
    }

    /// A gate that starts out loaded (locally-created nodes never load).
    pub fn loaded() -> Self {
        LoadGate {
            state: Mutex::new(LoadState::Loaded),
            notify: Notify::new(),
        }
    }

    pub fn state(&self) -> LoadState {
        *self.state.lock()
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == LoadState::Loaded
    }

    /// Claim the gate, waiting up to `wait` for another in-flight loader.
    pub async fn claim(&self, wait: Duration) -> Claim {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                match *state {
                    LoadState::Loaded => return Claim::Ready,
                    LoadState::NotLoaded => {
                        *state = LoadState::Loading;
                        return Claim::Load;
                    }
                    LoadState::Loading => {}
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let mut state = self.state.lock();
                return match *state {
                    LoadState::Loaded => Claim::Ready,
                    _ => {
                        warn!("timed out waiting for an in-flight load; taking the load over");
                        *state = LoadState::Loading;
                        Claim::Load
                    }
                };
            }
            let slice = WAIT_SLICE.min(deadline - now);
            let _ = timeout(slice, notified).await;
        }
    }

    /// Mark the load finished and wake all waiters.
    pub fn complete(&self) {
        *self.state.lock() = LoadState::Loaded;
        self.notify.notify_waiters();
    }

    /// Roll the gate back after a failed load so a future read can retry.
    pub fn abort(&self) {
        *self.state.lock() = LoadState::NotLoaded;
        self.notify.notify_waiters();
    }

    /// Invalidate a loaded gate (reload requests, part mutations).
    pub fn reset(&self) {
        *self.state.lock() = LoadState::NotLoaded;
        self.notify.notify_waiters();
    }
}
