//! CPU-GPU synchronization primitives.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

#[derive(Debug, Default)]
struct FenceState {
    signaled: Mutex<bool>,
    cond: Condvar,
}

/// CPU-GPU synchronization primitive.
///
/// A fence is returned for every submission and is signaled by the backend
/// once the submitted work has completed. Clones share the same state.
///
/// # Example
///
/// ```ignore
/// let fence = device.submit(graph)?;
///
/// // Later, before tearing down resources the frame used:
/// fence.wait();
/// assert_eq!(fence.status(), FenceStatus::Signaled);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Fence {
    state: Arc<FenceState>,
}

impl Fence {
    /// Create a new fence in the unsignaled state.
    pub fn new_unsignaled() -> Self {
        Self::default()
    }

    /// Create a new fence in the signaled state.
    pub fn new_signaled() -> Self {
        let fence = Self::default();
        fence.signal();
        fence
    }

    /// Check the current status of the fence.
    pub fn status(&self) -> FenceStatus {
        if *self.state.signaled.lock() {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        }
    }

    /// Check if the fence is signaled (non-blocking).
    pub fn is_signaled(&self) -> bool {
        self.status() == FenceStatus::Signaled
    }

    /// Block until the fence is signaled.
    pub fn wait(&self) {
        let mut signaled = self.state.signaled.lock();
        while !*signaled {
            self.state.cond.wait(&mut signaled);
        }
    }

    /// Wait for the fence with a timeout.
    ///
    /// Returns `true` if the fence was signaled, `false` if timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.state.signaled.lock();
        while !*signaled {
            if self
                .state
                .cond
                .wait_until(&mut signaled, deadline)
                .timed_out()
            {
                return *signaled;
            }
        }
        true
    }

    /// Signal the fence and wake every waiter.
    pub(crate) fn signal(&self) {
        *self.state.signaled.lock() = true;
        self.state.cond.notify_all();
    }
}
