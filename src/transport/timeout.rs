//! Connect timeout guard.
//!
//! A [`TimeoutGuard`] is a one-shot deadline task. When it fires it tells the
//! connection's task, which decides whether the attempt is still short of
//! readiness and, if so, fails it with a timeout.
//!
//! The transport holds its live guard in a [`TimerSlot`]. The slot is the
//! only state touched from both the connection's task and arbitrary caller
//! threads (`disconnect`, drop), so every get/cancel/replace goes through its
//! mutex.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::trace;

use crate::identifiers::ConnectionId;

// ============================================================================
// TimeoutGuard
// ============================================================================

/// Armed deadline for one connection attempt.
///
/// Dropping the guard disarms it.
#[derive(Debug)]
pub(crate) struct TimeoutGuard {
    /// Attempt the guard belongs to.
    owner: ConnectionId,
    /// Sleeping task.
    task: JoinHandle<()>,
}

impl TimeoutGuard {
    /// Arms a guard that runs `on_fire` once `timeout` elapses.
    pub(crate) fn arm<F>(runtime: &Handle, owner: ConnectionId, timeout: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let task = runtime.spawn(async move {
            sleep(timeout).await;
            trace!(connection_id = %owner, "Timeout guard fired");
            on_fire();
        });

        Self { owner, task }
    }

    /// Returns the attempt the guard belongs to.
    #[inline]
    pub(crate) const fn owner(&self) -> ConnectionId {
        self.owner
    }

    /// Disarms the guard.
    #[inline]
    pub(crate) fn cancel(self) {
        // Drop does the work.
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// TimerSlot
// ============================================================================

/// Mutex-guarded cell holding at most one live [`TimeoutGuard`].
#[derive(Debug, Default)]
pub(crate) struct TimerSlot {
    current: Mutex<Option<TimeoutGuard>>,
}

impl TimerSlot {
    /// Creates an empty slot.
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Installs `guard`, disarming any previous one first.
    pub(crate) fn replace(&self, guard: TimeoutGuard) {
        let previous = self.current.lock().replace(guard);
        if let Some(previous) = previous {
            trace!(connection_id = %previous.owner(), "Replacing timeout guard");
            previous.cancel();
        }
    }

    /// Disarms the guard regardless of owner.
    pub(crate) fn cancel(&self) {
        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    /// Disarms the guard only if it belongs to `owner`.
    ///
    /// A superseded attempt must not disarm its successor's deadline.
    pub(crate) fn cancel_for(&self, owner: ConnectionId) -> bool {
        let taken = {
            let mut current = self.current.lock();
            match current.as_ref() {
                Some(guard) if guard.owner() == owner => current.take(),
                _ => None,
            }
        };

        match taken {
            Some(guard) => {
                guard.cancel();
                true
            }
            None => false,
        }
    }

    /// Returns `true` if a guard is installed.
    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.current.lock().is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================
