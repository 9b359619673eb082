//! Endpoint lifecycle state with in-flight invocation tracking.
//!
//! State reads are lock-free through `ArcSwap`. Transitions are serialized by
//! an async mutex so that a `start` racing a `stop` observes a settled state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{Mutex, MutexGuard};

/// Endpoint state machine: Stopped -> Starting -> Running -> Stopping -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    /// The only state in which messages are processed.
    Running,
    /// No new messages are accepted; in-flight invocations may still finish.
    Stopping,
}

impl LifecycleState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct LifecycleController {
    state: ArcSwap<LifecycleState>,
    in_flight: Arc<AtomicU64>,
    transitions: Mutex<()>,
}

impl LifecycleController {
    /// Creates a controller in the `Stopped` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(LifecycleState::Stopped),
            in_flight: Arc::new(AtomicU64::new(0)),
            transitions: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    pub fn set_state(&self, state: LifecycleState) {
        self.state.store(Arc::new(state));
    }

    /// Holds off concurrent start/stop sequences while the guard lives.
    pub async fn lock_transitions(&self) -> MutexGuard<'_, ()> {
        self.transitions.lock().await
    }

    /// Tracks one invocation until the guard is dropped, including on panic.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits until at most `retained` invocations are in flight, up to
    /// `timeout`. `retained` counts invocations the caller itself is part of.
    ///
    /// Returns `false` if other invocations were still running when it expired.
    pub async fn wait_for_drain(&self, retained: u64, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) <= retained {
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
