//! Hub-wide lifecycle state and shutdown broadcast.
//!
//! Uses `ArcSwap` for lock-free state transitions and a watch channel as
//! the broadcast that is signalled exactly once. Every public database
//! entry point checks [`ShutdownController::is_shutting_down`] and fails
//! fast with `ShuttingDown` once teardown begins.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Hub lifecycle state.
///
/// State machine: Starting -> Ready -> ShuttingDown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// The hub is loading its catalogue; not yet serving.
    Starting,
    /// The hub is serving requests.
    Ready,
    /// Teardown has begun; all entry points fail fast.
    ShuttingDown,
}

/// Tracks the hub lifecycle and broadcasts the shutdown signal.
#[derive(Debug)]
pub struct ShutdownController {
    signal: watch::Sender<bool>,
    state: ArcSwap<LifecycleState>,
}

impl ShutdownController {
    /// Creates a controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            signal: tx,
            state: ArcSwap::from_pointee(LifecycleState::Starting),
        }
    }

    /// Transitions to `Ready`.
    pub fn set_ready(&self) {
        self.state.store(Arc::new(LifecycleState::Ready));
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Whether teardown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state() == LifecycleState::ShuttingDown
    }

    /// A receiver signalled when shutdown is triggered.
    ///
    /// Background workers select on this alongside their main loop.
    #[must_use]
    pub fn receiver(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Initiates shutdown. Returns `true` on the first call, `false` on
    /// repeats; the broadcast fires exactly once.
    pub fn trigger(&self) -> bool {
        let previous = self.state.swap(Arc::new(LifecycleState::ShuttingDown));
        if *previous == LifecycleState::ShuttingDown {
            return false;
        }
        // Ignore send errors -- receivers may have been dropped.
        let _ = self.signal.send(true);
        true
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
