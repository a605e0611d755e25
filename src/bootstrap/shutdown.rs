use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Listener shutdown state machine
///
/// States:
/// 1. Running - normal operation
/// 2. Draining - stop accepting, loops exit at their next poll point
/// 3. Terminated - every spawned task has been joined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Terminated,
}

/// Cancellation signal handed to every loop at spawn time.
///
/// Transitions are monotonic: once draining, a listener never runs again.
pub struct Shutdown {
    state: watch::Sender<ShutdownState>,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(ShutdownState::Running);
        Arc::new(Self { state })
    }

    /// Get current state
    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Check if loops should keep going
    pub fn is_running(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Start draining. Idempotent.
    pub fn start_drain(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ShutdownState::Running {
                *state = ShutdownState::Draining;
                true
            } else {
                false
            }
        });

        if changed {
            info!("shutdown requested, draining");
        }
    }

    /// Mark shutdown complete
    pub fn terminate(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state != ShutdownState::Terminated {
                *state = ShutdownState::Terminated;
                true
            } else {
                false
            }
        });

        if changed {
            debug!("shutdown complete");
        }
    }
}

/// Resolve once the receiver observes anything other than `Running`.
///
/// Also resolves if the sender is gone.
pub async fn cancelled(rx: &mut watch::Receiver<ShutdownState>) {
    let _ = rx.wait_for(|state| *state != ShutdownState::Running).await;
}
