use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of the monitor loop.
///
/// `Starting → Subscribed → Running → Draining → Stopped`; a failed start
/// goes straight from `Starting` to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Subscribed,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoopState::Starting => "starting",
            LoopState::Subscribed => "subscribed",
            LoopState::Running => "running",
            LoopState::Draining => "draining",
            LoopState::Stopped => "stopped",
        })
    }
}

/// Outside view of a running loop, handed to signal handlers and tests.
#[derive(Clone)]
pub struct MonitorHandle {
    state: watch::Receiver<LoopState>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl MonitorHandle {
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Ask the loop to drain and stop. Idempotent.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolve once the loop reaches `target` (or immediately if it is there).
    pub async fn wait_for_state(&self, target: LoopState) -> LoopState {
        let mut state = self.state.clone();
        if state.wait_for(|current| *current == target).await.is_ok() {
            return target;
        }
        // Loop dropped: report the last state it published.
        let last = *state.borrow();
        last
    }
}

/// Loop-side half of the control channel.
pub(crate) struct LoopControl {
    state: watch::Sender<LoopState>,
    shutdown_rx: watch::Receiver<bool>,
    // Held so the shutdown channel stays open after every handle is dropped.
    _shutdown_tx: Arc<watch::Sender<bool>>,
}

impl LoopControl {
    pub(crate) fn new() -> (Self, MonitorHandle) {
        let (state_tx, state_rx) = watch::channel(LoopState::Starting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let handle = MonitorHandle {
            state: state_rx,
            shutdown: shutdown_tx.clone(),
        };
        let control = Self {
            state: state_tx,
            shutdown_rx,
            _shutdown_tx: shutdown_tx,
        };
        (control, handle)
    }

    pub(crate) fn set_state(&self, next: LoopState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            log::debug!("Monitor state: {} -> {}", previous, next);
        }
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Wait until shutdown is requested.
    pub(crate) async fn shutdown_signal(&mut self) {
        // The sender lives in `self`, so the channel never closes underneath us.
        let _ = self.shutdown_rx.wait_for(|stop| *stop).await;
    }
}
