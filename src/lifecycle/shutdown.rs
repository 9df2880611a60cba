//! Shutdown coordination primitives shared by the actors.

use std::time::Duration;

use tokio::sync::watch;

/// Sticky shutdown flag.
///
/// Once triggered it stays triggered, so a listener that subscribes late
/// still observes it. Triggering is non-blocking and idempotent, which is
/// what [`Actor::interrupt`](super::actor::Actor::interrupt) needs.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Trigger the shutdown. Returns `true` only for the call that flipped
    /// the flag.
    pub fn trigger(&self) -> bool {
        self.tx
            .send_if_modified(|triggered| !std::mem::replace(triggered, true))
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of a [`Shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolve once shutdown has been triggered (immediately if it already
    /// was). Also resolves if the [`Shutdown`] itself is dropped.
    pub async fn wait(&mut self) {
        // The borrow guard is dropped here, never held across an await.
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

/// How a server's shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Every in-flight connection finished within the grace period.
    Graceful,
    /// The grace period ran out and remaining connections were closed.
    Forced,
}

/// Record of one completed shutdown sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub mode: ShutdownMode,
    /// Connections open when draining started.
    pub in_flight: usize,
    /// Connections closed by force once the grace period elapsed.
    pub aborted: usize,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn is_forced(&self) -> bool {
        self.mode == ShutdownMode::Forced
    }
}
