//! OS signal handling.
//!
//! # Responsibilities
//! - Subscribe to SIGINT/SIGTERM (or an injected source) inside the actor's run
//! - Translate the first signal into a successful actor completion
//! - Unblock the wait when the run group interrupts the watcher
//!
//! # Design Decisions
//! - Signals are forwarded into a channel buffered to [`SIGNAL_BUFFER`] that
//!   exists before the subscription is made, so a signal landing between
//!   subscription and the first receive is kept
//! - Subscription happens when the actor starts running, not when it is
//!   built. A signal raised before that moment is missed
//! - Signals that arrive while the buffer is full are dropped, like a
//!   second Ctrl+C during shutdown

use std::fmt;

use tokio::sync::{broadcast, mpsc};

use crate::lifecycle::actor::Actor;
use crate::lifecycle::shutdown::Shutdown;
use crate::Error;

/// Capacity of the channel a watcher receives signals on.
pub const SIGNAL_BUFFER: usize = 1;

/// Backlog a [`SignalTrigger`] keeps for slow forwarders.
const TRIGGER_BACKLOG: usize = 16;

/// Termination signals the watcher reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// SIGINT / Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => f.write_str("SIGINT"),
            Signal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Programmatic signal source.
///
/// Cloneable handle that any task can use to deliver a [`Signal`] to the
/// watchers currently subscribed to it.
#[derive(Debug, Clone)]
pub struct SignalTrigger {
    tx: broadcast::Sender<Signal>,
}

impl SignalTrigger {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(TRIGGER_BACKLOG);
        Self { tx }
    }

    /// Deliver `signal` to every subscribed watcher.
    ///
    /// Returns `false` when nobody was subscribed, i.e. the signal was lost.
    pub fn raise(&self, signal: Signal) -> bool {
        self.tx.send(signal).is_ok()
    }

    /// Number of watchers currently subscribed.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.tx.subscribe()
    }
}

impl Default for SignalTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a [`SignalWatcher`] gets its signals from.
#[derive(Debug, Clone)]
pub enum SignalSource {
    /// Process signals delivered by the operating system.
    Os,
    /// Signals raised through a [`SignalTrigger`].
    Manual(SignalTrigger),
}

impl SignalSource {
    /// Start forwarding signals into `tx`.
    ///
    /// Registration is synchronous; forwarding runs on a background task that
    /// ends once the receiving side is dropped.
    fn subscribe(&self, tx: mpsc::Sender<Signal>) -> std::io::Result<()> {
        match self {
            SignalSource::Os => subscribe_os(tx),
            SignalSource::Manual(trigger) => {
                let mut events = trigger.subscribe();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            received = events.recv() => match received {
                                Ok(signal) => {
                                    let _ = tx.try_send(signal);
                                }
                                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                                Err(broadcast::error::RecvError::Closed) => break,
                            },
                            _ = tx.closed() => break,
                        }
                    }
                });
                Ok(())
            }
        }
    }
}

#[cfg(unix)]
fn subscribe_os(tx: mpsc::Sender<Signal>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = sigint.recv() => Signal::Interrupt,
                Some(()) = sigterm.recv() => Signal::Terminate,
                _ = tx.closed() => break,
            };
            let _ = tx.try_send(received);
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn subscribe_os(tx: mpsc::Sender<Signal>) -> std::io::Result<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_err() {
                        break;
                    }
                    let _ = tx.try_send(Signal::Interrupt);
                }
                _ = tx.closed() => break,
            }
        }
    });
    Ok(())
}

/// Actor that completes when a termination signal arrives.
pub struct SignalWatcher {
    source: SignalSource,
    stop: Shutdown,
}

impl SignalWatcher {
    pub fn new(source: SignalSource) -> Self {
        Self {
            source,
            stop: Shutdown::new(),
        }
    }

    /// Subscribe and wait for a signal or an interrupt.
    ///
    /// Returns `Some(signal)` when a signal was received and `None` when the
    /// watcher was interrupted first.
    pub async fn wait(&self) -> Result<Option<Signal>, Error> {
        let (tx, mut rx) = mpsc::channel(SIGNAL_BUFFER);
        self.source.subscribe(tx).map_err(Error::Signal)?;

        let mut stop = self.stop.subscribe();
        tokio::select! {
            Some(signal) = rx.recv() => {
                tracing::info!(signal = %signal, "received termination signal");
                Ok(Some(signal))
            }
            _ = stop.wait() => Ok(None),
        }
    }

    /// Whether [`interrupt`](Actor::interrupt) has been called.
    pub fn is_interrupted(&self) -> bool {
        self.stop.is_triggered()
    }
}

impl Actor for SignalWatcher {
    fn name(&self) -> &str {
        "signals"
    }

    async fn run(&self) -> Result<(), Error> {
        self.wait().await.map(|_| ())
    }

    fn interrupt(&self, cause: Option<&Error>) {
        if self.stop.trigger() {
            match cause {
                Some(err) => tracing::info!(cause = %err, "shutdown triggered elsewhere, no longer waiting for signals"),
                None => tracing::info!("shutdown triggered elsewhere, no longer waiting for signals"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    async fn wait_for_subscriber(trigger: &SignalTrigger) {
        while trigger.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn completes_on_injected_signal() {
        let trigger = SignalTrigger::new();
        let watcher = Arc::new(SignalWatcher::new(SignalSource::Manual(trigger.clone())));

        let task = tokio::spawn({
            let watcher = Arc::clone(&watcher);
            async move { watcher.wait().await }
        });
        wait_for_subscriber(&trigger).await;
        assert!(trigger.raise(Signal::Terminate));

        let received = task.await.unwrap().unwrap();
        assert_eq!(received, Some(Signal::Terminate));
    }

    #[tokio::test]
    async fn interrupt_unblocks_wait() {
        let watcher = Arc::new(SignalWatcher::new(SignalSource::Manual(SignalTrigger::new())));

        let task = tokio::spawn({
            let watcher = Arc::clone(&watcher);
            async move { watcher.wait().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        watcher.interrupt(None);

        let received = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("watcher did not stop")
            .unwrap()
            .unwrap();
        assert_eq!(received, None);
    }

    #[tokio::test]
    async fn interrupt_before_run_is_observed() {
        let watcher = SignalWatcher::new(SignalSource::Manual(SignalTrigger::new()));
        watcher.interrupt(None);

        let result = tokio::time::timeout(Duration::from_secs(1), watcher.run()).await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn interrupt_is_idempotent() {
        let watcher = SignalWatcher::new(SignalSource::Manual(SignalTrigger::new()));
        let cause = Error::ServerClosed;
        watcher.interrupt(Some(&cause));
        watcher.interrupt(None);
        watcher.interrupt(Some(&cause));
        assert!(watcher.is_interrupted());
        assert!(watcher.run().await.is_ok());
    }

    // The subscription is made when the watcher starts running, so a signal
    // raised before that is lost rather than queued.
    #[tokio::test]
    async fn signal_raised_before_subscription_is_missed() {
        let trigger = SignalTrigger::new();
        let watcher = Arc::new(SignalWatcher::new(SignalSource::Manual(trigger.clone())));

        assert!(!trigger.raise(Signal::Interrupt));

        let task = tokio::spawn({
            let watcher = Arc::clone(&watcher);
            async move { watcher.wait().await }
        });
        wait_for_subscriber(&trigger).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        watcher.interrupt(None);
        assert_eq!(task.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn buffered_signal_survives_until_first_receive() {
        let (tx, mut rx) = mpsc::channel(SIGNAL_BUFFER);
        let trigger = SignalTrigger::new();
        SignalSource::Manual(trigger.clone()).subscribe(tx).unwrap();

        wait_for_subscriber(&trigger).await;
        assert!(trigger.raise(Signal::Interrupt));
        assert!(trigger.raise(Signal::Terminate));
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The second signal found the buffer full and was dropped.
        assert_eq!(rx.recv().await, Some(Signal::Interrupt));
        assert!(rx.try_recv().is_err());
    }
}
