//! Process-level error type.
//!
//! Every actor returns [`Error`] from its run loop. The first one observed by
//! the run group becomes the process outcome; the rest are logged and dropped.

use thiserror::Error;

use crate::config::ConfigError;
use crate::net::listener::ListenerError;

/// Errors that can end an actor or abort startup.
#[derive(Debug, Error)]
pub enum Error {
    /// Binding or accepting on the server socket failed.
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// OS signal handlers could not be installed.
    #[error("failed to register signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    /// An actor panicked inside its run loop.
    #[error("actor {actor} panicked")]
    Panicked { actor: String },

    /// The server was asked to run again after it had shut down.
    #[error("server already closed")]
    ServerClosed,

    /// Flags failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The global log subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),

    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
