//! observatorium: a metrics API gateway built as a small group of actors.
//!
//! The process runs a [`SignalWatcher`](lifecycle::SignalWatcher) and a
//! [`ServerRunner`](http::ServerRunner) side by side in a
//! [`Group`](lifecycle::Group). Whichever finishes first (a signal, a bind
//! failure, a fatal accept error) interrupts the other; the server then
//! drains in-flight connections within the grace period and the group's
//! [`Outcome`](lifecycle::Outcome) becomes the exit status.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

mod error;

pub use config::Options;
pub use error::Error;
pub use lifecycle::{Group, Outcome, Shutdown};
