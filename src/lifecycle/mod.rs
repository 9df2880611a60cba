//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Options → build actors → register in a Group → Group::run
//!
//! Group (group.rs):
//!     spawn every actor → first completion → interrupt all → wait for all
//!     → Outcome
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → SignalWatcher returns → Group interrupts the server
//!
//! Exit (exit.rs):
//!     Outcome → exit status + final log lines
//! ```
//!
//! # Design Decisions
//! - Whichever actor finishes first decides the outcome
//! - Stop flags are sticky so an interrupt that races ahead of `run` is kept
//! - Only the server bounds its own shutdown (grace period); the group waits
//!   for every actor without a timeout

pub mod actor;
pub mod exit;
pub mod group;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use actor::{Actor, ActorId};
pub use group::{Group, Outcome};
pub use shutdown::{Shutdown, ShutdownMode, ShutdownReport};
pub use signals::{Signal, SignalSource, SignalTrigger, SignalWatcher};
