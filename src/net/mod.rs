//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, accept, connection limit)
//!     → connection.rs (active connection tracking)
//!     → Hand off to the HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion: a permit is taken before
//!   `accept` and released when the connection task ends or is aborted
//! - Every connection is tracked so shutdown can report what was in flight

pub mod connection;
pub mod listener;
