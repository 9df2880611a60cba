//! Resilience helpers.
//!
//! The only retry in the process is the server's accept loop: transient
//! accept errors (descriptor exhaustion, aborted handshakes) back off with
//! [`backoff::calculate_backoff`] instead of spinning or failing the server.

pub mod backoff;
