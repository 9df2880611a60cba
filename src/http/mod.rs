//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::listener)
//!     → server.rs (accept loop, hyper auto HTTP/1.1 + HTTP/2, graceful drain)
//!     → request.rs (request ID assigned or kept)
//!     → routes.rs (metrics, health, debug, API routes)
//!     → proxy.rs (forward to the query or write upstream)
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod routes;
pub mod server;

pub use request::X_REQUEST_ID;
pub use routes::{build_router, AppState};
pub use server::{Readiness, ServerRunner, ServerState};
