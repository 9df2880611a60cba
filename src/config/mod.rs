//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! command line + DEBUG/PROFILE environment
//!     → cli.rs (clap parse into Flags)
//!     → validation.rs (durations, URLs, ranges)
//!     → Options (validated, immutable)
//!     → handed by value to the actors at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload
//! - Every flag has a default except the two upstream endpoints
//! - Validation separates syntactic (clap) from semantic checks

pub mod cli;
pub mod loader;
pub mod schema;
pub mod validation;

pub use cli::Flags;
pub use loader::{load, ConfigError, EnvToggles};
pub use schema::{LogConfig, LogFormat, LogLevel, Options, ProxyConfig, ServerConfig, TraceExporter, TracingConfig};
pub use validation::ValidationError;
