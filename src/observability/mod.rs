//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, logfmt or JSON)
//!     → metrics.rs (counters, gauges, histograms)
//!     → tracing.rs (sampled spans with trace and span ids)
//!
//! Consumers:
//!     → stdout/stderr (log lines)
//!     → GET /metrics (Prometheus scrape)
//!     → trace collector (OTLP/HTTP JSON) or stdout
//! ```
//!
//! # Design Decisions
//! - Logging and span export share one `tracing` subscriber
//! - Request ID flows through spans, logs and the proxied request
//! - Metrics are cheap (atomic increments) and no-ops until installed

pub mod logging;
pub mod metrics;
pub mod tracing;
