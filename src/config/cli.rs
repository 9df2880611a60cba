//! Command-line flags.

use clap::Parser;

use crate::config::schema::{
    LogFormat, LogLevel, TraceExporter, DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE_BYTES,
};

/// Raw, unvalidated flags. See [`validation::validate`](super::validation::validate).
#[derive(Debug, Clone, Parser)]
#[command(name = "observatorium")]
#[command(about = "Metrics API gateway with coordinated graceful shutdown", long_about = None)]
pub struct Flags {
    /// The address on which the internal server runs.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Maximum number of concurrently open client connections.
    #[arg(long = "listen.max-connections", default_value_t = 10_000)]
    pub max_connections: usize,

    /// The time to wait for in-flight requests after shutdown starts.
    #[arg(long = "grace-period", default_value = "5s")]
    pub grace_period: String,

    /// The name to add to log lines.
    #[arg(long = "debug.name", default_value = "observatorium")]
    pub debug_name: String,

    /// The log filtering level.
    #[arg(long = "log.level", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// The log format to use.
    #[arg(long = "log.format", value_enum, default_value_t = LogFormat::Logfmt)]
    pub log_format: LogFormat,

    /// The endpoint against which to query for metrics.
    #[arg(long = "metrics.query.endpoint", default_value = "")]
    pub metrics_query_endpoint: String,

    /// The endpoint against which to make write requests for metrics.
    #[arg(long = "metrics.write.endpoint", default_value = "")]
    pub metrics_write_endpoint: String,

    /// Maximum number of reusable buffers used for copying HTTP reverse proxy responses.
    #[arg(long = "proxy.buffer-count", default_value_t = DEFAULT_BUFFER_COUNT)]
    pub proxy_buffer_count: usize,

    /// Size (bytes) of each reusable proxy buffer.
    #[arg(long = "proxy.buffer-size-bytes", default_value_t = DEFAULT_BUFFER_SIZE_BYTES)]
    pub proxy_buffer_size_bytes: usize,

    /// The trace exporter to use.
    #[arg(long = "trace.exporter", value_enum, default_value_t = TraceExporter::Jaeger)]
    pub trace_exporter: TraceExporter,

    /// The endpoint to which trace spans are sent.
    #[arg(long = "trace.exporter-endpoint", default_value = "http://localhost:4318/v1/traces")]
    pub trace_exporter_endpoint: String,

    /// The trace sampler probability to use.
    #[arg(long = "trace.sampler-probability", default_value_t = 0.1)]
    pub trace_sampler_probability: f64,
}
