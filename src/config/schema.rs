//! Configuration schema definitions.
//!
//! [`Options`] is the validated, immutable configuration handed to the
//! actors. Every type serializes so it can be rendered by `/debug/config`.

use std::fmt;
use std::time::Duration;

use clap::ValueEnum;
use serde::Serialize;
use url::Url;

/// Root configuration for the process.
#[derive(Debug, Clone, Serialize)]
pub struct Options {
    pub server: ServerConfig,
    pub logging: LogConfig,
    pub proxy: ProxyConfig,
    pub tracing: TracingConfig,
    /// Mount the `/debug/*` endpoints (`PROFILE` environment variable).
    pub profile: bool,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub listen: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Time in-flight connections get to finish once shutdown starts.
    pub grace_period: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize)]
pub struct LogConfig {
    /// Name attached to every log line.
    pub name: String,
    pub level: LogLevel,
    pub format: LogFormat,
    /// Include thread ids and source locations (`DEBUG` environment variable).
    pub debug: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            name: "observatorium".to_string(),
            level: LogLevel::Info,
            format: LogFormat::Logfmt,
            debug: false,
        }
    }
}

/// Reverse proxy configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyConfig {
    /// Upstream that serves metric queries.
    pub query_endpoint: Url,

    /// Upstream that accepts remote-write requests.
    pub write_endpoint: Url,

    /// Number of pooled buffers for copying upstream responses.
    pub buffer_count: usize,

    /// Size of each buffer, i.e. the largest chunk written back to the client.
    pub buffer_size_bytes: usize,
}

pub const DEFAULT_BUFFER_COUNT: usize = 2 * 1024;
pub const DEFAULT_BUFFER_SIZE_BYTES: usize = 4 * 1024 * 1024;

/// Trace export configuration.
#[derive(Debug, Clone, Serialize)]
pub struct TracingConfig {
    pub exporter: TraceExporter,

    /// Collector endpoint for the `jaeger` exporter.
    pub endpoint: String,

    /// Probability that a root span is sampled, in `[0, 1]`.
    pub sampler_probability: f64,

    /// `service.name` reported with every span.
    pub service_name: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            exporter: TraceExporter::Jaeger,
            endpoint: "http://localhost:4318/v1/traces".to_string(),
            sampler_probability: 0.1,
            service_name: "observatorium".to_string(),
        }
    }
}

/// Log filtering level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text: timestamp, level, target and message, then the
    /// fields as `key=value`.
    Logfmt,
    /// One JSON object per line.
    Json,
}

/// Where finished spans are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceExporter {
    /// One JSON object per span on stdout.
    Stdout,
    /// OTLP/HTTP JSON batches posted to a Jaeger (or any OTLP) collector.
    Jaeger,
}
