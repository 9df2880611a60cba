//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define process metrics (requests, latency, connections, lifecycle)
//! - Install the Prometheus recorder once at startup
//! - Render the exposition format for the `/metrics` endpoint
//!
//! # Metrics
//! - `observatorium_build_info` (gauge): 1, labelled with the crate version
//! - `http_requests_total` (counter): requests by handler, method, status
//! - `http_request_duration_seconds` (histogram): latency by handler
//! - `observatorium_active_connections` (gauge): open client connections
//! - `observatorium_proxy_requests_total` (counter): forwarded requests by upstream, status
//! - `observatorium_forced_shutdowns_total` (counter): grace periods that ran out
//! - `observatorium_actor_exits_total` (counter): actor completions by actor, result
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder (tests) every call is a no-op
//! - The [`PrometheusHandle`] is passed explicitly to the router instead of
//!   being looked up globally

use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::Error;

/// Install the global Prometheus recorder and publish build info.
pub fn install() -> Result<PrometheusHandle, Error> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Metrics(e.to_string()))?;

    gauge!("observatorium_build_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    Ok(handle)
}

/// Record a completed HTTP request.
pub fn record_request(handler: &'static str, method: &str, status: u16, start: Instant) {
    counter!(
        "http_requests_total",
        "handler" => handler,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("http_request_duration_seconds", "handler" => handler)
        .record(start.elapsed().as_secs_f64());
}

/// Record a request forwarded to an upstream.
pub fn record_proxy_request(upstream: &'static str, status: u16) {
    counter!(
        "observatorium_proxy_requests_total",
        "upstream" => upstream,
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_active_connections(active: u64) {
    gauge!("observatorium_active_connections").set(active as f64);
}

pub fn record_forced_shutdown() {
    counter!("observatorium_forced_shutdowns_total").increment(1);
}

pub fn record_actor_exit(actor: &str, success: bool) {
    let result = if success { "success" } else { "error" };
    counter!(
        "observatorium_actor_exits_total",
        "actor" => actor.to_string(),
        "result" => result
    )
    .increment(1);
}
