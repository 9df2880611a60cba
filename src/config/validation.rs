//! Configuration validation.
//!
//! # Responsibilities
//! - Turn raw [`Flags`] into validated [`Options`]
//! - Parse durations and upstream URLs
//! - Validate value ranges (buffers > 0, probability in [0, 1])
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: (Flags, EnvToggles) → Result<Options, Vec<ValidationError>>
//! - Runs before any actor is built

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::config::cli::Flags;
use crate::config::loader::EnvToggles;
use crate::config::schema::{LogConfig, Options, ProxyConfig, ServerConfig, TracingConfig};

/// One invalid flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Flag name without the leading dashes.
    pub flag: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(flag: &'static str, message: impl Into<String>) -> Self {
        Self {
            flag,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "--{} is invalid: {}", self.flag, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate flags, collecting every problem.
pub fn validate(flags: Flags, env: EnvToggles) -> Result<Options, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let query_endpoint = check(&mut errors, "metrics.query.endpoint", parse_endpoint(&flags.metrics_query_endpoint));
    let write_endpoint = check(&mut errors, "metrics.write.endpoint", parse_endpoint(&flags.metrics_write_endpoint));
    let grace_period = check(&mut errors, "grace-period", parse_duration(&flags.grace_period));
    let listen = check(&mut errors, "listen", normalize_listen(&flags.listen));

    if flags.max_connections == 0 {
        errors.push(ValidationError::new("listen.max-connections", "must be greater than zero"));
    }
    if flags.proxy_buffer_count == 0 {
        errors.push(ValidationError::new("proxy.buffer-count", "must be greater than zero"));
    }
    if flags.proxy_buffer_size_bytes == 0 {
        errors.push(ValidationError::new("proxy.buffer-size-bytes", "must be greater than zero"));
    }
    if !(0.0..=1.0).contains(&flags.trace_sampler_probability) {
        errors.push(ValidationError::new(
            "trace.sampler-probability",
            format!("{} is not within [0, 1]", flags.trace_sampler_probability),
        ));
    }
    if flags.debug_name.trim().is_empty() {
        errors.push(ValidationError::new("debug.name", "must not be empty"));
    }

    let (Some(query_endpoint), Some(write_endpoint), Some(grace_period), Some(listen)) =
        (query_endpoint, write_endpoint, grace_period, listen)
    else {
        return Err(errors);
    };
    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(Options {
        server: ServerConfig {
            listen,
            max_connections: flags.max_connections,
            grace_period,
        },
        logging: LogConfig {
            name: flags.debug_name.clone(),
            level: flags.log_level,
            format: flags.log_format,
            debug: env.debug,
        },
        proxy: ProxyConfig {
            query_endpoint,
            write_endpoint,
            buffer_count: flags.proxy_buffer_count,
            buffer_size_bytes: flags.proxy_buffer_size_bytes,
        },
        tracing: TracingConfig {
            exporter: flags.trace_exporter,
            endpoint: flags.trace_exporter_endpoint,
            sampler_probability: flags.trace_sampler_probability,
            service_name: flags.debug_name,
        },
        profile: env.profile,
    })
}

fn check<T>(errors: &mut Vec<ValidationError>, flag: &'static str, result: Result<T, String>) -> Option<T> {
    result
        .map_err(|message| errors.push(ValidationError::new(flag, message)))
        .ok()
}

/// Parse an absolute `http` or `https` URL.
pub fn parse_endpoint(raw: &str) -> Result<Url, String> {
    if raw.is_empty() {
        return Err("no endpoint given".to_string());
    }
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        "http" | "https" => Err(format!("{raw} has no host")),
        scheme => Err(format!("unsupported scheme {scheme:?}")),
    }
}

/// Accept the `:port` shorthand for "all interfaces".
fn normalize_listen(raw: &str) -> Result<String, String> {
    let listen = match raw.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => raw.to_string(),
    };
    let Some((host, port)) = listen.rsplit_once(':') else {
        return Err(format!("{raw} is missing a port"));
    };
    if host.is_empty() {
        return Err(format!("{raw} is missing a host"));
    }
    port.parse::<u16>()
        .map_err(|_| format!("{port:?} is not a valid port"))?;
    Ok(listen)
}

/// Parse a duration such as `5s`, `300ms`, `1.5h` or `1m30s`.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `0` is allowed.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let input = raw.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if input.starts_with('-') {
        return Err(format!("negative duration {raw:?}"));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration {raw:?}"));
        }
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid number {number:?} in duration {raw:?}"))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let seconds_per_unit = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(format!("missing unit in duration {raw:?}")),
            other => return Err(format!("unknown unit {other:?} in duration {raw:?}")),
        };

        let part = Duration::try_from_secs_f64(value * seconds_per_unit)
            .map_err(|_| format!("duration {raw:?} out of range"))?;
        total = total
            .checked_add(part)
            .ok_or_else(|| format!("duration {raw:?} out of range"))?;
        rest = tail;
    }
    Ok(total)
}
