//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global subscriber once, before anything logs
//! - Pick the line format and level from flags: `logfmt` writes
//!   `timestamp LEVEL target: message key=value ...`, `json` one object per line
//! - Attach the span exporter layer next to the log layer
//!
//! # Design Decisions
//! - `RUST_LOG` overrides `--log.level` when set
//! - The level filter applies to log output only; span export samples on
//!   its own so traces survive a quiet log level
//! - `DEBUG` adds thread ids and source locations to every line

use std::io::IsTerminal;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::{LogConfig, LogFormat};
use crate::observability::tracing::SpanExportLayer;
use crate::Error;

/// Log filter for the given config, honoring `RUST_LOG`.
pub fn filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_str()))
}

/// Log line layer for the configured format, writing to `writer`.
/// Colors are only used when `ansi` is set.
fn lines<W>(config: &LogConfig, writer: W, ansi: bool) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match config.format {
        LogFormat::Logfmt => tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_thread_ids(config.debug)
            .with_file(config.debug)
            .with_line_number(config.debug)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .with_current_span(true)
            .with_thread_ids(config.debug)
            .with_file(config.debug)
            .with_line_number(config.debug)
            .boxed(),
    }
}

/// Install the global subscriber.
/// `spans` is absent when the process exits before tracing is configured.
pub fn init(config: &LogConfig, spans: Option<SpanExportLayer>) -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(lines(config, std::io::stdout, std::io::stdout().is_terminal()).with_filter(filter(config)))
        .with(spans.map(|layer| layer.with_filter(LevelFilter::INFO)))
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

/// In-memory log sink for tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl Captured {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[cfg(test)]
impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
impl<'a> MakeWriter<'a> for Captured {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
