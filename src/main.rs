//! observatorium
//!
//! # Architecture Overview
//!
//! ```text
//!   flags + env ──▶ config (validate) ──▶ logging + trace export + metrics
//!                                                    │
//!                                                    ▼
//!                        ┌──────────────────── Run Group ─────────────────────┐
//!                        │                                                     │
//!     SIGINT/SIGTERM ───▶│  SignalWatcher            ServerRunner              │
//!                        │       │                   listener → routes → proxy ─┼──▶ query / write
//!                        │       └─ first to finish interrupts the other ─┘     │    upstreams
//!                        └─────────────────────────────────────────────────────┘
//!                                                    │ Outcome
//!                                                    ▼
//!                               runtime shutdown, span flush, exit status
//! ```

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use observatorium::config::{self, ConfigError, EnvToggles, Flags, LogConfig};
use observatorium::lifecycle::exit::{self, EXIT_FAILURE};
use observatorium::lifecycle::signals::SignalSource;
use observatorium::lifecycle::startup;
use observatorium::observability::{logging, metrics, tracing::Tracer};

/// How long blocking work may linger after the run group has returned.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    let flags = Flags::parse();
    let env = EnvToggles::from_env();

    let options = match config::load(flags.clone(), env) {
        Ok(options) => options,
        Err(ConfigError::Validation(errors)) => {
            let logging = LogConfig {
                name: flags.debug_name,
                level: flags.log_level,
                format: flags.log_format,
                debug: env.debug,
            };
            if let Err(e) = logging::init(&logging, None) {
                eprintln!("{e}");
            }
            return exit::invalid_config(&errors);
        }
    };

    let (tracer, spans) = Tracer::new(options.tracing.clone());
    if let Err(e) = logging::init(&options.logging, Some(spans)) {
        eprintln!("{e}");
        return ExitCode::from(EXIT_FAILURE);
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "observatorium starting");

    let metrics = match metrics::install() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let runtime = match startup::build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build runtime");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    tracing::info!(workers = runtime.metrics().num_workers(), "Runtime configured");

    let name = options.logging.name.clone();
    let outcome = runtime.block_on(async {
        let tracer = tracer.start();
        let outcome = startup::run(options, SignalSource::Os, metrics).await;
        tracer.close().await;
        outcome
    });
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    exit::finish(outcome, &name)
}
