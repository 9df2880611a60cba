//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the tokio runtime sized to the CPUs actually available
//! - Build the actors from validated [`Options`]
//! - Register them in a [`Group`] and run it under the root span
//!
//! # Design Decisions
//! - Configuration is validated before this module is reached
//! - Process-wide handles (signal source, metrics) are passed in, never
//!   looked up globally, so tests can inject their own

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::runtime::Runtime;
use tracing::Instrument;

use crate::config::Options;
use crate::http::{build_router, AppState, ServerRunner};
use crate::lifecycle::actor::Actor;
use crate::lifecycle::group::{Group, Outcome};
use crate::lifecycle::signals::{SignalSource, SignalWatcher};
use crate::Error;

/// The actors this process runs.
pub enum Service {
    Signals(Arc<SignalWatcher>),
    Server(Arc<ServerRunner>),
}

impl Actor for Service {
    fn name(&self) -> &str {
        match self {
            Service::Signals(watcher) => watcher.name(),
            Service::Server(server) => server.name(),
        }
    }

    async fn run(&self) -> Result<(), Error> {
        match self {
            Service::Signals(watcher) => watcher.run().await,
            Service::Server(server) => server.run().await,
        }
    }

    fn interrupt(&self, cause: Option<&Error>) {
        match self {
            Service::Signals(watcher) => watcher.interrupt(cause),
            Service::Server(server) => server.interrupt(cause),
        }
    }
}

/// Handles to the actors, kept so callers can inspect them after the run.
pub struct Services {
    pub signals: Arc<SignalWatcher>,
    pub server: Arc<ServerRunner>,
}

impl Services {
    pub fn build(options: &Options, signals: SignalSource, metrics: Option<PrometheusHandle>) -> Self {
        let state = AppState::new(options.clone(), metrics);
        Self {
            signals: Arc::new(SignalWatcher::new(signals)),
            server: Arc::new(ServerRunner::new(options.server.clone(), |readiness| {
                build_router(state, readiness)
            })),
        }
    }

    /// A fresh group holding every actor, in registration order.
    pub fn group(&self) -> Group<Service> {
        let mut group = Group::new();
        group
            .add(Service::Signals(Arc::clone(&self.signals)))
            .add(Service::Server(Arc::clone(&self.server)));
        group
    }
}

/// Build the multi-threaded runtime.
///
/// Worker threads follow `available_parallelism`, which honors cgroup CPU
/// quotas. `TOKIO_WORKER_THREADS` still wins when set.
pub fn build_runtime() -> std::io::Result<Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all().thread_name("observatorium-worker");
    if std::env::var_os("TOKIO_WORKER_THREADS").is_none() {
        if let Ok(cpus) = std::thread::available_parallelism() {
            builder.worker_threads(cpus.get());
        }
    }
    builder.build()
}

/// Run every actor until the first one finishes, then shut the rest down.
pub async fn run(options: Options, signals: SignalSource, metrics: Option<PrometheusHandle>) -> Outcome {
    let span = tracing::info_span!("observatorium", name = %options.logging.name);
    async move {
        let services = Services::build(&options, signals, metrics);
        tracing::info!(
            listen = %options.server.listen,
            grace_period = ?options.server.grace_period,
            query_endpoint = %options.proxy.query_endpoint,
            write_endpoint = %options.proxy.write_endpoint,
            "Starting"
        );
        services.group().run().await
    }
    .instrument(span)
    .await
}
