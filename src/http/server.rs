//! HTTP server actor.
//!
//! # Responsibilities
//! - Bind the listener and serve HTTP/1.1 and HTTP/2 connections
//! - Stop accepting as soon as it is interrupted
//! - Drain in-flight connections within the grace period, then force-close
//! - Publish readiness for `/-/ready` and the shutdown outcome
//!
//! # State Machine
//! ```text
//! Idle → Listening(addr) → Draining → Closed
//!          └──── fatal accept error ───┘
//! Idle → Closed (bind failure or interrupted before run)
//! ```
//!
//! # Design Decisions
//! - Owns its accept loop instead of `axum::serve` so the grace deadline can
//!   be enforced per connection task
//! - Forcing is not an error: the run still returns `Ok`
//! - A runner serves once; running it again after it closed is an error

use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;

use axum::{extract::ConnectInfo, http::Request, Router};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tower::Service;
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::lifecycle::actor::Actor;
use crate::lifecycle::shutdown::{Shutdown, ShutdownMode, ShutdownReport};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{ConnectionPermit, Listener};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::Error;

/// Base delay after a transient accept error, in milliseconds.
const ACCEPT_BACKOFF_BASE_MS: u64 = 5;
/// Ceiling for the accept backoff, in milliseconds.
const ACCEPT_BACKOFF_MAX_MS: u64 = 1000;

/// Observable server lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Listening(SocketAddr),
    Draining,
    Closed,
}

/// Read side of a server's state, answering whether it accepts traffic.
#[derive(Debug, Clone)]
pub struct Readiness(watch::Receiver<ServerState>);

impl Readiness {
    pub(crate) fn new(state: watch::Receiver<ServerState>) -> Self {
        Self(state)
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.0.borrow(), ServerState::Listening(_))
    }
}

/// Serves an axum [`Router`] until interrupted.
pub struct ServerRunner {
    config: ServerConfig,
    app: Router,
    stop: Shutdown,
    state: watch::Sender<ServerState>,
    report: watch::Sender<Option<ShutdownReport>>,
    tracker: ConnectionTracker,
}

impl ServerRunner {
    /// `app` builds the router from this server's [`Readiness`], so
    /// `/-/ready` can sit behind the same middleware as every other route.
    pub fn new(config: ServerConfig, app: impl FnOnce(Readiness) -> Router) -> Self {
        let (state, readiness) = watch::channel(ServerState::Idle);
        let (report, _) = watch::channel(None);
        let app = app(Readiness::new(readiness));

        Self {
            config,
            app,
            stop: Shutdown::new(),
            state,
            report,
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Wait until the server has left `Idle`; returns the bound address if it
    /// is listening.
    pub async fn listening(&self) -> Option<SocketAddr> {
        let mut state = self.state.subscribe();
        let current = state
            .wait_for(|state| *state != ServerState::Idle)
            .await
            .ok()
            .map(|state| *state)?;
        match current {
            ServerState::Listening(addr) => Some(addr),
            _ => None,
        }
    }

    /// How the last shutdown went, once the server has closed.
    pub fn shutdown_report(&self) -> Option<ShutdownReport> {
        self.report.borrow().clone()
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    async fn serve(&self) -> Result<(), Error> {
        if self.state() == ServerState::Closed {
            return Err(Error::ServerClosed);
        }
        if self.stop.is_triggered() {
            self.state.send_replace(ServerState::Closed);
            return Ok(());
        }

        let listener = match Listener::bind(&self.config.listen, self.config.max_connections).await {
            Ok(listener) => listener,
            Err(e) => {
                self.state.send_replace(ServerState::Closed);
                return Err(e.into());
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.state.send_replace(ServerState::Closed);
                return Err(e.into());
            }
        };
        self.state.send_replace(ServerState::Listening(addr));
        tracing::info!(address = %addr, "Server listening");

        let mut stop = self.stop.subscribe();
        let mut connections = JoinSet::new();
        let mut failed_accepts = 0u32;

        let result = loop {
            let accepted = tokio::select! {
                _ = stop.wait() => break Ok(()),
                accepted = listener.accept() => accepted,
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!(error = %e, "Connection task failed");
                    }
                    continue;
                }
            };

            match accepted {
                Ok((stream, peer, permit)) => {
                    failed_accepts = 0;
                    connections.spawn(self.connection(stream, peer, permit));
                }
                Err(e) if e.is_transient() => {
                    failed_accepts = failed_accepts.saturating_add(1);
                    let delay = calculate_backoff(failed_accepts, ACCEPT_BACKOFF_BASE_MS, ACCEPT_BACKOFF_MAX_MS);
                    tracing::warn!(error = %e, attempt = failed_accepts, delay = ?delay, "Accept failed, retrying");
                    tokio::select! {
                        _ = stop.wait() => break Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed");
                    break Err(Error::from(e));
                }
            }
        };

        // Stop accepting before anything else.
        drop(listener);

        match result {
            Ok(()) => {
                self.state.send_replace(ServerState::Draining);
                let report = self.drain(&mut connections).await;
                self.report.send_replace(Some(report));
            }
            Err(_) => {
                connections.shutdown().await;
            }
        }
        self.state.send_replace(ServerState::Closed);
        tracing::info!("Server stopped");
        result
    }

    /// Wait up to the grace period for connections to finish, then abort
    /// whatever is left.
    async fn drain(&self, connections: &mut JoinSet<()>) -> ShutdownReport {
        let started = Instant::now();
        // Finished tasks may still sit in the set unreaped; the tracker only
        // counts live connections.
        let in_flight = self.tracker.active_count() as usize;
        let grace = self.config.grace_period;
        tracing::info!(in_flight, grace_period = ?grace, "Draining connections");

        let drained = tokio::time::timeout(grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if drained {
            let report = ShutdownReport {
                mode: ShutdownMode::Graceful,
                in_flight,
                aborted: 0,
                elapsed: started.elapsed(),
            };
            tracing::info!(in_flight, elapsed = ?report.elapsed, "Connections drained");
            return report;
        }

        let aborted = self.tracker.active_count() as usize;
        connections.shutdown().await;
        metrics::record_forced_shutdown();
        let report = ShutdownReport {
            mode: ShutdownMode::Forced,
            in_flight,
            aborted,
            elapsed: started.elapsed(),
        };
        tracing::warn!(
            in_flight,
            aborted,
            grace_period = ?grace,
            "Grace period expired, forcing connections closed"
        );
        report
    }

    /// Serve one connection until it ends or shutdown asks it to finish.
    fn connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
    ) -> impl Future<Output = ()> + Send + 'static {
        let app = self.app.clone();
        let guard = self.tracker.track();
        let span = tracing::debug_span!("connection", id = %guard.id(), peer = %peer);
        let mut stop = self.stop.subscribe();

        async move {
            let _permit = permit;
            let _guard = guard;
            tracing::debug!("Connection accepted");

            let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
                request.extensions_mut().insert(ConnectInfo(peer));
                app.clone().call(request)
            });

            let builder = auto::Builder::new(TokioExecutor::new());
            let connection = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
            tokio::pin!(connection);

            let result = tokio::select! {
                result = connection.as_mut() => result,
                _ = stop.wait() => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };
            if let Err(e) = result {
                tracing::debug!(error = %e, "Connection closed with error");
            }
        }
        .instrument(span)
    }
}

impl Actor for ServerRunner {
    fn name(&self) -> &str {
        "server"
    }

    async fn run(&self) -> Result<(), Error> {
        self.serve().await
    }

    fn interrupt(&self, cause: Option<&Error>) {
        if !self.stop.trigger() {
            return;
        }
        match cause {
            Some(e) => tracing::info!(error = %e, "Stopping server"),
            None => tracing::info!("Stopping server"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::routes;
    use crate::observability::logging::Captured;
    use axum::routing::get;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn config(grace: Duration) -> ServerConfig {
        ServerConfig {
            listen: "127.0.0.1:0".to_string(),
            max_connections: 16,
            grace_period: grace,
        }
    }

    /// Router with `/slow`, which signals `started` then sleeps for `delay`.
    fn slow_app(delay: Duration, started: Arc<Notify>) -> Router {
        Router::new().route(
            "/slow",
            get(move || {
                let started = started.clone();
                async move {
                    started.notify_one();
                    tokio::time::sleep(delay).await;
                    "done"
                }
            }),
        )
    }

    fn plain(config: ServerConfig, app: Router) -> ServerRunner {
        ServerRunner::new(config, |_| app)
    }

    fn spawn(server: &Arc<ServerRunner>) -> tokio::task::JoinHandle<Result<(), Error>> {
        let server = Arc::clone(server);
        tokio::spawn(async move { server.run().await })
    }

    #[tokio::test]
    async fn ready_only_while_listening() {
        let server = Arc::new(ServerRunner::new(config(Duration::from_secs(1)), |readiness| {
            Router::new().route("/-/ready", get(move || routes::ready(readiness.clone())))
        }));
        assert_eq!(server.state(), ServerState::Idle);

        let handle = spawn(&server);
        let addr = server.listening().await.expect("server should listen");

        let response = reqwest::get(format!("http://{addr}/-/ready")).await.unwrap();
        assert_eq!(response.status(), 200);

        server.interrupt(None);
        handle.await.unwrap().unwrap();
        assert_eq!(server.state(), ServerState::Closed);
        assert!(reqwest::get(format!("http://{addr}/-/ready")).await.is_err());
    }

    #[tokio::test]
    async fn in_flight_request_drains_gracefully() {
        let started = Arc::new(Notify::new());
        let app = slow_app(Duration::from_millis(200), started.clone());
        let server = Arc::new(plain(config(Duration::from_secs(5)), app));
        let handle = spawn(&server);
        let addr = server.listening().await.unwrap();

        let request = tokio::spawn(async move { reqwest::get(format!("http://{addr}/slow")).await });
        started.notified().await;

        server.interrupt(None);
        handle.await.unwrap().unwrap();

        let response = request.await.unwrap().unwrap();
        assert_eq!(response.text().await.unwrap(), "done");

        let report = server.shutdown_report().unwrap();
        assert_eq!(report.mode, ShutdownMode::Graceful);
        assert_eq!(report.in_flight, 1);
        assert_eq!(report.aborted, 0);
        assert_eq!(server.active_connections(), 0);
    }

    #[tokio::test]
    async fn slow_request_is_forced_after_grace() {
        let started = Arc::new(Notify::new());
        let app = slow_app(Duration::from_secs(5), started.clone());
        let server = Arc::new(plain(config(Duration::from_millis(200)), app));
        let handle = spawn(&server);
        let addr = server.listening().await.unwrap();

        let request = tokio::spawn(async move { reqwest::get(format!("http://{addr}/slow")).await });
        started.notified().await;

        let begun = Instant::now();
        server.interrupt(None);
        handle.await.unwrap().expect("forcing is not an error");
        assert!(begun.elapsed() < Duration::from_secs(2));

        let report = server.shutdown_report().unwrap();
        assert!(report.is_forced());
        assert_eq!(report.aborted, 1);
        assert!(request.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn bind_conflict_closes_server() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config(Duration::from_secs(1));
        config.listen = taken.local_addr().unwrap().to_string();

        let server = plain(config, Router::new());
        let err = server.run().await.unwrap_err();
        assert!(matches!(err, Error::Listener(_)));
        assert_eq!(server.state(), ServerState::Closed);
        assert_eq!(server.listening().await, None);
    }

    #[tokio::test]
    async fn interrupt_before_run_skips_serving() {
        let server = plain(config(Duration::from_secs(1)), Router::new());
        server.interrupt(None);
        server.interrupt(None);

        server.run().await.unwrap();
        assert_eq!(server.state(), ServerState::Closed);
        assert!(server.shutdown_report().is_none());
    }

    #[tokio::test]
    async fn closed_server_cannot_run_again() {
        let server = Arc::new(plain(config(Duration::from_secs(1)), Router::new()));
        let handle = spawn(&server);
        server.listening().await.unwrap();
        server.interrupt(None);
        handle.await.unwrap().unwrap();

        assert!(matches!(server.run().await, Err(Error::ServerClosed)));
    }

    #[tokio::test]
    async fn drain_counts_live_connections_only() {
        let server = plain(config(Duration::from_millis(50)), Router::new());
        let mut connections = JoinSet::new();

        let finished = server.tracker.track();
        connections.spawn(async move { drop(finished) });
        let stuck = server.tracker.track();
        connections.spawn(async move {
            let _stuck = stuck;
            std::future::pending::<()>().await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connections.len(), 2);

        let report = server.drain(&mut connections).await;
        assert!(report.is_forced());
        assert_eq!(report.in_flight, 1);
        assert_eq!(report.aborted, 1);
        assert_eq!(server.active_connections(), 0);
    }

    #[tokio::test]
    async fn connection_logs_carry_its_id() {
        let sink = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let server = Arc::new(plain(config(Duration::from_secs(1)), Router::new().route("/", get(|| async { "ok" }))));
        let handle = spawn(&server);
        let addr = server.listening().await.unwrap();
        reqwest::get(format!("http://{addr}/")).await.unwrap();
        server.interrupt(None);
        handle.await.unwrap().unwrap();

        let output = sink.contents();
        assert!(output.contains("connection{id=conn-"), "{output}");
        assert!(output.contains("Connection accepted"), "{output}");
    }
}
