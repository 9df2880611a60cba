//! Shared utilities for lifecycle integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use observatorium::config::{self, EnvToggles, Flags};
use observatorium::lifecycle::SignalTrigger;
use observatorium::Options;

/// Start a raw HTTP upstream that answers every request with `body` after
/// `delay`. `received` is notified as soon as a request has been read.
pub async fn start_upstream(delay: Duration, body: &'static str, received: Arc<Notify>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let received = received.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                received.notify_one();
                tokio::time::sleep(delay).await;

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Validated options pointing both upstreams at `upstream`.
pub fn options(listen: &str, upstream: SocketAddr, grace_period: &str) -> Options {
    let flags = Flags::try_parse_from([
        "observatorium".to_string(),
        format!("--listen={listen}"),
        format!("--grace-period={grace_period}"),
        format!("--metrics.query.endpoint=http://{upstream}/"),
        format!("--metrics.write.endpoint=http://{upstream}/api/v1/receive"),
        "--trace.exporter=stdout".to_string(),
        "--trace.sampler-probability=0".to_string(),
    ])
    .unwrap();
    config::load(flags, EnvToggles::default()).unwrap()
}

/// Wait until a signal watcher has subscribed to `trigger`.
pub async fn wait_for_subscriber(trigger: &SignalTrigger) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while trigger.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("signal watcher never subscribed");
}
