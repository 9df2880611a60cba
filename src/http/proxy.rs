//! Reverse proxy to the metrics upstreams.
//!
//! # Responsibilities
//! - Forward query requests to `--metrics.query.endpoint`, appending the
//!   path below `/api/metrics/v1/`
//! - Forward remote-write requests to `--metrics.write.endpoint`
//! - Copy upstream responses back through the proxy buffers
//!
//! # Design Decisions
//! - Request bodies stream to the upstream as they arrive, with no size limit
//! - Response bodies are copied in chunks of at most the buffer size; a
//!   response holds one pooled buffer while it is copied
//! - An empty pool never makes a request wait; the copy allocates instead
//! - Hop-by-hop headers are stripped in both directions
//! - Upstream connection failures map to 502; upstream status codes are
//!   passed through untouched

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderName, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use futures_util::{stream, StreamExt};
use hyper::body::Incoming;
use tokio::sync::Semaphore;
use url::Url;

use crate::config::ProxyConfig;
use crate::http::request::request_id;
use crate::observability::metrics;

/// Headers meaningful only for a single transport-level connection.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Which upstream a request is forwarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Query,
    Write,
}

impl Upstream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Upstream::Query => "query",
            Upstream::Write => "write",
        }
    }
}

/// Forwards requests to the configured upstreams.
pub struct Proxy {
    client: Client<HttpConnector, Body>,
    buffers: Arc<Semaphore>,
    buffer_size: usize,
    query_endpoint: Url,
    write_endpoint: Url,
}

impl Proxy {
    pub fn new(config: &ProxyConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            client,
            buffers: Arc::new(Semaphore::new(config.buffer_count)),
            buffer_size: config.buffer_size_bytes,
            query_endpoint: config.query_endpoint.clone(),
            write_endpoint: config.write_endpoint.clone(),
        }
    }

    /// Buffers not currently held by a response copy.
    pub fn available_buffers(&self) -> usize {
        self.buffers.available_permits()
    }

    /// Forward `request` to `upstream`, with `path` appended to the endpoint path.
    pub async fn forward(&self, upstream: Upstream, path: &str, request: Request<Body>) -> Response {
        let request_id = request_id(&request).unwrap_or("unknown").to_string();
        let (parts, body) = request.into_parts();

        let base = match upstream {
            Upstream::Query => &self.query_endpoint,
            Upstream::Write => &self.write_endpoint,
        };
        let uri = match target_uri(base, path, parts.uri.query()) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Invalid upstream URI");
                metrics::record_proxy_request(upstream.as_str(), StatusCode::BAD_GATEWAY.as_u16());
                return (StatusCode::BAD_GATEWAY, "invalid upstream URI").into_response();
            }
        };

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        let mut forwarded = Request::new(body);
        *forwarded.method_mut() = parts.method;
        *forwarded.uri_mut() = uri;
        *forwarded.headers_mut() = headers;

        tracing::debug!(
            request_id = %request_id,
            upstream = upstream.as_str(),
            uri = %forwarded.uri(),
            "Forwarding request"
        );

        match self.client.request(forwarded).await {
            Ok(response) => {
                let status = response.status();
                metrics::record_proxy_request(upstream.as_str(), status.as_u16());

                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, self.copy(body))
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    upstream = upstream.as_str(),
                    error = %e,
                    "Upstream request failed"
                );
                metrics::record_proxy_request(upstream.as_str(), StatusCode::BAD_GATEWAY.as_u16());
                (StatusCode::BAD_GATEWAY, "upstream request failed").into_response()
            }
        }
    }

    /// Stream `body` back to the client in buffer-sized chunks, holding a
    /// pooled buffer until the copy is dropped.
    fn copy(&self, body: Incoming) -> Body {
        let buffer = Arc::clone(&self.buffers).try_acquire_owned().ok();
        if buffer.is_none() {
            tracing::debug!("Proxy buffers exhausted, allocating");
        }
        let chunk = self.buffer_size.max(1);

        let chunks = Body::new(body).into_data_stream().flat_map(move |frame| {
            let _buffer = &buffer;
            let pieces = match frame {
                Ok(data) => split(data, chunk).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(pieces)
        });
        Body::from_stream(chunks)
    }
}

/// Cut `data` into pieces of at most `chunk` bytes without copying.
fn split(mut data: Bytes, chunk: usize) -> Vec<Bytes> {
    let mut pieces = Vec::with_capacity(data.len() / chunk + 1);
    while data.len() > chunk {
        pieces.push(data.split_to(chunk));
    }
    pieces.push(data);
    pieces
}

/// Join `path` onto `base` and carry over the incoming query string.
fn target_uri(base: &Url, path: &str, query: Option<&str>) -> Result<Uri, axum::http::uri::InvalidUri> {
    let mut url = base.clone();
    let path = path.trim_start_matches('/');
    if !path.is_empty() {
        let joined = format!("{}/{}", base.path().trim_end_matches('/'), path);
        url.set_path(&joined);
    }
    if query.is_some() {
        url.set_query(query);
    }
    url.as_str().parse()
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}
