//! Read-only status dashboard over HTTP
//!
//! `GET /data` returns the latest published `StoreSnapshot` as JSON; every
//! other request gets the static page, which polls `/data` itself.
//!
//! Connections are served one at a time with keep-alive off. Each connection
//! is bounded by a timeout, and errors on one connection never stop the
//! accept loop.

use crate::domain::store::StoreSnapshot;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const INDEX_HTML: &str = include_str!("dashboard.html");

fn respond(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    snapshots: watch::Receiver<Arc<StoreSnapshot>>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    metrics.record_dashboard_request();
    debug!(method = %req.method(), path = %req.uri().path(), "dashboard_request");

    match (req.method(), req.uri().path()) {
        (&Method::GET, "/data") => {
            let snapshot = snapshots.borrow().clone();
            match serde_json::to_vec(&*snapshot) {
                Ok(json) => Ok(respond(StatusCode::OK, "application/json", Bytes::from(json))),
                Err(e) => {
                    metrics.record_dashboard_error();
                    error!(error = %e, "dashboard_serialize_error");
                    Ok(respond(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain; charset=utf-8",
                        Bytes::from_static(b"snapshot unavailable"),
                    ))
                }
            }
        }
        _ => Ok(respond(
            StatusCode::OK,
            "text/html; charset=utf-8",
            Bytes::from_static(INDEX_HTML.as_bytes()),
        )),
    }
}

/// Bind the first candidate port that accepts.
///
/// Each port gets `attempts` tries with `retry_wait` between them before the
/// next port is tried. Returns `None` if every port fails or shutdown is
/// signaled while waiting.
pub async fn bind_with_retry(
    bind_address: &str,
    ports: &[u16],
    attempts: u32,
    retry_wait: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<TcpListener> {
    let attempts = attempts.max(1);
    for &port in ports {
        for attempt in 1..=attempts {
            match TcpListener::bind((bind_address, port)).await {
                Ok(listener) => return Some(listener),
                Err(e) => {
                    warn!(
                        port = port,
                        attempt = attempt,
                        max_attempts = attempts,
                        error = %e,
                        "dashboard_bind_failed"
                    );
                }
            }
            if attempt < attempts {
                tokio::select! {
                    _ = tokio::time::sleep(retry_wait) => {}
                    _ = shutdown.changed() => {}
                }
                if *shutdown.borrow() {
                    return None;
                }
            }
        }
    }
    None
}

/// Serve connections one at a time until shutdown
pub async fn serve(
    listener: TcpListener,
    snapshots: watch::Receiver<Arc<StoreSnapshot>>,
    metrics: Arc<Metrics>,
    request_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "dashboard_started");
    }

    loop {
        if *shutdown.borrow() {
            break;
        }
        let stream = tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, _addr)) => stream,
                Err(e) => {
                    metrics.record_dashboard_error();
                    error!(error = %e, "dashboard_accept_error");
                    continue;
                }
            },
            res = shutdown.changed() => {
                if res.is_err() {
                    break;
                }
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let service = service_fn(|req| handle_request(req, snapshots.clone(), metrics.clone()));
        let conn = http1::Builder::new().keep_alive(false).serve_connection(io, service);

        match tokio::time::timeout(request_timeout, conn).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                metrics.record_dashboard_error();
                warn!(error = %e, "dashboard_http_error");
            }
            Err(_) => {
                metrics.record_dashboard_error();
                warn!(timeout_ms = %request_timeout.as_millis(), "dashboard_request_timeout");
            }
        }
    }

    info!("dashboard_shutdown");
}

/// Bind per config and serve; returns early if no port could be bound
pub async fn run_dashboard(
    config: Config,
    snapshots: watch::Receiver<Arc<StoreSnapshot>>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(listener) = bind_with_retry(
        config.dashboard_bind_address(),
        config.dashboard_ports(),
        config.dashboard_bind_attempts(),
        Duration::from_millis(config.dashboard_retry_wait_ms()),
        &mut shutdown,
    )
    .await
    else {
        error!(ports = ?config.dashboard_ports(), "dashboard_unavailable");
        return;
    };

    serve(
        listener,
        snapshots,
        metrics,
        Duration::from_millis(config.dashboard_request_timeout_ms()),
        shutdown,
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_with_retry_falls_through_to_next_port() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let busy = taken.local_addr().unwrap().port();
        let (_tx, mut shutdown) = watch::channel(false);

        let listener =
            bind_with_retry("127.0.0.1", &[busy, 0], 2, Duration::from_millis(1), &mut shutdown)
                .await
                .unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), busy);
    }

    #[tokio::test]
    async fn test_bind_with_retry_gives_up() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let busy = taken.local_addr().unwrap().port();
        let (_tx, mut shutdown) = watch::channel(false);

        let listener =
            bind_with_retry("127.0.0.1", &[busy], 3, Duration::from_millis(1), &mut shutdown).await;
        assert!(listener.is_none());
    }

    #[test]
    fn test_index_page_polls_data() {
        assert!(INDEX_HTML.contains("fetch('/data')"));
    }
}
