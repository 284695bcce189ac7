//! App domain proxy — front-door host-header routing to app upstreams.
//!
//! A request whose `Host` is not the dashboard but matches a running app's
//! domain is relayed verbatim to the app's loopback port, regardless of
//! path. Redirects are returned as-is so downstream cookies survive.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::apps::AppStatus;
use crate::state::AppState;

/// Headers that belong to the connection, not the request.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Strip an optional port from a Host header value.
pub fn host_only(host_header: &str) -> &str {
    host_header.split(':').next().unwrap_or(host_header)
}

fn request_host(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(host_only)
        .unwrap_or_default()
        .to_string()
}

/// Routing-stage gate: app-domain traffic is proxied before the path
/// router sees it, so an app may serve `/health` or `/api/...` itself.
pub async fn host_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let host = request_host(request.headers());
    if !host.is_empty()
        && host != state.config.dashboard_host()
        && state.store.get_app_by_domain(&host).await.is_ok()
    {
        return forward(&state, request).await;
    }
    next.run(request).await
}

/// Fallback handler for unmatched paths; resolves the Host again so
/// unknown hosts get a clean 404.
pub async fn proxy_request(State(state): State<AppState>, request: Request) -> Response {
    let host = request_host(request.headers());
    if host.is_empty() || host == state.config.dashboard_host() {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }
    forward(&state, request).await
}

/// Relay one request to the app owning the Host header.
pub async fn forward(state: &AppState, request: Request) -> Response {
    let host = request_host(request.headers());

    let app = match state.store.get_app_by_domain(&host).await {
        Ok(app) => app,
        Err(_) => {
            return (StatusCode::NOT_FOUND, format!("no app for host {}", host)).into_response()
        }
    };
    if app.status != AppStatus::Running || app.ports.host_port == 0 {
        return (
            StatusCode::BAD_GATEWAY,
            format!("app '{}' is not running", app.name),
        )
            .into_response();
    }

    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let upstream = format!("http://localhost:{}{}", app.ports.host_port, path_and_query);
    debug!(host = %host, upstream = %upstream, "Proxying app request");

    let mut upstream_request = state
        .proxy_http
        .request(parts.method.clone(), &upstream)
        .header("X-Forwarded-Host", &host)
        .header("X-Forwarded-Proto", "https");

    for (name, value) in parts.headers.iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) {
            continue;
        }
        upstream_request = upstream_request.header(name, value);
    }

    let body_bytes = match axum::body::to_bytes(body, crate::api::MAX_UPLOAD_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("body read failed: {}", e)).into_response()
        }
    };

    match upstream_request.body(body_bytes).send().await {
        Ok(upstream_response) => {
            let status = StatusCode::from_u16(upstream_response.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let mut builder = Response::builder().status(status);
            for (name, value) in upstream_response.headers().iter() {
                let lower = name.as_str().to_ascii_lowercase();
                if HOP_BY_HOP.contains(&lower.as_str()) {
                    continue;
                }
                builder = builder.header(name, value);
            }
            let stream = upstream_response.bytes_stream();
            builder
                .body(Body::from_stream(stream))
                .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
        Err(e) => {
            warn!(host = %host, error = %e, "Upstream unreachable");
            (StatusCode::BAD_GATEWAY, format!("upstream error: {}", e)).into_response()
        }
    }
}

/// The reqwest client used for app proxying: no redirect following, so 3xx
/// responses pass through untouched.
pub fn build_proxy_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_default()
}
