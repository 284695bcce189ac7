//! Source deploy endpoint — multipart upload with a line-streamed response.
//!
//! The body is `multipart/form-data` with a JSON `config` field and a
//! gzipped-tar `source` field. The response is plain text, one progress
//! line per chunk, flushed as the pipeline advances; client disconnect
//! cancels the build.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::deploy::SourceDeployConfig;
use crate::state::AppState;

use super::ApiError;

/// A line stream that cancels the deployment when the client goes away.
struct DeployStream {
    inner: ReceiverStream<String>,
    _cancel_on_drop: DropGuard,
}

impl Stream for DeployStream {
    type Item = Result<Bytes, std::convert::Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(line)) => {
                let mut framed = line.into_bytes();
                framed.push(b'\n');
                Poll::Ready(Some(Ok(Bytes::from(framed))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub async fn source_deploy(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut config: Option<SourceDeployConfig> = None;
    let mut source: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {}", e)))?
    {
        match field.name() {
            Some("config") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("config field: {}", e)))?;
                let parsed = serde_json::from_str(&raw)
                    .map_err(|e| ApiError::bad_request(format!("invalid config JSON: {}", e)))?;
                config = Some(parsed);
            }
            Some("source") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("source field: {}", e)))?;
                source = Some(bytes);
            }
            _ => {}
        }
    }

    let config = config.ok_or_else(|| ApiError::bad_request("missing 'config' field"))?;
    let source = source.ok_or_else(|| ApiError::bad_request("missing 'source' field"))?;
    if config.name.trim().is_empty() {
        return Err(ApiError::bad_request("config.name is required"));
    }

    let (tx, rx) = mpsc::channel::<String>(256);
    let cancel = CancellationToken::new();

    let deployer = state.deployer.clone();
    let deploy_cancel = cancel.clone();
    tokio::spawn(async move {
        // Errors are already streamed as `ERROR:` lines and recorded on
        // the App; nothing more to surface here.
        let _ = deployer
            .source_deploy(config, source, tx, deploy_cancel)
            .await;
    });

    let stream = DeployStream {
        inner: ReceiverStream::new(rx),
        _cancel_on_drop: cancel.drop_guard(),
    };

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response.headers_mut().insert(
        header::HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    Ok(response)
}
