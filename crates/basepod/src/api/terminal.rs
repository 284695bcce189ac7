//! Terminal endpoint — WebSocket ↔ exec bridge into an app's container.
//!
//! Binary frames carry terminal I/O in both directions. Text frames from
//! the client of the form `resize:<cols>,<rows>` resize the PTY.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::ExecSpec;
use crate::state::AppState;

/// Parse a `resize:<cols>,<rows>` control message.
fn parse_resize(text: &str) -> Option<(u16, u16)> {
    let spec = text.strip_prefix("resize:")?;
    let (cols, rows) = spec.split_once(',')?;
    Some((cols.trim().parse().ok()?, rows.trim().parse().ok()?))
}

pub async fn terminal_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_terminal(socket, state, id))
}

async fn handle_terminal(socket: WebSocket, state: AppState, app_id: Uuid) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let app = match state.store.get_app(&app_id).await {
        Ok(app) => app,
        Err(e) => {
            let _ = ws_tx
                .send(Message::Text(format!("ERROR: {}", e).into()))
                .await;
            return;
        }
    };
    let container = app
        .container_id
        .clone()
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| app.container_name());

    let spec = ExecSpec {
        cmd: vec!["/bin/sh".to_string()],
        tty: true,
        attach_stdin: true,
    };
    let exec_id = match state.engine.exec_create(&container, spec).await {
        Ok(id) => id,
        Err(e) => {
            let _ = ws_tx
                .send(Message::Text(format!("ERROR: {}", e).into()))
                .await;
            return;
        }
    };
    let mut session = match state.engine.exec_start(&exec_id, true).await {
        Ok(session) => session,
        Err(e) => {
            let _ = ws_tx
                .send(Message::Text(format!("ERROR: {}", e).into()))
                .await;
            return;
        }
    };

    debug!(app = %app.name, exec = %exec_id, "Terminal session opened");

    loop {
        tokio::select! {
            chunk = session.output.next() => {
                match chunk {
                    Some(Ok(chunk)) => {
                        if ws_tx.send(Message::Binary(chunk.data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Exec output stream error");
                        break;
                    }
                    None => break,
                }
            }
            message = ws_rx.next() => {
                match message {
                    Some(Ok(Message::Binary(data))) => {
                        if session.input.write_all(&data).await.is_err() {
                            break;
                        }
                        let _ = session.input.flush().await;
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Some((cols, rows)) = parse_resize(text.as_str()) {
                            if let Err(e) = state.engine.exec_resize(&exec_id, cols, rows).await {
                                warn!(error = %e, "Exec resize failed");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong handled by axum
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    debug!(app = %app.name, exec = %exec_id, "Terminal session closed");
}
