//! WebSocket transport using axum.
//!
//! One socket carries one session. Client frames (text or binary) are
//! demultiplexed into resize control messages and raw input; PTY output goes
//! back as binary frames, and a startup failure as a single JSON text frame
//! followed by a close frame.

use crate::server::AppState;
use crate::session::{Outbound, SessionController, OUTBOUND_CAPACITY};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use boxshell_core::{classify, SessionId};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Maximum inbound frame size (1 MiB).
pub const MAX_WS_FRAME_SIZE: usize = 1_048_576;

/// Client frames buffered ahead of the PTY writer.
const INBOUND_CAPACITY: usize = 256;

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub project: Option<String>,
}

/// `GET /` and `GET /ws`: upgrade and run a terminal session.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let workdir = params
        .project
        .as_deref()
        .and_then(|project| state.projects.resolve(project));
    let controller = SessionController::new(state.sessions.clone(), workdir);
    info!(
        session_id = %controller.id(),
        project = ?params.project,
        "terminal connection"
    );

    ws.max_message_size(MAX_WS_FRAME_SIZE)
        .on_upgrade(move |socket| serve_socket(socket, controller))
}

/// Pump one upgraded socket until either side finishes.
async fn serve_socket(socket: WebSocket, controller: SessionController) {
    let session_id = controller.id();
    let (sink, mut stream) = socket.split();
    let (in_tx, in_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);

    let session = tokio::spawn(controller.run(in_rx, out_tx));
    let mut writer = tokio::spawn(write_frames(session_id, sink, out_rx));

    let read = async {
        while let Some(frame) = stream.next().await {
            let payload = match frame {
                Ok(Message::Binary(data)) => classify(&data),
                Ok(Message::Text(text)) => classify(text.as_str().as_bytes()),
                Ok(Message::Close(_)) => break,
                // Pings are answered by axum.
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Err(e) => {
                    debug!(session_id = %session_id, error = %e, "WebSocket read ended");
                    break;
                }
            };
            if in_tx.send(payload).await.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        _ = read => {
            debug!(session_id = %session_id, "client disconnected");
            // Dropping the receiver wakes a session blocked on output or startup.
            writer.abort();
        }
        _ = &mut writer => debug!(session_id = %session_id, "session ended"),
    }
    // Dropping the input side is the controller's disconnect signal.
    drop(in_tx);

    match session.await {
        Ok(state) => debug!(session_id = %session_id, ?state, "session task finished"),
        Err(e) => warn!(session_id = %session_id, error = %e, "session task failed"),
    }
    if !writer.is_finished() {
        let _ = writer.await;
    }
}

async fn write_frames(
    session_id: SessionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
) {
    while let Some(msg) = outbound.recv().await {
        let frame = match msg {
            Outbound::Output(bytes) => Message::Binary(bytes.into()),
            Outbound::Notice(notice) => match notice.to_json() {
                Ok(json) => Message::Text(json.into()),
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "failed to encode notice");
                    continue;
                }
            },
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };
        if let Err(e) = sink.send(frame).await {
            debug!(session_id = %session_id, error = %e, "WebSocket write failed");
            break;
        }
    }
    let _ = sink.close().await;
}
