//! WebSocket session lifecycle: one connected subscriber from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use presence_core::ConnectionId;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, Outbound};
use super::connections::ConnectionSet;
use super::dispatcher::CommandDispatcher;

/// How long a peer has to answer our close frame before the socket is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a WebSocket session for a connected subscriber.
///
/// 1. Registers the connection in `connections`
/// 2. Forwards queued outbound frames to the socket
/// 3. Dispatches inbound text and binary frames in arrival order
/// 4. Drops the socket when the connection is terminated
/// 5. Clears the subscriber's registry entry on disconnect
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    connections: Arc<ConnectionSet>,
    dispatcher: Arc<CommandDispatcher>,
    max_send_queue: usize,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Outbound>(max_send_queue);
    let conn = Arc::new(ClientConnection::new(conn_id, send_tx));
    connections.add(conn.clone());
    info!(connections = connections.len(), "subscriber connected");

    let writer_conn = conn.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = send_rx.recv().await {
            match frame {
                Outbound::Text(text) => {
                    if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                        debug!(error = %e, "write failed");
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    if let Err(e) = ws_tx.send(Message::Close(Some(frame))).await {
                        debug!(error = %e, "close frame write failed");
                        writer_conn.terminate();
                        break;
                    }
                    tokio::time::sleep(CLOSE_TIMEOUT).await;
                    warn!("peer did not complete close handshake");
                    writer_conn.terminate();
                    break;
                }
            }
        }
    });

    let terminated = conn.terminated();
    loop {
        let frame = tokio::select! {
            () = terminated.cancelled() => {
                info!("connection terminated");
                break;
            }
            frame = ws_rx.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => dispatcher.handle_message(&conn, text.as_str()),
            Some(Ok(Message::Binary(data))) => dispatcher.handle_binary(&conn, &data),
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "peer sent close frame");
                break;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Err(e)) => {
                warn!(error = %e, "websocket transport error");
                break;
            }
            None => break,
        }
    }

    writer.abort();
    dispatcher.handle_close(&conn);
    let _ = connections.remove(&conn.id);
    info!(
        age_ms = conn.age().as_millis(),
        dropped = conn.drop_count(),
        "subscriber disconnected"
    );
}
