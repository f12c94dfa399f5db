//! `SubscriptionClient`: thin client over `tokio-tungstenite`.
//!
//! Commands are queued and return immediately; replies arrive as
//! [`ClientEvent`]s through `on(kind, fn)` observers and the `events()` channel.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use presence_core::time::now_millis;
use presence_core::{CommandKind, Message};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::events::{ClientEvent, ClientEventKind, EventHandlers};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the connection ended without a close frame.
const ABNORMAL_CLOSE: u16 = 1006;

/// Capacity of the `events()` broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

struct Shared {
    config: ClientConfig,
    handlers: EventHandlers,
    events_tx: broadcast::Sender<ClientEvent>,
}

impl Shared {
    fn emit(&self, event: ClientEvent) {
        let _ = self.handlers.dispatch(&event);
        let _ = self.events_tx.send(event);
    }
}

struct Link {
    out_tx: mpsc::Sender<WsMessage>,
    task: JoinHandle<()>,
}

/// Client holding at most one connection to a presence server.
pub struct SubscriptionClient {
    shared: Arc<Shared>,
    link: Mutex<Option<Link>>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl SubscriptionClient {
    /// Create a disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                handlers: EventHandlers::default(),
                events_tx,
            }),
            link: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Open the connection and emit [`ClientEvent::Open`].
    ///
    /// A second call while connected logs a warning and does nothing.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            warn!("client is already connected");
            return Ok(());
        }

        let address = self.shared.config.server_address.clone();
        let ws = match connect_async(address.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                warn!(%address, error = %e, "connection failed");
                self.shared.emit(ClientEvent::Error(e.to_string()));
                return Err(ClientError::Connect {
                    address,
                    source: Box::new(e),
                });
            }
        };

        let (out_tx, out_rx) = mpsc::channel(self.shared.config.max_send_queue);
        let shared = self.shared.clone();
        let task = tokio::spawn(async move { run_link(ws, out_rx, &shared).await });
        if let Some(previous) = self.link.lock().replace(Link { out_tx, task }) {
            previous.task.abort();
        }
        info!(%address, "connected");
        self.shared.emit(ClientEvent::Open);
        Ok(())
    }

    /// Whether a connection is open.
    pub fn is_connected(&self) -> bool {
        self.link
            .lock()
            .as_ref()
            .is_some_and(|link| !link.out_tx.is_closed())
    }

    /// Ask the server to subscribe this connection.
    pub fn subscribe(&self) -> Result<(), ClientError> {
        self.send_command(CommandKind::Subscribe)
    }

    /// Ask the server to unsubscribe this connection.
    pub fn unsubscribe(&self) -> Result<(), ClientError> {
        self.send_command(CommandKind::Unsubscribe)
    }

    /// Ask the server for the number of active subscribers.
    pub fn subscribers_count(&self) -> Result<(), ClientError> {
        self.send_command(CommandKind::CountSubscribers)
    }

    /// Send arbitrary text.
    pub fn send(&self, data: impl Into<String>) -> Result<(), ClientError> {
        let text: String = data.into();
        self.queue(WsMessage::Text(text.into()))
    }

    /// Send a JSON value as text.
    pub fn send_json(&self, value: &Value) -> Result<(), ClientError> {
        self.send(value.to_string())
    }

    /// Close the connection with a normal close frame.
    ///
    /// [`ClientEvent::Close`] is emitted once the server completes the handshake.
    pub fn close(&self) -> Result<(), ClientError> {
        self.queue(WsMessage::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: String::new().into(),
        })))
    }

    /// Register an observer for one event kind.
    pub fn on<F>(&self, kind: ClientEventKind, handler: F)
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.shared.handlers.register(kind, Arc::new(handler));
    }

    /// Subscribe to every event emitted from now on.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events_tx.subscribe()
    }

    fn send_command(&self, kind: CommandKind) -> Result<(), ClientError> {
        let json = Message::command(kind)
            .encode()
            .map_err(|e| ClientError::Send(e.to_string()))?;
        self.send(json)
    }

    fn queue(&self, message: WsMessage) -> Result<(), ClientError> {
        let out_tx = self
            .link
            .lock()
            .as_ref()
            .map(|link| link.out_tx.clone())
            .ok_or(ClientError::NotConnected)?;
        out_tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => ClientError::NotConnected,
            mpsc::error::TrySendError::Full(_) => ClientError::Send("send queue is full".into()),
        })
    }
}

impl Drop for SubscriptionClient {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.task.abort();
        }
    }
}

/// What an inbound payload asks of the client.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    /// A heartbeat that must be echoed.
    Heartbeat,
    /// A reply to report.
    Event(ClientEvent),
}

fn classify(raw: &str) -> Inbound {
    let protocol_error = |message: Option<Message>| {
        Inbound::Event(ClientEvent::ProtocolError {
            raw: raw.to_owned(),
            message,
        })
    };
    let Ok(message) = Message::decode(raw) else {
        return protocol_error(None);
    };
    match (message.kind, message.count, message.updated_at) {
        (CommandKind::Heartbeat, _, _) => Inbound::Heartbeat,
        (CommandKind::Subscribe, _, updated_at) => {
            Inbound::Event(ClientEvent::Subscribed { updated_at })
        }
        (CommandKind::Unsubscribe, _, updated_at) => {
            Inbound::Event(ClientEvent::Unsubscribed { updated_at })
        }
        (CommandKind::CountSubscribers, Some(count), Some(updated_at)) => {
            Inbound::Event(ClientEvent::Count { count, updated_at })
        }
        _ => protocol_error(Some(message)),
    }
}

async fn run_link(mut ws: WsStream, mut out_rx: mpsc::Receiver<WsMessage>, shared: &Shared) {
    let mut close = (ABNORMAL_CLOSE, String::new());

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                let Some(frame) = outbound else { break };
                if let Err(e) = ws.send(frame).await {
                    warn!(error = %e, "send failed");
                    shared.emit(ClientEvent::Error(e.to_string()));
                    break;
                }
            }
            inbound = ws.next() => {
                let text = match inbound {
                    Some(Ok(WsMessage::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(WsMessage::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
                    Some(Ok(WsMessage::Close(frame))) => {
                        if let Some(frame) = frame {
                            close = (u16::from(frame.code), frame.reason.as_str().to_owned());
                        }
                        debug!(code = close.0, reason = %close.1, "server sent close frame");
                        continue;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket transport error");
                        shared.emit(ClientEvent::Error(e.to_string()));
                        break;
                    }
                    None => break,
                };
                if let Some(reply) = handle_inbound(&text, shared) {
                    if let Err(e) = ws.send(reply).await {
                        warn!(error = %e, "heartbeat reply failed");
                    }
                }
            }
        }
    }

    out_rx.close();
    info!(code = close.0, reason = %close.1, "connection closed");
    shared.emit(ClientEvent::Close {
        code: close.0,
        reason: close.1,
    });
}

/// Log and report one inbound payload. Returns the frame to send back, if any.
fn handle_inbound(raw: &str, shared: &Shared) -> Option<WsMessage> {
    match classify(raw) {
        Inbound::Heartbeat => {
            if !shared.config.silence_heartbeat {
                info!(raw, "heartbeat received");
            }
            match Message::heartbeat(now_millis()).encode() {
                Ok(json) => Some(WsMessage::Text(json.into())),
                Err(e) => {
                    warn!(error = %e, "failed to encode heartbeat reply");
                    None
                }
            }
        }
        Inbound::Event(event) => {
            info!(received_at = now_millis(), raw, "message received");
            if let ClientEvent::ProtocolError { .. } = &event {
                warn!(raw, "unexpected message from server");
            }
            shared.emit(event);
            None
        }
    }
}
