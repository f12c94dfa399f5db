//! `SubscribeServer`: Axum HTTP + WebSocket server wiring the registry,
//! the heartbeat supervisor and the command dispatcher together.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use presence_core::ConnectionId;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::registry::SubscriptionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connections::ConnectionSet;
use crate::websocket::dispatcher::CommandDispatcher;
use crate::websocket::heartbeat::HeartbeatSupervisor;
use crate::websocket::session::run_ws_session;

/// Close code sent to every subscriber on graceful shutdown ("going away").
pub const SHUTDOWN_CLOSE_CODE: u16 = 1001;

/// Close reason sent alongside [`SHUTDOWN_CLOSE_CODE`].
pub const SHUTDOWN_CLOSE_REASON: &str = "Server shutting down";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Open connections.
    pub connections: Arc<ConnectionSet>,
    /// Command dispatcher (owns a handle to the registry).
    pub dispatcher: Arc<CommandDispatcher>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server was created.
    pub start_time: Instant,
    /// Max inbound WebSocket message size.
    pub max_message_size: usize,
    /// Per-connection outbound queue bound.
    pub max_send_queue: usize,
}

struct Listening {
    addr: SocketAddr,
    task: Option<JoinHandle<()>>,
}

/// The subscription server.
pub struct SubscribeServer {
    config: ServerConfig,
    registry: SubscriptionRegistry,
    connections: Arc<ConnectionSet>,
    dispatcher: Arc<CommandDispatcher>,
    heartbeat: HeartbeatSupervisor,
    shutdown: Arc<ShutdownCoordinator>,
    listening: tokio::sync::Mutex<Option<Listening>>,
    start_time: Instant,
}

impl SubscribeServer {
    /// Create a server. Nothing is bound until [`Self::listen`].
    pub fn new(config: ServerConfig) -> Self {
        let registry =
            SubscriptionRegistry::new(config.subscribe_delay(), config.unsubscribe_delay());
        let heartbeat = HeartbeatSupervisor::new(config.heartbeat_interval());
        Self {
            dispatcher: Arc::new(CommandDispatcher::new(registry.clone())),
            registry,
            connections: Arc::new(ConnectionSet::new()),
            heartbeat,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            listening: tokio::sync::Mutex::new(None),
            start_time: Instant::now(),
            config,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            connections: self.connections.clone(),
            dispatcher: self.dispatcher.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            max_message_size: self.config.max_message_size,
            max_send_queue: self.config.max_send_queue,
        };

        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(state)
    }

    /// Bind `host:port` and start serving. Port `0` picks a free port.
    ///
    /// Starts the heartbeat supervisor. A second call logs a warning and
    /// returns the address already bound.
    pub async fn listen(&self, port: u16) -> Result<SocketAddr, ServerError> {
        let mut listening = self.listening.lock().await;
        if let Some(existing) = listening.as_ref() {
            warn!(addr = %existing.addr, "server is already listening");
            return Ok(existing.addr);
        }
        if self.shutdown.is_shutting_down() {
            return Err(ServerError::ShutDown);
        }

        let addr = format!("{}:{port}", self.config.host);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener.local_addr().map_err(ServerError::LocalAddr)?;

        let _ = self.heartbeat.start(self.connections.clone());

        let token = self.shutdown.token();
        let router = self.router();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server stopped with error");
            }
            debug!("listener task finished");
        });

        info!(addr = %local, "server listening");
        *listening = Some(Listening {
            addr: local,
            task: Some(task),
        });
        Ok(local)
    }

    /// Stop the heartbeat, stop accepting connections, close every open
    /// connection with code 1001, cancel pending registry operations and
    /// clear the registry. Idempotent.
    pub fn graceful_shutdown(&self) {
        if !self.shutdown.shutdown() {
            debug!("graceful shutdown already performed");
            return;
        }
        info!("graceful shutdown started");

        let _ = self.heartbeat.stop();
        let closed = self
            .connections
            .close_all(SHUTDOWN_CLOSE_CODE, SHUTDOWN_CLOSE_REASON);
        self.registry.cancel_pending();
        self.registry.clear_all();

        info!(closed, "graceful shutdown complete");
    }

    /// Wait up to `timeout` for the listener task to finish after shutdown.
    ///
    /// Returns `true` when nothing is left running.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let task = self
            .listening
            .lock()
            .await
            .as_mut()
            .and_then(|l| l.task.take());
        match task {
            Some(task) => self.shutdown.drain(vec![task], timeout).await,
            None => true,
        }
    }

    /// Address bound by [`Self::listen`], if listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.lock().await.as_ref().map(|l| l.addr)
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the subscription registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Get the open connections.
    pub fn connections(&self) -> &Arc<ConnectionSet> {
        &self.connections
    }

    /// Get the heartbeat supervisor.
    pub fn heartbeat(&self) -> &HeartbeatSupervisor {
        &self.heartbeat
    }

    /// Whether graceful shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_shutting_down(),
        state.connections.len(),
        state.dispatcher.registry().subscribers_count(),
    ))
}

/// GET / and GET /ws: upgrade to a subscriber session.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let conn_id = ConnectionId::new();
    let AppState {
        connections,
        dispatcher,
        max_message_size,
        max_send_queue,
        ..
    } = state;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(socket, conn_id, connections, dispatcher, max_send_queue)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::body::Body;
    use axum::http::Request;
    use presence_core::ConnectionId;
    use tower::ServiceExt;

    fn make_server() -> SubscribeServer {
        SubscribeServer::new(ServerConfig {
            subscribe_delay_ms: 0,
            unsubscribe_delay_ms: 0,
            ..ServerConfig::default()
        })
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let parsed = get_json(server.router(), "/health").await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["subscribers"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_counts_active_subscribers() {
        let server = make_server();
        let _ = server
            .registry()
            .subscribe(ConnectionId::from("a"))
            .await
            .unwrap();

        let parsed = get_json(server.router(), "/health").await;
        assert_eq!(parsed["subscribers"], 1);
    }

    #[tokio::test]
    async fn health_reports_shutdown() {
        let server = make_server();
        server.graceful_shutdown();
        let parsed = get_json(server.router(), "/health").await;
        assert_eq!(parsed["status"], "shutting_down");
    }

    #[tokio::test]
    async fn ws_route_requires_upgrade() {
        let server = make_server();
        for uri in ["/", "/ws"] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let resp = server.router().oneshot(req).await.unwrap();
            assert!(resp.status().is_client_error(), "{uri}: {}", resp.status());
        }
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_is_idempotent() {
        let server = make_server();
        let first = server.listen(0).await.unwrap();
        let second = server.listen(0).await.unwrap();
        assert_eq!(first, second);
        assert_ne!(first.port(), 0);
        assert_eq!(server.local_addr().await, Some(first));
        assert!(server.heartbeat().is_running());

        server.graceful_shutdown();
        assert!(server.drain(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let holder = make_server();
        let addr = holder.listen(0).await.unwrap();

        let server = make_server();
        let err = server.listen(addr.port()).await.unwrap_err();
        assert_matches!(err, ServerError::Bind { .. });
        assert!(!server.heartbeat().is_running());

        holder.graceful_shutdown();
    }

    #[tokio::test]
    async fn graceful_shutdown_is_idempotent_and_clears_state() {
        let server = make_server();
        let _ = server.listen(0).await.unwrap();
        let _ = server
            .registry()
            .subscribe(ConnectionId::from("a"))
            .await
            .unwrap();

        server.graceful_shutdown();
        server.graceful_shutdown();

        assert!(server.is_shutting_down());
        assert!(!server.heartbeat().is_running());
        assert_eq!(server.registry().subscribers_count(), 0);
        assert!(server.drain(Duration::from_secs(5)).await);
        assert!(server.drain(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn listen_after_shutdown_fails() {
        let server = make_server();
        server.graceful_shutdown();
        assert_matches!(server.listen(0).await, Err(ServerError::ShutDown));
    }

    #[test]
    fn default_config_is_kept() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert!(server.connections().is_empty());
    }
}
