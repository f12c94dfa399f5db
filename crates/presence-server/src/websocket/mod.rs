//! WebSocket connection state, heartbeat supervision, command dispatch and sessions.

pub mod connection;
pub mod connections;
pub mod dispatcher;
pub mod heartbeat;
pub mod session;
