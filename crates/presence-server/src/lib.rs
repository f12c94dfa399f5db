//! # presence-server
//!
//! Server side of the presence protocol.
//!
//! - [`registry`]: delayed, idempotent subscribe/unsubscribe and the active count
//! - [`websocket`]: connection state, heartbeat supervision, command dispatch
//! - [`server`]: composition root with `listen` and `graceful_shutdown`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{RegistryError, ServerError};
pub use registry::{PendingUpdate, SubscriptionRecord, SubscriptionRegistry};
pub use server::SubscribeServer;
