//! # presence-client
//!
//! Client side of the presence protocol: one WebSocket connection, fire-and-forget
//! commands, automatic heartbeat replies, and typed events for every reply.

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod errors;
pub mod events;

pub use client::SubscriptionClient;
pub use config::ClientConfig;
pub use errors::ClientError;
pub use events::{ClientEvent, ClientEventKind};
