//! # presence-core
//!
//! Shared vocabulary for the presence server and client:
//!
//! - **Protocol**: the closed [`CommandKind`] set and the [`Message`] wire value
//! - **Errors**: [`ProtocolError`], the only failures a subscriber ever observes
//! - **Ids**: [`ConnectionId`], the server-side identity of a subscriber
//! - **Time**: epoch-millisecond clock used for every `updatedAt`

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod protocol;
pub mod time;

pub use errors::ProtocolError;
pub use ids::ConnectionId;
pub use protocol::{CommandKind, Message, parse_command};
