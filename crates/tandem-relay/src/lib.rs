//! # Tandem Relay
//!
//! Server side of the sync channel: one WebSocket per subscription at
//! `/topics/{topic}?participant={id}`, fan-out to the other subscribers of
//! the topic, and a prefix-based deny list answered with 403.

pub mod routes;
pub mod server;
pub mod topics;

mod error;

pub use error::{RelayError, Result};
pub use server::{router, serve, start_server, RelayConfig, RelayState};
pub use topics::Topics;
