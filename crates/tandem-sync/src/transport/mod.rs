//! Sync channel transports.
//!
//! - [`MemoryHub`] - in-process topics for tests and single-process
//!   deployments, with fault injection
//! - [`WsTransport`] - WebSocket client for `tandem-relay`

mod memory;
mod ws;

pub use memory::MemoryHub;
pub use ws::{RelayFrame, WsTransport};

use std::future::pending;
use tandem_core::{ChannelConnection, ChannelError, ChannelEvent};

/// Next event of an optional subscription; never resolves without one.
///
/// A subscription whose sender went away reads as closed.
pub(crate) async fn next_event(channel: &mut Option<ChannelConnection>) -> ChannelEvent {
    match channel {
        Some(connection) => connection
            .events
            .recv()
            .await
            .unwrap_or(ChannelEvent::Closed(ChannelError::Closed)),
        None => pending().await,
    }
}
