//! Topic subscriptions over WebSocket
//!
//! Clients send bare `ChannelMessage` JSON. The relay stamps each message with
//! the subscriber's participant and forwards it to the topic as a
//! `RelayFrame::Envelope`.

use crate::server::RelayState;
use crate::topics::{Subscription, Topics};
use crate::{RelayError, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tandem_core::{ChannelMessage, Envelope, ParticipantId};
use tandem_sync::RelayFrame;
use tracing::{debug, info, trace, warn};

pub fn topic_routes() -> Router<RelayState> {
    Router::new().route("/topics/{*topic}", get(subscribe))
}

#[derive(Debug, Deserialize)]
struct SubscribeParams {
    participant: ParticipantId,
}

/// `Path` hands over the topic already percent-decoded.
async fn subscribe(
    State(state): State<RelayState>,
    Path(topic): Path<String>,
    Query(params): Query<SubscribeParams>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let participant = params.participant;
    if state.config.is_denied(&topic) {
        warn!(topic = %topic, %participant, "Refusing subscription to denied topic");
        return Err(RelayError::Forbidden(topic));
    }

    let topics = state.topics.clone();
    Ok(ws.on_upgrade(move |socket| run_session(socket, topic, participant, topics)))
}

async fn run_session(
    socket: WebSocket,
    topic: String,
    participant: ParticipantId,
    topics: Arc<Topics>,
) {
    let Subscription { id, mut frames } = topics.subscribe(&topic, participant);
    info!(topic = %topic, %participant, "Subscriber connected");

    let (mut write, read) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if !send_frame(&mut write, &frame).await {
                return;
            }
        }
        // The registry let go of us for falling behind.
        let lagged = RelayFrame::Error {
            fatal: false,
            reason: "subscriber lagged".to_string(),
        };
        let _ = send_frame(&mut write, &lagged).await;
        let _ = write.close().await;
    });

    tokio::select! {
        _ = &mut writer => {}
        _ = relay_incoming(read, &topics, &topic, id, participant) => {}
    }

    writer.abort();
    topics.unsubscribe(&topic, id);
    info!(topic = %topic, %participant, "Subscriber disconnected");
}

/// Forward everything the client publishes until it goes away.
async fn relay_incoming(
    mut read: SplitStream<WebSocket>,
    topics: &Topics,
    topic: &str,
    id: u64,
    participant: ParticipantId,
) {
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<ChannelMessage>(text.as_str()) {
                    Ok(message) => {
                        let envelope = Envelope {
                            origin: participant,
                            message,
                        };
                        let delivered = topics.broadcast(topic, id, &envelope);
                        trace!(topic, delivered, "Relayed message");
                    }
                    Err(e) => warn!(topic, %participant, error = %e, "Dropping malformed message"),
                }
            }
            Ok(Message::Close(_)) => return,
            Ok(_) => {}
            Err(e) => {
                debug!(topic, %participant, error = %e, "Socket read failed");
                return;
            }
        }
    }
}

/// False once the socket can no longer be written.
async fn send_frame<S>(write: &mut S, frame: &RelayFrame) -> bool
where
    S: SinkExt<Message> + Unpin,
{
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Failed to encode relay frame");
            return true;
        }
    };
    write.send(Message::Text(text.into())).await.is_ok()
}
