//! WebSocket client for `tandem-relay`.
//!
//! One socket per subscription, at `{base}/topics/{topic}?participant={id}`.
//! The client sends bare [`ChannelMessage`] JSON; the relay stamps the origin
//! and answers with [`RelayFrame`]s.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tandem_core::{
    ChannelConnection, ChannelError, ChannelEvent, ChannelMessage, ChannelResult, ChannelSink,
    ChannelTransport, Envelope, ParticipantId,
};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, http::StatusCode, Message};
use tracing::{debug, info, warn};

/// Frames sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayFrame {
    /// A message published by another subscriber of the topic.
    Envelope(Envelope),
    /// The relay is closing the subscription.
    Error { fatal: bool, reason: String },
}

impl RelayFrame {
    /// Channel error a client should report for an `Error` frame.
    pub fn closing_error(fatal: bool, reason: String) -> ChannelError {
        if fatal {
            ChannelError::PermissionDenied(reason)
        } else {
            ChannelError::Transient(reason)
        }
    }
}

/// [`ChannelTransport`] backed by a `tandem-relay` server.
#[derive(Debug, Clone)]
pub struct WsTransport {
    base_url: String,
}

impl WsTransport {
    /// `base_url` is the relay root, e.g. `ws://127.0.0.1:4455`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Subscription URL for `topic`; each path segment is percent-encoded.
    pub fn topic_url(&self, topic: &str, participant: ParticipantId) -> String {
        let path = topic
            .split('/')
            .map(urlencoding::encode)
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/topics/{}?participant={}",
            self.base_url.trim_end_matches('/'),
            path,
            participant
        )
    }
}

#[async_trait]
impl ChannelTransport for WsTransport {
    async fn subscribe(
        &self,
        topic: &str,
        participant: ParticipantId,
    ) -> ChannelResult<ChannelConnection> {
        let url = self.topic_url(topic, participant);
        debug!(url = %url, "Connecting to relay");

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(connect_error)?;
        info!(topic, %participant, "Subscribed through relay");

        let (write, read) = stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_writer(write, outbound_rx));
        tokio::spawn(run_reader(read, events_tx));

        Ok(ChannelConnection {
            sink: Arc::new(WsSink {
                outbound: outbound_tx,
            }),
            events: events_rx,
        })
    }
}

fn connect_error(error: tungstenite::Error) -> ChannelError {
    match &error {
        tungstenite::Error::Http(response) if response.status() == StatusCode::FORBIDDEN => {
            ChannelError::PermissionDenied(format!("relay refused subscription: {error}"))
        }
        _ => ChannelError::Transient(error.to_string()),
    }
}

/// Queues messages for the writer task; dropping it closes the socket.
struct WsSink {
    outbound: mpsc::UnboundedSender<ChannelMessage>,
}

impl ChannelSink for WsSink {
    fn publish(&self, message: ChannelMessage) -> ChannelResult<()> {
        self.outbound
            .send(message)
            .map_err(|_| ChannelError::Closed)
    }
}

async fn run_writer<S>(mut write: S, mut outbound: mpsc::UnboundedReceiver<ChannelMessage>)
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(message) = outbound.recv().await {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode channel message");
                continue;
            }
        };
        if let Err(e) = write.send(Message::text(text)).await {
            debug!(error = %e, "Relay write failed");
            return;
        }
    }
    let _ = write.close().await;
}

async fn run_reader<S>(mut read: S, events: mpsc::UnboundedSender<ChannelEvent>)
where
    S: StreamExt<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let reason = loop {
        let Some(message) = read.next().await else {
            break ChannelError::Closed;
        };
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<RelayFrame>(&text) {
                Ok(RelayFrame::Envelope(envelope)) => {
                    if events.send(ChannelEvent::Message(envelope)).is_err() {
                        // Subscriber went away.
                        return;
                    }
                }
                Ok(RelayFrame::Error { fatal, reason }) => {
                    break RelayFrame::closing_error(fatal, reason);
                }
                Err(e) => warn!(error = %e, "Ignoring unreadable relay frame"),
            },
            Ok(Message::Close(_)) => {
                break ChannelError::Transient("relay closed the connection".to_string());
            }
            Ok(_) => {}
            Err(e) => break ChannelError::Transient(e.to_string()),
        }
    };
    let _ = events.send(ChannelEvent::Closed(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::UpdateFrame;

    #[test]
    fn test_topic_url() {
        let participant = ParticipantId::new();
        let transport = WsTransport::new("ws://127.0.0.1:4455/");
        assert_eq!(
            transport.topic_url("2026/notes-1", participant),
            format!("ws://127.0.0.1:4455/topics/2026/notes-1?participant={participant}")
        );
    }

    #[test]
    fn test_topic_url_escapes_segments() {
        let participant = ParticipantId::new();
        let transport = WsTransport::new("ws://127.0.0.1:4455");
        assert_eq!(
            transport.topic_url("2026/q3 plan?#1", participant),
            format!("ws://127.0.0.1:4455/topics/2026/q3%20plan%3F%231?participant={participant}")
        );
    }

    #[test]
    fn test_relay_frame_wire_shape() {
        let origin = ParticipantId::new();
        let frame = RelayFrame::Envelope(Envelope {
            origin,
            message: ChannelMessage::Update {
                frame: UpdateFrame::from(vec![1, 2, 3]),
            },
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["kind"], "envelope");
        assert_eq!(json["origin"], origin.to_string());
        assert_eq!(json["message"]["type"], "update");

        let error: RelayFrame = serde_json::from_value(serde_json::json!({
            "kind": "error",
            "fatal": true,
            "reason": "denied"
        }))
        .unwrap();
        assert_eq!(
            error,
            RelayFrame::Error {
                fatal: true,
                reason: "denied".to_string()
            }
        );
    }

    #[test]
    fn test_closing_error_fatality() {
        assert!(RelayFrame::closing_error(true, "no".into()).is_fatal());
        assert!(!RelayFrame::closing_error(false, "restart".into()).is_fatal());
    }
}
