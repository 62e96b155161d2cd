//! WebSocket client implementation
//!
//! Owns one connection to the gateway: serializes outgoing JSON envelopes
//! from an unbounded queue, surfaces incoming frames as [`TransportEvent`]s.
//! There is no framing beyond one JSON object per text frame.

use crate::error::SignalError;
use futures::{SinkExt, StreamExt};
use log::{debug, error, warn};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Sub-protocol required by Janus-style gateways
const WS_SUBPROTOCOL: &str = "janus-protocol";

/// Close code reported when the remote sent no close frame
const NO_STATUS_CODE: u16 = 1005;

/// Connection-level events delivered to the session manager
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Socket is open and ready for traffic
    Open,
    /// One decoded JSON message
    Message(Value),
    /// Remote closed the connection
    Closed { code: u16, reason: String },
    /// Connection failed mid-stream
    Failure(String),
}

enum Frame {
    Json(Value),
    Close,
}

/// Handle to one open WebSocket connection
pub struct Transport {
    outbound: mpsc::UnboundedSender<Frame>,
}

impl Transport {
    /// Connect to the gateway, negotiating the `janus-protocol` sub-protocol.
    ///
    /// Returns the sending handle and the event stream; an `Open` event is
    /// the first item on the stream.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), SignalError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| SignalError::Handshake(e.to_string()))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(WS_SUBPROTOCOL),
        );

        let (ws_stream, _response) = connect_async(request)
            .await
            .map_err(|e| SignalError::Transport(e.to_string()))?;
        debug!("WebSocket connected: {}", url);

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Writer task: drains the outbound queue, always leaves with a
        // close frame so the gateway drops the session promptly.
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                match frame {
                    Frame::Json(value) => {
                        if write.send(Message::Text(value.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Frame::Close => break,
                }
            }
            let _ = write.send(Message::Close(None)).await;
            let _ = write.close().await;
        });

        let _ = event_tx.send(TransportEvent::Open);

        // Reader task: one JSON object per text frame
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                        Ok(value) => {
                            if event_tx.send(TransportEvent::Message(value)).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Discarding non-JSON frame: {}", e),
                    },
                    Ok(Message::Close(close)) => {
                        let (code, reason) = close
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((NO_STATUS_CODE, String::new()));
                        warn!("WebSocket closed. Code: {}, Reason: {}", code, reason);
                        let _ = event_tx.send(TransportEvent::Closed { code, reason });
                        break;
                    }
                    // Binary, ping and pong frames are not part of the protocol
                    Ok(_) => {}
                    Err(e) => {
                        error!("WebSocket failed. Reason: {}", e);
                        let _ = event_tx.send(TransportEvent::Failure(e.to_string()));
                        break;
                    }
                }
            }
        });

        Ok((
            Self {
                outbound: outbound_tx,
            },
            event_rx,
        ))
    }

    /// Queue one JSON message. A closed connection makes this a no-op.
    pub fn send(&self, message: Value) {
        let _ = self.outbound.send(Frame::Json(message));
    }

    /// Ask the writer to send a close frame and stop
    pub fn close(&self) {
        let _ = self.outbound.send(Frame::Close);
    }

    /// Transport wired to a bare channel, for session tests
    #[cfg(test)]
    pub(crate) fn test_pair() -> (Self, TestOutbox) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Frame>();
        (
            Self {
                outbound: outbound_tx,
            },
            TestOutbox { rx: outbound_rx },
        )
    }
}

/// Receiving side of a [`Transport::test_pair`]. Since nothing drains the
/// queue asynchronously, every message sent before an assertion is
/// immediately visible to it.
#[cfg(test)]
pub(crate) struct TestOutbox {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[cfg(test)]
impl TestOutbox {
    /// Wait for the next JSON message; `None` once the transport closed
    pub(crate) async fn recv(&mut self) -> Option<Value> {
        loop {
            match self.rx.recv().await? {
                Frame::Json(value) => return Some(value),
                Frame::Close => return None,
            }
        }
    }

    /// Next already-queued JSON message, if any
    pub(crate) fn try_recv(&mut self) -> Option<Value> {
        while let Ok(frame) = self.rx.try_recv() {
            if let Frame::Json(value) = frame {
                return Some(value);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_pair_forwards_json() {
        let (transport, mut outbox) = Transport::test_pair();
        transport.send(json!({ "janus": "create", "transaction": "t" }));
        let value = outbox.recv().await.unwrap();
        assert_eq!(value["janus"], "create");
    }

    #[tokio::test]
    async fn send_after_close_is_noop() {
        let (transport, mut outbox) = Transport::test_pair();
        transport.close();
        transport.send(json!({ "janus": "keepalive" }));
        drop(transport);
        // The close sentinel ends the stream before the late send
        assert!(outbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        // Nothing listens on this port
        let result = Transport::connect("ws://127.0.0.1:1/janus").await;
        assert!(matches!(result, Err(SignalError::Transport(_))));
    }
}
