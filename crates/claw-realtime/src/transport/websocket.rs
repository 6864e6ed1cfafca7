//! WebSocket transport over tokio-tungstenite.

use std::collections::HashMap;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::{DisconnectReason, Transport, TransportId, TransportSink};
use crate::error::TransportError;

struct Link {
    outbound: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

/// One WebSocket connection per link, each driven by its own task.
///
/// Must be used from within a tokio runtime.
#[derive(Default)]
pub struct WebSocketTransport {
    links: HashMap<TransportId, Link>,
}

impl WebSocketTransport {
    /// Create a transport with no open links.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of links not yet closed locally.
    #[must_use]
    pub fn live_links(&self) -> usize {
        self.links.len()
    }

    async fn run_link(
        url: String,
        mut outbound: mpsc::UnboundedReceiver<Message>,
        sink: TransportSink,
    ) {
        // Nothing is queued before `opened`, so the only outbound event that
        // can arrive mid-handshake is the local close.
        let handshake = tokio::select! {
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
            None = outbound.recv() => {
                debug!(url = %url, "link closed during handshake");
                return;
            }
        };
        let ws = match handshake {
            Ok((ws, _)) => ws,
            Err(e) => {
                sink.error(format!("failed to connect: {e}"));
                return;
            }
        };
        sink.opened();

        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => sink.message(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.as_ref().map_or("", |f| &*f.reason);
                        sink.closed(DisconnectReason::parse(reason));
                        return;
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong are answered by tungstenite; binary frames are not part of the protocol
                    }
                    Some(Err(e)) => {
                        sink.closed(DisconnectReason::Other(format!("websocket error: {e}")));
                        return;
                    }
                    None => {
                        sink.closed(DisconnectReason::Other("connection closed".to_string()));
                        return;
                    }
                },
                msg = outbound.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = write.send(msg).await {
                            sink.closed(DisconnectReason::Other(format!("write failed: {e}")));
                            return;
                        }
                    }
                    None => {
                        // Closed locally; the manager expects no further signals.
                        let _ = write.send(Message::Close(None)).await;
                        return;
                    }
                },
            }
        }
    }
}

impl Transport for WebSocketTransport {
    fn open(&mut self, url: &str, sink: TransportSink) -> Result<TransportId, TransportError> {
        let parsed = url::Url::parse(url).map_err(|e| TransportError::InvalidEndpoint {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidEndpoint {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        let id = TransportId::random();
        let (outbound, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::run_link(url.to_string(), rx, sink));
        debug!(link = %id, url, "opening websocket link");

        self.links.insert(id.clone(), Link { outbound, task });
        Ok(id)
    }

    fn send(&mut self, id: &TransportId, text: String) -> Result<(), TransportError> {
        let link = self
            .links
            .get(id)
            .ok_or_else(|| TransportError::LinkClosed(id.clone()))?;
        link.outbound
            .send(Message::text(text))
            .map_err(|_| TransportError::LinkClosed(id.clone()))
    }

    fn close(&mut self, id: &TransportId) {
        if let Some(link) = self.links.remove(id) {
            debug!(link = %id, "closing websocket link");
            // Dropping the sender ends the link task, mid-handshake or after a
            // close frame.
            drop(link.outbound);
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        for (id, link) in self.links.drain() {
            warn!(link = %id, "aborting websocket link still open at drop");
            link.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> TransportSink {
        TransportSink::new(|_| {})
    }

    #[test]
    fn test_open_rejects_unparseable_url() {
        let mut transport = WebSocketTransport::new();
        let err = transport.open("not a url", sink()).expect_err("invalid url");
        assert!(matches!(err, TransportError::InvalidEndpoint { .. }));
        assert_eq!(transport.live_links(), 0);
    }

    #[test]
    fn test_open_rejects_http_scheme() {
        let mut transport = WebSocketTransport::new();
        let err = transport
            .open("http://example.com", sink())
            .expect_err("http is not websocket");
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_send_on_unknown_link() {
        let mut transport = WebSocketTransport::new();
        let err = transport
            .send(&TransportId::new("ghost"), "{}".to_string())
            .expect_err("unknown link");
        assert!(matches!(err, TransportError::LinkClosed(_)));
    }

    #[test]
    fn test_close_unknown_link_is_noop() {
        let mut transport = WebSocketTransport::new();
        transport.close(&TransportId::new("ghost"));
        assert_eq!(transport.live_links(), 0);
    }
}
