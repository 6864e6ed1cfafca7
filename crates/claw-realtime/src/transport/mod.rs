//! Transport adapters.
//!
//! A [`Transport`] opens and closes physical links and reports their
//! lifecycle through a [`TransportSink`]. Signals must be delivered in the
//! order they happen on the link; the manager relies on that ordering.

use std::fmt;
use std::sync::Arc;

use crate::error::TransportError;

mod channel;
mod websocket;

pub use channel::{ChannelPeer, ChannelTransport};
pub use websocket::WebSocketTransport;

/// Close reason the server uses to say "do not reconnect".
pub const PERMANENT_CLOSE_REASON: &str = "server-initiated-permanent";

/// Identifier of one physical link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportId(String);

impl TransportId {
    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a link closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the link and asked not to be retried.
    ServerPermanent,
    /// Anything else; worth retrying.
    Other(String),
}

impl DisconnectReason {
    /// Classify a close reason string.
    #[must_use]
    pub fn parse(reason: &str) -> Self {
        if reason == PERMANENT_CLOSE_REASON {
            Self::ServerPermanent
        } else {
            Self::Other(reason.to_string())
        }
    }

    /// Whether the manager should try again.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ServerPermanent)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerPermanent => f.write_str(PERMANENT_CLOSE_REASON),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

/// Lifecycle signal reported by a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// The link is open.
    Opened,
    /// The link failed.
    Error(String),
    /// The link closed.
    Closed(DisconnectReason),
    /// A text frame arrived.
    Message(String),
}

/// Callback side of a link; cheap to clone.
#[derive(Clone)]
pub struct TransportSink {
    deliver: Arc<dyn Fn(TransportSignal) + Send + Sync>,
}

impl fmt::Debug for TransportSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSink").finish_non_exhaustive()
    }
}

impl TransportSink {
    /// Build a sink from a delivery callback.
    pub fn new(deliver: impl Fn(TransportSignal) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Report a raw signal.
    pub fn signal(&self, signal: TransportSignal) {
        (self.deliver)(signal);
    }

    /// The link opened.
    pub fn opened(&self) {
        self.signal(TransportSignal::Opened);
    }

    /// The link failed.
    pub fn error(&self, message: impl Into<String>) {
        self.signal(TransportSignal::Error(message.into()));
    }

    /// The link closed.
    pub fn closed(&self, reason: DisconnectReason) {
        self.signal(TransportSignal::Closed(reason));
    }

    /// A text frame arrived.
    pub fn message(&self, text: impl Into<String>) {
        self.signal(TransportSignal::Message(text.into()));
    }
}

/// Adapter over one kind of physical link.
///
/// Methods must not block. `open` starts the handshake and returns
/// immediately; the outcome is reported through `sink`.
pub trait Transport: Send + 'static {
    /// Begin opening a link to `url`.
    fn open(&mut self, url: &str, sink: TransportSink) -> Result<TransportId, TransportError>;

    /// Queue a text frame on an open link.
    fn send(&mut self, id: &TransportId, text: String) -> Result<(), TransportError>;

    /// Close a link. Closing an unknown or closed link is a no-op, and no
    /// further signals are expected from it.
    fn close(&mut self, id: &TransportId);
}
