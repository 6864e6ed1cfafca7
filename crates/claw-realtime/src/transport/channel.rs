//! In-process transport driven by a [`ChannelPeer`].
//!
//! The peer plays the server: it decides whether links open, pushes frames,
//! closes links and inspects what the client sent. Built for tests: every
//! link record and sent frame is kept for inspection, so it is not meant for
//! long-running use.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{DisconnectReason, Transport, TransportId, TransportSink};
use crate::error::TransportError;

/// How newly opened links are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptMode {
    /// Links wait for [`ChannelPeer::accept`] or [`ChannelPeer::refuse`].
    Manual,
    /// Links open immediately.
    AcceptAll,
    /// Links fail immediately.
    RefuseAll,
}

#[derive(Debug)]
struct LinkRecord {
    id: TransportId,
    url: String,
    sink: TransportSink,
    open: bool,
    closed_locally: bool,
    sent: Vec<String>,
}

#[derive(Debug)]
struct PeerState {
    mode: AcceptMode,
    links: Vec<LinkRecord>,
    next_id: u64,
}

impl PeerState {
    fn current(&mut self) -> Option<&mut LinkRecord> {
        self.links.last_mut().filter(|link| !link.closed_locally)
    }
}

/// Client half: hand it to the manager.
#[derive(Debug)]
pub struct ChannelTransport {
    state: Arc<Mutex<PeerState>>,
}

/// Server half: scripts link behavior.
#[derive(Debug, Clone)]
pub struct ChannelPeer {
    state: Arc<Mutex<PeerState>>,
}

impl ChannelTransport {
    /// Create a connected transport/peer pair. Links wait for the peer.
    #[must_use]
    pub fn pair() -> (Self, ChannelPeer) {
        let state = Arc::new(Mutex::new(PeerState {
            mode: AcceptMode::Manual,
            links: Vec::new(),
            next_id: 1,
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            ChannelPeer { state },
        )
    }
}

impl Transport for ChannelTransport {
    fn open(&mut self, url: &str, sink: TransportSink) -> Result<TransportId, TransportError> {
        let mut state = self.state.lock();
        let id = TransportId::new(format!("chan-{}", state.next_id));
        state.next_id += 1;

        let open = match state.mode {
            AcceptMode::Manual => false,
            AcceptMode::AcceptAll => {
                sink.opened();
                true
            }
            AcceptMode::RefuseAll => {
                sink.error("connection refused");
                false
            }
        };

        state.links.push(LinkRecord {
            id: id.clone(),
            url: url.to_string(),
            sink,
            open,
            closed_locally: false,
            sent: Vec::new(),
        });
        Ok(id)
    }

    fn send(&mut self, id: &TransportId, text: String) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let link = state
            .links
            .iter_mut()
            .find(|link| &link.id == id && link.open && !link.closed_locally)
            .ok_or_else(|| TransportError::LinkClosed(id.clone()))?;
        link.sent.push(text);
        Ok(())
    }

    fn close(&mut self, id: &TransportId) {
        let mut state = self.state.lock();
        if let Some(link) = state.links.iter_mut().find(|link| &link.id == id) {
            link.open = false;
            link.closed_locally = true;
        }
    }
}

impl ChannelPeer {
    /// Open every future link immediately.
    pub fn accept_all(&self) {
        self.state.lock().mode = AcceptMode::AcceptAll;
    }

    /// Fail every future link immediately.
    pub fn refuse_all(&self) {
        self.state.lock().mode = AcceptMode::RefuseAll;
    }

    /// Leave future links pending until accepted or refused.
    pub fn manual(&self) {
        self.state.lock().mode = AcceptMode::Manual;
    }

    /// Open the latest pending link. Returns `false` if there is none.
    pub fn accept(&self) -> bool {
        let mut state = self.state.lock();
        match state.current() {
            Some(link) if !link.open => {
                link.open = true;
                link.sink.opened();
                true
            }
            _ => false,
        }
    }

    /// Fail the latest pending link.
    pub fn refuse(&self, message: &str) -> bool {
        let mut state = self.state.lock();
        match state.current() {
            Some(link) if !link.open => {
                link.sink.error(message);
                true
            }
            _ => false,
        }
    }

    /// Report an error on the current link, open or not.
    pub fn fail(&self, message: &str) -> bool {
        let mut state = self.state.lock();
        match state.current() {
            Some(link) => {
                link.sink.error(message);
                true
            }
            None => false,
        }
    }

    /// Close the current open link from the server side with `reason`.
    pub fn close(&self, reason: &str) -> bool {
        let mut state = self.state.lock();
        match state.current() {
            Some(link) if link.open => {
                link.open = false;
                link.sink.closed(DisconnectReason::parse(reason));
                true
            }
            _ => false,
        }
    }

    /// Push a text frame on the current open link.
    pub fn push(&self, text: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        match state.current() {
            Some(link) if link.open => {
                link.sink.message(text);
                true
            }
            _ => false,
        }
    }

    /// Number of `open` calls seen.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.state.lock().links.len()
    }

    /// Number of links the client closed.
    #[must_use]
    pub fn local_closes(&self) -> usize {
        self.state
            .lock()
            .links
            .iter()
            .filter(|link| link.closed_locally)
            .count()
    }

    /// Whether the latest link is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .links
            .last()
            .is_some_and(|link| link.open && !link.closed_locally)
    }

    /// URL the latest link was opened with.
    #[must_use]
    pub fn last_url(&self) -> Option<String> {
        self.state.lock().links.last().map(|link| link.url.clone())
    }

    /// Every frame the client sent, across all links, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.state
            .lock()
            .links
            .iter()
            .flat_map(|link| link.sent.iter().cloned())
            .collect()
    }
}
