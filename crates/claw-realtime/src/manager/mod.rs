//! Connection manager.
//!
//! [`ConnectionManager`] is a cheap handle. The state machine itself runs in
//! a driver task that owns the transport, the timers and the heartbeat
//! monitor; the handle talks to it over a channel and reads published state
//! for queries.

mod driver;
mod timers;

pub use timers::TimerSnapshot;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::config::ManagerConfig;
use crate::dispatch::EventDispatcher;
use crate::error::ConnectError;
use crate::events::ConnectionEvent;
use crate::state::{AtomicConnectionState, ConnectionState};
use crate::transport::{Transport, TransportId};
use driver::{Command, Driver, Input};

/// Buffered [`ConnectionEvent`]s per subscriber before it lags.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// State the driver publishes for synchronous queries.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) state: AtomicConnectionState,
    pub(crate) attempts: AtomicU32,
    pub(crate) transport_id: RwLock<Option<TransportId>>,
    pub(crate) timers: Mutex<TimerSnapshot>,
    pub(crate) closed: AtomicBool,
}

/// Handle to a running connection manager.
///
/// Dropping the handle closes the driver's inbox, which shuts the manager
/// down. Use [`shutdown`](Self::shutdown) to wait for the driver to finish.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Input>,
    shared: Arc<Shared>,
    events: broadcast::Sender<ConnectionEvent>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Spawn a manager for `config`, opening links through `transport` and
    /// publishing session updates to `bus`.
    ///
    /// Starts `Disconnected`; nothing is opened until [`connect`](Self::connect).
    /// Must be called from within a tokio runtime.
    pub fn start<T: Transport>(config: ManagerConfig, transport: T, bus: Arc<dyn EventBus>) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared::default());

        debug!(url = %config.url, enabled = config.enabled, "starting connection manager");
        let driver = Driver::new(
            config,
            Box::new(transport),
            EventDispatcher::new(bus),
            Arc::clone(&shared),
            events.clone(),
            inbox,
            commands.downgrade(),
        );
        let task = tokio::spawn(driver.run());

        Self {
            commands,
            shared,
            events,
            task: Some(task),
        }
    }

    /// Connect, resolving once the outcome is known.
    ///
    /// Resolves `true` once `Connected`. While a link is already opening it
    /// resolves `false` immediately; while a retry is pending it waits for
    /// that retry cycle. Rejects with [`ConnectError::MaxAttemptsExceeded`]
    /// once the retry budget is spent. A manual disconnect resolves pending
    /// calls with `false`.
    pub async fn connect(&self) -> Result<bool, ConnectError> {
        self.request(Command::Connect).await
    }

    /// Reset the retry counter, tear the current link down and connect
    /// again. Pending reconnect timers are cancelled first.
    pub async fn force_reconnect(&self) -> Result<bool, ConnectError> {
        self.request(Command::ForceReconnect).await
    }

    /// Cancel every timer, close the link and reset the retry counter.
    ///
    /// Idempotent.
    pub async fn disconnect(&self) {
        let (ack, done) = oneshot::channel();
        if self.command(Command::Disconnect(ack)) {
            let _ = done.await;
        }
    }

    /// Send `data` as an `event` frame. Dropped with a warning when not
    /// connected.
    pub fn send(&self, event: impl Into<String>, data: Value) {
        let event = event.into();
        if !self.command(Command::Send { event, data }) {
            warn!("connection manager is shut down; dropping outbound frame");
        }
    }

    /// `true` while `Connected`.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Current state.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// Failures since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Identifier of the open link, if connected.
    pub fn transport_id(&self) -> Option<TransportId> {
        self.shared.transport_id.read().clone()
    }

    /// Timers as of the last driver step.
    pub fn timers(&self) -> TimerSnapshot {
        *self.shared.timers.lock()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Stop the driver, cancelling every timer and closing the link, and wait
    /// for it to exit.
    pub async fn shutdown(mut self) {
        let (ack, done) = oneshot::channel();
        if self.command(Command::Shutdown(ack)) {
            let _ = done.await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "connection driver ended abnormally");
            }
        }
    }

    async fn request(
        &self,
        command: impl FnOnce(driver::ConnectReply) -> Command,
    ) -> Result<bool, ConnectError> {
        let (reply, outcome) = oneshot::channel();
        if !self.command(command(reply)) {
            return Err(ConnectError::Closed);
        }
        outcome.await.unwrap_or(Err(ConnectError::Closed))
    }

    fn command(&self, command: Command) -> bool {
        !self.shared.closed.load(Ordering::SeqCst)
            && self.commands.send(Input::Command(command)).is_ok()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.connection_state())
            .field("attempts", &self.reconnect_attempts())
            .field("transport_id", &self.transport_id())
            .finish_non_exhaustive()
    }
}
