//! The connection state machine.
//!
//! Runs as a single task. API commands, transport signals and timer expiries
//! are all handled here one at a time, so no transition ever races another.

use std::future::poll_fn;
use std::ops::ControlFlow;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::timers::{TimerKind, Timers};
use super::Shared;
use crate::config::ManagerConfig;
use crate::dispatch::EventDispatcher;
use crate::error::ConnectError;
use crate::events::ConnectionEvent;
use crate::frame::Frame;
use crate::heartbeat::HeartbeatMonitor;
use crate::reconnect::ReconnectPolicy;
use crate::state::ConnectionState;
use crate::transport::{DisconnectReason, Transport, TransportId, TransportSignal, TransportSink};

pub(crate) type ConnectReply = oneshot::Sender<Result<bool, ConnectError>>;

pub(crate) enum Command {
    Connect(ConnectReply),
    Disconnect(oneshot::Sender<()>),
    ForceReconnect(ConnectReply),
    Send { event: String, data: Value },
    Shutdown(oneshot::Sender<()>),
}

pub(crate) enum Input {
    Command(Command),
    /// A signal from the link opened as generation `link`.
    Link { link: u64, signal: TransportSignal },
}

struct ActiveLink {
    generation: u64,
    id: TransportId,
}

pub(crate) struct Driver {
    config: ManagerConfig,
    policy: ReconnectPolicy,
    transport: Box<dyn Transport>,
    dispatcher: EventDispatcher,
    shared: Arc<Shared>,
    events: broadcast::Sender<ConnectionEvent>,
    inbox: mpsc::UnboundedReceiver<Input>,
    loopback: mpsc::WeakUnboundedSender<Input>,
    state: ConnectionState,
    attempts: u32,
    link: Option<ActiveLink>,
    generation: u64,
    timers: Timers,
    heartbeat: HeartbeatMonitor,
    waiters: Vec<ConnectReply>,
}

impl Driver {
    pub(crate) fn new(
        config: ManagerConfig,
        transport: Box<dyn Transport>,
        dispatcher: EventDispatcher,
        shared: Arc<Shared>,
        events: broadcast::Sender<ConnectionEvent>,
        inbox: mpsc::UnboundedReceiver<Input>,
        loopback: mpsc::WeakUnboundedSender<Input>,
    ) -> Self {
        Self {
            policy: ReconnectPolicy::new(config.reconnect),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval()),
            config,
            transport,
            dispatcher,
            shared,
            events,
            inbox,
            loopback,
            state: ConnectionState::Disconnected,
            attempts: 0,
            link: None,
            generation: 0,
            timers: Timers::default(),
            waiters: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let flow = tokio::select! {
                biased;
                input = self.inbox.recv() => match input {
                    Some(input) => self.handle(input),
                    None => {
                        // Every handle was dropped.
                        self.teardown();
                        ControlFlow::Break(())
                    }
                },
                kind = poll_fn(|cx| self.timers.poll_expired(cx)) => {
                    self.on_timer(kind);
                    ControlFlow::Continue(())
                },
                () = poll_fn(|cx| self.heartbeat.poll_due(cx)) => {
                    self.on_heartbeat_due();
                    ControlFlow::Continue(())
                },
            };

            self.publish_timers();
            if flow.is_break() {
                break;
            }
        }
        debug!("connection driver stopped");
    }

    fn handle(&mut self, input: Input) -> ControlFlow<()> {
        match input {
            Input::Command(Command::Connect(reply)) => self.connect(reply),
            Input::Command(Command::Disconnect(ack)) => {
                self.disconnect();
                let _ = ack.send(());
            }
            Input::Command(Command::ForceReconnect(reply)) => {
                info!("forcing reconnect");
                self.attempts = 0;
                self.publish_attempts();
                self.disconnect();
                self.connect(reply);
            }
            Input::Command(Command::Send { event, data }) => self.send(event, data),
            Input::Command(Command::Shutdown(ack)) => {
                self.teardown();
                let _ = ack.send(());
                return ControlFlow::Break(());
            }
            Input::Link { link, signal } => {
                if self.link.as_ref().is_some_and(|l| l.generation == link) {
                    self.on_signal(signal);
                } else {
                    debug!(link, ?signal, "ignoring signal from stale link");
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn connect(&mut self, reply: ConnectReply) {
        if !self.config.enabled {
            info!("realtime transport disabled; not connecting");
            let _ = reply.send(Ok(false));
            return;
        }

        match self.state {
            ConnectionState::Connected => {
                let _ = reply.send(Ok(true));
            }
            ConnectionState::Connecting => {
                let _ = reply.send(Ok(false));
            }
            ConnectionState::Reconnecting => {
                // A retry is already scheduled; wait for its outcome.
                self.waiters.push(reply);
            }
            ConnectionState::Disconnected => {
                // A caller-initiated cycle gets the full retry budget.
                self.attempts = 0;
                self.publish_attempts();
                self.waiters.push(reply);
                self.open_link();
            }
        }
    }

    fn open_link(&mut self) {
        self.close_transport(true);
        self.transition(ConnectionState::Connecting);
        self.timers
            .arm(TimerKind::ConnectTimeout, self.config.connect_timeout());

        self.generation += 1;
        let generation = self.generation;
        let loopback = self.loopback.clone();
        let sink = TransportSink::new(move |signal| {
            // Once the handle is gone the driver is tearing down.
            if let Some(inbox) = loopback.upgrade() {
                let _ = inbox.send(Input::Link {
                    link: generation,
                    signal,
                });
            }
        });

        debug!(url = %self.config.url, link = generation, "opening link");
        match self.transport.open(&self.config.url, sink) {
            Ok(id) => self.link = Some(ActiveLink { generation, id }),
            Err(e) => {
                warn!(error = %e, "transport refused to open link");
                self.connection_failed(&e.to_string());
            }
        }
    }

    fn on_signal(&mut self, signal: TransportSignal) {
        match (self.state, signal) {
            (ConnectionState::Connecting, TransportSignal::Opened) => self.on_open(),
            (ConnectionState::Connecting, TransportSignal::Error(message)) => {
                self.connection_failed(&message);
            }
            (ConnectionState::Connecting, TransportSignal::Closed(reason)) => {
                self.connection_failed(&reason.to_string());
            }
            (ConnectionState::Connected, TransportSignal::Message(text)) => self.on_message(&text),
            (ConnectionState::Connected, TransportSignal::Error(message)) => {
                self.link_lost(DisconnectReason::Other(message));
            }
            (ConnectionState::Connected, TransportSignal::Closed(reason)) => {
                self.link_lost(reason);
            }
            (ConnectionState::Reconnecting, TransportSignal::Error(_) | TransportSignal::Closed(_)) => {
                debug!("link failure while reconnect already in flight");
            }
            (state, signal) => debug!(%state, ?signal, "ignoring transport signal"),
        }
    }

    fn on_open(&mut self) {
        self.timers.cancel(TimerKind::ConnectTimeout);
        self.attempts = 0;
        self.publish_attempts();
        *self.shared.transport_id.write() = self.link.as_ref().map(|l| l.id.clone());

        self.transition(ConnectionState::Connected);
        self.heartbeat.start();
        info!(url = %self.config.url, "realtime connection established");

        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(true));
        }
    }

    fn on_message(&mut self, text: &str) {
        match Frame::from_json(text) {
            Ok(frame) if frame.is_session_update() => {
                self.dispatcher.dispatch_value(frame.data);
            }
            Ok(frame) => debug!(event = %frame.event, "ignoring unrouted frame"),
            Err(e) => warn!(error = %e, "dropping undecodable frame"),
        }
    }

    /// `Connecting` failed: back to `Disconnected`, then ask the policy.
    fn connection_failed(&mut self, reason: &str) {
        warn!(reason, attempt = self.attempts + 1, "connection attempt failed");
        self.timers.cancel(TimerKind::ConnectTimeout);
        self.close_transport(false);
        self.transition(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    /// An established link went away.
    fn link_lost(&mut self, reason: DisconnectReason) {
        self.heartbeat.stop();
        *self.shared.transport_id.write() = None;
        self.close_transport(false);

        if reason.is_recoverable() {
            warn!(%reason, "realtime connection lost");
            self.schedule_reconnect();
        } else {
            warn!(%reason, "server closed connection permanently; not reconnecting");
            self.transition(ConnectionState::Disconnected);
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.state == ConnectionState::Reconnecting
            || self.timers.is_armed(TimerKind::Reconnect)
        {
            debug!("reconnect already in flight");
            return;
        }

        self.attempts = self.attempts.saturating_add(1);
        self.publish_attempts();
        let attempt = self.attempts;

        if !self.policy.should_retry(attempt) {
            self.transition(ConnectionState::Disconnected);
            warn!(
                attempts = attempt,
                max_attempts = self.policy.config().max_attempts,
                "giving up on reconnecting"
            );
            let _ = self
                .events
                .send(ConnectionEvent::ReconnectFailed { attempts: attempt });
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(Err(ConnectError::MaxAttemptsExceeded { attempts: attempt }));
            }
            return;
        }

        let delay = self.policy.delay_for(attempt);
        self.transition(ConnectionState::Reconnecting);
        self.timers.arm(TimerKind::Reconnect, delay);
        info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        let _ = self
            .events
            .send(ConnectionEvent::ReconnectScheduled { attempt, delay });
    }

    fn on_timer(&mut self, kind: TimerKind) {
        match (kind, self.state) {
            (TimerKind::ConnectTimeout, ConnectionState::Connecting) => {
                let timeout_ms = self.config.connect_timeout_ms;
                self.close_transport(true);
                self.connection_failed(&format!("timed out after {timeout_ms}ms"));
            }
            (TimerKind::Reconnect, ConnectionState::Reconnecting) => {
                debug!(attempt = self.attempts, "reconnect timer fired");
                self.open_link();
            }
            (kind, state) => debug!(?kind, %state, "ignoring timer"),
        }
    }

    fn on_heartbeat_due(&mut self) {
        if self.state != ConnectionState::Connected {
            self.heartbeat.stop();
            return;
        }
        let Some(link) = self.link.as_ref() else {
            return;
        };

        let at = Utc::now();
        let frame = self.heartbeat.probe(at);
        let sent = frame
            .to_json()
            .map_err(|e| e.to_string())
            .and_then(|text| self.transport.send(&link.id, text).map_err(|e| e.to_string()));

        match sent {
            Ok(()) => {
                debug!(%at, "heartbeat sent");
                let _ = self.events.send(ConnectionEvent::HeartbeatSent { at });
            }
            Err(e) => warn!(error = %e, "failed to send heartbeat"),
        }
    }

    fn send(&mut self, event: String, data: Value) {
        let Some(link) = self
            .link
            .as_ref()
            .filter(|_| self.state == ConnectionState::Connected)
        else {
            warn!(%event, state = %self.state, "not connected; dropping outbound frame");
            return;
        };

        let result = Frame::new(event, data)
            .to_json()
            .map_err(|e| e.to_string())
            .and_then(|text| self.transport.send(&link.id, text).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!(error = %e, "failed to send frame");
        }
    }

    /// Manual disconnect. Idempotent.
    fn disconnect(&mut self) {
        let cancelled = self.timers.cancel_all();
        let heartbeat_stopped = self.heartbeat.stop();
        self.close_transport(true);
        *self.shared.transport_id.write() = None;
        self.attempts = 0;
        self.publish_attempts();

        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(false));
        }

        if self.state != ConnectionState::Disconnected || cancelled > 0 || heartbeat_stopped {
            info!(cancelled, "disconnected");
        }
        self.transition(ConnectionState::Disconnected);
    }

    fn teardown(&mut self) {
        self.disconnect();
        self.shared.closed.store(true, Ordering::SeqCst);
        debug!("connection manager torn down");
    }

    /// Close the current link. With `forget`, signals it still delivers are
    /// treated as stale.
    fn close_transport(&mut self, forget: bool) {
        if let Some(link) = self.link.as_ref() {
            self.transport.close(&link.id);
        }
        if forget {
            self.link = None;
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!(%from, %to, "connection state transition");
        self.state = to;
        self.shared.state.store(to);
        let _ = self.events.send(ConnectionEvent::StateChanged { from, to });
    }

    fn publish_attempts(&self) {
        self.shared
            .attempts
            .store(self.attempts, Ordering::SeqCst);
    }

    fn publish_timers(&self) {
        *self.shared.timers.lock() = self.timers.snapshot(self.heartbeat.is_running());
    }
}
