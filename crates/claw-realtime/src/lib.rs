//! # claw-realtime
//!
//! Resilient realtime connection manager.
//!
//! Keeps a single long-lived bidirectional link to a realtime backend alive and
//! routes server-pushed session updates onto an application event bus:
//!
//! - [`ConnectionManager`] - State machine, timers and transport ownership
//! - [`ReconnectPolicy`] - Capped exponential backoff with jitter
//! - [`HeartbeatMonitor`] - Periodic liveness probes while connected
//! - [`EventDispatcher`] - Routes [`SessionUpdateEvent`]s to `Session::<Tag>` channels
//! - [`Transport`] - Link adapter, with [`WebSocketTransport`] and [`ChannelTransport`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod frame;
pub mod heartbeat;
pub mod manager;
pub mod reconnect;
pub mod session;
pub mod state;
pub mod transport;

pub use bus::{BroadcastBus, EventBus, Subscription};
pub use config::ManagerConfig;
pub use dispatch::{DispatchOutcome, EventDispatcher};
pub use error::{ConfigError, ConnectError, FrameError, TransportError};
pub use events::ConnectionEvent;
pub use frame::Frame;
pub use heartbeat::HeartbeatMonitor;
pub use manager::{ConnectionManager, TimerSnapshot};
pub use reconnect::{ReconnectPolicy, ReconnectPolicyConfig};
pub use session::{MalformedEvent, SessionEventKind, SessionUpdateEvent};
pub use state::{AtomicConnectionState, ConnectionState};
pub use transport::{
    ChannelPeer, ChannelTransport, DisconnectReason, Transport, TransportId, TransportSignal,
    TransportSink, WebSocketTransport, PERMANENT_CLOSE_REASON,
};
