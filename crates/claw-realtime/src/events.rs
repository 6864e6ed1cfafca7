//! Connection lifecycle events.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::state::ConnectionState;

/// Events published by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The state machine moved.
    StateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
    /// A retry was scheduled.
    ReconnectScheduled {
        /// Attempt number (1-based).
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Retries were exhausted.
    ReconnectFailed {
        /// Attempts made since the last successful connect.
        attempts: u32,
    },
    /// A heartbeat probe was sent.
    HeartbeatSent {
        /// Timestamp carried by the probe.
        at: DateTime<Utc>,
    },
}

impl ConnectionEvent {
    /// The new state, if this is a state change.
    #[must_use]
    pub const fn new_state(&self) -> Option<ConnectionState> {
        match self {
            Self::StateChanged { to, .. } => Some(*to),
            _ => None,
        }
    }
}
