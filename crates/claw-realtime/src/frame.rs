//! Wire envelope for text frames.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <value>}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::FrameError;

/// Event name carried by inbound session updates.
pub const SESSION_UPDATE_EVENT: &str = "session_update";

/// Event name of outbound heartbeat probes.
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// A named event with a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Create a frame.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// A heartbeat probe stamped with `at`.
    #[must_use]
    pub fn heartbeat(at: DateTime<Utc>) -> Self {
        Self::new(HEARTBEAT_EVENT, json!({ "timestamp": at.to_rfc3339() }))
    }

    /// Whether this frame carries a session update.
    #[must_use]
    pub fn is_session_update(&self) -> bool {
        self.event == SESSION_UPDATE_EVENT
    }

    /// Serialize to JSON text.
    pub fn to_json(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encoding)
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(FrameError::Decoding)
    }
}
