//! Session update taxonomy.
//!
//! A [`SessionUpdateEvent`] is a discriminated union keyed by its `type` tag.
//! Only the tag and the `sessionId` correlator are interpreted here; every
//! other field is carried through untouched.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// The closed set of session update tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionEventKind {
    /// Incremental content delta.
    Delta,
    /// A tool invocation started.
    ToolCall,
    /// Streaming tool call arguments.
    ToolCallArguments,
    /// Tool call progress report.
    ToolCallProgress,
    /// An image finished generating.
    ImageGenerated,
    /// Full message history snapshot.
    AllMessages,
    /// The session turn completed.
    Done,
    /// The session reported an error.
    Error,
    /// Informational notice.
    Info,
}

impl SessionEventKind {
    /// Every tag, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Delta,
        Self::ToolCall,
        Self::ToolCallArguments,
        Self::ToolCallProgress,
        Self::ImageGenerated,
        Self::AllMessages,
        Self::Done,
        Self::Error,
        Self::Info,
    ];

    /// The wire tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delta => "Delta",
            Self::ToolCall => "ToolCall",
            Self::ToolCallArguments => "ToolCallArguments",
            Self::ToolCallProgress => "ToolCallProgress",
            Self::ImageGenerated => "ImageGenerated",
            Self::AllMessages => "AllMessages",
            Self::Done => "Done",
            Self::Error => "Error",
            Self::Info => "Info",
        }
    }

    /// Bus channel this tag is published on: `Session::<Tag>`.
    #[must_use]
    pub const fn channel(self) -> &'static str {
        match self {
            Self::Delta => "Session::Delta",
            Self::ToolCall => "Session::ToolCall",
            Self::ToolCallArguments => "Session::ToolCallArguments",
            Self::ToolCallProgress => "Session::ToolCallProgress",
            Self::ImageGenerated => "Session::ImageGenerated",
            Self::AllMessages => "Session::AllMessages",
            Self::Done => "Session::Done",
            Self::Error => "Session::Error",
            Self::Info => "Session::Info",
        }
    }
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionEventKind {
    type Err = MalformedEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| MalformedEvent::UnknownTag(s.to_string()))
    }
}

/// Reasons an inbound session update cannot be routed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEvent {
    /// The payload is not a JSON object.
    #[error("session update is not an object")]
    NotAnObject,

    /// No string `type` field.
    #[error("session update has no type tag")]
    MissingTag,

    /// The tag is outside the known set.
    #[error("unknown session update tag: {0}")]
    UnknownTag(String),

    /// No usable `sessionId`.
    #[error("{kind} session update has no sessionId")]
    MissingSessionId {
        /// Tag of the offending event.
        kind: SessionEventKind,
    },
}

/// A server-pushed session update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdateEvent {
    /// Discriminant tag.
    #[serde(rename = "type")]
    pub kind: SessionEventKind,
    /// Opaque session correlator.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Variant-specific fields, passed through untouched.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl SessionUpdateEvent {
    /// Create an event with an empty payload.
    #[must_use]
    pub fn new(kind: SessionEventKind, session_id: impl Into<String>) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            payload: Map::new(),
        }
    }

    /// Add a payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Classify a decoded JSON value.
    ///
    /// The tag is checked before the session id so an unknown tag is reported
    /// as such even when the correlator is also missing.
    pub fn from_value(value: Value) -> Result<Self, MalformedEvent> {
        let Value::Object(mut fields) = value else {
            return Err(MalformedEvent::NotAnObject);
        };

        let kind = match fields.remove("type") {
            Some(Value::String(tag)) => tag.parse::<SessionEventKind>()?,
            _ => return Err(MalformedEvent::MissingTag),
        };

        let session_id = match fields.remove("sessionId") {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => return Err(MalformedEvent::MissingSessionId { kind }),
        };

        Ok(Self {
            kind,
            session_id,
            payload: fields,
        })
    }

    /// The bus channel for this event.
    #[must_use]
    pub const fn channel(&self) -> &'static str {
        self.kind.channel()
    }
}
