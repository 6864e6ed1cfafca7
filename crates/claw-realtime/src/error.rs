//! Error types for claw-realtime.

use std::path::PathBuf;

use thiserror::Error;

use crate::transport::TransportId;

/// Errors surfaced to callers of [`ConnectionManager::connect`].
///
/// Transient link failures never show up here; they are absorbed by the
/// reconnection policy and only visible through the connection state.
///
/// [`ConnectionManager::connect`]: crate::ConnectionManager::connect
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// Every reconnection attempt failed.
    #[error("max reconnect attempts exceeded after {attempts} attempts")]
    MaxAttemptsExceeded {
        /// Number of failed attempts since the last successful connect.
        attempts: u32,
    },

    /// The manager was shut down.
    #[error("connection manager is shut down")]
    Closed,
}

/// Errors raised by a [`Transport`](crate::Transport) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint URL could not be used.
    #[error("invalid endpoint '{url}': {reason}")]
    InvalidEndpoint {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The link is unknown or already closed.
    #[error("link {0} is not open")]
    LinkClosed(TransportId),
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Config content is not valid JSON for the expected shape.
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value failed validation.
    #[error("configuration error: {0}")]
    Invalid(String),
}

/// Errors encoding or decoding wire frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Failed to encode a frame.
    #[error("encoding error: {0}")]
    Encoding(serde_json::Error),

    /// Failed to decode a frame.
    #[error("decoding error: {0}")]
    Decoding(serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_attempts_display_names_attempts() {
        let err = ConnectError::MaxAttemptsExceeded { attempts: 3 };
        assert_eq!(
            err.to_string(),
            "max reconnect attempts exceeded after 3 attempts"
        );
    }

    #[test]
    fn test_closed_display() {
        assert_eq!(
            ConnectError::Closed.to_string(),
            "connection manager is shut down"
        );
    }

    #[test]
    fn test_invalid_endpoint_display() {
        let err = TransportError::InvalidEndpoint {
            url: "ftp://nope".to_string(),
            reason: "unsupported scheme".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ftp://nope"));
        assert!(msg.contains("unsupported scheme"));
    }

    #[test]
    fn test_link_closed_display() {
        let err = TransportError::LinkClosed(TransportId::new("link-1"));
        assert_eq!(err.to_string(), "link link-1 is not open");
    }

    #[test]
    fn test_config_parse_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").expect_err("truncated json");
        let err: ConfigError = json_err.into();
        assert!(err.to_string().starts_with("invalid config"));
    }

    #[test]
    fn test_config_read_error_names_path() {
        let err = ConfigError::Read {
            path: PathBuf::from("/etc/clawlink/missing.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().contains("/etc/clawlink/missing.json"));
    }
}
