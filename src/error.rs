//! Error types for the wren client.
//!
//! [`ErrorKind`] is the small, recoverable taxonomy surfaced through
//! connection state and installation results; [`ChatError`] is the
//! crate-wide error enum for everything else. Nothing in this crate
//! escalates an `ErrorKind` into a panic: monitors and stream readers
//! translate failures into state at their boundary.

use std::fmt;

/// Classified failure observed while talking to the model server.
///
/// Every variant is recoverable from the caller's perspective; the UI
/// surfaces them as transient notifications or inline state flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused or host unreachable.
    NetworkUnreachable,
    /// No response within the configured deadline.
    Timeout,
    /// Server responded with a non-success status code.
    HttpStatus(u16),
    /// Response body did not match the expected shape.
    MalformedResponse,
    /// A stream ended or failed mid-transfer.
    StreamAborted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkUnreachable => write!(f, "cannot reach the model server"),
            Self::Timeout => write!(f, "connection timed out"),
            Self::HttpStatus(code) => write!(f, "server returned HTTP {code}"),
            Self::MalformedResponse => write!(f, "malformed server response"),
            Self::StreamAborted => write!(f, "stream aborted mid-transfer"),
        }
    }
}

impl ErrorKind {
    /// Classify a transport-level error from the HTTP client.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::NetworkUnreachable
        } else if err.is_decode() {
            Self::MalformedResponse
        } else if err.is_body() {
            Self::StreamAborted
        } else {
            Self::NetworkUnreachable
        }
    }
}

/// Top-level error type for the wren client.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// A classified server failure (see [`ErrorKind`]).
    #[error("server error: {0}")]
    Server(ErrorKind),

    /// Message sending refused because the server is unreachable.
    #[error("not connected to the model server")]
    NotConnected,

    /// Configuration load, save, or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Chat history persistence error.
    #[error("history error: {0}")]
    History(String),

    /// Export serialization error.
    #[error("export error: {0}")]
    Export(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Returns the classified kind when this error carries one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Server(kind) => Some(*kind),
            Self::NotConnected => Some(ErrorKind::NetworkUnreachable),
            _ => None,
        }
    }
}

impl From<ErrorKind> for ChatError {
    fn from(kind: ErrorKind) -> Self {
        Self::Server(kind)
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_status_code() {
        let kind = ErrorKind::HttpStatus(503);
        assert!(kind.to_string().contains("503"));
    }

    #[test]
    fn chat_error_exposes_kind() {
        let err = ChatError::Server(ErrorKind::Timeout);
        assert_eq!(err.kind(), Some(ErrorKind::Timeout));

        let err = ChatError::Config("bad url".into());
        assert!(err.kind().is_none());
    }

    #[test]
    fn kind_serde_round_trip() {
        let kind = ErrorKind::HttpStatus(404);
        let json = serde_json::to_string(&kind).unwrap_or_default();
        let parsed: ErrorKind =
            serde_json::from_str(&json).unwrap_or(ErrorKind::MalformedResponse);
        assert_eq!(parsed, kind);
    }
}
