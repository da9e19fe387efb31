use std::error::Error as _;
use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifies one transport session. Every operation created on a session
/// carries the session's id in its callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-session operation handle, allocated sequentially from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `(session, operation)` pair a bridge is bound to.
///
/// Operations sharing a session produce callbacks that differ only in the
/// operation component, so both halves are compared on every callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationIdentity {
    pub session: SessionId,
    pub operation: OperationId,
}

impl OperationIdentity {
    pub fn new(session: SessionId, operation: OperationId) -> Self {
        Self { session, operation }
    }

    pub fn matches(&self, session: SessionId, operation: OperationId) -> bool {
        self.session == session && self.operation == operation
    }
}

impl fmt::Display for OperationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session, self.operation)
    }
}

/// States emitted by a fetch bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    Uninitiated,
    WaitingForResponse,
    /// The full payload. Emitted once, right before the stream finishes.
    DataReceived(Bytes),
}

/// States emitted by a download bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadState {
    Uninitiated,
    WaitingForResponse,
    Downloading(Progress),
    /// On-disk location of the finished download. Owned by the transport.
    Completed(PathBuf),
}

/// Transfer progress in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed_units: i64,
    pub total_units: i64,
}

impl Progress {
    /// Total reported by the transport before the size is known.
    pub const UNKNOWN_TOTAL: i64 = -1;

    pub fn new(completed_units: i64, total_units: i64) -> Self {
        Self {
            completed_units,
            total_units,
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        self.total_units <= 0
    }

    /// `completed / total`, or `None` while the total is not known.
    pub fn fraction_completed(&self) -> Option<f64> {
        if self.is_indeterminate() {
            return None;
        }
        let fraction = self.completed_units as f64 / self.total_units as f64;
        Some(fraction.clamp(0.0, 1.0))
    }
}

/// Client-side failures. These are the only errors that fail a stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("could not connect: {0}")]
    Connect(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("redirect failed: {0}")]
    Redirect(String),
    #[error("failed reading response body: {0}")]
    Body(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("disk error: {0}")]
    Io(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("no tokio runtime available to drive the session")]
    RuntimeUnavailable,
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
    #[error("download completed without a file location")]
    MissingLocation,
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

/// Renders an error together with its source chain.
fn render_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let message = render_chain(&err);
        if err.is_timeout() {
            TransportError::Timeout(message)
        } else if err.is_connect() {
            TransportError::Connect(message)
        } else if err.is_redirect() {
            TransportError::Redirect(message)
        } else if err.is_builder() {
            TransportError::InvalidRequest(message)
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(message)
        } else {
            TransportError::Request(message)
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(render_chain(&err))
    }
}

/// The error object handed to `on_completed`, tagged by where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    /// Connection-level failure. Surfaced as the stream's failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The server answered with an error status. The response body is still
    /// delivered as a regular payload.
    #[error("server responded with status {status}")]
    Server { status: u16 },
}

impl CompletionError {
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            CompletionError::Transport(err) => Some(err),
            CompletionError::Server { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationInfo {
    pub username: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_is_none_while_total_unknown() {
        let progress = Progress::new(512, Progress::UNKNOWN_TOTAL);
        assert!(progress.is_indeterminate());
        assert_eq!(progress.fraction_completed(), None);
    }

    #[test]
    fn fraction_reaches_one_at_total() {
        assert_eq!(Progress::new(0, 200).fraction_completed(), Some(0.0));
        assert_eq!(Progress::new(50, 200).fraction_completed(), Some(0.25));
        assert_eq!(Progress::new(200, 200).fraction_completed(), Some(1.0));
    }

    #[test]
    fn identity_requires_both_halves() {
        let session = SessionId::new();
        let other_session = SessionId::new();
        let identity = OperationIdentity::new(session, OperationId::new(3));

        assert!(identity.matches(session, OperationId::new(3)));
        assert!(!identity.matches(session, OperationId::new(4)));
        assert!(!identity.matches(other_session, OperationId::new(3)));
    }

    #[test]
    fn server_errors_are_not_transport_errors() {
        let server = CompletionError::Server { status: 404 };
        assert_eq!(server.as_transport(), None);

        let transport = CompletionError::from(TransportError::Cancelled);
        assert_eq!(transport.as_transport(), Some(&TransportError::Cancelled));
    }
}
