//! Error types for outbound calls.
//!
//! Two layers live here. [`CallFailure`] is whatever a single attempt raised:
//! a transport status, a local timeout, or something less structured. The
//! response handler turns it into a [`ClientError`], the only error type a
//! caller of [`Client::request`](crate::Client::request) ever sees.

use crate::status::StatusCode;
use http::HeaderMap;
use serde::Serialize;
use std::fmt;

/// Message used when a timeout carries no message of its own.
pub const DEFAULT_TIMEOUT_MESSAGE: &str = "Request timed out";
/// Message used for external errors without a message.
pub const DEFAULT_EXTERNAL_MESSAGE: &str = "External service error";

/// The raw outcome of a failed attempt, before classification.
///
/// Transports return this from [`Transport::call`](crate::Transport::call).
/// Conversions exist for the common sources so `?` works inside transport
/// implementations.
#[derive(thiserror::Error, Debug)]
pub enum CallFailure {
    /// A deadline elapsed before the attempt settled.
    #[error(transparent)]
    Timeout(#[from] TimeoutSignal),

    /// The transport returned a gRPC status.
    #[error("{0}")]
    Status(#[from] tonic::Status),

    /// A bare message with no further structure.
    #[error("{0}")]
    Message(String),

    /// A structured value, typically decoded from an error payload.
    #[error("{0}")]
    Object(serde_json::Value),

    /// Any other error.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<String> for CallFailure {
    fn from(message: String) -> Self {
        CallFailure::Message(message)
    }
}

impl From<&str> for CallFailure {
    fn from(message: &str) -> Self {
        CallFailure::Message(message.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for CallFailure {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CallFailure::Timeout(TimeoutSignal::new(
            TimeoutKind::Attempt,
            DEFAULT_TIMEOUT_MESSAGE,
        ))
    }
}

/// Which deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    /// The deadline of a single attempt.
    Attempt,
    /// The deadline of the whole retry sequence.
    RetryWindow,
}

/// Raised when a deadline wins the race against an attempt or a retry window.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TimeoutSignal {
    kind: TimeoutKind,
    message: String,
}

impl TimeoutSignal {
    /// Creates a timeout signal with the given message.
    pub fn new(kind: TimeoutKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns which deadline elapsed.
    pub fn kind(&self) -> TimeoutKind {
        self.kind
    }

    /// Returns the timeout message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Which side of the call an error is attributed to in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerMarker {
    /// The caller sent something the remote rejected.
    Internal,
    /// The remote, or the path to it, failed.
    External,
}

impl LoggerMarker {
    /// Returns the label value (`internal` or `external`).
    pub fn as_str(&self) -> &'static str {
        match self {
            LoggerMarker::Internal => "internal",
            LoggerMarker::External => "external",
        }
    }
}

impl fmt::Display for LoggerMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error returned to callers of [`Client::request`](crate::Client::request).
///
/// Each variant keeps the raw failure as its `cause`, so the original status
/// and metadata stay inspectable.
///
/// # Examples
///
/// ```
/// use grpcall::{ClientError, Code, StatusCode, TimeoutKind};
///
/// fn describe(error: &ClientError) -> String {
///     match error {
///         ClientError::Timeout { message, .. } => format!("gave up: {}", message),
///         ClientError::Internal { status_code, .. } => format!("our fault ({})", status_code),
///         ClientError::External { status_code: Some(code), .. } => format!("their fault ({})", code),
///         ClientError::External { message, .. } => format!("unknown failure: {}", message),
///     }
/// }
///
/// let error = ClientError::timeout(TimeoutKind::Attempt, "Request timed out (1 sec)", None);
/// assert_eq!(describe(&error), "gave up: Request timed out (1 sec)");
/// assert_eq!(error.status_code(), Some(StatusCode::Timeout));
/// ```
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// A per-attempt deadline or the retry window elapsed.
    #[error("{message}")]
    Timeout {
        /// Which deadline elapsed
        kind: TimeoutKind,
        /// Human readable description, including the deadline in seconds
        message: String,
        /// The timeout signal that produced this error
        #[source]
        cause: Option<Box<CallFailure>>,
    },

    /// The remote rejected the call because of how it was made: bad
    /// arguments, missing credentials, or a deadline the caller set.
    #[error("{message}")]
    Internal {
        /// Human readable description
        message: String,
        /// The transport status code
        status_code: StatusCode,
        /// Details reported by the remote
        details: Option<String>,
        /// Trailing metadata reported by the remote, without credentials
        headers: Option<HeaderMap>,
        /// The raw failure
        #[source]
        cause: Option<Box<CallFailure>>,
    },

    /// Everything else, including failures that could not be classified.
    #[error("{message}")]
    External {
        /// Human readable description
        message: String,
        /// The transport status code, when there was one
        status_code: Option<StatusCode>,
        /// Details reported by the remote
        details: Option<String>,
        /// Trailing metadata reported by the remote, without credentials
        headers: Option<HeaderMap>,
        /// The raw failure
        #[source]
        cause: Option<Box<CallFailure>>,
    },
}

impl ClientError {
    /// Creates a timeout error.
    pub fn timeout(
        kind: TimeoutKind,
        message: impl Into<String>,
        cause: Option<CallFailure>,
    ) -> Self {
        ClientError::Timeout {
            kind,
            message: message.into(),
            cause: cause.map(Box::new),
        }
    }

    /// Creates an internal error without details or headers.
    pub fn internal(message: impl Into<String>, status_code: StatusCode) -> Self {
        ClientError::Internal {
            message: message.into(),
            status_code,
            details: None,
            headers: None,
            cause: None,
        }
    }

    /// Creates an external error without details or headers.
    pub fn external(message: impl Into<String>, status_code: Option<StatusCode>) -> Self {
        ClientError::External {
            message: message.into(),
            status_code,
            details: None,
            headers: None,
            cause: None,
        }
    }

    /// Returns the status code, if the error has one.
    ///
    /// Timeouts always report [`StatusCode::Timeout`].
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ClientError::Timeout { .. } => Some(StatusCode::Timeout),
            ClientError::Internal { status_code, .. } => Some(*status_code),
            ClientError::External { status_code, .. } => *status_code,
        }
    }

    /// Returns the side this error is attributed to.
    pub fn logger_marker(&self) -> LoggerMarker {
        match self {
            ClientError::Internal { .. } => LoggerMarker::Internal,
            ClientError::Timeout { .. } | ClientError::External { .. } => LoggerMarker::External,
        }
    }

    /// Returns the human readable message.
    pub fn message(&self) -> &str {
        match self {
            ClientError::Timeout { message, .. }
            | ClientError::Internal { message, .. }
            | ClientError::External { message, .. } => message,
        }
    }

    /// Returns the details reported by the remote.
    pub fn details(&self) -> Option<&str> {
        match self {
            ClientError::Internal { details, .. } | ClientError::External { details, .. } => {
                details.as_deref()
            }
            ClientError::Timeout { .. } => None,
        }
    }

    /// Returns the decoded metadata reported by the remote.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            ClientError::Internal { headers, .. } | ClientError::External { headers, .. } => {
                headers.as_ref()
            }
            ClientError::Timeout { .. } => None,
        }
    }

    /// Returns the raw failure this error was classified from.
    pub fn cause(&self) -> Option<&CallFailure> {
        match self {
            ClientError::Timeout { cause, .. }
            | ClientError::Internal { cause, .. }
            | ClientError::External { cause, .. } => cause.as_deref(),
        }
    }

    /// Returns `true` for timeouts on either deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }

    /// Returns which deadline elapsed, for timeouts.
    pub fn timeout_kind(&self) -> Option<TimeoutKind> {
        match self {
            ClientError::Timeout { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` if the retry window elapsed before the call settled.
    pub fn is_retry_window(&self) -> bool {
        self.timeout_kind() == Some(TimeoutKind::RetryWindow)
    }
}

/// A specialized `Result` type for outbound calls.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_timeout_reports_synthetic_code() {
        let signal = TimeoutSignal::new(TimeoutKind::Attempt, "too slow");
        let error = ClientError::timeout(TimeoutKind::Attempt, "too slow", Some(signal.into()));
        assert!(error.is_timeout());
        assert_eq!(error.timeout_kind(), Some(TimeoutKind::Attempt));
        assert!(!error.is_retry_window());
        assert_eq!(error.status_code(), Some(StatusCode::Timeout));
        assert_eq!(error.logger_marker(), LoggerMarker::External);
        assert!(matches!(error.cause(), Some(CallFailure::Timeout(_))));
        assert_eq!(error.to_string(), "too slow");
    }

    #[test]
    fn test_internal_marker() {
        let error = ClientError::internal("bad input", StatusCode::Grpc(Code::InvalidArgument));
        assert_eq!(error.logger_marker(), LoggerMarker::Internal);
        assert_eq!(error.status_code(), Some(StatusCode::Grpc(Code::InvalidArgument)));
        assert!(error.cause().is_none());
    }

    #[test]
    fn test_external_without_code() {
        let error = ClientError::external("boom", None);
        assert_eq!(error.status_code(), None);
        assert_eq!(error.logger_marker(), LoggerMarker::External);
        assert_eq!(error.details(), None);
        assert!(error.headers().is_none());
    }

    #[test]
    fn test_source_chain_exposes_status() {
        let status = tonic::Status::unavailable("down");
        let error = ClientError::External {
            message: "14 UNAVAILABLE: down".to_string(),
            status_code: Some(StatusCode::Grpc(Code::Unavailable)),
            details: Some("down".to_string()),
            headers: None,
            cause: Some(Box::new(status.into())),
        };

        let source = std::error::Error::source(&error).unwrap();
        assert!(source.to_string().contains("down"));
    }

    #[test]
    fn test_str_converts_to_message() {
        let failure: CallFailure = "plain".into();
        assert!(matches!(failure, CallFailure::Message(ref m) if m == "plain"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_converts_to_timeout_signal() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();

        let failure = CallFailure::from(elapsed);
        assert!(
            matches!(failure, CallFailure::Timeout(ref signal) if signal.message() == DEFAULT_TIMEOUT_MESSAGE)
        );
    }

    #[test]
    fn test_retry_window_kind() {
        let error = ClientError::timeout(TimeoutKind::RetryWindow, "Retry-request timed out (2 sec)", None);
        assert!(error.is_retry_window());
        assert_eq!(error.status_code(), Some(StatusCode::Timeout));

        let external = ClientError::external("boom", None);
        assert_eq!(external.timeout_kind(), None);
        assert!(!external.is_retry_window());
    }
}
