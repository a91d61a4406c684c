//! Classification of failed attempts and logging of call outcomes.
//!
//! [`classify`] maps a raw [`CallFailure`] onto the [`ClientError`] taxonomy.
//! A `NOT_FOUND` status is not an error: it classifies to no error at all and
//! is logged as a warning, so the call resolves to `None`.

use crate::error::{CallFailure, ClientError, DEFAULT_EXTERNAL_MESSAGE};
use crate::logging::{LogFields, Logger};
use crate::metadata::AUTHORIZATION_HEADER;
use crate::status::{code_name, StatusCode};
use http::HeaderMap;
use std::sync::Arc;
use tonic::Code;
use tracing::Level;

/// Codes blamed on the caller rather than the remote.
const INTERNAL_CODES: [Code; 4] = [
    Code::InvalidArgument,
    Code::DeadlineExceeded,
    Code::PermissionDenied,
    Code::Unauthenticated,
];

/// A classified attempt failure.
#[derive(Debug)]
pub struct Classified {
    error: Option<ClientError>,
    severity: Level,
    summary: String,
}

impl Classified {
    /// The error to surface, or `None` for a soft `NOT_FOUND`.
    pub fn error(&self) -> Option<&ClientError> {
        self.error.as_ref()
    }

    /// Consumes the classification, returning the error to surface.
    pub fn into_error(self) -> Option<ClientError> {
        self.error
    }

    /// Level this outcome is logged at.
    pub fn severity(&self) -> Level {
        self.severity
    }

    /// One-line description used as the log error field.
    pub fn summary(&self) -> &str {
        &self.summary
    }
}

/// Classifies a raw failure. The first matching rule wins:
///
/// 1. timeout signal: [`ClientError::Timeout`]
/// 2. gRPC status: `INVALID_ARGUMENT`, `DEADLINE_EXCEEDED`,
///    `PERMISSION_DENIED` and `UNAUTHENTICATED` are [`ClientError::Internal`];
///    `NOT_FOUND` is no error; anything else is [`ClientError::External`]
/// 3. message: external, with the message and nothing else
/// 4. JSON value: external, with its `message` string if any
/// 5. anything else: external
///
/// # Examples
///
/// ```
/// use grpcall::handler::classify;
/// use grpcall::{CallFailure, ClientError, Status};
///
/// let classified = classify(CallFailure::from(Status::not_found("no such user")));
/// assert!(classified.error().is_none());
///
/// let classified = classify(CallFailure::from(Status::permission_denied("nope")));
/// assert!(matches!(classified.error(), Some(ClientError::Internal { .. })));
/// ```
pub fn classify(raw: CallFailure) -> Classified {
    let error = match raw {
        CallFailure::Timeout(signal) => {
            let message = signal.message().to_string();
            ClientError::timeout(signal.kind(), message, Some(CallFailure::Timeout(signal)))
        }
        CallFailure::Status(status) => return classify_status(status),
        CallFailure::Message(message) => ClientError::external(message, None),
        CallFailure::Object(value) => {
            let message = value
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or(DEFAULT_EXTERNAL_MESSAGE)
                .to_string();
            ClientError::External {
                message,
                status_code: None,
                details: None,
                headers: None,
                cause: Some(Box::new(CallFailure::Object(value))),
            }
        }
        other @ CallFailure::Other(_) => ClientError::External {
            message: DEFAULT_EXTERNAL_MESSAGE.to_string(),
            status_code: None,
            details: None,
            headers: None,
            cause: Some(Box::new(other)),
        },
    };

    Classified {
        summary: error.to_string(),
        error: Some(error),
        severity: Level::ERROR,
    }
}

fn classify_status(status: tonic::Status) -> Classified {
    let code = status.code();
    let message = status_message(&status);

    if code == Code::NotFound {
        return Classified {
            error: None,
            severity: Level::WARN,
            summary: message,
        };
    }

    let details = Some(status.message().to_string()).filter(|d| !d.is_empty());
    let headers = decoded_headers(&status);
    let status_code = StatusCode::Grpc(code);
    let cause = Some(Box::new(CallFailure::Status(status)));

    let error = if INTERNAL_CODES.contains(&code) {
        ClientError::Internal {
            message,
            status_code,
            details,
            headers,
            cause,
        }
    } else {
        ClientError::External {
            message,
            status_code: Some(status_code),
            details,
            headers,
            cause,
        }
    };

    Classified {
        summary: error.to_string(),
        error: Some(error),
        severity: Level::ERROR,
    }
}

/// `"<number> <NAME>: <details>"`, the form gRPC clients print statuses in.
fn status_message(status: &tonic::Status) -> String {
    let code = status.code();
    format!("{} {}: {}", code as i32, code_name(code), status.message())
}

/// The status metadata as headers, without credentials. `None` when empty.
fn decoded_headers(status: &tonic::Status) -> Option<HeaderMap> {
    let mut headers = status.metadata().clone().into_headers();
    headers.remove(AUTHORIZATION_HEADER);
    Some(headers).filter(|h| !h.is_empty())
}

/// Logs call outcomes on behalf of the client.
#[derive(Clone)]
pub struct ResponseHandler {
    logger: Arc<dyn Logger>,
}

impl ResponseHandler {
    /// Creates a handler that logs to `logger`.
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self { logger }
    }

    /// Classifies `raw` and logs the outcome once.
    pub fn handle_error(&self, raw: CallFailure, fields: &LogFields) -> Option<ClientError> {
        let classified = classify(raw);
        self.report_error(&classified, fields);
        classified.into_error()
    }

    /// Logs an already classified failure that ends the call.
    pub fn report_error(&self, classified: &Classified, fields: &LogFields) {
        let message = if classified.error.is_some() {
            "gRPC request failed"
        } else {
            "gRPC request found nothing"
        };
        self.log_failure(classified, fields, message);
    }

    /// Logs a failed attempt that is about to be retried.
    pub fn report_retry(&self, classified: &Classified, fields: &LogFields) {
        self.log_failure(classified, fields, "gRPC request failed, retrying");
    }

    fn log_failure(&self, classified: &Classified, fields: &LogFields, message: &str) {
        let mut fields = fields.clone();
        fields.error = Some(classified.summary.clone());
        match &classified.error {
            Some(error) => {
                fields.logger_marker = Some(error.logger_marker());
                fields.status_code = error.status_code();
            }
            None => fields.status_code = Some(StatusCode::Grpc(Code::NotFound)),
        }
        self.logger.log(classified.severity, message, &fields);
    }

    /// Logs that a call is about to make its first attempt.
    pub fn log_started(&self, fields: &LogFields) {
        self.logger.log(Level::INFO, "gRPC request started", fields);
    }

    /// Logs a successful call.
    pub fn handle_success(&self, fields: &LogFields) {
        self.logger.log(Level::INFO, "gRPC request succeeded", fields);
    }
}
