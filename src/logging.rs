//! The logger the client reports call outcomes to.

use crate::error::LoggerMarker;
use crate::status::StatusCode;
use serde::Serialize;
use tracing::Level;

/// Structured fields attached to every call log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogFields {
    /// Remote service name
    pub service: String,
    /// Remote method name
    pub method: String,
    /// Side a failure is attributed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger_marker: Option<LoggerMarker>,
    /// Status code of a failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<StatusCode>,
    /// Retries performed before the attempt being reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogFields {
    /// Creates fields identifying a call.
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            ..Default::default()
        }
    }

    /// Returns a copy with `retry_count` set.
    pub fn with_retry_count(&self, retry_count: u32) -> Self {
        Self {
            retry_count: Some(retry_count),
            ..self.clone()
        }
    }
}

/// Receives call logs.
///
/// Implementations must be safe to share between concurrent calls.
pub trait Logger: Send + Sync {
    /// Records one log entry.
    fn log(&self, level: Level, message: &str, fields: &LogFields);
}

/// Emits call logs as `tracing` events under this crate's target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

macro_rules! emit {
    ($macro:ident, $message:expr, $fields:expr) => {
        tracing::$macro!(
            service = %$fields.service,
            method = %$fields.method,
            logger_marker = $fields.logger_marker.map(|m| m.as_str()),
            status_code = $fields.status_code.as_ref().map(tracing::field::display),
            retry_count = $fields.retry_count,
            error = $fields.error.as_deref(),
            "{}",
            $message
        )
    };
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str, fields: &LogFields) {
        match level {
            Level::ERROR => emit!(error, message, fields),
            Level::WARN => emit!(warn, message, fields),
            Level::INFO => emit!(info, message, fields),
            Level::DEBUG => emit!(debug, message, fields),
            _ => emit!(trace, message, fields),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_retry_count_keeps_identity() {
        let fields = LogFields::new("users.v1.Users", "GetUser");
        let retried = fields.with_retry_count(2);

        assert_eq!(retried.service, "users.v1.Users");
        assert_eq!(retried.method, "GetUser");
        assert_eq!(retried.retry_count, Some(2));
        assert_eq!(fields.retry_count, None);
    }

    #[test]
    fn test_fields_serialize_without_empty_values() {
        let mut fields = LogFields::new("svc", "Call");
        fields.logger_marker = Some(LoggerMarker::External);
        fields.status_code = Some(StatusCode::Timeout);

        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "service": "svc",
                "method": "Call",
                "logger_marker": "external",
                "status_code": "timeout",
            })
        );
    }

    #[test]
    fn test_tracing_logger_accepts_every_level() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let fields = LogFields::new("svc", "Call").with_retry_count(1);
        for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
            TracingLogger.log(level, "call finished", &fields);
        }
    }
}
