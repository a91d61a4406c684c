//! Status codes used for retry eligibility, log labels and metric labels.
//!
//! A [`StatusCode`] is either one of the transport's numeric gRPC codes or the
//! synthetic `timeout` code produced when a call is abandoned locally.

use serde::{Deserialize, Serialize};
use std::fmt;
use tonic::Code;

/// Transport codes paired with their canonical names.
const CODE_NAMES: [(Code, &str); 17] = [
    (Code::Ok, "OK"),
    (Code::Cancelled, "CANCELLED"),
    (Code::Unknown, "UNKNOWN"),
    (Code::InvalidArgument, "INVALID_ARGUMENT"),
    (Code::DeadlineExceeded, "DEADLINE_EXCEEDED"),
    (Code::NotFound, "NOT_FOUND"),
    (Code::AlreadyExists, "ALREADY_EXISTS"),
    (Code::PermissionDenied, "PERMISSION_DENIED"),
    (Code::ResourceExhausted, "RESOURCE_EXHAUSTED"),
    (Code::FailedPrecondition, "FAILED_PRECONDITION"),
    (Code::Aborted, "ABORTED"),
    (Code::OutOfRange, "OUT_OF_RANGE"),
    (Code::Unimplemented, "UNIMPLEMENTED"),
    (Code::Internal, "INTERNAL"),
    (Code::Unavailable, "UNAVAILABLE"),
    (Code::DataLoss, "DATA_LOSS"),
    (Code::Unauthenticated, "UNAUTHENTICATED"),
];

const TIMEOUT: &str = "timeout";

/// Returns the canonical SCREAMING_CASE name of a transport code.
///
/// # Examples
///
/// ```
/// use grpcall::{status::code_name, Code};
///
/// assert_eq!(code_name(Code::Unavailable), "UNAVAILABLE");
/// ```
pub fn code_name(code: Code) -> &'static str {
    CODE_NAMES
        .iter()
        .find(|(candidate, _)| *candidate == code)
        .map_or("UNKNOWN", |(_, name)| name)
}

/// Identifies the failure class of a call.
///
/// # Examples
///
/// ```
/// use grpcall::{Code, StatusCode};
///
/// assert_eq!(StatusCode::Grpc(Code::Unavailable).to_string(), "14");
/// assert_eq!(StatusCode::Timeout.to_string(), "timeout");
/// assert_eq!("UNAVAILABLE".parse::<StatusCode>(), Ok(StatusCode::Grpc(Code::Unavailable)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StatusCodeRepr", into = "StatusCodeRepr")]
pub enum StatusCode {
    /// A code reported by the transport.
    Grpc(Code),

    /// The call was abandoned locally because a deadline elapsed.
    Timeout,
}

impl StatusCode {
    /// Returns the transport code, if this is not the synthetic timeout.
    pub fn grpc(&self) -> Option<Code> {
        match self {
            StatusCode::Grpc(code) => Some(*code),
            StatusCode::Timeout => None,
        }
    }

    /// Returns the symbolic name (`UNAVAILABLE`, `timeout`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            StatusCode::Grpc(code) => code_name(*code),
            StatusCode::Timeout => TIMEOUT,
        }
    }

    /// Builds a status code from a numeric transport code.
    ///
    /// Returns `None` for values outside the range the transport defines.
    pub fn from_number(value: i32) -> Option<Self> {
        CODE_NAMES
            .iter()
            .find(|(code, _)| *code as i32 == value)
            .map(|(code, _)| StatusCode::Grpc(*code))
    }
}

impl From<Code> for StatusCode {
    fn from(code: Code) -> Self {
        StatusCode::Grpc(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Grpc(code) => write!(f, "{}", *code as i32),
            StatusCode::Timeout => f.write_str(TIMEOUT),
        }
    }
}

impl std::str::FromStr for StatusCode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case(TIMEOUT) {
            return Ok(StatusCode::Timeout);
        }

        if let Ok(value) = s.parse::<i32>() {
            return StatusCode::from_number(value)
                .ok_or_else(|| format!("Unknown status code: {}", value));
        }

        CODE_NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(code, _)| StatusCode::Grpc(*code))
            .ok_or_else(|| format!("Unknown status code: {}", s))
    }
}

/// Wire shape of a status code in configuration: a number or a name.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StatusCodeRepr {
    Numeric(i32),
    Symbolic(String),
}

impl TryFrom<StatusCodeRepr> for StatusCode {
    type Error = String;

    fn try_from(repr: StatusCodeRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            StatusCodeRepr::Numeric(value) => StatusCode::from_number(value)
                .ok_or_else(|| format!("Unknown status code: {}", value)),
            StatusCodeRepr::Symbolic(name) => name.parse(),
        }
    }
}

impl From<StatusCode> for StatusCodeRepr {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::Grpc(code) => StatusCodeRepr::Numeric(code as i32),
            StatusCode::Timeout => StatusCodeRepr::Symbolic(TIMEOUT.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_names_cover_every_number() {
        for value in 0..=16 {
            let code = StatusCode::from_number(value).unwrap();
            assert_eq!(code.to_string(), value.to_string());
        }
        assert_eq!(StatusCode::from_number(17), None);
        assert_eq!(StatusCode::from_number(-1), None);
    }

    #[test]
    fn test_parse_symbolic_names() {
        assert_eq!(
            "deadline_exceeded".parse::<StatusCode>(),
            Ok(StatusCode::Grpc(Code::DeadlineExceeded))
        );
        assert_eq!("TIMEOUT".parse::<StatusCode>(), Ok(StatusCode::Timeout));
        assert_eq!("5".parse::<StatusCode>(), Ok(StatusCode::Grpc(Code::NotFound)));
        assert!("teapot".parse::<StatusCode>().is_err());
    }

    #[test]
    fn test_serde_accepts_numbers_and_names() {
        let codes: Vec<StatusCode> =
            serde_json::from_str(r#"[14, "DEADLINE_EXCEEDED", "timeout"]"#).unwrap();
        assert_eq!(
            codes,
            vec![
                StatusCode::Grpc(Code::Unavailable),
                StatusCode::Grpc(Code::DeadlineExceeded),
                StatusCode::Timeout,
            ]
        );

        let json = serde_json::to_string(&codes).unwrap();
        assert_eq!(json, r#"[14,4,"timeout"]"#);
    }

    #[test]
    fn test_serde_rejects_unknown_codes() {
        assert!(serde_json::from_str::<StatusCode>("99").is_err());
        assert!(serde_json::from_str::<StatusCode>(r#""BOGUS""#).is_err());
    }
}
