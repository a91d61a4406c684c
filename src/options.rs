//! Request options and the rules for combining them.
//!
//! Options come in three layers: built-in constants, service-wide defaults set
//! on the [`ClientBuilder`](crate::ClientBuilder), and per-call overrides. Each
//! layer is a partial [`RequestOptions`]; [`merge`] combines them field by field
//! and normalizes the result into the [`ResolvedOptions`] the client runs with.

use crate::metadata::MetadataBuilderOptions;
use crate::{ClientError, Code, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-attempt timeout, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
/// Default retry window, in milliseconds.
pub const DEFAULT_RETRY_TIMEOUT_MS: i64 = 120_000;
/// Default pause between attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;
/// Default maximum number of retries.
pub const DEFAULT_RETRY_MAX_COUNT: i64 = 5;

/// Status codes retried when no layer sets `status_codes`.
pub fn default_status_codes() -> Vec<StatusCode> {
    vec![
        StatusCode::Grpc(Code::DeadlineExceeded),
        StatusCode::Grpc(Code::Unavailable),
        StatusCode::Timeout,
    ]
}

/// One layer of per-call configuration.
///
/// Every field is optional; unset fields fall through to the layer below.
///
/// # Examples
///
/// ```
/// use grpcall::{RequestOptions, StatusCode, Code};
///
/// let options = RequestOptions::from_json(r#"{
///     "request_options": { "timeout": 2000 },
///     "retry_options": { "retry_max_count": 2, "status_codes": ["UNAVAILABLE", "timeout"] }
/// }"#).unwrap();
///
/// assert_eq!(options.request_options.timeout, Some(2000));
/// assert_eq!(
///     options.retry_options.status_codes,
///     Some(vec![StatusCode::Grpc(Code::Unavailable), StatusCode::Timeout]),
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestOptions {
    /// Passed through to the metadata builder.
    pub metadata_builder_options: MetadataBuilderOptions,

    /// Options for a single attempt.
    pub request_options: AttemptOptions,

    /// Options for the retry sequence.
    pub retry_options: RetryOptions,
}

/// Options for a single attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttemptOptions {
    /// Milliseconds allowed for one attempt. Zero means the default.
    pub timeout: Option<u64>,
}

/// Options for the retry sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryOptions {
    /// Explicit switch. `false` disables retries whatever the other fields say.
    pub retry: Option<bool>,

    /// Milliseconds allowed for the whole sequence after the first failure.
    /// Zero disables the window; negative values count as zero.
    pub timeout: Option<i64>,

    /// Milliseconds to wait between a failed attempt and the next one.
    /// Zero means the default.
    pub delay: Option<u64>,

    /// Maximum number of retries. Zero means unlimited while a window is set;
    /// negative values count as zero.
    pub retry_max_count: Option<i64>,

    /// Status codes eligible for retry.
    pub status_codes: Option<Vec<StatusCode>>,
}

impl RequestOptions {
    /// Parses options from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or names unknown fields or
    /// status codes.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            ClientError::internal(
                format!("Invalid request options: {}", e),
                StatusCode::Grpc(Code::InvalidArgument),
            )
        })
    }

    /// Returns `self` with every field that `over` sets replaced by `over`'s.
    pub fn layered(&self, over: &RequestOptions) -> RequestOptions {
        RequestOptions {
            metadata_builder_options: self
                .metadata_builder_options
                .layered(&over.metadata_builder_options),
            request_options: AttemptOptions {
                timeout: over.request_options.timeout.or(self.request_options.timeout),
            },
            retry_options: self.retry_options.layered(&over.retry_options),
        }
    }

    /// Sets the per-attempt timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_options.timeout = Some(duration_ms(timeout));
        self
    }

    /// Enables or disables retries explicitly.
    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry_options.retry = Some(retry);
        self
    }

    /// Sets the retry window.
    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_options.timeout = Some(i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX));
        self
    }

    /// Sets the pause between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_options.delay = Some(duration_ms(delay));
        self
    }

    /// Sets the maximum number of retries.
    pub fn with_retry_max_count(mut self, count: u32) -> Self {
        self.retry_options.retry_max_count = Some(i64::from(count));
        self
    }

    /// Sets the status codes eligible for retry.
    pub fn with_status_codes(mut self, codes: impl IntoIterator<Item = StatusCode>) -> Self {
        self.retry_options.status_codes = Some(codes.into_iter().collect());
        self
    }

    /// Sets the bearer token sent with the call.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.metadata_builder_options.auth_token = Some(token.into());
        self
    }
}

impl RetryOptions {
    /// The built-in bottom layer.
    pub fn builtin() -> Self {
        Self {
            retry: None,
            timeout: Some(DEFAULT_RETRY_TIMEOUT_MS),
            delay: Some(DEFAULT_RETRY_DELAY_MS),
            retry_max_count: Some(DEFAULT_RETRY_MAX_COUNT),
            status_codes: Some(default_status_codes()),
        }
    }

    fn layered(&self, over: &RetryOptions) -> RetryOptions {
        RetryOptions {
            retry: over.retry.or(self.retry),
            timeout: over.timeout.or(self.timeout),
            delay: over.delay.or(self.delay),
            retry_max_count: over.retry_max_count.or(self.retry_max_count),
            status_codes: over
                .status_codes
                .clone()
                .or_else(|| self.status_codes.clone()),
        }
    }
}

/// Fully resolved options for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    /// Passed through to the metadata builder.
    pub metadata: MetadataBuilderOptions,
    /// Deadline for a single attempt.
    pub attempt_timeout: Duration,
    /// Retry policy.
    pub retry: ResolvedRetry,
}

/// The retry policy of a call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRetry {
    /// Whether a failed attempt may be retried at all.
    pub enabled: bool,
    /// Deadline for the sequence after the first failure; zero disables it.
    pub window: Duration,
    /// Pause between attempts.
    pub delay: Duration,
    /// Maximum number of retries; zero means unlimited within the window.
    pub max_count: u32,
    /// Status codes eligible for retry.
    pub status_codes: Vec<StatusCode>,
}

impl ResolvedRetry {
    /// Returns `true` if another retry fits the budget after `retries` retries.
    pub fn has_budget(&self, retries: u32) -> bool {
        self.max_count == 0 || retries < self.max_count
    }
}

/// Resolves a single layer on top of the built-in constants.
pub fn normalize(options: &RequestOptions) -> ResolvedOptions {
    let builtin = RequestOptions {
        retry_options: RetryOptions::builtin(),
        ..Default::default()
    };
    let layered = builtin.layered(options);
    let retry = &layered.retry_options;

    let attempt_ms = layered
        .request_options
        .timeout
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
    let delay_ms = retry
        .delay
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_RETRY_DELAY_MS);
    let window_ms = u64::try_from(retry.timeout.unwrap_or(0).max(0)).unwrap_or(0);
    let max_count = u32::try_from(retry.retry_max_count.unwrap_or(0).max(0)).unwrap_or(u32::MAX);

    // No retry budget and no time budget leaves nothing to retry with.
    let enabled = !(max_count == 0 && window_ms == 0) && retry.retry.unwrap_or(true);

    ResolvedOptions {
        metadata: layered.metadata_builder_options.clone(),
        attempt_timeout: Duration::from_millis(attempt_ms),
        retry: ResolvedRetry {
            enabled,
            window: Duration::from_millis(window_ms),
            delay: Duration::from_millis(delay_ms),
            max_count,
            status_codes: retry.status_codes.clone().unwrap_or_default(),
        },
    }
}

/// Merges service defaults with per-call overrides.
///
/// Precedence is built-in < `service_defaults` < `call_overrides`, field by
/// field.
///
/// # Examples
///
/// ```
/// use grpcall::options::{merge, RequestOptions};
/// use std::time::Duration;
///
/// let service = RequestOptions::default().with_retry_max_count(3);
/// let call = RequestOptions::default().with_request_timeout(Duration::from_secs(1));
///
/// let resolved = merge(&service, &call);
/// assert_eq!(resolved.attempt_timeout, Duration::from_secs(1));
/// assert_eq!(resolved.retry.max_count, 3);
/// assert_eq!(resolved.retry.delay, Duration::from_secs(5));
/// ```
pub fn merge(service_defaults: &RequestOptions, call_overrides: &RequestOptions) -> ResolvedOptions {
    normalize(&service_defaults.layered(call_overrides))
}

/// Returns `true` if `error`'s status code is one the options retry.
pub fn can_retry(error: &ClientError, options: &ResolvedOptions) -> bool {
    let codes = &options.retry.status_codes;
    match error.status_code() {
        Some(code) => !codes.is_empty() && codes.contains(&code),
        None => false,
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TimeoutKind;

    fn unavailable() -> ClientError {
        ClientError::external("down", Some(StatusCode::Grpc(Code::Unavailable)))
    }

    #[test]
    fn test_builtin_defaults() {
        let resolved = normalize(&RequestOptions::default());

        assert_eq!(resolved.attempt_timeout, Duration::from_millis(15_000));
        assert!(resolved.retry.enabled);
        assert_eq!(resolved.retry.window, Duration::from_millis(120_000));
        assert_eq!(resolved.retry.delay, Duration::from_millis(5_000));
        assert_eq!(resolved.retry.max_count, 5);
        assert_eq!(resolved.retry.status_codes, default_status_codes());
        assert!(!resolved.retry.status_codes.contains(&StatusCode::Grpc(Code::NotFound)));
    }

    #[test]
    fn test_call_overrides_service_overrides_builtin() {
        let service = RequestOptions::default()
            .with_retry_max_count(3)
            .with_retry_delay(Duration::from_millis(100));
        let call = RequestOptions::default().with_retry_max_count(1);

        let resolved = merge(&service, &call);
        assert_eq!(resolved.retry.max_count, 1);
        assert_eq!(resolved.retry.delay, Duration::from_millis(100));
        assert_eq!(resolved.retry.window, Duration::from_millis(120_000));
    }

    #[test]
    fn test_falsy_timeouts_fall_back() {
        let mut options = RequestOptions::default();
        options.request_options.timeout = Some(0);
        options.retry_options.delay = Some(0);

        let resolved = normalize(&options);
        assert_eq!(resolved.attempt_timeout, Duration::from_millis(15_000));
        assert_eq!(resolved.retry.delay, Duration::from_millis(5_000));
    }

    #[test]
    fn test_negative_budgets_clamp_to_zero() {
        let mut options = RequestOptions::default();
        options.retry_options.retry_max_count = Some(-3);
        options.retry_options.timeout = Some(-1);

        let resolved = normalize(&options);
        assert_eq!(resolved.retry.max_count, 0);
        assert_eq!(resolved.retry.window, Duration::ZERO);
        assert!(!resolved.retry.enabled);
    }

    #[test]
    fn test_zero_budget_forces_retry_off() {
        let mut options = RequestOptions::default().with_retry(true).with_retry_max_count(0);
        options.retry_options.timeout = Some(0);

        assert!(!normalize(&options).retry.enabled);
    }

    #[test]
    fn test_zero_count_with_window_is_unlimited() {
        let options = RequestOptions::default().with_retry_max_count(0);
        let resolved = normalize(&options);

        assert!(resolved.retry.enabled);
        assert!(resolved.retry.has_budget(0));
        assert!(resolved.retry.has_budget(10_000));
    }

    #[test]
    fn test_explicit_retry_false_wins() {
        let service = RequestOptions::default().with_retry(true);
        let call = RequestOptions::default().with_retry(false);
        assert!(!merge(&service, &call).retry.enabled);
    }

    #[test]
    fn test_merge_with_empty_is_normalize() {
        let options = RequestOptions::default()
            .with_request_timeout(Duration::from_millis(250))
            .with_status_codes([StatusCode::Timeout])
            .with_auth_token("token");

        assert_eq!(merge(&options, &RequestOptions::default()), normalize(&options));
    }

    #[test]
    fn test_layering_is_associative_per_field() {
        let defaults = RequestOptions::default()
            .with_retry_max_count(4)
            .with_retry_delay(Duration::from_millis(20));
        let overrides = RequestOptions::default()
            .with_retry_delay(Duration::from_millis(30))
            .with_retry(false);

        let nested = RequestOptions::default().layered(&overrides);
        assert_eq!(merge(&defaults, &nested), merge(&defaults, &overrides));

        let a = defaults.clone();
        let b = overrides.clone();
        let c = RequestOptions::default().with_retry_max_count(9);
        assert_eq!(a.layered(&b).layered(&c), a.layered(&b.layered(&c)));
    }

    #[test]
    fn test_can_retry_requires_listed_code() {
        let resolved = normalize(&RequestOptions::default());
        assert!(can_retry(&unavailable(), &resolved));
        assert!(can_retry(&ClientError::timeout(TimeoutKind::Attempt, "slow", None), &resolved));
        assert!(!can_retry(
            &ClientError::internal("bad", StatusCode::Grpc(Code::InvalidArgument)),
            &resolved
        ));
        assert!(!can_retry(&ClientError::external("no code", None), &resolved));
    }

    #[test]
    fn test_can_retry_with_empty_codes() {
        let options = RequestOptions::default().with_status_codes(Vec::new());
        let resolved = normalize(&options);

        assert!(!can_retry(&unavailable(), &resolved));
        assert!(!can_retry(&ClientError::timeout(TimeoutKind::Attempt, "slow", None), &resolved));
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        let error = RequestOptions::from_json(r#"{ "retry_options": { "retries": 3 } }"#).unwrap_err();
        assert_eq!(error.status_code(), Some(StatusCode::Grpc(Code::InvalidArgument)));
    }

    #[test]
    fn test_from_json_metadata_options() {
        let options = RequestOptions::from_json(
            r#"{ "metadata_builder_options": { "use_zipkin": true, "auth_token": "t" } }"#,
        )
        .unwrap();
        let resolved = normalize(&options);
        assert_eq!(resolved.metadata.use_zipkin, Some(true));
        assert_eq!(resolved.metadata.auth_token.as_deref(), Some("t"));
    }

    #[test]
    fn test_serialized_options_keep_token_out() {
        let options = RequestOptions::default()
            .with_auth_token("s3cr3t")
            .with_retry_max_count(2);
        let json = serde_json::to_string(&options).unwrap();

        assert!(!json.contains("s3cr3t"));
        assert!(json.contains("\"retry_max_count\":2"));
    }
}
