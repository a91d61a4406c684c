//! Call context and the metadata attached to every outbound call.
//!
//! The [`CallContext`] is passed explicitly to
//! [`Client::request`](crate::Client::request). A [`MetadataBuilder`] turns it,
//! together with any caller supplied metadata, into the transport metadata
//! sent with each attempt.

use crate::{ClientError, Code, Result, StatusCode};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tonic::metadata::{MetadataMap, MetadataValue};

/// W3C trace context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// B3 trace id header.
pub const B3_TRACE_ID_HEADER: &str = "x-b3-traceid";
/// B3 span id header.
pub const B3_SPAN_ID_HEADER: &str = "x-b3-spanid";
/// B3 parent span id header.
pub const B3_PARENT_SPAN_ID_HEADER: &str = "x-b3-parentspanid";
/// B3 sampling decision header.
pub const B3_SAMPLED_HEADER: &str = "x-b3-sampled";
/// Credentials header.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Tracing identity of the operation issuing a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// 32 hex digit trace id
    pub trace_id: String,
    /// 16 hex digit span id of the current operation
    pub span_id: String,
    /// Span id of the parent operation, if any
    pub parent_span_id: Option<String>,
    /// Whether the trace is sampled
    pub sampled: bool,
}

impl CallContext {
    /// Starts a new sampled trace.
    pub fn new_root() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            trace_id: format!("{:032x}", rng.gen::<u128>()),
            span_id: format!("{:016x}", rng.gen::<u64>()),
            parent_span_id: None,
            sampled: true,
        }
    }

    /// Parses a W3C `traceparent` value (`00-{32hex}-{16hex}-{2hex}`).
    ///
    /// # Examples
    ///
    /// ```
    /// use grpcall::metadata::CallContext;
    ///
    /// let ctx = CallContext::from_traceparent(
    ///     "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
    /// ).unwrap();
    /// assert_eq!(ctx.trace_id, "0af7651916cd43dd8448eb211c80319c");
    /// assert!(ctx.sampled);
    /// ```
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.trim().split('-').collect();
        if parts.len() != 4 {
            return None;
        }

        let lengths = [2, 32, 16, 2];
        let well_formed = parts
            .iter()
            .zip(lengths)
            .all(|(part, len)| part.len() == len && part.chars().all(|c| c.is_ascii_hexdigit()));
        if !well_formed {
            return None;
        }

        let flags = u8::from_str_radix(parts[3], 16).ok()?;
        Some(Self {
            trace_id: parts[1].to_ascii_lowercase(),
            span_id: parts[2].to_ascii_lowercase(),
            parent_span_id: None,
            sampled: flags & 0x01 != 0,
        })
    }

    /// Opens a child span in the same trace.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: format!("{:016x}", rand::thread_rng().gen::<u64>()),
            parent_span_id: Some(self.span_id.clone()),
            sampled: self.sampled,
        }
    }

    /// Formats the context as a W3C `traceparent` value.
    pub fn traceparent(&self) -> String {
        let flags = if self.sampled { "01" } else { "00" };
        format!("00-{}-{}-{}", self.trace_id, self.span_id, flags)
    }
}

/// Options passed through to the [`MetadataBuilder`].
///
/// The client never interprets these; they are merged like every other option
/// and handed to the builder.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataBuilderOptions {
    /// Emit B3 (Zipkin) headers instead of W3C `traceparent`.
    pub use_zipkin: Option<bool>,

    /// Bearer token sent in the `authorization` header. Read from config but
    /// never written back out.
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
}

impl MetadataBuilderOptions {
    /// Returns `self` with each field replaced by `over`'s when set.
    pub fn layered(&self, over: &MetadataBuilderOptions) -> Self {
        Self {
            use_zipkin: over.use_zipkin.or(self.use_zipkin),
            auth_token: over.auth_token.clone().or_else(|| self.auth_token.clone()),
        }
    }
}

impl fmt::Debug for MetadataBuilderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataBuilderOptions")
            .field("use_zipkin", &self.use_zipkin)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Builds the transport metadata for a call.
pub trait MetadataBuilder: Send + Sync {
    /// Returns the metadata to send with every attempt of the call.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be encoded as metadata.
    fn build(
        &self,
        context: &CallContext,
        metadata: Option<&MetadataMap>,
        options: &MetadataBuilderOptions,
    ) -> Result<MetadataMap>;
}

/// The default builder: trace propagation plus an optional bearer token.
///
/// Each call is sent as a child span of `context`.
///
/// # Examples
///
/// ```
/// use grpcall::metadata::{CallContext, MetadataBuilder, MetadataBuilderOptions, TraceMetadataBuilder};
///
/// let options = MetadataBuilderOptions {
///     auth_token: Some("secret".to_string()),
///     ..Default::default()
/// };
/// let metadata = TraceMetadataBuilder
///     .build(&CallContext::new_root(), None, &options)
///     .unwrap();
///
/// assert_eq!(metadata.get("authorization").unwrap(), "Bearer secret");
/// assert!(metadata.get("traceparent").is_some());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceMetadataBuilder;

impl MetadataBuilder for TraceMetadataBuilder {
    fn build(
        &self,
        context: &CallContext,
        metadata: Option<&MetadataMap>,
        options: &MetadataBuilderOptions,
    ) -> Result<MetadataMap> {
        let mut out = metadata.cloned().unwrap_or_default();
        let span = context.child();

        if options.use_zipkin.unwrap_or(false) {
            out.insert(B3_TRACE_ID_HEADER, ascii_value(&span.trace_id)?);
            out.insert(B3_SPAN_ID_HEADER, ascii_value(&span.span_id)?);
            if let Some(parent) = &span.parent_span_id {
                out.insert(B3_PARENT_SPAN_ID_HEADER, ascii_value(parent)?);
            }
            let sampled = if span.sampled { "1" } else { "0" };
            out.insert(B3_SAMPLED_HEADER, MetadataValue::from_static(sampled));
        } else {
            out.insert(TRACEPARENT_HEADER, ascii_value(&span.traceparent())?);
        }

        if let Some(token) = &options.auth_token {
            out.insert(AUTHORIZATION_HEADER, ascii_value(&format!("Bearer {}", token))?);
        }

        Ok(out)
    }
}

fn ascii_value(value: &str) -> Result<MetadataValue<tonic::metadata::Ascii>> {
    MetadataValue::try_from(value).map_err(|e| {
        ClientError::internal(
            format!("Invalid metadata value: {}", e),
            StatusCode::Grpc(Code::InvalidArgument),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    #[test]
    fn test_parse_traceparent() {
        let ctx = CallContext::from_traceparent(TRACEPARENT).unwrap();
        assert_eq!(ctx.span_id, "b7ad6b7169203331");
        assert_eq!(ctx.traceparent(), TRACEPARENT);
    }

    #[test]
    fn test_invalid_traceparent() {
        assert!(CallContext::from_traceparent("invalid").is_none());
        assert!(CallContext::from_traceparent("00-xyz-b7ad6b7169203331-01").is_none());
        let unsampled =
            CallContext::from_traceparent("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-00")
                .unwrap();
        assert!(!unsampled.sampled);
    }

    #[test]
    fn test_root_context_is_well_formed() {
        let ctx = CallContext::new_root();
        assert_eq!(CallContext::from_traceparent(&ctx.traceparent()), Some(ctx));
    }

    #[test]
    fn test_w3c_metadata_uses_child_span() {
        let ctx = CallContext::from_traceparent(TRACEPARENT).unwrap();
        let metadata = TraceMetadataBuilder
            .build(&ctx, None, &MetadataBuilderOptions::default())
            .unwrap();

        let sent = metadata.get(TRACEPARENT_HEADER).unwrap().to_str().unwrap();
        let sent = CallContext::from_traceparent(sent).unwrap();
        assert_eq!(sent.trace_id, ctx.trace_id);
        assert_ne!(sent.span_id, ctx.span_id);
        assert!(metadata.get(AUTHORIZATION_HEADER).is_none());
        assert!(metadata.get(B3_TRACE_ID_HEADER).is_none());
    }

    #[test]
    fn test_zipkin_metadata() {
        let ctx = CallContext::from_traceparent(TRACEPARENT).unwrap();
        let options = MetadataBuilderOptions {
            use_zipkin: Some(true),
            auth_token: None,
        };
        let metadata = TraceMetadataBuilder.build(&ctx, None, &options).unwrap();

        assert_eq!(metadata.get(B3_TRACE_ID_HEADER).unwrap(), ctx.trace_id.as_str());
        assert_eq!(metadata.get(B3_PARENT_SPAN_ID_HEADER).unwrap(), ctx.span_id.as_str());
        assert_eq!(metadata.get(B3_SAMPLED_HEADER).unwrap(), "1");
        assert!(metadata.get(TRACEPARENT_HEADER).is_none());
    }

    #[test]
    fn test_caller_metadata_is_kept() {
        let mut caller = MetadataMap::new();
        caller.insert("x-tenant", MetadataValue::from_static("acme"));

        let metadata = TraceMetadataBuilder
            .build(&CallContext::new_root(), Some(&caller), &MetadataBuilderOptions::default())
            .unwrap();
        assert_eq!(metadata.get("x-tenant").unwrap(), "acme");
    }

    #[test]
    fn test_invalid_token_is_rejected() {
        let options = MetadataBuilderOptions {
            use_zipkin: None,
            auth_token: Some("line\nbreak".to_string()),
        };
        let error = TraceMetadataBuilder
            .build(&CallContext::new_root(), None, &options)
            .unwrap_err();
        assert_eq!(error.status_code(), Some(StatusCode::Grpc(Code::InvalidArgument)));
    }

    #[test]
    fn test_debug_redacts_token() {
        let options = MetadataBuilderOptions {
            use_zipkin: None,
            auth_token: Some("secret".to_string()),
        };
        let rendered = format!("{:?}", options);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_serialize_omits_token() {
        let options = MetadataBuilderOptions {
            use_zipkin: Some(true),
            auth_token: Some("secret".to_string()),
        };
        let json = serde_json::to_string(&options).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("auth_token"));

        let parsed: MetadataBuilderOptions =
            serde_json::from_str(r#"{"auth_token": "secret"}"#).unwrap();
        assert_eq!(parsed.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_layered_prefers_override() {
        let base = MetadataBuilderOptions {
            use_zipkin: Some(true),
            auth_token: Some("base".to_string()),
        };
        let over = MetadataBuilderOptions {
            use_zipkin: None,
            auth_token: Some("call".to_string()),
        };
        let merged = base.layered(&over);
        assert_eq!(merged.use_zipkin, Some(true));
        assert_eq!(merged.auth_token.as_deref(), Some("call"));
    }
}
