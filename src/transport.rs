//! The call request model and the transport that carries it.
//!
//! The client does not speak gRPC itself. It hands each attempt to a
//! [`Transport`], which performs one unary call and reports either the response
//! or a raw [`CallFailure`]. [`GrpcTransport`] is the implementation for
//! `tonic` channels and prost messages.

use crate::error::CallFailure;
use async_trait::async_trait;
use http::uri::PathAndQuery;
use tonic::metadata::MetadataMap;
use tonic::transport::Channel;

/// The payload of a call.
///
/// `Null` and `Undefined` are distinct from `Absent`: transports that can tell
/// them apart on the wire must do so.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestData<T> {
    /// No payload was supplied.
    Absent,
    /// A request message.
    Value(T),
    /// Call the method with metadata only.
    Null,
    /// Call the method with an explicit "unset" payload marker.
    Undefined,
}

impl<T> RequestData<T> {
    /// Returns the request message, if there is one.
    pub fn value(&self) -> Option<&T> {
        match self {
            RequestData::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> Default for RequestData<T> {
    fn default() -> Self {
        RequestData::Absent
    }
}

/// One unary call to make.
///
/// # Examples
///
/// ```
/// use grpcall::{CallRequest, RequestData};
///
/// let call = CallRequest::new("users.v1.Users", "GetUser").with_data(42u64);
/// assert_eq!(call.data, RequestData::Value(42));
///
/// let ping = CallRequest::<u64>::new("health.v1.Health", "Ping").with_null_data();
/// assert_eq!(ping.data, RequestData::Null);
/// ```
#[derive(Debug, Clone)]
pub struct CallRequest<Req> {
    /// Fully qualified service name, such as `users.v1.Users`
    pub service: String,
    /// Method name, such as `GetUser`
    pub method: String,
    /// The payload
    pub data: RequestData<Req>,
    /// Metadata supplied by the caller, merged into the built metadata
    pub metadata: Option<MetadataMap>,
}

impl<Req> CallRequest<Req> {
    /// Creates a call without payload or metadata.
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            data: RequestData::Absent,
            metadata: None,
        }
    }

    /// Sets the request message.
    pub fn with_data(mut self, data: Req) -> Self {
        self.data = RequestData::Value(data);
        self
    }

    /// Sends metadata only.
    pub fn with_null_data(mut self) -> Self {
        self.data = RequestData::Null;
        self
    }

    /// Sends an explicit "unset" payload.
    pub fn with_undefined_data(mut self) -> Self {
        self.data = RequestData::Undefined;
        self
    }

    /// Sets caller metadata.
    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Performs a single unary call.
///
/// The client races every call against its deadlines and drops the returned
/// future when a deadline wins, so implementations must be cancel safe.
///
/// # Examples
///
/// ```
/// use grpcall::{async_trait, CallFailure, MetadataMap, RequestData, Status, Transport};
///
/// struct Echo;
///
/// #[async_trait]
/// impl Transport<String, String> for Echo {
///     async fn call(
///         &self,
///         _service: &str,
///         _method: &str,
///         data: &RequestData<String>,
///         _metadata: MetadataMap,
///     ) -> Result<String, CallFailure> {
///         match data {
///             RequestData::Value(text) => Ok(text.clone()),
///             _ => Err(Status::invalid_argument("nothing to echo").into()),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Transport<Req, Res>: Send + Sync {
    /// Calls `method` on `service` once.
    async fn call(
        &self,
        service: &str,
        method: &str,
        data: &RequestData<Req>,
        metadata: MetadataMap,
    ) -> Result<Res, CallFailure>;
}

/// A [`Transport`] over a `tonic` channel for prost encoded messages.
///
/// Calls go to `/<service>/<method>`. Protobuf has no way to send "no
/// message", so every payload other than [`RequestData::Value`] is sent as the
/// default message.
#[derive(Clone)]
pub struct GrpcTransport {
    inner: tonic::client::Grpc<Channel>,
}

impl GrpcTransport {
    /// Creates a transport over `channel`.
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }
}

#[async_trait]
impl<Req, Res> Transport<Req, Res> for GrpcTransport
where
    Req: prost::Message + Clone + Default + Send + Sync + 'static,
    Res: prost::Message + Default + Send + Sync + 'static,
{
    async fn call(
        &self,
        service: &str,
        method: &str,
        data: &RequestData<Req>,
        metadata: MetadataMap,
    ) -> Result<Res, CallFailure> {
        let mut grpc = self.inner.clone();
        grpc.ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("Service was not ready: {}", e)))?;

        let path = PathAndQuery::try_from(format!("/{}/{}", service, method))
            .map_err(|e| tonic::Status::invalid_argument(format!("Invalid method path: {}", e)))?;

        let message = data.value().cloned().unwrap_or_default();
        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = metadata;

        let codec = tonic::codec::ProstCodec::<Req, Res>::default();
        let response = grpc.unary(request, path, codec).await?;
        Ok(response.into_inner())
    }
}
