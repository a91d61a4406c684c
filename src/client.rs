//! gRPC client with deadlines, retries and typed errors.
//!
//! The [`Client`] type is the main entry point for making calls.
//! Use [`ClientBuilder`] to configure and create clients.

use crate::{
    error::{CallFailure, TimeoutKind, TimeoutSignal},
    handler::{self, Classified, ResponseHandler},
    logging::{LogFields, Logger, TracingLogger},
    metadata::{CallContext, MetadataBuilder, TraceMetadataBuilder},
    metrics::{Labels, Metrics, MetricsTimer, NoopMetrics, REQUEST_DURATION, REQUEST_FAILURES, REQUEST_RETRIES},
    options::{self, RequestOptions, ResolvedOptions},
    transport::{CallRequest, Transport},
    ClientError, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tonic::metadata::MetadataMap;

/// A client for making unary calls with deadlines and retries.
///
/// The client is cheap to clone and safe to share between tasks; clones share
/// the transport and collaborators.
///
/// # Examples
///
/// ```no_run
/// use grpcall::{CallContext, CallRequest, Client, GrpcTransport, RequestOptions};
/// use std::time::Duration;
///
/// #[derive(Clone, PartialEq, prost::Message)]
/// struct GetUser {
///     #[prost(uint64, tag = "1")]
///     id: u64,
/// }
///
/// #[derive(Clone, PartialEq, prost::Message)]
/// struct User {
///     #[prost(string, tag = "1")]
///     name: String,
/// }
///
/// # async fn example() -> Result<(), grpcall::ClientError> {
/// let channel = tonic::transport::Channel::from_static("http://users:50051").connect_lazy();
/// let client = Client::builder(GrpcTransport::new(channel))
///     .default_options(RequestOptions::default().with_retry_max_count(3))
///     .build();
///
/// let call = CallRequest::new("users.v1.Users", "GetUser").with_data(GetUser { id: 7 });
/// let options = RequestOptions::default().with_request_timeout(Duration::from_secs(2));
///
/// match client.request::<GetUser, User>(&CallContext::new_root(), call, Some(&options)).await? {
///     Some(user) => println!("found {}", user.name),
///     None => println!("no such user"),
/// }
/// # Ok(())
/// # }
/// ```
pub struct Client<T> {
    inner: Arc<ClientInner<T>>,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ClientInner<T> {
    transport: T,
    metadata_builder: Arc<dyn MetadataBuilder>,
    handler: ResponseHandler,
    metrics: Arc<dyn Metrics>,
    default_options: RequestOptions,
}

/// Mutable state of one `request` invocation.
struct CallState {
    retries: u32,
    timer: MetricsTimer,
}

impl<T> Client<T> {
    /// Creates a new `ClientBuilder` around `transport`.
    pub fn builder(transport: T) -> ClientBuilder<T> {
        ClientBuilder::new(transport)
    }

    /// Returns the service-wide default options.
    pub fn default_options(&self) -> &RequestOptions {
        &self.inner.default_options
    }

    /// Makes a unary call.
    ///
    /// Options are merged as built-in < client defaults < `overrides`. Each
    /// attempt is bounded by the attempt timeout; failures whose status code is
    /// retryable are retried after the configured delay while the retry budget
    /// lasts, and the whole retry sequence is bounded by the retry window.
    ///
    /// Returns `Ok(None)` when the remote answers `NOT_FOUND`.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the last attempt, or a
    /// [`ClientError::Timeout`] when the retry window elapses first.
    pub async fn request<Req, Res>(
        &self,
        context: &CallContext,
        call: CallRequest<Req>,
        overrides: Option<&RequestOptions>,
    ) -> Result<Option<Res>>
    where
        T: Transport<Req, Res>,
        Req: Send + Sync,
        Res: Send,
    {
        let empty = RequestOptions::default();
        let options = options::merge(&self.inner.default_options, overrides.unwrap_or(&empty));
        let fields = LogFields::new(call.service.as_str(), call.method.as_str());

        let metadata = self
            .inner
            .metadata_builder
            .build(context, call.metadata.as_ref(), &options.metadata)?;

        let mut state = CallState {
            retries: 0,
            timer: self.start_timer(&fields),
        };
        self.inner.handler.log_started(&fields);

        let settled = match self.attempt(&call, &metadata, options.attempt_timeout).await {
            Ok(response) => Ok(response),
            Err(failure) if !options.retry.enabled => Err(handler::classify(failure)),
            Err(failure) => {
                let sequence =
                    self.retry_sequence(&call, &metadata, &options, &fields, &mut state, failure);
                if options.retry.window.is_zero() {
                    sequence.await
                } else {
                    match tokio::time::timeout(options.retry.window, sequence).await {
                        Ok(settled) => settled,
                        Err(_) => {
                            tracing::debug!(
                                service = %fields.service,
                                method = %fields.method,
                                window_ms = options.retry.window.as_millis() as u64,
                                "Retry window elapsed"
                            );
                            Err(handler::classify(CallFailure::Timeout(TimeoutSignal::new(
                                TimeoutKind::RetryWindow,
                                format!(
                                    "Retry-request timed out ({} sec)",
                                    whole_seconds(options.retry.window)
                                ),
                            ))))
                        }
                    }
                }
            }
        };

        state.timer.stop();
        let fields = fields.with_retry_count(state.retries);

        match settled {
            Ok(response) => {
                self.inner.handler.handle_success(&fields);
                Ok(Some(response))
            }
            Err(classified) => {
                self.inner.handler.report_error(&classified, &fields);
                match classified.into_error() {
                    Some(error) => {
                        self.record_failure(&error, &fields);
                        Err(error)
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Retries from the first failure until an attempt succeeds or a failure
    /// cannot be retried. The returned failure has not been logged yet.
    async fn retry_sequence<Req, Res>(
        &self,
        call: &CallRequest<Req>,
        metadata: &MetadataMap,
        options: &ResolvedOptions,
        fields: &LogFields,
        state: &mut CallState,
        mut failure: CallFailure,
    ) -> std::result::Result<Res, Classified>
    where
        T: Transport<Req, Res>,
        Req: Send + Sync,
        Res: Send,
    {
        loop {
            let classified = handler::classify(failure);
            let retryable = classified
                .error()
                .is_some_and(|error| options::can_retry(error, options));
            if !retryable || !options.retry.has_budget(state.retries) {
                return Err(classified);
            }

            let attempt_fields = fields.with_retry_count(state.retries);
            if let Some(error) = classified.error() {
                self.record_failure(error, &attempt_fields);
            }
            state.timer.stop();
            self.inner.handler.report_retry(&classified, &attempt_fields);

            tokio::time::sleep(options.retry.delay).await;

            state.retries += 1;
            self.inner.metrics.increment(REQUEST_RETRIES, &call_labels(fields));
            state.timer = self.start_timer(fields);

            failure = match self.attempt(call, metadata, options.attempt_timeout).await {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };
        }
    }

    /// Runs one attempt, bounded by `timeout`.
    async fn attempt<Req, Res>(
        &self,
        call: &CallRequest<Req>,
        metadata: &MetadataMap,
        timeout: Duration,
    ) -> std::result::Result<Res, CallFailure>
    where
        T: Transport<Req, Res>,
        Req: Send + Sync,
        Res: Send,
    {
        tracing::debug!(service = %call.service, method = %call.method, "Executing gRPC call");

        let invocation =
            self.inner
                .transport
                .call(&call.service, &call.method, &call.data, metadata.clone());

        match tokio::time::timeout(timeout, invocation).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TimeoutSignal::new(
                TimeoutKind::Attempt,
                format!("Request timed out ({} sec)", whole_seconds(timeout)),
            )
            .into()),
        }
    }

    fn start_timer(&self, fields: &LogFields) -> MetricsTimer {
        MetricsTimer::start(&*self.inner.metrics, REQUEST_DURATION, &call_labels(fields))
    }

    fn record_failure(&self, error: &ClientError, fields: &LogFields) {
        let labels = call_labels(fields)
            .with(
                "status_code",
                error
                    .status_code()
                    .map_or_else(|| "unknown".to_string(), |code| code.to_string()),
            )
            .with("type", error.logger_marker().as_str());
        self.inner.metrics.increment(REQUEST_FAILURES, &labels);
    }
}

/// Seconds rounded down, but never below 1 for a non-zero deadline.
fn whole_seconds(deadline: Duration) -> u64 {
    match deadline.as_secs() {
        0 if !deadline.is_zero() => 1,
        secs => secs,
    }
}

fn call_labels(fields: &LogFields) -> Labels {
    Labels::new()
        .with("service", fields.service.as_str())
        .with("method", fields.method.as_str())
}

/// Builder for configuring and creating a [`Client`].
///
/// Every collaborator has a default: [`TraceMetadataBuilder`] for metadata,
/// [`TracingLogger`] for logs and [`NoopMetrics`] for metrics.
///
/// # Examples
///
/// ```
/// use grpcall::{async_trait, CallFailure, Client, MetadataMap, RequestData, RequestOptions, Transport};
/// use grpcall::metrics::PrometheusMetrics;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// struct Unreachable;
///
/// #[async_trait]
/// impl Transport<(), ()> for Unreachable {
///     async fn call(&self, _: &str, _: &str, _: &RequestData<()>, _: MetadataMap) -> Result<(), CallFailure> {
///         Err("unreachable".into())
///     }
/// }
///
/// let metrics = PrometheusMetrics::new().unwrap();
/// let client = Client::builder(Unreachable)
///     .metrics(Arc::new(metrics))
///     .default_options(RequestOptions::default().with_retry_delay(Duration::from_millis(250)))
///     .build();
/// assert_eq!(client.default_options().retry_options.delay, Some(250));
/// ```
pub struct ClientBuilder<T> {
    transport: T,
    metadata_builder: Option<Arc<dyn MetadataBuilder>>,
    logger: Option<Arc<dyn Logger>>,
    metrics: Option<Arc<dyn Metrics>>,
    default_options: RequestOptions,
}

impl<T> ClientBuilder<T> {
    /// Creates a new `ClientBuilder` with default collaborators.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            metadata_builder: None,
            logger: None,
            metrics: None,
            default_options: RequestOptions::default(),
        }
    }

    /// Sets the metadata builder.
    pub fn metadata_builder(mut self, builder: Arc<dyn MetadataBuilder>) -> Self {
        self.metadata_builder = Some(builder);
        self
    }

    /// Sets the logger.
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Sets the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets the service-wide default options.
    ///
    /// Per-call options passed to [`Client::request`] override these field by
    /// field.
    pub fn default_options(mut self, options: RequestOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Sets the default per-attempt timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.default_options = self.default_options.with_request_timeout(timeout);
        self
    }

    /// Builds the configured `Client`.
    pub fn build(self) -> Client<T> {
        let logger = self.logger.unwrap_or_else(|| Arc::new(TracingLogger));

        Client {
            inner: Arc::new(ClientInner {
                transport: self.transport,
                metadata_builder: self
                    .metadata_builder
                    .unwrap_or_else(|| Arc::new(TraceMetadataBuilder)),
                handler: ResponseHandler::new(logger),
                metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopMetrics)),
                default_options: self.default_options,
            }),
        }
    }
}
