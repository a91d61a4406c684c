//! # grpcall - resilient unary gRPC calls
//!
//! grpcall wraps a single unary RPC with the behavior a backend service needs
//! from every outbound call: trace and auth metadata, a deadline per attempt,
//! retries with a fixed delay bounded by both a retry count and a retry
//! window, failures classified into a small typed taxonomy, and logs and
//! metrics for every outcome.
//!
//! ## Quick Start
//!
//! ```no_run
//! use grpcall::{CallContext, CallRequest, Client, Code, GrpcTransport, RequestOptions, StatusCode};
//! use std::time::Duration;
//!
//! #[derive(Clone, PartialEq, prost::Message)]
//! struct GetUser {
//!     #[prost(uint64, tag = "1")]
//!     id: u64,
//! }
//!
//! #[derive(Clone, PartialEq, prost::Message)]
//! struct User {
//!     #[prost(string, tag = "1")]
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), grpcall::ClientError> {
//!     let channel = tonic::transport::Channel::from_static("http://users:50051").connect_lazy();
//!
//!     // Service-wide defaults
//!     let client = Client::builder(GrpcTransport::new(channel))
//!         .default_options(
//!             RequestOptions::default()
//!                 .with_request_timeout(Duration::from_secs(2))
//!                 .with_retry_delay(Duration::from_millis(500))
//!                 .with_status_codes([StatusCode::Grpc(Code::Unavailable), StatusCode::Timeout]),
//!         )
//!         .build();
//!
//!     // Per-call overrides win field by field
//!     let options = RequestOptions::default().with_auth_token("s3cr3t");
//!     let call = CallRequest::new("users.v1.Users", "GetUser").with_data(GetUser { id: 7 });
//!
//!     match client.request::<_, User>(&CallContext::new_root(), call, Some(&options)).await? {
//!         Some(user) => println!("User: {}", user.name),
//!         None => println!("No such user"),
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Outcomes
//!
//! [`Client::request`] resolves to one of:
//!
//! - `Ok(Some(response))` when an attempt succeeds
//! - `Ok(None)` when the remote answers `NOT_FOUND`, which is logged as a
//!   warning and never retried
//! - `Err(ClientError::Timeout)` when an attempt or the retry window times out
//! - `Err(ClientError::Internal)` for `INVALID_ARGUMENT`, `DEADLINE_EXCEEDED`,
//!   `PERMISSION_DENIED` and `UNAUTHENTICATED`
//! - `Err(ClientError::External)` for everything else
//!
//! ## Options
//!
//! | option | effect | default |
//! |---|---|---|
//! | `request_options.timeout` | deadline of one attempt (ms) | 15000 |
//! | `retry_options.retry` | explicit on/off switch | on |
//! | `retry_options.timeout` | deadline of the retry sequence (ms), 0 disables | 120000 |
//! | `retry_options.delay` | pause between attempts (ms) | 5000 |
//! | `retry_options.retry_max_count` | maximum retries, 0 = unlimited within the window | 5 |
//! | `retry_options.status_codes` | retryable codes | `DEADLINE_EXCEEDED`, `UNAVAILABLE`, `timeout` |
//!
//! A retry count of zero with the window disabled turns retries off, even if
//! `retry` is set.

mod client;
pub mod error;
pub mod handler;
pub mod logging;
pub mod metadata;
pub mod metrics;
pub mod options;
pub mod status;
mod transport;

pub use async_trait::async_trait;
pub use client::{Client, ClientBuilder};
pub use error::{CallFailure, ClientError, LoggerMarker, Result, TimeoutKind, TimeoutSignal};
pub use metadata::CallContext;
pub use options::RequestOptions;
pub use status::StatusCode;
pub use tonic::{metadata::MetadataMap, Code, Status};
pub use transport::{CallRequest, GrpcTransport, RequestData, Transport};
