//! Spice Client - Resilient Arrow Flight query client
//!
//! This crate runs SQL against the Spice query service and its firecache
//! service over Arrow Flight, and returns results as a lazily consumed stream
//! of Arrow record batches. Each query authenticates a session, negotiates a
//! ticket and opens the data stream; transient failures anywhere in that
//! sequence are retried with jittered exponential backoff.
//!
//! It also wraps the REST API for dataset refreshes and price lookups.
//!
//! # Examples
//!
//! ## Query
//!
//! ```ignore
//! use futures::StreamExt;
//! use spice_client::SpiceClient;
//!
//! let client = SpiceClient::builder()
//!     .api_key("app_id|secret")
//!     .build()
//!     .await?;
//!
//! let mut stream = client.query("SELECT * FROM eth.recent_blocks LIMIT 10").await?;
//! while let Some(batch) = stream.next().await {
//!     println!("Received {} rows", batch?.num_rows());
//! }
//! ```
//!
//! ## Cancellation and deadlines
//!
//! ```ignore
//! use spice_client::RequestContext;
//!
//! let ctx = RequestContext::new().with_timeout(Duration::from_secs(30));
//! let stream = client.fire_query_with_context(&ctx, "SELECT 1").await?;
//! ```
//!
//! ## Dataset refresh
//!
//! ```ignore
//! use spice_client::{RefreshMode, RefreshOptions};
//!
//! client
//!     .refresh_dataset("taxi_trips", &RefreshOptions::new().with_mode(RefreshMode::Full))
//!     .await?;
//! ```
//!
//! # Features
//!
//! - `otel` (default): inject W3C trace context from the current `tracing`
//!   span into every Flight call.

pub mod auth;
pub mod classify;
pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod datasets;
pub mod error;
pub mod prices;
pub mod query;
pub mod rest;
pub mod retry;
#[cfg(feature = "otel")]
pub mod telemetry;
pub mod user_agent;

pub use auth::{Credential, SessionContext};
pub use classify::{classify, classify_status, Classification};
pub use client::{SpiceClient, SpiceClientBuilder, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};
pub use config::ClientConfig;
pub use connection::{EndpointAddress, TransportRetryPolicy, MAX_MESSAGE_SIZE_BYTES};
pub use context::RequestContext;
pub use datasets::{RefreshMode, RefreshOptions};
pub use error::{ClientError, Result};
pub use prices::{Price, Quote, QuoteParams};
pub use query::{BatchStream, QueryRequest, QueryTarget};
pub use retry::{retry_with_backoff, ExponentialBackoff, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
