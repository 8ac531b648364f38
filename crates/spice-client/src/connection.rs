//! gRPC Connection Management for Flight Endpoints
//!
//! This module builds the transport channel to a Flight endpoint (the query
//! service or the firecache service) and owns the per-RPC transport retry
//! policy.
//!
//! ## Address Schemes
//!
//! | Address                    | Transport                        |
//! |----------------------------|----------------------------------|
//! | `grpc://host:port`         | plaintext HTTP/2                 |
//! | `http://host:port`         | plaintext HTTP/2                 |
//! | `grpc+tls://host:port`     | TLS, system trust store          |
//! | `https://host:port`        | TLS, system trust store          |
//! | `host:port`                | TLS, system trust store          |
//!
//! ## Channel Configuration
//!
//! - Max inbound and outbound message size: 100 MiB
//! - Lazy connect: the first call waits for the channel to become ready
//! - TCP keepalive 30s, HTTP/2 ping every 20s (5s timeout), even when idle
//! - User agent and (with `otel`) trace context on every call
//!
//! No per-request timeout is configured on the channel: result streams can
//! legitimately run for a long time. Deadlines come from the caller's
//! [`RequestContext`](crate::context::RequestContext).
//!
//! ## Thread Safety
//!
//! `FlightConnection` is cheap to clone. Clones share the underlying channel,
//! which multiplexes concurrent calls.

use crate::error::{ClientError, Result};
use arrow_flight::flight_service_client::FlightServiceClient;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tonic::service::interceptor::InterceptedService;
use tonic::service::Interceptor;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Code, Request, Status};
use tracing::{debug, warn};

/// Largest gRPC message accepted or sent on a Flight channel.
pub const MAX_MESSAGE_SIZE_BYTES: usize = 100 * 1024 * 1024;

/// Flight client type used by every RPC in the crate.
pub type FlightClient = FlightServiceClient<InterceptedService<Channel, MetadataInterceptor>>;

/// A parsed endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAddress {
    original: String,
    uri: String,
    tls: bool,
}

impl EndpointAddress {
    /// Parse an address, selecting TLS or plaintext from its scheme.
    pub fn parse(address: &str) -> Result<Self> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(ClientError::Config("endpoint address is empty".to_string()));
        }

        let (uri, tls) = if let Some(rest) = trimmed.strip_prefix("grpc://") {
            (format!("http://{rest}"), false)
        } else if trimmed.starts_with("http://") {
            (trimmed.to_string(), false)
        } else if let Some(rest) = trimmed.strip_prefix("grpc+tls://") {
            (format!("https://{rest}"), true)
        } else if trimmed.starts_with("https://") {
            (trimmed.to_string(), true)
        } else if let Some((scheme, _)) = trimmed.split_once("://") {
            return Err(ClientError::Config(format!(
                "unsupported scheme '{scheme}' in endpoint address '{trimmed}'"
            )));
        } else {
            (format!("https://{trimmed}"), true)
        };

        Ok(Self {
            original: trimmed.to_string(),
            uri,
            tls,
        })
    }

    /// URI handed to the transport (`http://` or `https://`).
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

/// Adds outbound metadata to every call on a Flight channel.
///
/// The user agent is set on the endpoint itself; this interceptor carries the
/// per-call part, which is the trace context of the current span.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataInterceptor;

impl Interceptor for MetadataInterceptor {
    fn call(&mut self, request: Request<()>) -> std::result::Result<Request<()>, Status> {
        #[cfg(feature = "otel")]
        let request = {
            let mut request = request;
            crate::telemetry::inject_context(request.metadata_mut());
            request
        };
        Ok(request)
    }
}

/// Retry policy applied to individual RPCs on a channel.
///
/// This is the transport layer's own safety net, separate from the query
/// executor's retry loop: a single RPC failing with one of
/// `retryable_codes` is re-sent after a short, fully jittered wait.
///
/// ```text
/// wait(n) = random(0, min(initial_backoff * multiplier^(n-1), max_backoff))
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRetryPolicy {
    /// Total attempts per RPC, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub retryable_codes: &'static [Code],
}

const TRANSPORT_RETRYABLE_CODES: &[Code] = &[Code::Unavailable, Code::Unknown, Code::Internal];

impl TransportRetryPolicy {
    /// Policy for a client configured with `max_retries` retries.
    pub fn for_max_retries(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(225),
            multiplier: 1.5,
            retryable_codes: TRANSPORT_RETRYABLE_CODES,
        }
    }

    pub fn is_retryable(&self, status: &Status) -> bool {
        self.retryable_codes.contains(&status.code())
    }

    /// Upper bound of the wait before retry `n` (1-indexed).
    pub fn backoff_ceiling(&self, n: u32) -> Duration {
        let exponent = n.saturating_sub(1).min(i32::MAX as u32) as i32;
        let seconds = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(seconds.min(self.max_backoff.as_secs_f64()).max(0.0))
    }

    /// Run one RPC, re-sending it while it fails with a retryable code.
    ///
    /// The last status is returned unchanged once attempts run out.
    pub async fn run<F, Fut, T>(&self, rpc: &'static str, mut call: F) -> std::result::Result<T, Status>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, Status>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(status) if attempt < self.max_attempts && self.is_retryable(&status) => {
                    let wait = self.backoff_ceiling(attempt).mul_f64(rand::random::<f64>());
                    debug!(
                        rpc,
                        attempt,
                        code = ?status.code(),
                        backoff_ms = wait.as_millis() as u64,
                        "RPC failed, re-sending"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(status) => return Err(status),
            }
        }
    }
}

/// A lazily connected Flight channel to one endpoint.
#[derive(Clone)]
pub struct FlightConnection {
    address: EndpointAddress,
    client: FlightClient,
    transport_retry: TransportRetryPolicy,
}

impl fmt::Debug for FlightConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlightConnection")
            .field("address", &self.address)
            .field("transport_retry", &self.transport_retry)
            .finish_non_exhaustive()
    }
}

impl FlightConnection {
    /// Build the channel for `address`.
    ///
    /// No network I/O happens here; the connection is established on the
    /// first call and re-established transparently after failures.
    ///
    /// # Errors
    ///
    /// - `Connection`: malformed URI, invalid user agent, or the system trust
    ///   store could not be loaded
    pub fn connect(
        address: EndpointAddress,
        user_agent: &str,
        transport_retry: TransportRetryPolicy,
    ) -> Result<Self> {
        let connection_error = |source| ClientError::Connection {
            address: address.to_string(),
            source,
        };

        let mut endpoint = Endpoint::from_shared(address.uri().to_string())
            .map_err(connection_error)?
            .user_agent(user_agent.to_string())
            .map_err(connection_error)?
            .connect_timeout(Duration::from_secs(10))
            // TCP-level keepalive (detect dead connections)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .tcp_nodelay(true)
            // HTTP/2 keepalive (application-level health check)
            .http2_keep_alive_interval(Duration::from_secs(20))
            .keep_alive_timeout(Duration::from_secs(5))
            .keep_alive_while_idle(true);

        if address.is_tls() {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(connection_error)?;
        }

        let channel = endpoint.connect_lazy();
        let client = FlightServiceClient::with_interceptor(channel, MetadataInterceptor)
            .max_decoding_message_size(MAX_MESSAGE_SIZE_BYTES)
            .max_encoding_message_size(MAX_MESSAGE_SIZE_BYTES);

        debug!(
            address = %address,
            tls = address.is_tls(),
            max_attempts = transport_retry.max_attempts,
            "Created Flight channel"
        );

        Ok(Self {
            address,
            client,
            transport_retry,
        })
    }

    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    /// A handle for issuing RPCs. Handles share the channel.
    pub fn client(&self) -> FlightClient {
        self.client.clone()
    }

    pub fn transport_retry(&self) -> &TransportRetryPolicy {
        &self.transport_retry
    }
}

/// Log a transport-level failure that ends an RPC.
pub(crate) fn log_rpc_failure(rpc: &'static str, address: &EndpointAddress, status: &Status) {
    warn!(
        rpc,
        address = %address,
        code = ?status.code(),
        message = status.message(),
        "Flight RPC failed"
    );
}
