//! Spice Client - High-level API for queries and REST calls
//!
//! [`SpiceClient`] owns one Flight channel to the query service, one to the
//! firecache service and one HTTP client for the REST API. All three are
//! created by [`SpiceClientBuilder::build`] and released by
//! [`SpiceClient::close`].
//!
//! ## Examples
//!
//! ```ignore
//! use futures::StreamExt;
//! use spice_client::SpiceClient;
//!
//! let client = SpiceClient::builder()
//!     .api_key("app_id|secret")
//!     .max_retries(5)
//!     .build()
//!     .await?;
//!
//! let mut stream = client.query("SELECT number FROM eth.recent_blocks LIMIT 10").await?;
//! while let Some(batch) = stream.next().await {
//!     println!("{} rows", batch?.num_rows());
//! }
//!
//! client.close().await?;
//! ```
//!
//! ## Concurrency
//!
//! `SpiceClient` is `Send + Sync`. Share it through `Arc` and issue queries
//! from as many tasks as needed; every call gets its own session and its own
//! backoff state.

use crate::auth::Credential;
use crate::config::ClientConfig;
use crate::connection::{EndpointAddress, FlightConnection, TransportRetryPolicy};
use crate::context::RequestContext;
use crate::datasets::RefreshOptions;
use crate::error::{ClientError, Result};
use crate::prices::{Quote, QuoteParams};
use crate::query::{self, BatchStream, QueryRequest, QueryTarget};
use crate::rest::RestClient;
use crate::retry::RetryPolicy;
use crate::user_agent::user_agent;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Default number of query retries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default bound of the query setup phase when the caller sets no deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Channels owned by an open client.
struct Connections {
    flight: FlightConnection,
    firecache: FlightConnection,
    rest: RestClient,
}

impl Connections {
    fn flight_for(&self, target: QueryTarget) -> &FlightConnection {
        match target {
            QueryTarget::Flight => &self.flight,
            QueryTarget::Firecache => &self.firecache,
        }
    }
}

/// Query and REST client for the Spice platform.
pub struct SpiceClient {
    config: ClientConfig,
    credential: Credential,
    retry_policy: RetryPolicy,
    default_timeout: Option<Duration>,
    connections: RwLock<Option<Arc<Connections>>>,
}

impl fmt::Debug for SpiceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpiceClient")
            .field("config", &self.config)
            .field("credential", &self.credential)
            .field("retry_policy", &self.retry_policy)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl SpiceClient {
    /// Create a new builder. Endpoints default to [`ClientConfig::global`].
    pub fn builder() -> SpiceClientBuilder {
        SpiceClientBuilder::new()
    }

    /// Build a client for `api_key` with default settings.
    pub async fn connect(api_key: impl Into<String>) -> Result<Self> {
        Self::builder().api_key(api_key).build().await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Run `sql` against the query service.
    ///
    /// # Errors
    ///
    /// - `Transport`: the last status seen once retries ran out, or the first
    ///   permanent one (e.g. `INVALID_ARGUMENT` for bad SQL)
    /// - `Authentication`: the session handshake was rejected
    /// - `Timeout`: setup did not finish within the default timeout
    /// - `Closed`: the client was closed
    pub async fn query(&self, sql: &str) -> Result<BatchStream> {
        self.query_with_context(&RequestContext::new(), sql).await
    }

    /// Run `sql` against the query service, bounded by `ctx`.
    pub async fn query_with_context(&self, ctx: &RequestContext, sql: &str) -> Result<BatchStream> {
        self.execute(ctx, QueryRequest::new(sql, QueryTarget::Flight))
            .await
    }

    /// Run `sql` against the firecache service.
    pub async fn fire_query(&self, sql: &str) -> Result<BatchStream> {
        self.fire_query_with_context(&RequestContext::new(), sql)
            .await
    }

    /// Run `sql` against the firecache service, bounded by `ctx`.
    pub async fn fire_query_with_context(
        &self,
        ctx: &RequestContext,
        sql: &str,
    ) -> Result<BatchStream> {
        self.execute(ctx, QueryRequest::new(sql, QueryTarget::Firecache))
            .await
    }

    async fn execute(&self, ctx: &RequestContext, request: QueryRequest) -> Result<BatchStream> {
        let connections = self.connections().await?;
        let connection = connections.flight_for(request.target());

        debug!(
            service = %request.target(),
            address = %connection.address(),
            "Executing query"
        );

        query::execute(
            connection,
            &self.credential,
            &self.retry_policy,
            self.default_timeout,
            ctx,
            &request,
        )
        .await
    }

    /// Trigger an acceleration refresh of `dataset`. Not retried.
    pub async fn refresh_dataset(&self, dataset: &str, options: &RefreshOptions) -> Result<()> {
        self.refresh_dataset_with_context(&RequestContext::new(), dataset, options)
            .await
    }

    /// Trigger an acceleration refresh of `dataset`, bounded by `ctx`.
    pub async fn refresh_dataset_with_context(
        &self,
        ctx: &RequestContext,
        dataset: &str,
        options: &RefreshOptions,
    ) -> Result<()> {
        self.connections()
            .await?
            .rest
            .refresh_dataset(ctx, dataset, options)
            .await
    }

    /// Latest quotes for `pairs`. Not retried.
    pub async fn get_latest_prices(&self, pairs: &[String]) -> Result<Vec<Quote>> {
        self.get_latest_prices_with_context(&RequestContext::new(), pairs)
            .await
    }

    pub async fn get_latest_prices_with_context(
        &self,
        ctx: &RequestContext,
        pairs: &[String],
    ) -> Result<Vec<Quote>> {
        self.connections()
            .await?
            .rest
            .get_latest_prices(ctx, pairs)
            .await
    }

    /// Historical quotes for several pairs. Not retried.
    pub async fn get_v1_prices(&self, pairs: &[String], params: &QuoteParams) -> Result<Vec<Quote>> {
        self.get_v1_prices_with_context(&RequestContext::new(), pairs, params)
            .await
    }

    pub async fn get_v1_prices_with_context(
        &self,
        ctx: &RequestContext,
        pairs: &[String],
        params: &QuoteParams,
    ) -> Result<Vec<Quote>> {
        self.connections()
            .await?
            .rest
            .get_v1_prices(ctx, pairs, params)
            .await
    }

    /// Historical quote for one pair. Not retried.
    pub async fn get_prices(&self, pair: &str, params: &QuoteParams) -> Result<Quote> {
        self.get_prices_with_context(&RequestContext::new(), pair, params)
            .await
    }

    pub async fn get_prices_with_context(
        &self,
        ctx: &RequestContext,
        pair: &str,
        params: &QuoteParams,
    ) -> Result<Quote> {
        self.connections()
            .await?
            .rest
            .get_prices(ctx, pair, params)
            .await
    }

    /// Release both channels and the HTTP client.
    ///
    /// Idempotent: later calls return `Ok(())`. Streams already handed out
    /// keep their own channel handles and finish normally. Any operation
    /// started after close fails with `Closed`.
    pub async fn close(&self) -> Result<()> {
        if self.connections.write().await.take().is_some() {
            info!(
                flight = %self.config.flight_url,
                firecache = %self.config.firecache_url,
                "Spice client closed"
            );
        }
        Ok(())
    }

    pub async fn is_closed(&self) -> bool {
        self.connections.read().await.is_none()
    }

    async fn connections(&self) -> Result<Arc<Connections>> {
        self.connections
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(ClientError::Closed)
    }
}

/// Builder for [`SpiceClient`].
///
/// # Defaults
///
/// - Endpoints: [`ClientConfig::global`] (environment, then cloud defaults)
/// - `max_retries`: 3
/// - Backoff: [`RetryPolicy::for_max_retries`]
/// - `default_timeout`: 10 minutes
#[derive(Clone)]
pub struct SpiceClientBuilder {
    config: ClientConfig,
    api_key: Option<String>,
    max_retries: u32,
    backoff_policy: Option<RetryPolicy>,
    default_timeout: Option<Duration>,
}

impl fmt::Debug for SpiceClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpiceClientBuilder")
            .field("config", &self.config)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_retries", &self.max_retries)
            .field("backoff_policy", &self.backoff_policy)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl Default for SpiceClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SpiceClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::global().clone(),
            api_key: None,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_policy: None,
            default_timeout: Some(DEFAULT_TIMEOUT),
        }
    }

    /// Replace all endpoint addresses (and the key, if the config has one).
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn flight_url(mut self, url: impl Into<String>) -> Self {
        self.config.flight_url = url.into();
        self
    }

    pub fn firecache_url(mut self, url: impl Into<String>) -> Self {
        self.config.firecache_url = url.into();
        self
    }

    pub fn http_url(mut self, url: impl Into<String>) -> Self {
        self.config.http_url = url.into();
        self
    }

    /// API key in the form `<app_id>|<secret>`.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Retries after the first attempt. Zero disables retrying.
    ///
    /// Ignored when [`backoff_policy`](Self::backoff_policy) is set.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Use `policy` instead of the one derived from `max_retries`.
    pub fn backoff_policy(mut self, policy: RetryPolicy) -> Self {
        self.backoff_policy = Some(policy);
        self
    }

    /// Bound of the query setup phase for calls without their own deadline.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Let calls without a deadline wait indefinitely.
    pub fn without_default_timeout(mut self) -> Self {
        self.default_timeout = None;
        self
    }

    /// Validate the configuration and create the client.
    ///
    /// The API key is checked before any channel is built. Channels connect
    /// lazily, so an unreachable endpoint surfaces on the first query.
    ///
    /// # Errors
    ///
    /// - `Config`: missing or malformed API key, bad endpoint address
    /// - `Connection`: a channel could not be created
    pub async fn build(self) -> Result<SpiceClient> {
        let api_key = self
            .api_key
            .or_else(|| self.config.api_key.clone())
            .ok_or_else(|| ClientError::Config("apiKey is required".to_string()))?;
        let credential = Credential::parse(&api_key)?;

        let retry_policy = self
            .backoff_policy
            .unwrap_or_else(|| RetryPolicy::for_max_retries(self.max_retries));
        let transport_retry = TransportRetryPolicy::for_max_retries(retry_policy.max_retries);

        #[cfg(feature = "otel")]
        crate::telemetry::install_propagator();

        let user_agent = user_agent();
        let flight = FlightConnection::connect(
            EndpointAddress::parse(&self.config.flight_url)?,
            user_agent,
            transport_retry.clone(),
        )?;
        let firecache = FlightConnection::connect(
            EndpointAddress::parse(&self.config.firecache_url)?,
            user_agent,
            transport_retry,
        )?;
        let rest = RestClient::new(&self.config.http_url, credential.api_key(), user_agent)?;

        info!(
            app_id = credential.app_id(),
            flight = %self.config.flight_url,
            firecache = %self.config.firecache_url,
            http = %self.config.http_url,
            max_retries = retry_policy.max_retries,
            "Spice client initialized"
        );

        let mut config = self.config;
        config.api_key = Some(api_key);

        Ok(SpiceClient {
            config,
            credential,
            retry_policy,
            default_timeout: self.default_timeout,
            connections: RwLock::new(Some(Arc::new(Connections {
                flight,
                firecache,
                rest,
            }))),
        })
    }
}
