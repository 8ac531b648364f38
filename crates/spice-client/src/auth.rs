//! Session authentication over the Flight `Handshake` RPC.
//!
//! The app id is the basic username and the whole API key `<app_id>|<secret>`
//! is the password. The
//! service answers with a bearer token in the `authorization` response header
//! (or trailer), which then authorizes every call of that query attempt.
//!
//! ```text
//! client                               service
//!   │ Handshake                           │
//!   │ authorization: Basic b64(app:key) ─▶│
//!   │◀─ authorization: Bearer <token>     │
//!   │ GetFlightInfo / DoGet               │
//!   │ authorization: Bearer <token>     ─▶│
//! ```

use crate::connection::{log_rpc_failure, FlightConnection};
use crate::context::RequestContext;
use crate::error::{ClientError, Result};
use arrow_flight::HandshakeRequest;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;
use tonic::metadata::{Ascii, MetadataMap, MetadataValue};
use tonic::{Request, Status};
use tracing::debug;

const AUTHORIZATION: &str = "authorization";

/// App id and API key parsed from `<app_id>|<secret>`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    api_key: String,
    app_id: String,
}

impl Credential {
    /// Parse `<app_id>|<secret>`.
    ///
    /// # Errors
    ///
    /// `Config` if the key is empty, or does not split on `|` into exactly two
    /// non-empty parts.
    pub fn parse(api_key: &str) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(ClientError::Config("apiKey is required".to_string()));
        }

        let mut parts = api_key.split('|');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(app_id), Some(secret), None) if !app_id.is_empty() && !secret.is_empty() => {
                Ok(Self {
                    api_key: api_key.to_string(),
                    app_id: app_id.to_string(),
                })
            }
            _ => Err(ClientError::Config(
                "apiKey is invalid, expected format <app_id>|<secret>".to_string(),
            )),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The key exactly as configured. Sent as the handshake password and as
    /// the REST `X-API-Key` header.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    fn basic_authorization(&self) -> Result<MetadataValue<Ascii>> {
        let encoded = STANDARD.encode(format!("{}:{}", self.app_id, self.api_key));
        MetadataValue::try_from(format!("Basic {encoded}"))
            .map_err(|_| ClientError::Config("apiKey contains invalid characters".to_string()))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("app_id", &self.app_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Authorization for one query attempt.
///
/// Holds a child of the caller's context, so the attempt can be abandoned
/// without cancelling the caller.
#[derive(Clone)]
pub struct SessionContext {
    context: RequestContext,
    authorization: MetadataValue<Ascii>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("context", &self.context)
            .field("authorization", &"<redacted>")
            .finish()
    }
}

impl SessionContext {
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn authorization(&self) -> &MetadataValue<Ascii> {
        &self.authorization
    }

    /// Wrap `message` in a request carrying the session's authorization.
    pub fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        request
            .metadata_mut()
            .insert(AUTHORIZATION, self.authorization.clone());
        request
    }
}

/// Exchange `credential` for a session on `connection`.
///
/// Never retries on its own beyond the transport's per-RPC policy; the query
/// executor decides whether a failed handshake is worth another attempt.
///
/// # Errors
///
/// - `Authentication`: the handshake failed; the status is kept for classification
/// - `Cancelled` / `Timeout`: `ctx` fired first
pub async fn authenticate(
    connection: &FlightConnection,
    credential: &Credential,
    ctx: &RequestContext,
) -> Result<SessionContext> {
    let basic = credential.basic_authorization()?;

    let handshake = connection.transport_retry().run("Handshake", || {
        let mut client = connection.client();
        let basic = basic.clone();
        async move {
            let mut request = Request::new(futures::stream::iter([HandshakeRequest::default()]));
            request.metadata_mut().insert(AUTHORIZATION, basic);

            let response = client.handshake(request).await?;
            let from_headers = bearer_from(response.metadata());
            let mut stream = response.into_inner();
            while stream.message().await?.is_some() {}
            let from_trailers = stream.trailers().await?;

            Ok::<_, Status>(from_headers.or_else(|| from_trailers.as_ref().and_then(bearer_from)))
        }
    });

    let token = ctx
        .run(async {
            handshake.await.map_err(|status| {
                log_rpc_failure("Handshake", connection.address(), &status);
                ClientError::Authentication(status)
            })
        })
        .await?;

    let authorization = match token {
        Some(token) => {
            debug!(app_id = credential.app_id(), "Authenticated with bearer token");
            token
        }
        None => {
            debug!(
                app_id = credential.app_id(),
                "No bearer token returned, using basic credentials"
            );
            basic
        }
    };

    Ok(SessionContext {
        context: ctx.child(),
        authorization,
    })
}

fn bearer_from(metadata: &MetadataMap) -> Option<MetadataValue<Ascii>> {
    metadata
        .get(AUTHORIZATION)
        .filter(|value| !value.is_empty())
        .cloned()
}
