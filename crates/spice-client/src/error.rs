//! Error types for Spice client operations.
//!
//! Errors are grouped by the stage that produced them so the retry loop can
//! decide what to do with each one:
//!
//! - **Configuration**: `Config` (never retried)
//! - **Connection setup**: `Connection` (fatal for that endpoint)
//! - **Session**: `Authentication` (retried only when its status is transient)
//! - **RPC**: `Transport`, `Protocol` (classified by [`crate::classify`])
//! - **Streaming**: `Stream` (surfaced as-is once batches are flowing)
//! - **Caller signal**: `Cancelled`, `Timeout`
//! - **REST**: `Http`, `HttpStatus`, `Serialization`
//!
//! ## Examples
//!
//! ```ignore
//! use spice_client::{ClientError, SpiceClient};
//!
//! match client.query("SELECT 1").await {
//!     Ok(stream) => println!("schema: {:?}", stream.schema()),
//!     Err(ClientError::Transport(status)) => {
//!         eprintln!("query failed with {:?}: {}", status.code(), status.message());
//!     }
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use arrow_flight::error::FlightError;
use std::time::Duration;
use thiserror::Error;

/// Convenience type alias for `Result<T, ClientError>`.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Error type for every public operation of the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid client configuration.
    ///
    /// ## Causes
    /// - API key is empty or does not split into `<app_id>|<secret>`
    /// - A required option is missing or malformed
    ///
    /// ## Resolution
    /// - Check the API key copied from the Spice portal
    /// - Review the builder configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transport channel for an endpoint could not be built.
    ///
    /// ## Causes
    /// - Malformed endpoint address
    /// - System trust store could not be loaded
    #[error("Failed to create channel to {address}: {source}")]
    Connection {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },

    /// The service rejected the session handshake.
    ///
    /// The wrapped status decides whether the whole query is retried: an
    /// `UNAVAILABLE` handshake is transient, an `UNAUTHENTICATED` one is not.
    #[error("Authentication failed: {}", .0.message())]
    Authentication(tonic::Status),

    /// An RPC failed with a gRPC status.
    ///
    /// When retries are exhausted this is the last status observed, unchanged.
    #[error("rpc error: code = {:?} desc = {}", .0.code(), .0.message())]
    Transport(tonic::Status),

    /// The service answered, but not with what the protocol requires.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Decoding Arrow data from the stream failed.
    #[error("Stream error: {0}")]
    Stream(#[from] FlightError),

    /// The caller's cancellation token fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// The caller's deadline (or the client default) elapsed.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP transport failure on a REST call.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A REST call returned an unexpected status code.
    #[error("{method} {url} failed with status {status}: {body}")]
    HttpStatus {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The client was used after `close()`.
    #[error("Client is closed")]
    Closed,
}

impl ClientError {
    /// The gRPC status behind this error, if any.
    pub fn status(&self) -> Option<&tonic::Status> {
        match self {
            ClientError::Authentication(status) | ClientError::Transport(status) => Some(status),
            _ => None,
        }
    }

    /// Convert a decoder error raised before the first batch was handed out.
    ///
    /// A status carried inside the decoder error is lifted into `Transport`
    /// so it can be classified like any other RPC failure.
    pub(crate) fn from_setup_flight_error(err: FlightError) -> Self {
        match err {
            FlightError::Tonic(status) => {
                let status: &tonic::Status = &status;
                ClientError::Transport(status.clone())
            }
            other => ClientError::Stream(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::{Code, Status};

    #[test]
    fn test_status_accessor() {
        let err = ClientError::Transport(Status::unavailable("down"));
        assert_eq!(err.status().map(|s| s.code()), Some(Code::Unavailable));

        let err = ClientError::Authentication(Status::unauthenticated("bad key"));
        assert_eq!(err.status().map(|s| s.code()), Some(Code::Unauthenticated));

        assert!(ClientError::Cancelled.status().is_none());
        assert!(ClientError::Config("x".to_string()).status().is_none());
    }

    #[test]
    fn test_transport_display_matches_grpc_format() {
        let err = ClientError::Transport(Status::unknown(""));
        assert_eq!(err.to_string(), "rpc error: code = Unknown desc = ");
    }

    #[test]
    fn test_setup_flight_error_lifts_status() {
        let err = ClientError::from_setup_flight_error(FlightError::from(Status::internal("boom")));
        match err {
            ClientError::Transport(status) => {
                assert_eq!(status.code(), Code::Internal);
                assert_eq!(status.message(), "boom");
            }
            other => panic!("expected transport error, got {other:?}"),
        }

        let err = ClientError::from_setup_flight_error(FlightError::protocol("no schema"));
        assert!(matches!(err, ClientError::Stream(_)));
    }
}
