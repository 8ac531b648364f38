//! Query execution: authenticate, negotiate a ticket, open the stream.
//!
//! One logical query runs through these states:
//!
//! ```text
//! Idle ─▶ Authenticating ─▶ RequestingStreamInfo ─▶ Streaming ─▶ Succeeded
//!              ▲                     │                  │
//!              │                     ▼                  ▼
//!              └──── FailedRetryable (backoff) ◀────────┤
//!                                                       ▼
//!                                               FailedPermanent
//! ```
//!
//! Every retry starts over at `Authenticating` with a fresh session. The
//! sequence is retried only while it has not handed a batch to the caller:
//! once the schema has been read and the [`BatchStream`] is returned, decode
//! and transport errors surface through the stream and are never retried.

use crate::auth::{authenticate, Credential};
use crate::connection::{log_rpc_failure, FlightConnection};
use crate::context::RequestContext;
use crate::error::{ClientError, Result};
use crate::retry::{retry_with_backoff, RetryPolicy};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow_flight::decode::{DecodedPayload, FlightDataDecoder};
use arrow_flight::error::FlightError;
use arrow_flight::{FlightDescriptor, Ticket};
use futures::{Stream, StreamExt, TryStreamExt};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::debug;

/// Which Flight endpoint a query is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTarget {
    /// The primary query service.
    Flight,
    /// The low-latency cache service.
    Firecache,
}

impl fmt::Display for QueryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryTarget::Flight => f.write_str("flight"),
            QueryTarget::Firecache => f.write_str("firecache"),
        }
    }
}

/// SQL text plus its target endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    sql: String,
    target: QueryTarget,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>, target: QueryTarget) -> Self {
        Self {
            sql: sql.into(),
            target,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn target(&self) -> QueryTarget {
        self.target
    }
}

/// Run `request` on `connection`, retrying the whole
/// authenticate → GetFlightInfo → DoGet → schema sequence per `policy`.
///
/// `default_timeout` bounds this setup phase only, and only when `ctx` has
/// no deadline of its own. The returned stream is bounded by `ctx` alone.
pub(crate) async fn execute(
    connection: &FlightConnection,
    credential: &Credential,
    policy: &RetryPolicy,
    default_timeout: Option<Duration>,
    ctx: &RequestContext,
    request: &QueryRequest,
) -> Result<BatchStream> {
    ctx.check()?;
    let setup_ctx = ctx.or_default_timeout(default_timeout);

    retry_with_backoff(policy, &setup_ctx, |attempt| {
        run_attempt(connection, credential, ctx, &setup_ctx, request, attempt)
    })
    .await
}

async fn run_attempt(
    connection: &FlightConnection,
    credential: &Credential,
    stream_ctx: &RequestContext,
    setup_ctx: &RequestContext,
    request: &QueryRequest,
    attempt: u32,
) -> Result<BatchStream> {
    let service = request.target();
    let transport = connection.transport_retry();

    debug!(%service, attempt, state = "authenticating", "Query state transition");
    let session = authenticate(connection, credential, setup_ctx).await?;

    debug!(%service, attempt, state = "requesting_stream_info", "Query state transition");
    let descriptor = FlightDescriptor::new_cmd(request.sql().to_string());
    let info = transport
        .run("GetFlightInfo", || {
            let mut client = connection.client();
            let request = session.request(descriptor.clone());
            async move { client.get_flight_info(request).await }
        })
        .await
        .map_err(|status| {
            log_rpc_failure("GetFlightInfo", connection.address(), &status);
            ClientError::Transport(status)
        })?
        .into_inner();

    let ticket = first_ticket(info.endpoint.into_iter().map(|endpoint| endpoint.ticket))?;

    debug!(%service, attempt, state = "streaming", "Query state transition");
    let response = transport
        .run("DoGet", || {
            let mut client = connection.client();
            let request = session.request(ticket.clone());
            async move { client.do_get(request).await }
        })
        .await
        .map_err(|status| {
            log_rpc_failure("DoGet", connection.address(), &status);
            ClientError::Transport(status)
        })?;

    let decoder = FlightDataDecoder::new(response.into_inner().map_err(FlightError::from));
    let stream = BatchStream::open(decoder, stream_ctx.clone()).await?;

    debug!(
        %service,
        attempt,
        columns = stream.schema().fields().len(),
        state = "succeeded",
        "Query state transition"
    );
    Ok(stream)
}

/// Ticket of the first endpoint. Later endpoints are ignored.
fn first_ticket(mut tickets: impl Iterator<Item = Option<Ticket>>) -> Result<Ticket> {
    match tickets.next() {
        Some(Some(ticket)) => Ok(ticket),
        Some(None) => Err(ClientError::Protocol(
            "first FlightInfo endpoint has no ticket".to_string(),
        )),
        None => Err(ClientError::Protocol(
            "FlightInfo contains no endpoints".to_string(),
        )),
    }
}

/// Lazily consumed sequence of record batches from one query.
///
/// Batches are decoded only as the stream is polled. The stream ends after
/// the first error. Dropping it closes the underlying RPC stream.
///
/// ```ignore
/// use futures::StreamExt;
///
/// let mut stream = client.query("SELECT * FROM eth.recent_blocks").await?;
/// while let Some(batch) = stream.next().await {
///     let batch = batch?;
///     println!("{} rows", batch.num_rows());
/// }
/// ```
pub struct BatchStream {
    schema: SchemaRef,
    decoder: FlightDataDecoder,
    signal: Pin<Box<dyn Future<Output = ClientError> + Send>>,
    finished: bool,
}

impl fmt::Debug for BatchStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchStream")
            .field("schema", &self.schema)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl BatchStream {
    /// Read up to the schema message and wrap the rest.
    ///
    /// Errors here still belong to the retried setup phase, so a status
    /// carried by the decoder is lifted into `Transport`.
    pub(crate) async fn open(mut decoder: FlightDataDecoder, ctx: RequestContext) -> Result<Self> {
        let schema = loop {
            match decoder.next().await {
                Some(Ok(data)) => match data.payload {
                    DecodedPayload::Schema(schema) => break schema,
                    _ => continue,
                },
                Some(Err(err)) => return Err(ClientError::from_setup_flight_error(err)),
                None => {
                    return Err(ClientError::Protocol(
                        "stream ended before a schema was received".to_string(),
                    ))
                }
            }
        };

        Ok(Self {
            schema,
            decoder,
            signal: Box::pin(async move { ctx.done().await }),
            finished: false,
        })
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Drain the remaining batches into memory.
    pub async fn collect_batches(mut self) -> Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        while let Some(batch) = self.next().await {
            batches.push(batch?);
        }
        Ok(batches)
    }
}

impl Stream for BatchStream {
    type Item = Result<RecordBatch>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if let Poll::Ready(err) = this.signal.as_mut().poll(cx) {
            this.finished = true;
            return Poll::Ready(Some(Err(err)));
        }

        loop {
            match this.decoder.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(ClientError::Stream(err))));
                }
                Poll::Ready(Some(Ok(data))) => match data.payload {
                    DecodedPayload::RecordBatch(batch) => return Poll::Ready(Some(Ok(batch))),
                    _ => continue,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow_flight::encode::FlightDataEncoderBuilder;
    use arrow_flight::FlightData;
    use std::sync::Arc;
    use tonic::{Code, Status};

    fn batch(values: &[i64]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, false),
        ]));
        let names: Vec<String> = values.iter().map(|v| format!("row-{v}")).collect();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(values.to_vec())),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap()
    }

    fn decoder_for(batches: Vec<RecordBatch>) -> FlightDataDecoder {
        let schema = batches[0].schema();
        let encoded = FlightDataEncoderBuilder::new()
            .with_schema(schema)
            .build(futures::stream::iter(batches.into_iter().map(Ok)));
        FlightDataDecoder::new(encoded)
    }

    fn decoder_from(items: Vec<std::result::Result<FlightData, FlightError>>) -> FlightDataDecoder {
        FlightDataDecoder::new(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn test_open_reads_schema_then_yields_batches_lazily() {
        let decoder = decoder_for(vec![batch(&[1, 2]), batch(&[3])]);
        let mut stream = BatchStream::open(decoder, RequestContext::new()).await.unwrap();

        assert_eq!(stream.schema().field(0).name(), "id");
        assert_eq!(stream.schema().fields().len(), 2);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.num_rows(), 2);
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.num_rows(), 1);
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_collect_batches() {
        let decoder = decoder_for(vec![batch(&[1]), batch(&[2, 3, 4])]);
        let stream = BatchStream::open(decoder, RequestContext::new()).await.unwrap();
        let batches = stream.collect_batches().await.unwrap();
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 4);
    }

    #[tokio::test]
    async fn test_open_without_schema_is_protocol_error() {
        let result = BatchStream::open(decoder_from(vec![]), RequestContext::new()).await;
        assert!(matches!(result, Err(ClientError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_open_lifts_status_for_classification() {
        let decoder = decoder_from(vec![Err(FlightError::from(Status::unavailable("gone")))]);
        match BatchStream::open(decoder, RequestContext::new()).await {
            Err(ClientError::Transport(status)) => assert_eq!(status.code(), Code::Unavailable),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_after_schema_surfaces_as_stream_error() {
        let schema = batch(&[1]).schema();
        let mut items: Vec<_> = FlightDataEncoderBuilder::new()
            .with_schema(schema)
            .build(futures::stream::iter(vec![Ok(batch(&[1]))]))
            .collect()
            .await;
        items.push(Err(FlightError::from(Status::internal("connection reset"))));

        let mut stream = BatchStream::open(decoder_from(items), RequestContext::new())
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(
            stream.next().await,
            Some(Err(ClientError::Stream(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream() {
        let ctx = RequestContext::new();
        let decoder = decoder_for(vec![batch(&[1]), batch(&[2])]);
        let mut stream = BatchStream::open(decoder, ctx.clone()).await.unwrap();

        assert!(stream.next().await.unwrap().is_ok());
        ctx.cancel();
        assert!(matches!(stream.next().await, Some(Err(ClientError::Cancelled))));
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_first_ticket_only() {
        let tickets = vec![Some(Ticket::new("a")), Some(Ticket::new("b"))];
        assert_eq!(first_ticket(tickets.into_iter()).unwrap(), Ticket::new("a"));

        let tickets = vec![None, Some(Ticket::new("b"))];
        assert!(matches!(
            first_ticket(tickets.into_iter()),
            Err(ClientError::Protocol(_))
        ));

        assert!(matches!(
            first_ticket(Vec::new().into_iter()),
            Err(ClientError::Protocol(_))
        ));
    }

    #[test]
    fn test_query_request() {
        let request = QueryRequest::new("SELECT 1", QueryTarget::Firecache);
        assert_eq!(request.sql(), "SELECT 1");
        assert_eq!(request.target(), QueryTarget::Firecache);
        assert_eq!(request.target().to_string(), "firecache");
    }
}
