//! Price lookups over the REST API.
//!
//! Three endpoints, all answering JSON quotes:
//!
//! - `GET /v1/latest-prices?preview=true[&pair=a,b]`
//! - `GET /v1/prices?preview=true[&pairs=a,b][&start=..][&end=..][&granularity=..]`
//! - `GET /v0.1/prices/{pair}?preview=true[&start=..][&end=..][&granularity=..]`
//!
//! Timestamps in queries are unix seconds.

use crate::context::RequestContext;
use crate::error::Result;
use crate::rest::RestClient;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Prices for one trading pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub pair: String,
    #[serde(default)]
    pub prices: Vec<Price>,
}

/// One price point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub timestamp: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub high: f64,
    #[serde(default)]
    pub low: f64,
    #[serde(default)]
    pub open: f64,
    #[serde(default)]
    pub close: f64,
}

/// Time range and resolution for historical prices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuoteParams {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Bucket size, e.g. `"1h"`.
    pub granularity: Option<String>,
}

impl QuoteParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    pub fn with_granularity(mut self, granularity: impl Into<String>) -> Self {
        self.granularity = Some(granularity.into());
        self
    }

    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if let Some(start) = self.start_time {
            query.push(("start", start.timestamp().to_string()));
        }
        if let Some(end) = self.end_time {
            query.push(("end", end.timestamp().to_string()));
        }
        if let Some(granularity) = self.granularity.as_deref().filter(|g| !g.is_empty()) {
            query.push(("granularity", granularity.to_string()));
        }
        query
    }
}

/// The latest-prices endpoint answers a list, or a bare quote for one pair.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Quote>),
    One(Quote),
}

impl From<OneOrMany> for Vec<Quote> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::Many(quotes) => quotes,
            OneOrMany::One(quote) => vec![quote],
        }
    }
}

fn preview_query() -> Vec<(&'static str, String)> {
    vec![("preview", "true".to_string())]
}

impl RestClient {
    /// Latest price of each pair. No pairs asks for the service default set.
    pub async fn get_latest_prices(
        &self,
        ctx: &RequestContext,
        pairs: &[String],
    ) -> Result<Vec<Quote>> {
        let url = self.url("/v1/latest-prices");
        let mut query = preview_query();
        if !pairs.is_empty() {
            query.push(("pair", pairs.join(",")));
        }

        let quotes: Vec<Quote> = self.fetch_json::<OneOrMany>(ctx, &url, &query).await?.into();

        debug!(pairs = pairs.len(), quotes = quotes.len(), "Fetched latest prices");
        Ok(quotes)
    }

    /// Historical prices for several pairs.
    pub async fn get_v1_prices(
        &self,
        ctx: &RequestContext,
        pairs: &[String],
        params: &QuoteParams,
    ) -> Result<Vec<Quote>> {
        let url = self.url("/v1/prices");
        let mut query = preview_query();
        if !pairs.is_empty() {
            query.push(("pairs", pairs.join(",")));
        }
        query.extend(params.query_pairs());

        let quotes: Vec<Quote> = self.fetch_json(ctx, &url, &query).await?;

        debug!(pairs = pairs.len(), quotes = quotes.len(), "Fetched prices");
        Ok(quotes)
    }

    /// Historical prices for one pair.
    pub async fn get_prices(
        &self,
        ctx: &RequestContext,
        pair: &str,
        params: &QuoteParams,
    ) -> Result<Quote> {
        let url = self.url(&format!("/v0.1/prices/{pair}"));
        let mut query = preview_query();
        query.extend(params.query_pairs());

        let quote: Quote = self.fetch_json(ctx, &url, &query).await?;

        debug!(pair, points = quote.prices.len(), "Fetched prices");
        Ok(quote)
    }

    /// GET `url` expecting 200 and decode the body, both under `ctx`.
    async fn fetch_json<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        url: &str,
        query: &[(&'static str, String)],
    ) -> Result<T> {
        ctx.check()?;
        ctx.run(async {
            let response = self
                .send_expecting("GET", url, self.get(url).query(query), StatusCode::OK)
                .await?;
            Self::json(response).await
        })
        .await
    }
}
