//! Dataset acceleration refresh.

use crate::context::RequestContext;
use crate::error::Result;
use crate::rest::RestClient;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;

/// How a refresh rewrites the accelerated copy of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Replace the accelerated data entirely.
    Full,
    /// Append only new rows.
    Append,
}

impl std::str::FromStr for RefreshMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(RefreshMode::Full),
            "append" => Ok(RefreshMode::Append),
            other => Err(format!("unknown refresh mode '{other}', expected full or append")),
        }
    }
}

/// Optional overrides for a refresh. All unset sends no request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOptions {
    pub refresh_sql: Option<String>,
    pub refresh_mode: Option<RefreshMode>,
    /// Upper bound of the random delay before the refresh starts, e.g. `"10s"`.
    pub max_jitter: Option<String>,
}

impl RefreshOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.refresh_sql = Some(sql.into());
        self
    }

    pub fn with_mode(mut self, mode: RefreshMode) -> Self {
        self.refresh_mode = Some(mode);
        self
    }

    pub fn with_max_jitter(mut self, max_jitter: impl Into<String>) -> Self {
        self.max_jitter = Some(max_jitter.into());
        self
    }

    fn request_body(&self) -> Option<RefreshRequest<'_>> {
        if self.refresh_sql.is_none() && self.refresh_mode.is_none() && self.max_jitter.is_none() {
            return None;
        }
        Some(RefreshRequest {
            refresh_sql: self.refresh_sql.as_deref(),
            refresh_mode: self.refresh_mode,
            refresh_jitter_max: self.max_jitter.as_deref(),
        })
    }
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_sql: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_mode: Option<RefreshMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_jitter_max: Option<&'a str>,
}

impl RestClient {
    /// Trigger an acceleration refresh of `dataset`.
    ///
    /// Succeeds only on `201 Created`. Abandoned with `Cancelled` or
    /// `Timeout` if `ctx` fires first.
    pub async fn refresh_dataset(
        &self,
        ctx: &RequestContext,
        dataset: &str,
        options: &RefreshOptions,
    ) -> Result<()> {
        ctx.check()?;
        let url = self.url(&format!("/v1/datasets/{dataset}/acceleration/refresh"));

        let mut request = self.post_json(&url);
        if let Some(body) = options.request_body() {
            request = request.body(serde_json::to_vec(&body)?);
        }

        ctx.run(self.send_expecting("POST", &url, request, StatusCode::CREATED))
            .await?;

        info!(
            dataset,
            mode = ?options.refresh_mode,
            "Dataset refresh triggered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_body_without_options() {
        assert!(RefreshOptions::new().request_body().is_none());
    }

    #[test]
    fn test_body_contains_only_set_fields() {
        let options = RefreshOptions::new().with_mode(RefreshMode::Append);
        let json = serde_json::to_value(options.request_body().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({ "refresh_mode": "append" }));

        let options = RefreshOptions::new()
            .with_sql("SELECT * FROM taxi_trips WHERE fare > 10")
            .with_mode(RefreshMode::Full)
            .with_max_jitter("10s");
        let json = serde_json::to_value(options.request_body().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "refresh_sql": "SELECT * FROM taxi_trips WHERE fare > 10",
                "refresh_mode": "full",
                "refresh_jitter_max": "10s",
            })
        );
    }

    #[test]
    fn test_refresh_mode_parse() {
        assert_eq!("full".parse::<RefreshMode>().unwrap(), RefreshMode::Full);
        assert_eq!("Append".parse::<RefreshMode>().unwrap(), RefreshMode::Append);
        assert!("partial".parse::<RefreshMode>().is_err());
    }
}
