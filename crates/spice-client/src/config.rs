//! Endpoint configuration with environment overrides.
//!
//! | Variable                  | Default                     |
//! |---------------------------|-----------------------------|
//! | `SPICE_HTTP_URL`          | `https://data.spiceai.io`   |
//! | `SPICE_FLIGHT_URL`        | `flight.spiceai.io:443`     |
//! | `SPICE_FIRECACHE_URL`     | `firecache.spiceai.io:443`  |
//! | `SPICE_API_KEY`           | none                        |
//!
//! [`ClientConfig::load_local`] targets a runtime on the local machine and
//! reads `SPICE_LOCAL_HTTP_URL` (`http://localhost:3000`) and
//! `SPICE_LOCAL_FLIGHT_URL` (`grpc://localhost:50051`). The cache service has
//! no local counterpart, so the firecache address is resolved as in
//! [`ClientConfig::load`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

pub const DEFAULT_HTTP_URL: &str = "https://data.spiceai.io";
pub const DEFAULT_FLIGHT_URL: &str = "flight.spiceai.io:443";
pub const DEFAULT_FIRECACHE_URL: &str = "firecache.spiceai.io:443";
pub const DEFAULT_LOCAL_HTTP_URL: &str = "http://localhost:3000";
pub const DEFAULT_LOCAL_FLIGHT_URL: &str = "grpc://localhost:50051";

static GLOBAL: OnceLock<ClientConfig> = OnceLock::new();

/// Addresses of the three services a client talks to, plus an optional key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub http_url: String,
    pub flight_url: String,
    pub firecache_url: String,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http_url: DEFAULT_HTTP_URL.to_string(),
            flight_url: DEFAULT_FLIGHT_URL.to_string(),
            firecache_url: DEFAULT_FIRECACHE_URL.to_string(),
            api_key: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("http_url", &self.http_url)
            .field("flight_url", &self.flight_url)
            .field("firecache_url", &self.firecache_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ClientConfig {
    /// Cloud endpoints, overridable from the environment.
    pub fn load() -> Self {
        Self::load_with(env_lookup)
    }

    /// Local runtime endpoints, overridable from the environment.
    pub fn load_local() -> Self {
        Self::load_local_with(env_lookup)
    }

    /// Process-wide default, read from the environment on first use.
    pub fn global() -> &'static ClientConfig {
        GLOBAL.get_or_init(Self::load)
    }

    fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            http_url: lookup("SPICE_HTTP_URL").unwrap_or_else(|| DEFAULT_HTTP_URL.to_string()),
            flight_url: lookup("SPICE_FLIGHT_URL")
                .unwrap_or_else(|| DEFAULT_FLIGHT_URL.to_string()),
            firecache_url: lookup("SPICE_FIRECACHE_URL")
                .unwrap_or_else(|| DEFAULT_FIRECACHE_URL.to_string()),
            api_key: lookup("SPICE_API_KEY"),
        }
    }

    fn load_local_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            http_url: lookup("SPICE_LOCAL_HTTP_URL")
                .unwrap_or_else(|| DEFAULT_LOCAL_HTTP_URL.to_string()),
            flight_url: lookup("SPICE_LOCAL_FLIGHT_URL")
                .unwrap_or_else(|| DEFAULT_LOCAL_FLIGHT_URL.to_string()),
            firecache_url: lookup("SPICE_FIRECACHE_URL")
                .unwrap_or_else(|| DEFAULT_FIRECACHE_URL.to_string()),
            api_key: lookup("SPICE_API_KEY"),
        }
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = ClientConfig::load_with(lookup_from(&[]));
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.flight_url, "flight.spiceai.io:443");
        assert_eq!(config.firecache_url, "firecache.spiceai.io:443");
        assert_eq!(config.http_url, "https://data.spiceai.io");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let config = ClientConfig::load_with(lookup_from(&[
            ("SPICE_FLIGHT_URL", "grpc://flight.internal:50051"),
            ("SPICE_FIRECACHE_URL", "grpc://cache.internal:50052"),
            ("SPICE_HTTP_URL", "http://api.internal:3000"),
            ("SPICE_API_KEY", "app|secret"),
        ]));
        assert_eq!(config.flight_url, "grpc://flight.internal:50051");
        assert_eq!(config.firecache_url, "grpc://cache.internal:50052");
        assert_eq!(config.http_url, "http://api.internal:3000");
        assert_eq!(config.api_key.as_deref(), Some("app|secret"));
    }

    #[test]
    fn test_local_defaults() {
        let config = ClientConfig::load_local_with(lookup_from(&[]));
        assert_eq!(config.flight_url, "grpc://localhost:50051");
        assert_eq!(config.http_url, "http://localhost:3000");
        assert_eq!(config.firecache_url, "firecache.spiceai.io:443");
    }

    #[test]
    fn test_local_ignores_cloud_flight_variable() {
        let config = ClientConfig::load_local_with(lookup_from(&[
            ("SPICE_FLIGHT_URL", "flight.example:443"),
            ("SPICE_LOCAL_FLIGHT_URL", "grpc://127.0.0.1:6000"),
        ]));
        assert_eq!(config.flight_url, "grpc://127.0.0.1:6000");
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = ClientConfig {
            api_key: Some("app|topsecret".to_string()),
            ..ClientConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("topsecret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_serde_skips_api_key() {
        let config = ClientConfig {
            api_key: Some("app|secret".to_string()),
            ..ClientConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));

        let parsed: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.flight_url, config.flight_url);
        assert!(parsed.api_key.is_none());
    }

    #[test]
    fn test_global_is_stable() {
        assert!(std::ptr::eq(ClientConfig::global(), ClientConfig::global()));
    }
}
