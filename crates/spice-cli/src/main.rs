//! Spice CLI (spicectl)
//!
//! Command-line tool for running SQL against Spice Flight and Firecache
//! endpoints and calling the REST API.
//!
//! ## Quick Start
//!
//! ```bash
//! export SPICE_API_KEY='app_id|secret'
//!
//! # Query the Flight endpoint
//! spicectl query "SELECT number, hash FROM eth.recent_blocks LIMIT 5"
//!
//! # Query the cache
//! spicectl fire-query "SELECT * FROM eth.recent_blocks LIMIT 5"
//!
//! # Against a local runtime (grpc://localhost:50051, http://localhost:3000)
//! spicectl --local query "SELECT * FROM taxi_trips LIMIT 10"
//! spicectl --local refresh taxi_trips --mode full
//!
//! # Prices
//! spicectl prices latest BTC-USD ETH-USD
//! spicectl prices pair BTC-USD --start 2024-01-01T00:00:00Z --granularity 1h
//!
//! # Many queries on one client
//! spicectl concurrent "SELECT 1" --tasks 16
//! ```
//!
//! ## Configuration
//!
//! - `SPICE_API_KEY`: API key (`<app_id>|<secret>`)
//! - `SPICE_FLIGHT_URL`, `SPICE_FIRECACHE_URL`, `SPICE_HTTP_URL`: endpoints
//! - `SPICE_LOCAL_FLIGHT_URL`, `SPICE_LOCAL_HTTP_URL`: endpoints with `--local`
//! - `RUST_LOG`: log filter (default: `info`)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spice_client::{ClientConfig, RefreshMode, RefreshOptions, SpiceClient};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use output::{Formatter, OutputFormat};

#[derive(Parser, Debug)]
#[command(name = "spicectl")]
#[command(about = "Spice query and REST command-line tool", long_about = None)]
struct Cli {
    /// API key in the form <app_id>|<secret>
    #[arg(long, env = "SPICE_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Use local runtime endpoints
    #[arg(long)]
    local: bool,

    /// Flight endpoint (overrides the environment)
    #[arg(long)]
    flight_url: Option<String>,

    /// Firecache endpoint (overrides the environment)
    #[arg(long)]
    firecache_url: Option<String>,

    /// REST base URL (overrides the environment)
    #[arg(long)]
    http_url: Option<String>,

    /// Query retries after the first attempt (0 disables retrying)
    #[arg(long, default_value_t = spice_client::DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Query timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Output format
    #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run SQL against the Flight endpoint
    Query {
        /// SQL text
        sql: String,
    },
    /// Run SQL against the Firecache endpoint
    FireQuery {
        /// SQL text
        sql: String,
    },
    /// Trigger an acceleration refresh of a dataset
    Refresh {
        /// Dataset name
        dataset: String,

        /// SQL restricting the refreshed data
        #[arg(long)]
        sql: Option<String>,

        /// Refresh mode (full or append)
        #[arg(long)]
        mode: Option<RefreshMode>,

        /// Max random delay before refreshing (e.g. 10s)
        #[arg(long)]
        jitter_max: Option<String>,
    },
    /// Price lookups
    Prices {
        #[command(subcommand)]
        command: PricesCommands,
    },
    /// Run the same query from many tasks sharing one client
    Concurrent {
        /// SQL text
        sql: String,

        /// Number of concurrent tasks
        #[arg(long, default_value_t = 8)]
        tasks: usize,

        /// Send the queries to Firecache
        #[arg(long)]
        firecache: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PricesCommands {
    /// Latest price of each pair
    Latest {
        /// Trading pairs, e.g. BTC-USD
        pairs: Vec<String>,
    },
    /// Historical prices of one pair
    Pair {
        /// Trading pair, e.g. BTC-USD
        pair: String,

        /// Range start (RFC 3339)
        #[arg(long)]
        start: Option<chrono::DateTime<chrono::Utc>>,

        /// Range end (RFC 3339)
        #[arg(long)]
        end: Option<chrono::DateTime<chrono::Utc>>,

        /// Bucket size, e.g. 1h
        #[arg(long)]
        granularity: Option<String>,
    },
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        let mut config = if self.local {
            ClientConfig::load_local()
        } else {
            ClientConfig::load()
        };
        if let Some(url) = &self.flight_url {
            config.flight_url = url.clone();
        }
        if let Some(url) = &self.firecache_url {
            config.firecache_url = url.clone();
        }
        if let Some(url) = &self.http_url {
            config.http_url = url.clone();
        }
        config
    }
}

/// Main entry point for the CLI.
///
/// 1. Parse arguments and initialize logging from `RUST_LOG`
/// 2. Build one client for the configured endpoints
/// 3. Dispatch to the command handler
/// 4. Close the client
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut builder = SpiceClient::builder()
        .config(cli.client_config())
        .api_key(cli.api_key.clone())
        .max_retries(cli.max_retries);
    if let Some(seconds) = cli.timeout {
        builder = builder.default_timeout(Duration::from_secs(seconds));
    }
    let client = Arc::new(builder.build().await.context("Failed to create Spice client")?);

    let formatter = Formatter::new(cli.output);

    let result = match cli.command {
        Commands::Query { sql } => commands::run_query(&client, &formatter, &sql, false).await,
        Commands::FireQuery { sql } => {
            commands::run_query(&client, &formatter, &sql, true).await
        }
        Commands::Refresh {
            dataset,
            sql,
            mode,
            jitter_max,
        } => {
            let options = RefreshOptions {
                refresh_sql: sql,
                refresh_mode: mode,
                max_jitter: jitter_max,
            };
            commands::refresh(&client, &formatter, &dataset, &options).await
        }
        Commands::Prices { command } => match command {
            PricesCommands::Latest { pairs } => {
                commands::latest_prices(&client, &formatter, &pairs).await
            }
            PricesCommands::Pair {
                pair,
                start,
                end,
                granularity,
            } => commands::pair_prices(&client, &formatter, &pair, start, end, granularity).await,
        },
        Commands::Concurrent {
            sql,
            tasks,
            firecache,
        } => commands::concurrent(Arc::clone(&client), &sql, tasks, firecache).await,
    };

    client.close().await.context("Failed to close Spice client")?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query() {
        let cli = Cli::try_parse_from(["spicectl", "--api-key", "a|b", "query", "SELECT 1"]).unwrap();
        assert!(matches!(cli.command, Commands::Query { ref sql } if sql == "SELECT 1"));
        assert_eq!(cli.max_retries, 3);
        assert_eq!(cli.output, OutputFormat::Table);
        assert!(!cli.local);
    }

    #[test]
    fn test_parse_refresh_with_mode() {
        let cli = Cli::try_parse_from([
            "spicectl", "--api-key", "a|b", "--local", "refresh", "taxi_trips", "--mode", "append",
        ])
        .unwrap();
        assert!(cli.local);
        match cli.command {
            Commands::Refresh { dataset, mode, .. } => {
                assert_eq!(dataset, "taxi_trips");
                assert_eq!(mode, Some(RefreshMode::Append));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_refresh_mode() {
        let result = Cli::try_parse_from([
            "spicectl", "--api-key", "a|b", "refresh", "taxi_trips", "--mode", "partial",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_endpoint_overrides() {
        let cli = Cli::try_parse_from([
            "spicectl",
            "--api-key",
            "a|b",
            "--flight-url",
            "grpc://127.0.0.1:50051",
            "-o",
            "json",
            "prices",
            "latest",
            "BTC-USD",
        ])
        .unwrap();
        assert_eq!(cli.client_config().flight_url, "grpc://127.0.0.1:50051");
        assert_eq!(cli.output, OutputFormat::Json);
    }
}
