//! Command handlers for spicectl

use crate::output::Formatter;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use spice_client::{QuoteParams, RefreshOptions, SpiceClient};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Run one query and print every batch.
pub async fn run_query(
    client: &SpiceClient,
    formatter: &Formatter,
    sql: &str,
    firecache: bool,
) -> Result<()> {
    let started = Instant::now();
    let stream = if firecache {
        client.fire_query(sql).await
    } else {
        client.query(sql).await
    }
    .context("Query failed")?;

    let batches = stream
        .collect_batches()
        .await
        .context("Failed to read query results")?;
    let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
    info!(
        rows,
        batches = batches.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Query complete"
    );

    println!("{}", formatter.batches(&batches)?);
    Ok(())
}

pub async fn refresh(
    client: &SpiceClient,
    formatter: &Formatter,
    dataset: &str,
    options: &RefreshOptions,
) -> Result<()> {
    client
        .refresh_dataset(dataset, options)
        .await
        .with_context(|| format!("Failed to refresh dataset '{}'", dataset))?;
    formatter.print_success(&format!("Refresh of '{}' triggered", dataset));
    Ok(())
}

pub async fn latest_prices(client: &SpiceClient, formatter: &Formatter, pairs: &[String]) -> Result<()> {
    let quotes = client
        .get_latest_prices(pairs)
        .await
        .context("Failed to fetch latest prices")?;
    println!("{}", formatter.quotes(&quotes)?);
    Ok(())
}

pub async fn pair_prices(
    client: &SpiceClient,
    formatter: &Formatter,
    pair: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    granularity: Option<String>,
) -> Result<()> {
    let params = QuoteParams {
        start_time: start,
        end_time: end,
        granularity,
    };
    let quote = client
        .get_prices(pair, &params)
        .await
        .with_context(|| format!("Failed to fetch prices for {}", pair))?;
    println!("{}", formatter.quotes(std::slice::from_ref(&quote))?);
    Ok(())
}

/// Run `tasks` copies of the same query on one shared client and report
/// per-task row counts. Fails if any task fails.
pub async fn concurrent(
    client: Arc<SpiceClient>,
    sql: &str,
    tasks: usize,
    firecache: bool,
) -> Result<()> {
    let started = Instant::now();
    let mut handles = Vec::with_capacity(tasks);
    for task in 0..tasks {
        let client = Arc::clone(&client);
        let sql = sql.to_string();
        handles.push(tokio::spawn(async move {
            let mut stream = if firecache {
                client.fire_query(&sql).await?
            } else {
                client.query(&sql).await?
            };
            let mut rows = 0usize;
            while let Some(batch) = stream.next().await {
                rows += batch?.num_rows();
            }
            Ok::<(usize, usize), spice_client::ClientError>((task, rows))
        }));
    }

    let mut failures = 0usize;
    for handle in handles {
        match handle.await.context("Query task panicked")? {
            Ok((task, rows)) => println!("task {:>3}: {} rows", task, rows),
            Err(e) => {
                failures += 1;
                eprintln!("❌ {}", e);
            }
        }
    }

    info!(
        tasks,
        failures,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Concurrent queries complete"
    );
    if failures > 0 {
        anyhow::bail!("{} of {} queries failed", failures, tasks);
    }
    Ok(())
}
