//! Output formatting for spicectl
//!
//! - Table: bordered tables (default)
//! - Json: machine-readable JSON

use anyhow::Result;
use arrow::record_batch::RecordBatch;
use clap::ValueEnum;
use spice_client::Quote;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// One price point flattened with its pair for table output.
#[derive(Debug, Tabled)]
struct PriceRow {
    #[tabled(rename = "Pair")]
    pair: String,
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Price")]
    price: f64,
    #[tabled(rename = "Open")]
    open: f64,
    #[tabled(rename = "High")]
    high: f64,
    #[tabled(rename = "Low")]
    low: f64,
    #[tabled(rename = "Close")]
    close: f64,
}

fn price_rows(quotes: &[Quote]) -> Vec<PriceRow> {
    quotes
        .iter()
        .flat_map(|quote| {
            quote.prices.iter().map(move |p| PriceRow {
                pair: quote.pair.clone(),
                timestamp: p.timestamp.clone(),
                price: p.price,
                open: p.open,
                high: p.high,
                low: p.low,
                close: p.close,
            })
        })
        .collect()
}

pub struct Formatter {
    format: OutputFormat,
}

impl Formatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Render query results.
    pub fn batches(&self, batches: &[RecordBatch]) -> Result<String> {
        match self.format {
            OutputFormat::Table => Ok(arrow::util::pretty::pretty_format_batches(batches)?.to_string()),
            OutputFormat::Json => {
                let mut writer = arrow::json::ArrayWriter::new(Vec::new());
                let refs: Vec<&RecordBatch> = batches.iter().collect();
                writer.write_batches(&refs)?;
                writer.finish()?;
                let bytes = writer.into_inner();
                // An empty result writes nothing at all.
                if bytes.is_empty() {
                    return Ok("[]".to_string());
                }
                Ok(String::from_utf8(bytes)?)
            }
        }
    }

    /// Render price quotes.
    pub fn quotes(&self, quotes: &[Quote]) -> Result<String> {
        match self.format {
            OutputFormat::Table => {
                let rows = price_rows(quotes);
                if rows.is_empty() {
                    return Ok("No prices found".to_string());
                }
                let mut table = Table::new(rows);
                table
                    .with(Style::rounded())
                    .with(Modify::new(Rows::first()).with(Alignment::center()));
                Ok(table.to_string())
            }
            OutputFormat::Json => Ok(serde_json::to_string_pretty(quotes)?),
        }
    }

    pub fn print_success(&self, message: &str) {
        if self.format == OutputFormat::Table {
            println!("✅ {}", message);
        }
    }
}
