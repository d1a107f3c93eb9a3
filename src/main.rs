use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

use storebench::{load_dataset, pipeline, PipelineConfig};

/// Retail store-sales analytics: clean, benchmark and score a daily sales
/// dataset into a JSON report bundle for the dashboard.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory containing regions.csv, stores.csv and sales.csv
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Override the regions table path
    #[arg(long)]
    regions: Option<PathBuf>,

    /// Override the stores table path
    #[arg(long)]
    stores: Option<PathBuf>,

    /// Override the sales table path
    #[arg(long)]
    sales: Option<PathBuf>,

    /// Output path for the JSON report bundle
    #[arg(short, long, default_value = "report.json")]
    out: PathBuf,

    /// JSON config file with pipeline overrides
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trailing-window length in days
    #[arg(long)]
    window_days: Option<i64>,

    /// Reference date (YYYY-MM-DD); defaults to the latest date in the data
    #[arg(long)]
    as_of: Option<NaiveDate>,

    /// Pretty-print the output JSON
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(window_days) = args.window_days {
        config.window_days = window_days;
    }
    if let Some(as_of) = args.as_of {
        config.reference_date = Some(as_of);
    }

    let regions = args.regions.unwrap_or_else(|| args.data_dir.join("regions.csv"));
    let stores = args.stores.unwrap_or_else(|| args.data_dir.join("stores.csv"));
    let sales = args.sales.unwrap_or_else(|| args.data_dir.join("sales.csv"));

    println!("Loading dataset...");
    let dataset = load_dataset(&regions, &stores, &sales)?;
    println!(
        "✓ Loaded {} regions, {} stores, {} sales rows",
        dataset.regions.len(),
        dataset.stores.len(),
        dataset.sales.len()
    );

    println!("Running pipeline...");
    let bundle = pipeline::run(&dataset, &config)?;
    println!("✓ {}", bundle.summary());
    println!("✓ Data quality: {}", bundle.data_quality.summary());

    let json = if args.pretty {
        serde_json::to_string_pretty(&bundle)?
    } else {
        serde_json::to_string(&bundle)?
    };
    std::fs::write(&args.out, json)
        .with_context(|| format!("failed to write report to {}", args.out.display()))?;

    println!("✓ Report bundle written to {}", args.out.display());
    println!("  fingerprint: {}", bundle.fingerprint);

    Ok(())
}
