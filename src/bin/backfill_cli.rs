//! Manual backfill / one-shot ingestion: creates a job against the same
//! store the server uses and runs it to completion without going through
//! the HTTP API, the CLI counterpart to `POST /backfill`.
//!
//! ```sh
//! DATABASE_URL=warehouse.db VENDOR_API_KEY=... cargo run --bin backfill -- \
//!     --symbols AAPL,MSFT --timeframes 1h,1d --start 2025-01-01 --end 2025-02-01
//! ```
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use market_data_warehouse::domain::Timeframe;
use market_data_warehouse::store::Store;
use market_data_warehouse::validator::Validator;
use market_data_warehouse::vendor::binance::BinanceVendorClient;
use market_data_warehouse::vendor::http_vendor::HttpVendorClient;
use market_data_warehouse::vendor::router::MultiSourceRouter;
use market_data_warehouse::vendor::VendorClient;
use market_data_warehouse::worker::BackfillWorker;
use market_data_warehouse::Config;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Trigger a one-off backfill job from the command line.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Comma-separated symbols, e.g. AAPL,MSFT,BTC-USD (max 100).
    #[arg(long, value_delimiter = ',')]
    symbols: Vec<String>,

    /// Comma-separated timeframe codes from {5m,15m,30m,1h,4h,1d,1w}.
    #[arg(long, value_delimiter = ',', default_value = "1h,1d")]
    timeframes: Vec<String>,

    /// Inclusive start date, YYYY-MM-DD.
    #[arg(long)]
    start: NaiveDate,

    /// Exclusive end date, YYYY-MM-DD.
    #[arg(long)]
    end: NaiveDate,

    /// Override the configured quality threshold for this run.
    #[arg(long)]
    quality_threshold: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env()?;
    config.init_tracing();

    if args.symbols.is_empty() {
        anyhow::bail!("--symbols must list at least one symbol");
    }
    if args.symbols.len() > market_data_warehouse::api::dto::MAX_BACKFILL_SYMBOLS {
        anyhow::bail!("--symbols exceeds the {}-symbol limit", market_data_warehouse::api::dto::MAX_BACKFILL_SYMBOLS);
    }
    if args.start >= args.end {
        anyhow::bail!("--start must be strictly before --end");
    }

    let timeframes: Vec<Timeframe> = args
        .timeframes
        .iter()
        .map(|c| Timeframe::from_str(c).with_context(|| format!("invalid timeframe: {c}")))
        .collect::<Result<_>>()?;

    let store = Store::open(&config.database_url)?;

    let primary = Arc::new(BinanceVendorClient::with_credentials(Some(config.vendor_api_key.clone()), None));
    let secondary: Option<Arc<dyn VendorClient>> = if config.enable_fallback {
        Some(Arc::new(HttpVendorClient::new("secondary", "https://secondary-vendor.invalid", Some(config.vendor_api_key.clone()))))
    } else {
        None
    };
    let quality_threshold = args.quality_threshold.unwrap_or(config.quality_threshold);
    let router = MultiSourceRouter::new(primary, secondary, quality_threshold);
    let validator = Validator::with_threshold(quality_threshold);
    let worker = BackfillWorker::new(store.clone(), router, validator);

    let start = args.start.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let end = args.end.and_hms_opt(0, 0, 0).unwrap().and_utc();

    let job_id = store.jobs.create_job(args.symbols.clone(), timeframes, start, end).await?;
    info!(%job_id, symbols = ?args.symbols, "backfill job created, running");

    let job = worker.run_job(job_id).await?;

    println!("{}", serde_json::to_string_pretty(&job)?);

    if job.status != market_data_warehouse::domain::JobStatus::Completed {
        anyhow::bail!("backfill job {job_id} did not complete successfully");
    }
    Ok(())
}
