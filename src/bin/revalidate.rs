//! Revalidation repair script: rescans rows with
//! `validated=false`, recomputes `quality_score`, and commits the result
//! unless `--dry-run` is given, in which case it only reports what it would
//! have done.
//!
//! ```sh
//! DATABASE_URL=warehouse.db VENDOR_API_KEY=x cargo run --bin revalidate -- \
//!     --symbol AAPL --dry-run
//! ```
use anyhow::{Context, Result};
use clap::Parser;
use market_data_warehouse::domain::{AssetClass, Timeframe};
use market_data_warehouse::gap::Revalidator;
use market_data_warehouse::store::Store;
use market_data_warehouse::validator::Validator;
use market_data_warehouse::Config;
use std::str::FromStr;
use tracing::info;

/// Recompute quality scores for previously-unvalidated candles.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Restrict to a single symbol; omit to scan across all symbols.
    #[arg(long)]
    symbol: Option<String>,

    /// Restrict to a single timeframe code, e.g. 1d.
    #[arg(long)]
    timeframe: Option<String>,

    /// Asset class used for threshold selection (stock|crypto|etf).
    #[arg(long, default_value = "stock")]
    asset_class: String,

    /// Max rows scanned per invocation (bounded to the store's batch cap).
    #[arg(long, default_value_t = 1000)]
    limit: u32,

    /// Score everything but commit no updates.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env()?;
    config.init_tracing();

    let asset_class = AssetClass::from_str(&args.asset_class).with_context(|| format!("invalid asset class: {}", args.asset_class))?;
    let timeframe = args.timeframe.as_deref().map(Timeframe::from_str).transpose().context("invalid timeframe")?;

    let store = Store::open(&config.database_url)?;
    let validator = Validator::with_threshold(config.quality_threshold);
    let revalidator = Revalidator::new(store, validator);

    if args.dry_run {
        info!("running in dry-run mode: no rows will be updated");
    }

    let summary = revalidator.run(args.symbol, timeframe, args.limit, asset_class, args.dry_run).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !summary.errors.is_empty() {
        anyhow::bail!("revalidation completed with {} error(s)", summary.errors.len());
    }
    Ok(())
}
