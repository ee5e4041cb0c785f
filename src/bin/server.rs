//! HTTP API process: serves the warehouse's JSON surface and owns the
//! Scheduler's lifecycle for the life of the process.
//!
//! ```sh
//! DATABASE_URL=warehouse.db VENDOR_API_KEY=... cargo run --bin server
//! ```
use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use anyhow::Result;
use market_data_warehouse::api::{self, AppState};
use market_data_warehouse::scheduler::Scheduler;
use market_data_warehouse::store::Store;
use market_data_warehouse::validator::Validator;
use market_data_warehouse::vendor::binance::BinanceVendorClient;
use market_data_warehouse::vendor::http_vendor::HttpVendorClient;
use market_data_warehouse::vendor::router::MultiSourceRouter;
use market_data_warehouse::vendor::VendorClient;
use market_data_warehouse::worker::BackfillWorker;
use market_data_warehouse::Config;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    config.init_tracing();

    info!(bind_addr = %config.bind_addr, "market data warehouse starting");

    let store = Store::open(&config.database_url)?;

    let primary = Arc::new(BinanceVendorClient::with_credentials(Some(config.vendor_api_key.clone()), None));
    let secondary: Option<Arc<dyn VendorClient>> = if config.enable_fallback {
        Some(Arc::new(HttpVendorClient::new("secondary", "https://secondary-vendor.invalid", Some(config.vendor_api_key.clone()))))
    } else {
        None
    };
    let router = MultiSourceRouter::new(primary, secondary, config.quality_threshold);
    let validator = Validator::with_threshold(config.quality_threshold);

    let worker = BackfillWorker::new(store.clone(), router, validator);

    let scheduler = Arc::new(
        Scheduler::new(store.clone(), worker.clone(), Duration::from_secs(3600), config.backfill_schedule_minute)
            .with_max_concurrent_symbols(config.max_concurrent_symbols),
    );
    let scheduler_for_task = scheduler.clone();
    let scheduler_handle = tokio::spawn(async move { scheduler_for_task.run().await });

    let state = web::Data::new(AppState { store, worker: Arc::new(worker), scheduler: scheduler.clone() });
    let bind_addr = config.bind_addr.clone();

    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Cors::permissive())
            .configure(api::configure)
    })
    .bind(&bind_addr)?
    .run();

    tokio::select! {
        result = http_server => result.map_err(anyhow::Error::from)?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    scheduler.cancel_token().cancel();
    let _ = scheduler_handle.await;
    info!("market data warehouse stopped");
    Ok(())
}
