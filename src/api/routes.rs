/// HTTP JSON API: actix-web handlers built against the Store/Router/Scheduler
/// layer.
use super::dto::*;
use super::error::ApiError;
use crate::domain::Timeframe;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::worker::BackfillWorker;
use actix_web::{HttpResponse, web};
use chrono::{TimeZone, Utc};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

pub struct AppState {
    pub store: Store,
    pub worker: Arc<BackfillWorker>,
    pub scheduler: Arc<Scheduler>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/status", web::get().to(status))
        .route("/symbols", web::get().to(list_symbols))
        .route("/symbols", web::post().to(add_symbol))
        .route("/symbols/detailed", web::get().to(list_symbols_detailed))
        .route("/symbols/{symbol}", web::patch().to(update_symbol))
        .route("/symbols/{symbol}", web::delete().to(deactivate_symbol))
        .route("/historical/{symbol}", web::get().to(historical))
        .route("/backfill", web::post().to(create_backfill))
        .route("/backfill/status/{job_id}", web::get().to(backfill_status))
        .route("/backfill/recent", web::get().to(backfill_recent));
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    let scheduler_running = !state.scheduler.cancel_token().is_cancelled();
    HttpResponse::Ok().json(HealthResponse { status: "ok", timestamp: Utc::now(), scheduler_running })
}

async fn status(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let stats = state.store.candles.symbol_stats().await?;
    let symbol_count = stats.len();
    let total_records: u64 = stats.iter().map(|s| s.record_count).sum();
    let validated_count: u64 = stats.iter().map(|s| (s.record_count as f64 * s.validation_rate).round() as u64).sum();
    let validation_rate = if total_records > 0 { validated_count as f64 / total_records as f64 } else { 0.0 };
    let latest_data_timestamp = stats.iter().filter_map(|s| s.latest_timestamp).max();

    Ok(HttpResponse::Ok().json(StatusResponse { symbol_count, total_records, validated_count, validation_rate, latest_data_timestamp }))
}

async fn list_symbols(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let symbols = state.store.symbols.list(true, None).await?;
    let dtos: Vec<SymbolDto> = symbols.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(dtos))
}

async fn list_symbols_detailed(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let symbols = state.store.symbols.list(true, None).await?;
    let stats = state.store.candles.symbol_stats().await?;

    let dtos: Vec<SymbolDetailedDto> = symbols
        .into_iter()
        .map(|s| {
            let stat = stats.iter().find(|st| st.symbol == s.symbol);
            SymbolDetailedDto {
                record_count: stat.map(|s| s.record_count).unwrap_or(0),
                validation_rate: stat.map(|s| s.validation_rate).unwrap_or(0.0),
                latest_timestamp: stat.and_then(|s| s.latest_timestamp),
                data_age_seconds: stat.and_then(|s| s.data_age_seconds),
                symbol: s.into(),
            }
        })
        .collect();

    Ok(HttpResponse::Ok().json(dtos))
}

async fn add_symbol(state: web::Data<AppState>, body: web::Json<AddSymbolRequest>) -> Result<HttpResponse, ApiError> {
    let req = body.into_inner();
    let timeframes = parse_timeframes(req.timeframes.unwrap_or_else(|| Timeframe::DEFAULT_SET.iter().map(|t| t.code().to_string()).collect()))?;

    state.store.symbols.add(req.symbol.clone(), req.asset_class, timeframes).await?;
    let symbol = state.store.symbols.get(req.symbol).await?.ok_or_else(|| ApiError::Internal(anyhow::anyhow!("symbol vanished after insert")))?;
    Ok(HttpResponse::Created().json(SymbolDto::from(symbol)))
}

async fn update_symbol(state: web::Data<AppState>, path: web::Path<String>, body: web::Json<UpdateSymbolRequest>) -> Result<HttpResponse, ApiError> {
    let symbol = path.into_inner();
    let req = body.into_inner();

    if let Some(active) = req.active {
        state.store.symbols.set_active(&symbol, active).await?;
    }
    if let Some(timeframes) = req.timeframes {
        let timeframes = parse_timeframes(timeframes)?;
        state.store.symbols.update_timeframes(&symbol, timeframes).await?;
    }

    let updated = state.store.symbols.get(symbol.clone()).await?.ok_or_else(|| ApiError::NotFound(symbol))?;
    Ok(HttpResponse::Ok().json(SymbolDto::from(updated)))
}

async fn deactivate_symbol(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    state.store.symbols.set_active(path.into_inner(), false).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn historical(state: web::Data<AppState>, path: web::Path<String>, query: web::Query<HistoricalQuery>) -> Result<HttpResponse, ApiError> {
    let symbol = path.into_inner();
    let timeframe = Timeframe::from_str(&query.timeframe).map_err(|e| ApiError::Validation(e.to_string()))?;

    let start = query.start.unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    let end = query.end.unwrap_or_else(Utc::now);
    if start >= end {
        return Err(ApiError::Validation("start must be strictly before end".into()));
    }

    let candles = state
        .store
        .candles
        .fetch_range(
            symbol,
            timeframe,
            start,
            end,
            query.validated_only.unwrap_or(true),
            query.min_quality.unwrap_or(crate::store::candle_store::DEFAULT_MIN_QUALITY),
            query.limit,
        )
        .await?;

    let dtos: Vec<CandleDto> = candles.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(dtos))
}

async fn create_backfill(state: web::Data<AppState>, body: web::Json<BackfillRequest>) -> Result<HttpResponse, ApiError> {
    let req = body.into_inner();

    if req.symbols.is_empty() {
        return Err(ApiError::Validation("symbols must be a non-empty list".into()));
    }
    if req.symbols.len() > MAX_BACKFILL_SYMBOLS {
        return Err(ApiError::Validation(format!("symbols list exceeds the {MAX_BACKFILL_SYMBOLS}-symbol limit")));
    }
    if req.start_date >= req.end_date {
        return Err(ApiError::Validation("start_date must be strictly before end_date".into()));
    }

    let timeframes = parse_timeframes(req.timeframes.clone())?;
    let start = req.start_date.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let end = req.end_date.and_hms_opt(0, 0, 0).unwrap().and_utc();

    let job_id = state.store.jobs.create_job(req.symbols.clone(), timeframes, start, end).await?;

    let worker = state.worker.clone();
    tokio::spawn(async move {
        let _ = worker.run_job(job_id).await;
    });

    Ok(HttpResponse::Ok().json(BackfillAcceptedResponse {
        job_id,
        status: "queued",
        symbols_count: req.symbols.len(),
        date_range: (req.start_date, req.end_date),
        timeframes: req.timeframes,
        timestamp: Utc::now(),
    }))
}

async fn backfill_status(state: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse, ApiError> {
    let job_id = path.into_inner();
    let (job, progress) = state.store.jobs.get_status(job_id).await?.ok_or_else(|| ApiError::NotFound(job_id.to_string()))?;

    Ok(HttpResponse::Ok().json(BackfillStatusResponse {
        job: job.into(),
        units: progress.into_iter().map(Into::into).collect(),
    }))
}

async fn backfill_recent(state: web::Data<AppState>, query: web::Query<RecentQuery>) -> Result<HttpResponse, ApiError> {
    let limit = query.limit.unwrap_or(20).min(MAX_RECENT_LIMIT);
    let jobs = state.store.jobs.recent(limit).await?;
    let dtos: Vec<BackfillJobDto> = jobs.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(dtos))
}

fn parse_timeframes(codes: Vec<String>) -> Result<Vec<Timeframe>, ApiError> {
    codes.iter().map(|c| Timeframe::from_str(c).map_err(|e| ApiError::Validation(e.to_string()))).collect()
}
