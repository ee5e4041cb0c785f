/// Process configuration: environment-driven, loaded once at startup through
/// `dotenvy` before reading typed variables with defaults.
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub vendor_api_key: String,
    pub backfill_schedule_minute: u32,
    pub max_concurrent_symbols: usize,
    pub quality_threshold: f64,
    pub log_level: String,
    pub enable_fallback: bool,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let vendor_api_key = env::var("VENDOR_API_KEY").context("VENDOR_API_KEY is required")?;

        let backfill_schedule_minute = env::var("BACKFILL_SCHEDULE_MINUTE")
            .unwrap_or_else(|_| "0".to_string())
            .parse::<u32>()
            .context("failed to parse BACKFILL_SCHEDULE_MINUTE")?;
        if backfill_schedule_minute > 59 {
            anyhow::bail!("BACKFILL_SCHEDULE_MINUTE must be 0-59, got {backfill_schedule_minute}");
        }

        let max_concurrent_symbols = env::var("MAX_CONCURRENT_SYMBOLS")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<usize>()
            .context("failed to parse MAX_CONCURRENT_SYMBOLS")?;

        let quality_threshold = env::var("QUALITY_THRESHOLD")
            .unwrap_or_else(|_| "0.85".to_string())
            .parse::<f64>()
            .context("failed to parse QUALITY_THRESHOLD")?;

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());

        let enable_fallback = env::var("ENABLE_FALLBACK")
            .map(|v| bool::from_str(&v.to_lowercase()).unwrap_or(false))
            .unwrap_or(false);

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        Ok(Self {
            database_url,
            vendor_api_key,
            backfill_schedule_minute,
            max_concurrent_symbols,
            quality_threshold,
            log_level,
            enable_fallback,
            bind_addr,
        })
    }

    pub fn init_tracing(&self) {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "VENDOR_API_KEY",
            "BACKFILL_SCHEDULE_MINUTE",
            "MAX_CONCURRENT_SYMBOLS",
            "QUALITY_THRESHOLD",
            "LOG_LEVEL",
            "ENABLE_FALLBACK",
            "BIND_ADDR",
        ] {
            unsafe { env::remove_var(key) };
        }
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe { env::set_var("VENDOR_API_KEY", "k") };
        assert!(Config::from_env().is_err());
        clear_env();
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("DATABASE_URL", ":memory:");
            env::set_var("VENDOR_API_KEY", "k");
        }
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.max_concurrent_symbols, 3);
        assert!((cfg.quality_threshold - 0.85).abs() < f64::EPSILON);
        clear_env();
    }

    #[test]
    fn rejects_out_of_range_schedule_minute() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("DATABASE_URL", ":memory:");
            env::set_var("VENDOR_API_KEY", "k");
            env::set_var("BACKFILL_SCHEDULE_MINUTE", "60");
        }
        assert!(Config::from_env().is_err());
        clear_env();
    }
}
