//! Market data warehouse: ingests OHLCV candles from an external vendor,
//! validates them, stores them in a time-series store, and serves them
//! through an HTTP JSON API.
//!
//! [`domain`] holds the core entities, [`store`] is the data access layer,
//! [`vendor`] and [`validator`] feed the [`worker`], [`scheduler`] drives it
//! on a cadence, [`gap`] repairs what ingestion missed, and [`api`] exposes
//! all of it over HTTP.

pub mod api;
pub mod config;
pub mod domain;
pub mod gap;
pub mod scheduler;
pub mod store;
pub mod validator;
pub mod vendor;
pub mod worker;

pub use config::Config;
pub use store::Store;
