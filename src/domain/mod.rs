/// Core entity types shared by the store, validator, router, and API layers.
pub mod candle;
pub mod job;
pub mod scheduler_log;
pub mod symbol;

pub use candle::{AssetClass, Candle, Timeframe};
pub use job::{BackfillJob, BackfillJobProgress, JobStatus, UnitStatus};
pub use scheduler_log::SchedulerExecutionLog;
pub use symbol::{BackfillStatus, Symbol};
