use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Observability entry for one scheduler tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerExecutionLog {
    pub execution_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub symbols_succeeded: u32,
    pub symbols_failed: u32,
    pub total_records_processed: u64,
    pub duration_seconds: Option<f64>,
    pub status: String,
    pub error_message: Option<String>,
}

impl SchedulerExecutionLog {
    pub fn started(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            started_at: Utc::now(),
            completed_at: None,
            symbols_succeeded: 0,
            symbols_failed: 0,
            total_records_processed: 0,
            duration_seconds: None,
            status: "running".to_string(),
            error_message: None,
        }
    }
}
