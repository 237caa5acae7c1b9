use serde::Serialize;

/// Outcome of one scan batch.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ScanResponse {
    /// Status reported to the cron host. Always `1`.
    #[schema(example = 1)]
    pub cron_status: i32,
    /// Number of records parsed in this batch.
    #[schema(example = 3)]
    pub volume: u64,
}
