use axum::Json;
use axum::extract::State;
use tracing::{info, instrument};

use crate::error::{AppError, ErrorBody};
use crate::models::scanner::ScanResponse;
use crate::scanner::{ScanProgress, scan_pending_packages};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/scanner/run",
    tag = "Scanner",
    operation_id = "runScanner",
    summary = "Run one metadata scan batch",
    description = "Processes up to `scanner.batch_size` pending packages, the same batch the \
        in-process scheduler runs. Meant for an external cron host.",
    responses(
        (status = 200, description = "Batch finished", body = ScanResponse),
        (status = 500, description = "Database error (INTERNAL_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn run_scanner(State(state): State<AppState>) -> Result<Json<ScanResponse>, AppError> {
    let mut progress = ScanProgress::default();
    let cron_status = scan_pending_packages(
        &state.db,
        state.store.as_ref(),
        &state.translator,
        state.config.scanner.batch_size,
        &mut progress,
    )
    .await?;

    info!(volume = progress.volume, "Scan batch run on request");

    Ok(Json(ScanResponse {
        cron_status,
        volume: progress.volume,
    }))
}
