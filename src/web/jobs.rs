use super::{error::ApiError, AppState};
use crate::{error::BgChangerError, tasks::JobRecord};
use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

/// `GET /api/jobs/{id}`; malformed and unknown ids are both 404
pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    let not_found = || BgChangerError::not_found(format!("job '{}'", id));
    let id = Uuid::parse_str(&id).map_err(|_| not_found())?;
    let record = state.queue.status(id).ok_or_else(not_found)?;
    Ok(Json(record))
}
