//! Serving stored results under `/media/`

use super::{error::ApiError, AppState};
use crate::{error::BgChangerError, storage::content_type_for_path};
use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};

/// `GET /media/{*path}`
pub async fn serve_media(
    State(state): State<AppState>,
    Path(relative): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state.media.resolve(&relative)?;
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BgChangerError::not_found(format!("media file '{}'", relative)).into());
        },
        Err(e) => return Err(BgChangerError::file_io_error("read media file", &path, &e).into()),
    };
    Ok(([(header::CONTENT_TYPE, content_type_for_path(&path))], bytes))
}
