use axum::http::StatusCode;

/// `GET /api/health`
pub async fn health() -> StatusCode {
    StatusCode::OK
}
