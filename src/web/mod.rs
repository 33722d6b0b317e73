//! HTTP surface of the service
//!
//! Processing endpoints store their inputs under the media directory, queue a job and
//! answer immediately with the path and public link the result will have.

pub mod change_bg;
pub mod dto;
pub mod error;
pub mod jobs;
pub mod media;
pub mod monitoring;
pub mod remove_bg;
mod upload;

pub use dto::{BulkFileResponse, ChangeBgByLinksRequest, FileResponse, RemoveBgByLinkRequest};
pub use error::{ApiError, ErrorResponse};

use crate::{
    config::ServiceConfig,
    error::Result,
    fetch::ImageFetcher,
    media::MediaStore,
    tasks::{Job, JobId, JobQueue},
};
use axum::{
    extract::{DefaultBodyLimit, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Room for multipart boundaries and text fields on top of the file parts
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Shared state of all handlers
#[derive(Debug, Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub fetcher: ImageFetcher,
    pub media: MediaStore,
    pub supported_formats: Arc<[String]>,
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Build the handler state from the service configuration
    ///
    /// # Errors
    /// - Failed to create the HTTP client
    pub fn from_config(config: &ServiceConfig, queue: Arc<JobQueue>) -> Result<Self> {
        let fetcher = ImageFetcher::new(
            Duration::from_secs(config.fetch_timeout_secs),
            config.jpeg_quality,
        )?;
        Ok(Self {
            queue,
            fetcher,
            media: MediaStore::new(
                &config.media_dir,
                &config.background_dir,
                &config.public_base_url,
            ),
            supported_formats: config.supported_formats.clone().into(),
            max_upload_bytes: config.max_upload_bytes,
        })
    }

    /// Queue `job` and describe where its result will appear
    pub(crate) async fn submit(&self, job: Job, output_path: &Path) -> Result<FileResponse> {
        let job_id: JobId = self.queue.submit(job).await?;
        Ok(FileResponse {
            file_path: MediaStore::display_path(output_path),
            file_link: self.media.public_url(output_path),
            job_id,
        })
    }
}

/// Assemble the service router
pub fn router(state: AppState) -> Router {
    // Two file parts per request at most
    let body_limit = state.max_upload_bytes.saturating_mul(2).saturating_add(BODY_LIMIT_SLACK);

    let api = Router::new()
        .route("/health", get(monitoring::health))
        .route("/change_bg/upload/", post(change_bg::upload))
        .route("/change_bg/by_links/", post(change_bg::by_links))
        .route("/remove_bg/upload/", post(remove_bg::upload))
        .route("/remove_bg/by_link/", post(remove_bg::by_link))
        .route("/remove_bg/bulk_by_links/", post(remove_bg::bulk_by_links))
        .route("/jobs/:id", get(jobs::job_status));

    Router::new()
        .nest("/api", api)
        .route("/media/*path", get(media::serve_media))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(trace_requests))
        .with_state(state)
}

async fn trace_requests(request: Request, next: Next) -> Response {
    let span = tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path()
    );
    let start = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;

    span.in_scope(|| {
        tracing::info!(
            status = response.status().as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "request finished"
        );
    });
    response
}
