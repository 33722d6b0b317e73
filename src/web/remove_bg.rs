//! Background removal endpoints

use super::{
    dto::{BulkFileResponse, BulkRemoveBgRequest, FileResponse, RemoveBgByLinkRequest},
    error::ApiError,
    upload::UploadForm,
    AppState,
};
use crate::{
    fetch::validate_link,
    media::{delete_files, generate_unique_name},
    pipeline::RemoveBackgroundJob,
    tasks::Job,
};
use axum::{
    extract::{rejection::JsonRejection, Multipart, State},
    Json,
};
use futures::future::try_join_all;
use std::path::PathBuf;

fn removal_job(state: &AppState, image_path: PathBuf, name: &str) -> (Job, PathBuf) {
    let cutout_path = state.media.media_path(&format!("{}_rmbg.png", name));
    let job = Job::RemoveBackground(RemoveBackgroundJob {
        image_path,
        cutout_path: cutout_path.clone(),
        crop: true,
    });
    (job, cutout_path)
}

/// `POST /api/remove_bg/upload/` with multipart field `image`
pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<FileResponse>, ApiError> {
    let mut form = UploadForm::read(
        multipart,
        &["image"],
        &state.supported_formats,
        state.max_upload_bytes,
    )
    .await?;
    let image = form.take_image("image")?;

    let name = generate_unique_name();
    let image_path = state
        .media
        .media_path(&format!("{}_original.{}", name, image.extension()));
    image.save(&image_path).await?;

    let (job, cutout_path) = removal_job(&state, image_path, &name);
    Ok(Json(state.submit(job, &cutout_path).await?))
}

/// `POST /api/remove_bg/by_link/`
pub async fn by_link(
    State(state): State<AppState>,
    payload: Result<Json<RemoveBgByLinkRequest>, JsonRejection>,
) -> Result<Json<FileResponse>, ApiError> {
    let Json(payload) = payload?;

    let name = generate_unique_name();
    let image_path = state.media.media_path(&format!("{}_original.jpg", name));
    let image_path = state.fetcher.fetch_to(&payload.link, &image_path).await?;

    let (job, cutout_path) = removal_job(&state, image_path, &name);
    Ok(Json(state.submit(job, &cutout_path).await?))
}

/// `POST /api/remove_bg/bulk_by_links/`
///
/// Links are validated up front and fetched concurrently; one job is queued per link
/// once all of them have been fetched.
pub async fn bulk_by_links(
    State(state): State<AppState>,
    payload: Result<Json<BulkRemoveBgRequest>, JsonRejection>,
) -> Result<Json<BulkFileResponse>, ApiError> {
    let Json(payload) = payload?;
    for link in &payload.links {
        validate_link(link)?;
    }

    let targets: Vec<(String, PathBuf)> = payload
        .links
        .iter()
        .map(|_| {
            let name = generate_unique_name();
            let path = state.media.media_path(&format!("{}_car.jpg", name));
            (name, path)
        })
        .collect();

    let fetched = try_join_all(
        payload
            .links
            .iter()
            .zip(&targets)
            .map(|(link, (_, path))| state.fetcher.fetch_to(link, path)),
    )
    .await;
    if let Err(e) = fetched {
        let paths: Vec<&PathBuf> = targets.iter().map(|(_, path)| path).collect();
        delete_files(&paths);
        return Err(e.into());
    }

    let mut response = BulkFileResponse {
        file_paths: Vec::with_capacity(targets.len()),
        file_links: Vec::with_capacity(targets.len()),
        job_ids: Vec::with_capacity(targets.len()),
    };
    for (name, image_path) in targets {
        let (job, cutout_path) = removal_job(&state, image_path, &name);
        let queued = state.submit(job, &cutout_path).await?;
        response.file_paths.push(queued.file_path);
        response.file_links.push(queued.file_link);
        response.job_ids.push(queued.job_id);
    }
    Ok(Json(response))
}
