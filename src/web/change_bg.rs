//! Background replacement endpoints

use super::{
    dto::{ChangeBgByLinksRequest, FileResponse},
    error::ApiError,
    upload::UploadForm,
    AppState,
};
use crate::{
    media::{delete_files, generate_unique_name},
    pipeline::ChangeBackgroundJob,
    position::PositionConfig,
    tasks::Job,
};
use axum::{
    extract::{rejection::JsonRejection, Multipart, State},
    Json,
};

/// `POST /api/change_bg/upload/`
///
/// Multipart fields `car_image` and `background_image`, plus optional `height_position`,
/// `width_position` and `scale_factor`.
pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<FileResponse>, ApiError> {
    let mut form = UploadForm::read(
        multipart,
        &["car_image", "background_image"],
        &state.supported_formats,
        state.max_upload_bytes,
    )
    .await?;

    let defaults = PositionConfig::default();
    let position = PositionConfig {
        height_position: form.number("height_position")?.unwrap_or(defaults.height_position),
        width_position: form.number("width_position")?.unwrap_or(defaults.width_position),
        scale_factor: form.number("scale_factor")?.unwrap_or(defaults.scale_factor),
    };
    position.validate()?;

    let car = form.take_image("car_image")?;
    let background = form.take_image("background_image")?;

    let name = generate_unique_name();
    let image_path = state
        .media
        .media_path(&format!("{}_{}", name, car.file_name_or("car")));
    let background_path = state
        .media
        .background_path(&format!("{}_{}", name, background.file_name_or("background")));

    let saved: Result<(), ApiError> = async {
        background.save(&background_path).await?;
        car.save(&image_path).await
    }
    .await;
    if let Err(e) = saved {
        delete_files(&[&image_path, &background_path]);
        return Err(e);
    }

    let output_path = state.media.media_path(&format!("chbg_{}.jpg", name));
    let job = ChangeBackgroundJob {
        cutout_path: state.media.media_path(&format!("rmbg_{}.png", name)),
        name,
        image_path,
        background_path,
        output_path: output_path.clone(),
        position,
        container: None,
    };
    let response = state.submit(Job::ChangeBackground(job), &output_path).await?;
    Ok(Json(response))
}

/// `POST /api/change_bg/by_links/`
///
/// Both images are fetched before the job is queued, so unreachable links fail the
/// request.
pub async fn by_links(
    State(state): State<AppState>,
    payload: Result<Json<ChangeBgByLinksRequest>, JsonRejection>,
) -> Result<Json<FileResponse>, ApiError> {
    let Json(payload) = payload?;
    let position = payload.position.unwrap_or_default();
    position.validate()?;

    let name = generate_unique_name();
    let image_path = state.media.media_path(&format!("car_{}.jpg", name));
    let background_path = state.media.media_path(&format!("bg_{}.jpg", name));

    let fetched = tokio::try_join!(
        state.fetcher.fetch_to(&payload.car_link, &image_path),
        state.fetcher.fetch_to(&payload.background_link, &background_path),
    );
    if let Err(e) = fetched {
        delete_files(&[&image_path, &background_path]);
        return Err(e.into());
    }

    let output_path = state.media.media_path(&format!("chbg_{}.jpg", name));
    let job = ChangeBackgroundJob {
        cutout_path: state.media.media_path(&format!("rmbg_{}.png", name)),
        name,
        image_path,
        background_path,
        output_path: output_path.clone(),
        position,
        container: payload.container,
    };
    let response = state.submit(Job::ChangeBackground(job), &output_path).await?;
    Ok(Json(response))
}
