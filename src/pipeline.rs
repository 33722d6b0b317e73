//! End-to-end processing jobs
//!
//! A change-background job runs: remove background, crop to the subject, composite onto
//! the background, write the JPEG, optionally upload it, then clean up. A
//! remove-background job stops after writing the (optionally cropped) PNG cutout.
//! CPU-bound steps run on the blocking thread pool.

use crate::{
    compositor::Compositor,
    cutout::crop_to_object,
    error::{BgChangerError, Result},
    media::delete_files,
    position::PositionConfig,
    segmenter::ForegroundExtractor,
    services::ImageIOService,
    storage::{content_type_for_path, BlobStore},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Replace the background of `image_path` with `background_path`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBackgroundJob {
    /// Base name for the uploaded blob (`{name}_chbg.jpg`)
    pub name: String,
    pub image_path: PathBuf,
    /// Intermediate cutout, deleted after compositing
    pub cutout_path: PathBuf,
    pub background_path: PathBuf,
    pub output_path: PathBuf,
    pub position: PositionConfig,
    /// Blob container; falls back to the store's default container
    pub container: Option<String>,
}

/// Cut the subject out of `image_path` into a PNG at `cutout_path`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveBackgroundJob {
    pub image_path: PathBuf,
    pub cutout_path: PathBuf,
    /// Crop the cutout to its visible pixels
    pub crop: bool,
}

/// Result of a finished job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutput {
    pub output_path: PathBuf,
    pub blob_url: Option<String>,
}

/// Shared processing pipeline
#[derive(Clone)]
pub struct Pipeline {
    extractor: Arc<dyn ForegroundExtractor>,
    blob_store: Option<Arc<dyn BlobStore>>,
    jpeg_quality: u8,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("blob_store", &self.blob_store.is_some())
            .field("jpeg_quality", &self.jpeg_quality)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(
        extractor: Arc<dyn ForegroundExtractor>,
        blob_store: Option<Arc<dyn BlobStore>>,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            extractor,
            blob_store,
            jpeg_quality: jpeg_quality.min(100),
        }
    }

    /// Run a change-background job
    ///
    /// The background, input and cutout are deleted whether or not the job succeeds. The
    /// output is deleted only after a successful upload.
    ///
    /// # Errors
    /// - Decode, inference or composite failures
    /// - Upload failures
    pub async fn change_background(&self, job: &ChangeBackgroundJob) -> Result<JobOutput> {
        let span = tracing::info_span!("job", kind = "change_background", name = %job.name);
        let start = Instant::now();

        let result = self.run_change_background(job).instrument(span.clone()).await;
        let _guard = span.enter();

        let mut cleanup = vec![
            job.background_path.clone(),
            job.image_path.clone(),
            job.cutout_path.clone(),
        ];
        match &result {
            Ok(output) => {
                if output.blob_url.is_some() {
                    cleanup.push(job.output_path.clone());
                }
                tracing::info!(
                    output = %output.output_path.display(),
                    uploaded = output.blob_url.is_some(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "background changed"
                );
            },
            Err(e) => tracing::error!(error = %e, "change background job failed"),
        }
        delete_files(&cleanup);
        result
    }

    async fn run_change_background(&self, job: &ChangeBackgroundJob) -> Result<JobOutput> {
        job.position.validate()?;

        let extractor = Arc::clone(&self.extractor);
        let quality = self.jpeg_quality;
        let blocking_job = job.clone();
        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let job = blocking_job;
            let image = ImageIOService::load_image(&job.image_path)?;
            let cutout = extractor.remove_background_image(&image)?;
            let cutout = crop_to_object(&cutout);
            ImageIOService::save_png(&cutout, &job.cutout_path)?;

            let background = ImageIOService::load_image(&job.background_path)?.to_rgb8();
            let composite = Compositor::composite(&cutout, &background, &job.position)?;
            ImageIOService::save_jpeg(&composite, &job.output_path, quality)
        })
        .await
        .map_err(|e| BgChangerError::internal(format!("change background task failed: {e}")))??;

        let object_name = format!("{}_chbg.jpg", job.name);
        let blob_url = self
            .upload(&job.output_path, &object_name, job.container.as_deref())
            .await?;

        Ok(JobOutput {
            output_path: job.output_path.clone(),
            blob_url,
        })
    }

    async fn upload(
        &self,
        path: &Path,
        object_name: &str,
        container: Option<&str>,
    ) -> Result<Option<String>> {
        let Some(store) = &self.blob_store else {
            if container.is_some() {
                tracing::warn!(
                    "container requested but no blob store is configured; skipping upload"
                );
            }
            return Ok(None);
        };
        let Some(container) = container.or_else(|| store.default_container()) else {
            return Ok(None);
        };

        let url = store
            .upload(path, object_name, container, content_type_for_path(path))
            .await?;
        Ok(Some(url))
    }

    /// Run a remove-background job; the input is deleted afterwards
    ///
    /// # Errors
    /// - Decode or inference failures
    pub async fn remove_background(&self, job: &RemoveBackgroundJob) -> Result<JobOutput> {
        let span = tracing::info_span!(
            "job",
            kind = "remove_background",
            input = %job.image_path.display()
        );

        let extractor = Arc::clone(&self.extractor);
        let blocking_job = job.clone();
        let blocking_span = span.clone();
        let result = tokio::task::spawn_blocking(move || {
            let _entered = blocking_span.enter();
            let job = blocking_job;
            let image = ImageIOService::load_image(&job.image_path)?;
            let mut cutout = extractor.remove_background_image(&image)?;
            if job.crop {
                cutout = crop_to_object(&cutout);
            }
            ImageIOService::save_png(&cutout, &job.cutout_path)
        })
        .await
        .map_err(|e| BgChangerError::internal(format!("remove background task failed: {e}")))
        .and_then(|inner| inner)
        .map(|()| JobOutput {
            output_path: job.cutout_path.clone(),
            blob_url: None,
        });

        let _guard = span.enter();
        match &result {
            Ok(output) => {
                tracing::info!(output = %output.output_path.display(), "background removed");
            },
            Err(e) => tracing::error!(error = %e, "remove background job failed"),
        }
        delete_files(&[&job.image_path]);
        result
    }
}
