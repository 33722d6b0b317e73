//! End-to-end workflows: segmentation session, pipeline jobs and the job queue
//!
//! The mock backend marks every non-white pixel as foreground, so a red block on a
//! white photo behaves like a car on a studio backdrop.

use bg_changer::{
    config::RemovalConfig,
    error::{BgChangerError, Result},
    models::PreprocessingConfig,
    pipeline::{ChangeBackgroundJob, Pipeline, RemoveBackgroundJob},
    services::ImageIOService,
    tasks::{Job, JobKind, JobQueue, JobStatus},
    ForegroundExtractor, MockBackend, PositionConfig, Segmenter,
};
use image::{DynamicImage, Rgb, RgbImage};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const CAR_COLOR: Rgb<u8> = Rgb([200, 20, 20]);
const BACKGROUND_COLOR: Rgb<u8> = Rgb([20, 40, 220]);

fn removal_config(passes: u8) -> RemovalConfig {
    RemovalConfig {
        preprocessing: PreprocessingConfig {
            target_size: [64, 64],
            ..PreprocessingConfig::default()
        },
        passes,
        ..RemovalConfig::default()
    }
}

fn segmenter(passes: u8) -> Result<Segmenter> {
    Segmenter::with_backend(Box::new(MockBackend::new()), &[], removal_config(passes))
}

/// White 240x200 photo with a 160x80 "car" at (40, 60)
fn car_photo() -> RgbImage {
    let mut photo = RgbImage::from_pixel(240, 200, Rgb([255, 255, 255]));
    for y in 60..140 {
        for x in 40..200 {
            photo.put_pixel(x, y, CAR_COLOR);
        }
    }
    photo
}

fn write_inputs(dir: &Path, name: &str) -> Result<ChangeBackgroundJob> {
    let image_path = dir.join(format!("car_{name}.png"));
    let background_path = dir.join(format!("bg_{name}.jpg"));
    ImageIOService::save_png(&DynamicImage::ImageRgb8(car_photo()).to_rgba8(), &image_path)?;
    ImageIOService::save_jpeg(
        &RgbImage::from_pixel(500, 400, BACKGROUND_COLOR),
        &background_path,
        95,
    )?;

    Ok(ChangeBackgroundJob {
        name: name.to_string(),
        image_path,
        cutout_path: dir.join(format!("rmbg_{name}.png")),
        background_path,
        output_path: dir.join(format!("chbg_{name}.jpg")),
        position: PositionConfig::default(),
        container: None,
    })
}

fn close(a: u8, b: u8) -> bool {
    a.abs_diff(b) <= 12
}

#[test]
fn test_segmenter_cuts_out_subject() -> Result<()> {
    let segmenter = segmenter(1)?;
    let cutout = segmenter.extract(&DynamicImage::ImageRgb8(car_photo()))?;
    assert_eq!(cutout.dimensions(), (240, 200));

    assert_eq!(cutout.get_pixel(120, 100)[3], 255);
    assert_eq!(cutout.get_pixel(120, 100)[0], CAR_COLOR[0]);
    assert_eq!(cutout.get_pixel(5, 5).0, [0, 0, 0, 0]);
    assert_eq!(cutout.get_pixel(235, 195).0, [0, 0, 0, 0]);
    Ok(())
}

#[test]
fn test_remove_background_bytes_roundtrip() -> Result<()> {
    let segmenter = segmenter(1)?;
    let jpeg = ImageIOService::encode_jpeg(&car_photo(), 95)?;
    let png = segmenter.remove_background(&jpeg)?;

    let cutout = ImageIOService::load_from_bytes(&png)?.to_rgba8();
    assert_eq!(cutout.dimensions(), (240, 200));
    assert_eq!(cutout.get_pixel(120, 100)[3], 255);
    Ok(())
}

#[test]
fn test_undecodable_bytes_rejected() {
    let segmenter = segmenter(1).unwrap();
    let err = segmenter.remove_background(b"definitely not an image").unwrap_err();
    assert!(matches!(err, BgChangerError::Decode(_)));
}

#[test]
fn test_passes_run_inference_repeatedly() -> Result<()> {
    let backend = MockBackend::new();
    let history = backend.call_history();
    let segmenter = Segmenter::with_backend(Box::new(backend), &[], removal_config(2))?;

    let cutout = segmenter.remove_background_image(&DynamicImage::ImageRgb8(car_photo()))?;
    assert_eq!(cutout.get_pixel(120, 100)[3], 255);

    let infers = history.lock().unwrap().iter().filter(|c| *c == "infer").count();
    assert_eq!(infers, 2);
    Ok(())
}

#[test]
fn test_failing_backend_init_surfaces() {
    let result = Segmenter::with_backend(
        Box::new(MockBackend::new_failing_init()),
        &[],
        removal_config(1),
    );
    assert!(matches!(result, Err(BgChangerError::Model(_))));
}

#[tokio::test]
async fn test_change_background_job() -> Result<()> {
    let dir = TempDir::new()?;
    let job = write_inputs(dir.path(), "image_job")?;
    let pipeline = Pipeline::new(Arc::new(segmenter(1)?), None, 90);

    let output = pipeline.change_background(&job).await?;
    assert!(output.blob_url.is_none());

    let composite = ImageIOService::load_image(&output.output_path)?.to_rgb8();
    assert_eq!(composite.dimensions(), (500, 400));

    // Cropped 160x80 cutout is wide: 310 px wide, bottom anchored at 0.69
    let car = composite.get_pixel(250, 270);
    assert!(close(car[0], CAR_COLOR[0]) && close(car[2], CAR_COLOR[2]), "{car:?}");
    let corner = composite.get_pixel(10, 10);
    assert!(close(corner[2], BACKGROUND_COLOR[2]), "{corner:?}");

    assert!(!job.image_path.exists());
    assert!(!job.background_path.exists());
    assert!(!job.cutout_path.exists());
    Ok(())
}

#[tokio::test]
async fn test_remove_background_job_crops() -> Result<()> {
    let dir = TempDir::new()?;
    let inputs = write_inputs(dir.path(), "image_rm")?;
    let job = RemoveBackgroundJob {
        image_path: inputs.image_path.clone(),
        cutout_path: dir.path().join("image_rm_rmbg.png"),
        crop: true,
    };
    let pipeline = Pipeline::new(Arc::new(segmenter(1)?), None, 90);

    let output = pipeline.remove_background(&job).await?;
    let cutout = ImageIOService::load_image(&output.output_path)?;
    assert!(cutout.width().abs_diff(160) <= 12, "width {}", cutout.width());
    assert!(cutout.height().abs_diff(80) <= 12, "height {}", cutout.height());
    assert!(!job.image_path.exists());
    Ok(())
}

#[tokio::test]
async fn test_queue_runs_jobs_to_completion() -> Result<()> {
    let dir = TempDir::new()?;
    let pipeline = Arc::new(Pipeline::new(Arc::new(segmenter(1)?), None, 90));
    let queue = JobQueue::start(pipeline, 2);
    let mut events = queue.subscribe();

    let mut ids = Vec::new();
    for i in 0..3 {
        let job = write_inputs(dir.path(), &format!("image_{i}"))?;
        ids.push(queue.submit(Job::ChangeBackground(job)).await?);
    }

    for id in &ids {
        match queue.wait(*id).await? {
            JobStatus::Completed { output_path, .. } => assert!(output_path.exists()),
            other => panic!("job {id} did not complete: {other:?}"),
        }
        let record = queue.status(*id).unwrap();
        assert_eq!(record.kind, JobKind::ChangeBackground);
        assert!(record.finished_at.is_some());
    }

    let mut seen = Vec::new();
    while seen.len() < ids.len() {
        let event = events.recv().await.unwrap();
        assert!(event.status.is_terminal());
        seen.push(event.id);
    }
    seen.sort();
    ids.sort();
    assert_eq!(seen, ids);

    queue.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_queue_records_failures() -> Result<()> {
    let dir = TempDir::new()?;
    let segmenter = Segmenter::with_backend(
        Box::new(MockBackend::new_failing_inference()),
        &[],
        removal_config(1),
    )?;
    let queue = JobQueue::start(Arc::new(Pipeline::new(Arc::new(segmenter), None, 90)), 1);

    let job = write_inputs(dir.path(), "image_fail")?;
    let cleanup = [job.image_path.clone(), job.background_path.clone()];
    let id = queue.submit(Job::ChangeBackground(job)).await?;

    let status = queue.wait(id).await?;
    let JobStatus::Failed { error } = status else {
        panic!("expected failure, got {status:?}");
    };
    assert!(error.contains("Mock inference failed"), "{error}");
    assert!(cleanup.iter().all(|path| !path.exists()));

    queue.shutdown().await;
    Ok(())
}
