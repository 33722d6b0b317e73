#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Background changer
//!
//! Cut a subject (typically a car) out of a photo with an ONNX segmentation model and
//! composite it onto a new background, either from Rust code or through an HTTP
//! service with an asynchronous job queue.
//!
//! ## Features
//!
//! - **Segmentation**: RMBG-style models through ONNX Runtime or Tract
//! - **Compositing**: relative anchoring in the free space with aspect-aware scaling
//! - **Service**: axum endpoints for uploads and remote links, results under `/media`
//! - **Storage**: optional Azure Blob upload of finished composites
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bg_changer::{Compositor, ForegroundExtractor, PositionConfig, RemovalConfig, Segmenter};
//! use bg_changer::services::ImageIOService;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let segmenter = Segmenter::from_config(RemovalConfig::default()).await?;
//!
//! let car = ImageIOService::load_image("car.jpg")?;
//! let cutout = bg_changer::crop_to_object(&segmenter.remove_background_image(&car)?);
//! let background = ImageIOService::load_image("showroom.jpg")?.to_rgb8();
//!
//! let composite = Compositor::composite(&cutout, &background, &PositionConfig::default())?;
//! ImageIOService::save_jpeg(&composite, "car_showroom.jpg", 90)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with CUDA/CoreML providers
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): the `bg-changer` binary and subscriber setup
//! - `tracing-json`, `tracing-files`: extra log outputs for the binary
//! - `webp-support`: WebP decoding

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod cutout;
pub mod download;
pub mod error;
pub mod fetch;
pub mod inference;
pub mod media;
pub mod models;
pub mod pipeline;
pub mod position;
pub mod segmenter;
pub mod services;
pub mod storage;
pub mod tasks;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod utils;
pub mod web;

pub use backends::{create_backend, MockBackend, MockMask};
pub use compositor::{Compositor, Placement, Rect};
pub use config::{BackendType, ExecutionProvider, RemovalConfig, ServiceConfig, StorageConfig};
pub use cutout::{alpha_bounding_box, crop_to_object};
pub use download::ModelDownloader;
pub use error::{BgChangerError, Result};
pub use fetch::ImageFetcher;
pub use inference::InferenceBackend;
pub use media::MediaStore;
pub use models::{ModelManager, ModelSource, PreprocessingConfig};
pub use pipeline::{ChangeBackgroundJob, JobOutput, Pipeline, RemoveBackgroundJob};
pub use position::PositionConfig;
pub use segmenter::{ForegroundExtractor, Segmenter};
pub use storage::{AzureBlobStore, BlobStore};
pub use tasks::{Job, JobId, JobQueue, JobStatus};
pub use web::{router, AppState};

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat, TracingOutput};
