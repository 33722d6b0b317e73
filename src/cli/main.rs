//! Background changer command-line interface
//!
//! `serve` runs the HTTP service; `composite` and `remove` run the same pipeline on
//! local files.

use super::config::CliConfigBuilder;
use crate::{
    compositor::Compositor,
    config::{BackendType, ExecutionProvider, ServiceConfig},
    cutout::crop_to_object,
    pipeline::Pipeline,
    position::PositionConfig,
    segmenter::{ForegroundExtractor, Segmenter},
    services::ImageIOService,
    storage::{AzureBlobStore, BlobStore},
    tasks::JobQueue,
    tracing_config::{TracingConfig, TracingFormat},
    web::{self, AppState},
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Background changer: cut out a subject and composite it onto a new background
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bg-changer")]
pub struct Cli {
    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Console, global = true)]
    pub log_format: LogFormat,

    /// Also write logs to this file (daily rotation)
    #[cfg(feature = "tracing-files")]
    #[arg(long, value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP service
    Serve(ServeArgs),
    /// Replace the background of a local image
    Composite(CompositeArgs),
    /// Remove the background of a local image
    Remove(RemoveArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Console,
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

impl From<LogFormat> for TracingFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Console => Self::Console,
            LogFormat::Compact => Self::Compact,
            #[cfg(feature = "tracing-json")]
            LogFormat::Json => Self::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliBackend {
    Onnx,
    Tract,
}

impl From<CliBackend> for BackendType {
    fn from(backend: CliBackend) -> Self {
        match backend {
            CliBackend::Onnx => Self::Onnx,
            CliBackend::Tract => Self::Tract,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliProvider {
    Auto,
    Cpu,
    Cuda,
    #[value(name = "coreml")]
    CoreMl,
}

impl From<CliProvider> for ExecutionProvider {
    fn from(provider: CliProvider) -> Self {
        match provider {
            CliProvider::Auto => Self::Auto,
            CliProvider::Cpu => Self::Cpu,
            CliProvider::Cuda => Self::Cuda,
            CliProvider::CoreMl => Self::CoreMl,
        }
    }
}

/// Segmentation model flags shared by all commands
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Model path or URL [default: RMBG-1.4 ONNX from Hugging Face]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Expected SHA-256 of the model file
    #[arg(long, value_name = "HEX")]
    pub model_sha256: Option<String>,

    /// Inference backend
    #[arg(long, value_enum)]
    pub backend: Option<CliBackend>,

    /// ONNX Runtime execution provider
    #[arg(short, long, value_enum)]
    pub execution_provider: Option<CliProvider>,

    /// Number of removal passes (1-4)
    #[arg(long)]
    pub passes: Option<u8>,

    /// Number of inference threads (0 = auto)
    #[arg(short, long)]
    pub threads: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// JSON configuration file
    #[arg(short, long, value_name = "PATH", env = "BG_CHANGER_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of job workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Media directory (backgrounds go to `<media-dir>/backgrounds`)
    #[arg(long, value_name = "DIR")]
    pub media_dir: Option<PathBuf>,

    /// Base URL used in returned file links
    #[arg(long, value_name = "URL")]
    pub public_base_url: Option<String>,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Args, Debug, Clone)]
pub struct PositionArgs {
    /// Vertical anchor as a fraction of the free space above the cutout (0-1)
    #[arg(long, default_value_t = crate::position::DEFAULT_HEIGHT_POSITION)]
    pub height_position: f64,

    /// Horizontal anchor as a fraction of the free space left of the cutout (0-1)
    #[arg(long, default_value_t = crate::position::DEFAULT_WIDTH_POSITION)]
    pub width_position: f64,

    /// Cutout width relative to the background width (0-1)
    #[arg(long, default_value_t = crate::position::DEFAULT_SCALE_FACTOR)]
    pub scale_factor: f64,
}

impl PositionArgs {
    fn to_position(&self) -> Result<PositionConfig> {
        PositionConfig::new(self.height_position, self.width_position, self.scale_factor)
            .context("Invalid position")
    }
}

#[derive(Args, Debug, Clone)]
pub struct CompositeArgs {
    /// Image containing the subject
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Background image
    #[arg(short, long, value_name = "BACKGROUND")]
    pub background: PathBuf,

    /// Output JPEG
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Treat IMAGE as an existing cutout and skip background removal
    #[arg(long)]
    pub cutout: bool,

    /// JPEG quality (0-100)
    #[arg(long, default_value_t = 90)]
    pub jpeg_quality: u8,

    #[command(flatten)]
    pub position: PositionArgs,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RemoveArgs {
    /// Input image
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Output PNG [default: <IMAGE stem>_rmbg.png]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Keep the full canvas instead of cropping to the subject
    #[arg(long)]
    pub no_crop: bool,

    #[command(flatten)]
    pub model: ModelArgs,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli).context("Failed to initialize tracing")?;

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Composite(args) => composite(args).await,
        Command::Remove(args) => remove(args).await,
    }
}

fn init_tracing(cli: &Cli) -> Result<crate::tracing_config::TracingGuard> {
    let mut config = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(cli.log_format.into())
        .with_env_override();

    #[cfg(feature = "tracing-files")]
    if let Some(path) = &cli.log_file {
        config = config.with_output(crate::tracing_config::TracingOutput::Both(path.clone()));
    }

    if let Ok(environment) = std::env::var(format!("{}ENVIRONMENT", crate::config::ENV_PREFIX)) {
        config = config.with_environment(environment);
    }
    config.init()
}

async fn load_segmenter(removal: crate::config::RemovalConfig) -> Result<Arc<Segmenter>> {
    let start = Instant::now();
    info!(
        model = %removal.model.display_name(),
        backend = ?removal.backend,
        provider = %removal.execution_provider,
        "loading segmentation model"
    );
    let segmenter = Segmenter::from_config(removal)
        .await
        .context("Failed to load segmentation model")?;
    info!(
        backend = segmenter.backend_name(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "segmentation model ready"
    );
    Ok(Arc::new(segmenter))
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config: ServiceConfig = CliConfigBuilder::service_config(&args)?;

    let segmenter = load_segmenter(config.removal.clone()).await?;
    let blob_store: Option<Arc<dyn BlobStore>> = match &config.storage {
        Some(storage) => Some(Arc::new(
            AzureBlobStore::new(storage).context("Failed to configure blob storage")?,
        )),
        None => None,
    };
    if blob_store.is_none() {
        warn!("blob storage not configured; results are only kept locally");
    }

    let pipeline = Arc::new(Pipeline::new(segmenter, blob_store, config.jpeg_quality));
    let queue = Arc::new(JobQueue::start_with_retention(
        pipeline,
        config.workers,
        config.job_retention(),
    ));
    let state = AppState::from_config(&config, Arc::clone(&queue))?;
    state.media.ensure_dirs()?;

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;
    info!(
        address = %config.bind_address(),
        environment = %config.environment,
        workers = config.workers,
        "bg-changer listening"
    );

    axum::serve(listener, web::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("draining job queue");
    queue.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn composite(args: CompositeArgs) -> Result<()> {
    let position = args.position.to_position()?;
    let extractor = if args.cutout {
        None
    } else {
        Some(load_segmenter(CliConfigBuilder::removal_config(&args.model)?).await?)
    };

    let start = Instant::now();
    let output = args.output.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let image = ImageIOService::load_image(&args.image).context("Failed to load image")?;
        let cutout = match &extractor {
            Some(extractor) => extractor
                .remove_background_image(&image)
                .context("Failed to remove background")?,
            None => image.to_rgba8(),
        };
        let cutout = crop_to_object(&cutout);

        let background = ImageIOService::load_image(&args.background)
            .context("Failed to load background")?
            .to_rgb8();
        let composite = Compositor::composite(&cutout, &background, &position)?;
        ImageIOService::save_jpeg(&composite, &args.output, args.jpeg_quality)
            .context("Failed to write output")?;
        Ok(())
    })
    .await
    .context("Composite task panicked")??;

    info!(
        output = %output.display(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "composite written"
    );
    Ok(())
}

async fn remove(args: RemoveArgs) -> Result<()> {
    let segmenter = load_segmenter(CliConfigBuilder::removal_config(&args.model)?).await?;
    let output = args.output.clone().unwrap_or_else(|| {
        let stem = args
            .image
            .file_stem()
            .map_or_else(|| "image".to_string(), |s| s.to_string_lossy().into_owned());
        args.image.with_file_name(format!("{}_rmbg.png", stem))
    });

    let start = Instant::now();
    let target = output.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let image = ImageIOService::load_image(&args.image).context("Failed to load image")?;
        let mut cutout = segmenter
            .remove_background_image(&image)
            .context("Failed to remove background")?;
        if !args.no_crop {
            cutout = crop_to_object(&cutout);
        }
        ImageIOService::save_png(&cutout, &target).context("Failed to write output")?;
        Ok(())
    })
    .await
    .context("Removal task panicked")??;

    info!(
        output = %output.display(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "background removed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_flags() {
        let cli = Cli::try_parse_from([
            "bg-changer",
            "-v",
            "serve",
            "--port",
            "9000",
            "--workers",
            "3",
            "--backend",
            "tract",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.port, Some(9000));
        assert_eq!(args.workers, Some(3));
        assert_eq!(args.model.backend, Some(CliBackend::Tract));
    }

    #[test]
    fn test_parse_composite_defaults() {
        let cli = Cli::try_parse_from([
            "bg-changer",
            "composite",
            "car.jpg",
            "--background",
            "bg.jpg",
            "--output",
            "out.jpg",
        ])
        .unwrap();
        let Command::Composite(args) = cli.command else {
            panic!("expected composite");
        };
        assert_eq!(args.position.to_position().unwrap(), PositionConfig::default());
        assert!(!args.cutout);
    }

    #[test]
    fn test_invalid_position_flag() {
        let cli = Cli::try_parse_from([
            "bg-changer",
            "composite",
            "car.jpg",
            "-b",
            "bg.jpg",
            "-o",
            "out.jpg",
            "--scale-factor",
            "1.5",
        ])
        .unwrap();
        let Command::Composite(args) = cli.command else {
            panic!("expected composite");
        };
        assert!(args.position.to_position().is_err());
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
