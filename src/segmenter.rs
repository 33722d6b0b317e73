//! Foreground extraction
//!
//! [`Segmenter`] is the process-wide session handle: the model is resolved and loaded
//! once at start-up, then the handle is shared behind an `Arc` by every request.

use crate::{
    backends::create_backend,
    config::RemovalConfig,
    error::{BgChangerError, Result},
    inference::InferenceBackend,
    models::ModelManager,
    services::ImageIOService,
    utils::{ImagePreprocessor, Letterbox},
};
use image::{DynamicImage, GrayImage, Luma, RgbImage, Rgba, RgbaImage};
use ndarray::Array4;
use std::sync::Mutex;
use std::time::Instant;

/// Anything that can cut the foreground subject out of an image
pub trait ForegroundExtractor: Send + Sync {
    /// Cut the subject out of `image`, returning an RGBA image of the same size
    ///
    /// # Errors
    /// - Empty image
    /// - Inference failures
    fn extract(&self, image: &DynamicImage) -> Result<RgbaImage>;

    /// How many times [`Self::remove_background_image`] runs the extractor
    fn passes(&self) -> u8 {
        1
    }

    /// Run [`Self::extract`] `passes` times, each pass on the previous cutout
    fn remove_background_image(&self, image: &DynamicImage) -> Result<RgbaImage> {
        let mut cutout = self.extract(image)?;
        for _ in 1..self.passes() {
            cutout = self.extract(&DynamicImage::ImageRgba8(cutout))?;
        }
        Ok(cutout)
    }

    /// Decode `bytes`, remove the background and encode the cutout as PNG
    ///
    /// # Errors
    /// - `Decode` for unreadable input
    /// - Extraction failures
    fn remove_background(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let image = ImageIOService::load_from_bytes(bytes)?;
        let cutout = self.remove_background_image(&image)?;
        ImageIOService::encode_png(&cutout)
    }
}

/// Segmentation session: one inference backend plus its configuration
pub struct Segmenter {
    backend: Mutex<Box<dyn InferenceBackend>>,
    backend_name: &'static str,
    config: RemovalConfig,
}

impl std::fmt::Debug for Segmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segmenter")
            .field("backend", &self.backend_name)
            .field("passes", &self.config.passes)
            .finish_non_exhaustive()
    }
}

impl Segmenter {
    /// Resolve the configured model, create the backend and initialize it
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Model resolution, download or load failures
    /// - Backend initialization failures
    pub async fn from_config(config: RemovalConfig) -> Result<Self> {
        config.validate()?;
        let manager = ModelManager::new(config.model.clone(), config.model_sha256.clone());
        tracing::info!(
            model = %manager.source().display_name(),
            backend = ?config.backend,
            "loading segmentation model"
        );

        let path = manager.resolve().await?;
        let backend = create_backend(config.backend)?;
        tokio::task::spawn_blocking(move || {
            let model_data = ModelManager::load_model(&path)?;
            Self::with_backend(backend, &model_data, config)
        })
        .await
        .map_err(|e| BgChangerError::internal(format!("model loading task failed: {e}")))?
    }

    /// Build a session around an existing backend, initializing it with `model_data`
    pub fn with_backend(
        mut backend: Box<dyn InferenceBackend>,
        model_data: &[u8],
        config: RemovalConfig,
    ) -> Result<Self> {
        config.validate()?;
        if let Some(load_time) = backend.initialize(model_data, &config)? {
            tracing::info!(
                backend = backend.name(),
                load_ms = load_time.as_millis() as u64,
                "segmentation backend ready"
            );
        }
        Ok(Self {
            backend_name: backend.name(),
            backend: Mutex::new(backend),
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &RemovalConfig {
        &self.config
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    /// Predict the alpha mask for `image`
    pub fn predict_mask(&self, image: &DynamicImage) -> Result<GrayImage> {
        let span = tracing::debug_span!("inference", backend = self.backend_name);
        let _guard = span.enter();
        let start = Instant::now();

        let (tensor, letterbox) = ImagePreprocessor::preprocess(image, &self.config.preprocessing)?;
        let output = {
            let mut backend = self
                .backend
                .lock()
                .map_err(|_| BgChangerError::internal("inference backend lock poisoned"))?;
            backend.infer(&tensor)?
        };

        let mask = tensor_to_mask(
            &output,
            &letterbox,
            (image.width(), image.height()),
            self.config.normalize_mask,
        )?;
        tracing::debug!(elapsed_ms = start.elapsed().as_millis() as u64, "mask predicted");
        Ok(mask)
    }
}

impl ForegroundExtractor for Segmenter {
    fn extract(&self, image: &DynamicImage) -> Result<RgbaImage> {
        let mask = self.predict_mask(image)?;
        apply_mask(&image.to_rgb8(), &mask)
    }

    fn passes(&self) -> u8 {
        self.config.passes
    }
}

/// Map a model output tensor back onto the original image as an alpha mask
///
/// Each original pixel is located in the letterboxed canvas, scaled into output tensor
/// coordinates, and sampled bilinearly. With `normalize`, values are stretched so the
/// tensor minimum maps to 0 and the maximum to 1; a constant tensor is only clamped.
///
/// # Errors
/// - Output tensor is not `[1, 1, H, W]` with non-zero spatial dimensions
pub fn tensor_to_mask(
    output: &Array4<f32>,
    letterbox: &Letterbox,
    original: (u32, u32),
    normalize: bool,
) -> Result<GrayImage> {
    let (batch, channels, out_height, out_width) = output.dim();
    if batch == 0 || channels == 0 || out_height == 0 || out_width == 0 {
        return Err(BgChangerError::inference(format!(
            "unexpected mask tensor shape {:?}",
            output.shape()
        )));
    }

    let (min, max) = output
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let range = max - min;
    let stretch = normalize && range > f32::EPSILON;

    let scale_x = out_width as f32 / letterbox.canvas_size as f32;
    let scale_y = out_height as f32 / letterbox.canvas_size as f32;

    let sample = |x: f32, y: f32| -> f32 {
        let x = (x - 0.5).clamp(0.0, (out_width - 1) as f32);
        let y = (y - 0.5).clamp(0.0, (out_height - 1) as f32);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(out_width - 1);
        let y1 = (y0 + 1).min(out_height - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let top = output[[0, 0, y0, x0]] * (1.0 - fx) + output[[0, 0, y0, x1]] * fx;
        let bottom = output[[0, 0, y1, x0]] * (1.0 - fx) + output[[0, 0, y1, x1]] * fx;
        top * (1.0 - fy) + bottom * fy
    };

    let (width, height) = original;
    let mask = GrayImage::from_fn(width, height, |x, y| {
        let (cx, cy) = letterbox.to_canvas(x, y, original);
        let mut value = sample(cx * scale_x, cy * scale_y);
        if stretch {
            value = (value - min) / range;
        }
        Luma([(value.clamp(0.0, 1.0) * 255.0) as u8])
    });
    Ok(mask)
}

/// Use `mask` as the alpha channel of `image`; fully transparent pixels become `[0, 0, 0, 0]`
///
/// # Errors
/// - Mask and image dimensions differ
pub fn apply_mask(image: &RgbImage, mask: &GrayImage) -> Result<RgbaImage> {
    if image.dimensions() != mask.dimensions() {
        return Err(BgChangerError::processing(format!(
            "mask {:?} does not match image {:?}",
            mask.dimensions(),
            image.dimensions()
        )));
    }

    Ok(RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let alpha = mask.get_pixel(x, y)[0];
        if alpha == 0 {
            Rgba([0, 0, 0, 0])
        } else {
            let [r, g, b] = image.get_pixel(x, y).0;
            Rgba([r, g, b, alpha])
        }
    }))
}
