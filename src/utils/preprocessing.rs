//! Image preprocessing for segmentation models
//!
//! Images are letterboxed: resized with their aspect ratio preserved and centred on a
//! square padded canvas. The [`Letterbox`] returned alongside the tensor maps model
//! output coordinates back to the original image.

use crate::{
    error::{BgChangerError, Result},
    models::PreprocessingConfig,
};
use image::{DynamicImage, ImageBuffer, RgbImage};
use ndarray::Array4;

/// Padding colour of the letterbox canvas
pub const PADDING_COLOR: [u8; 3] = [255, 255, 255];

/// Geometry of a letterboxed image inside the model canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Side length of the square canvas
    pub canvas_size: u32,
    /// Resize factor from original to canvas pixels
    pub scale: f32,
    /// Left offset of the resized image on the canvas
    pub offset_x: u32,
    /// Top offset of the resized image on the canvas
    pub offset_y: u32,
    /// Resized image width on the canvas
    pub resized_width: u32,
    /// Resized image height on the canvas
    pub resized_height: u32,
}

impl Letterbox {
    /// Compute the letterbox for an image of `width` x `height`
    ///
    /// # Errors
    /// - Zero-sized image or canvas
    pub fn new(width: u32, height: u32, canvas_size: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(BgChangerError::invalid_argument(format!(
                "image must not be empty, got {}x{}",
                width, height
            )));
        }
        if canvas_size == 0 {
            return Err(BgChangerError::invalid_config("model input size must be non-zero"));
        }

        let target = canvas_size as f32;
        let scale = (target / width as f32).min(target / height as f32);
        let resized_width = ((width as f32 * scale).round() as u32).clamp(1, canvas_size);
        let resized_height = ((height as f32 * scale).round() as u32).clamp(1, canvas_size);

        Ok(Self {
            canvas_size,
            scale,
            offset_x: (canvas_size - resized_width) / 2,
            offset_y: (canvas_size - resized_height) / 2,
            resized_width,
            resized_height,
        })
    }

    /// Canvas coordinates (fractional) of the centre of original pixel `(x, y)`
    #[must_use]
    pub fn to_canvas(&self, x: u32, y: u32, original: (u32, u32)) -> (f32, f32) {
        let sx = self.resized_width as f32 / original.0 as f32;
        let sy = self.resized_height as f32 / original.1 as f32;
        (
            self.offset_x as f32 + (x as f32 + 0.5) * sx,
            self.offset_y as f32 + (y as f32 + 0.5) * sy,
        )
    }
}

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Letterbox `image` and convert it into a normalized NCHW tensor
    ///
    /// # Errors
    /// - Empty image
    /// - Invalid preprocessing configuration
    pub fn preprocess(
        image: &DynamicImage,
        config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, Letterbox)> {
        let (tensor, letterbox, _) = Self::preprocess_with_canvas(image, config)?;
        Ok((tensor, letterbox))
    }

    /// Like [`Self::preprocess`], also returning the padded canvas for debugging
    pub fn preprocess_with_canvas(
        image: &DynamicImage,
        config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, Letterbox, RgbImage)> {
        config.validate()?;
        let rgb_image = image.to_rgb8();
        let (width, height) = rgb_image.dimensions();
        let letterbox = Letterbox::new(width, height, config.target_size[0])?;

        let resized = image::imageops::resize(
            &rgb_image,
            letterbox.resized_width,
            letterbox.resized_height,
            image::imageops::FilterType::Triangle,
        );

        let mut canvas = ImageBuffer::from_pixel(
            letterbox.canvas_size,
            letterbox.canvas_size,
            image::Rgb(PADDING_COLOR),
        );
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(letterbox.offset_x),
            i64::from(letterbox.offset_y),
        );

        let tensor = Self::canvas_to_tensor(&canvas, config);
        Ok((tensor, letterbox, canvas))
    }

    /// Convert canvas to normalized tensor
    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        #[allow(clippy::indexing_slicing)]
        // Tensor dimensions are allocated from the canvas
        for (x, y, pixel) in canvas.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (f32::from(pixel[c]) / 255.0
                    - config.normalization_mean[c])
                    / config.normalization_std[c];
            }
        }

        tensor
    }
}
