//! Image I/O operations
//!
//! Decoding, encoding and file persistence for inputs, cutouts and composites.

use crate::error::{BgChangerError, Result};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageFormat, RgbImage, RgbaImage};
use std::io::Cursor;
use std::path::Path;

/// Service for handling image encoding and file operations
pub struct ImageIOService;

impl ImageIOService {
    /// Decode image bytes, guessing the format from content
    ///
    /// # Errors
    /// - `Decode` when the bytes are not a supported image
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(BgChangerError::decode("image data is empty"));
        }
        image::load_from_memory(bytes).map_err(|e| {
            BgChangerError::decode(format!("failed to decode {} bytes: {}", bytes.len(), e))
        })
    }

    /// Load an image from a file path
    ///
    /// The format is detected from content, so inputs saved without (or with the wrong)
    /// extension still decode.
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| BgChangerError::file_io_error("read image file", path, &e))?;
        Self::load_from_bytes(&data).map_err(|e| {
            BgChangerError::processing_stage_error(
                "image loading",
                &e.to_string(),
                Some(&format!("path: {}", path.display())),
            )
        })
    }

    /// Encode an RGBA image as PNG
    pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }

    /// Encode an RGB image as JPEG with the given quality (1-100)
    pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
        image.write_with_encoder(encoder)?;
        Ok(buffer)
    }

    /// Save a cutout as PNG, creating parent directories
    pub fn save_png<P: AsRef<Path>>(image: &RgbaImage, path: P) -> Result<()> {
        Self::write_file(path.as_ref(), &Self::encode_png(image)?)
    }

    /// Save an RGB image as JPEG, creating parent directories
    pub fn save_jpeg<P: AsRef<Path>>(image: &RgbImage, path: P, quality: u8) -> Result<()> {
        Self::write_file(path.as_ref(), &Self::encode_jpeg(image, quality)?)
    }

    fn write_file(path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| BgChangerError::file_io_error("create output directory", parent, &e))?;
        }
        std::fs::write(path, data)
            .map_err(|e| BgChangerError::file_io_error("write image", path, &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};

    #[test]
    fn test_load_from_bytes_rejects_garbage() {
        let err = ImageIOService::load_from_bytes(b"not an image").unwrap_err();
        assert!(matches!(err, BgChangerError::Decode(_)));
        assert!(ImageIOService::load_from_bytes(&[]).is_err());
    }

    #[test]
    fn test_png_preserves_alpha() {
        let image = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 40]));
        let bytes = ImageIOService::encode_png(&image).unwrap();
        let decoded = ImageIOService::load_from_bytes(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded, image);
    }

    #[test]
    fn test_save_jpeg_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.jpg");
        let image = RgbImage::from_pixel(8, 8, Rgb([200, 100, 50]));
        ImageIOService::save_jpeg(&image, &path, 90).unwrap();

        let loaded = ImageIOService::load_image(&path).unwrap();
        assert_eq!(loaded.width(), 8);
        assert_eq!(loaded.height(), 8);
    }

    #[test]
    fn test_load_image_with_wrong_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cutout.jpg");
        ImageIOService::save_png(&RgbaImage::new(2, 2), &path).unwrap();
        assert!(ImageIOService::load_image(&path).is_ok());
    }
}
