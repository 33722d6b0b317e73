//! Multipart form parsing for the upload endpoints

use super::error::ApiError;
use crate::{
    error::BgChangerError,
    media::sanitize_file_name,
};
use axum::extract::Multipart;
use image::ImageFormat;
use std::collections::HashMap;
use std::path::Path;

/// An image part of a multipart form
#[derive(Debug, Clone)]
pub(crate) struct UploadedImage {
    pub file_name: Option<String>,
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

impl UploadedImage {
    /// Client file name, or `fallback` with the detected extension
    pub fn file_name_or(&self, fallback: &str) -> String {
        self.file_name
            .clone()
            .unwrap_or_else(|| format!("{}.{}", fallback, self.extension()))
    }

    pub fn extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("img")
    }

    /// Write the raw upload to `path`
    pub async fn save(&self, path: &Path) -> Result<(), ApiError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BgChangerError::file_io_error("create media directory", parent, &e))?;
        }
        tokio::fs::write(path, &self.bytes)
            .await
            .map_err(|e| BgChangerError::file_io_error("write upload", path, &e))?;
        Ok(())
    }
}

/// Parsed multipart form: image parts by field name, everything else as text
#[derive(Debug, Default)]
pub(crate) struct UploadForm {
    images: HashMap<String, UploadedImage>,
    text: HashMap<String, String>,
}

impl UploadForm {
    /// Read every part of `multipart`
    ///
    /// Parts named in `image_fields` must be supported images no larger than
    /// `max_bytes`; other parts are read as UTF-8 text.
    pub async fn read(
        mut multipart: Multipart,
        image_fields: &[&str],
        supported_formats: &[String],
        max_bytes: usize,
    ) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if image_fields.contains(&name.as_str()) {
                let declared = field.content_type().map(str::to_string);
                let file_name = field.file_name().and_then(sanitize_file_name);
                let bytes = field.bytes().await?;
                if bytes.len() > max_bytes {
                    return Err(ApiError::payload_too_large(&name, max_bytes));
                }
                let format = check_image(&name, declared.as_deref(), &bytes, supported_formats)?;
                form.images.insert(
                    name,
                    UploadedImage {
                        file_name,
                        format,
                        bytes: bytes.to_vec(),
                    },
                );
            } else {
                let value = field.text().await?;
                form.text.insert(name, value);
            }
        }
        Ok(form)
    }

    /// Take a required image part
    pub fn take_image(&mut self, field: &str) -> Result<UploadedImage, ApiError> {
        self.images.remove(field).ok_or_else(|| {
            BgChangerError::invalid_argument(format!("missing file field '{}'", field)).into()
        })
    }

    /// Parse an optional numeric text part
    pub fn number(&self, field: &str) -> Result<Option<f64>, ApiError> {
        let Some(raw) = self.text.get(field).map(|v| v.trim()).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        raw.parse::<f64>().map(Some).map_err(|_| {
            BgChangerError::invalid_argument(format!("{} must be a number, got '{}'", field, raw))
                .into()
        })
    }
}

/// Check an uploaded payload against the accepted content types
///
/// The declared content type, when present, and the type detected from the payload's
/// magic bytes must both be accepted.
fn check_image(
    field: &str,
    declared: Option<&str>,
    bytes: &[u8],
    supported_formats: &[String],
) -> Result<ImageFormat, BgChangerError> {
    let accepted = |mime: &str| supported_formats.iter().any(|f| f.eq_ignore_ascii_case(mime));

    if let Some(declared) = declared {
        let mime = declared.split(';').next().unwrap_or(declared).trim();
        if !accepted(mime) {
            return Err(BgChangerError::unsupported_format(format!(
                "field '{}' has content type '{}'; accepted: {}",
                field,
                mime,
                supported_formats.join(", ")
            )));
        }
    }

    let format = image::guess_format(bytes).map_err(|_| {
        BgChangerError::decode(format!("field '{}' is not a recognizable image", field))
    })?;
    if !accepted(format.to_mime_type()) {
        return Err(BgChangerError::unsupported_format(format!(
            "field '{}' contains {}; accepted: {}",
            field,
            format.to_mime_type(),
            supported_formats.join(", ")
        )));
    }
    Ok(format)
}
