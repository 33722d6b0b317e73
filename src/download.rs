//! Model downloading and caching
//!
//! Models referenced by URL are streamed into the cache directory through a temporary
//! file and renamed into place once complete, so a partially downloaded model never
//! appears under its final name.

use crate::error::{BgChangerError, Result};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::Instrument;

/// Downloads ONNX models into a local cache directory
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache_dir: PathBuf,
}

impl ModelDownloader {
    /// Create a downloader using the platform cache directory
    ///
    /// # Errors
    /// - Failed to create HTTP client
    /// - No cache directory available on this platform
    pub fn new() -> Result<Self> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| {
                BgChangerError::internal("no cache directory available on this platform")
            })?
            .join("bg-changer")
            .join("models");
        Self::with_cache_dir(cache_dir)
    }

    /// Create a downloader writing into `cache_dir`
    pub fn with_cache_dir<P: Into<PathBuf>>(cache_dir: P) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| BgChangerError::network_error("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            cache_dir: cache_dir.into(),
        })
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache location for a model URL
    #[must_use]
    pub fn cache_path_for(&self, url: &str) -> PathBuf {
        let digest = sha256_hex(url.as_bytes());
        let stem = url
            .rsplit('/')
            .next()
            .and_then(|name| name.strip_suffix(".onnx"))
            .filter(|name| !name.is_empty())
            .unwrap_or("model");
        self.cache_dir
            .join(format!("{}-{}.onnx", stem, digest.get(..16).unwrap_or(&digest)))
    }

    /// Return the cached model for `url`, downloading it when missing or stale
    ///
    /// # Errors
    /// - Network errors during download
    /// - File system errors during caching
    /// - Checksum mismatch against `expected_sha256`
    pub async fn ensure_model(&self, url: &str, expected_sha256: Option<&str>) -> Result<PathBuf> {
        let final_path = self.cache_path_for(url);

        if final_path.exists() {
            match expected_sha256 {
                None => {
                    tracing::info!(path = %final_path.display(), "using cached model");
                    return Ok(final_path);
                },
                Some(expected) if Self::verify_file_integrity(&final_path, expected)? => {
                    tracing::info!(path = %final_path.display(), "using verified cached model");
                    return Ok(final_path);
                },
                Some(_) => {
                    tracing::warn!(
                        path = %final_path.display(),
                        "cached model failed verification, downloading again"
                    );
                },
            }
        }

        fs::create_dir_all(&self.cache_dir).map_err(|e| {
            BgChangerError::file_io_error("create model cache directory", &self.cache_dir, &e)
        })?;

        let span = tracing::info_span!("download", url = %url, destination = %final_path.display());
        let digest = async {
            tracing::info!("downloading model");
            self.download_file(url, &final_path).await
        }
        .instrument(span)
        .await?;
        if let Some(expected) = expected_sha256 {
            if !digest.eq_ignore_ascii_case(expected) {
                if let Err(e) = fs::remove_file(&final_path) {
                    tracing::warn!(error = %e, "failed to remove model with bad checksum");
                }
                return Err(BgChangerError::model(format!(
                    "checksum mismatch for {}: expected {}, got {}",
                    url, expected, digest
                )));
            }
        }

        tracing::info!(sha256 = %digest, "model downloaded");
        Ok(final_path)
    }

    /// Stream `url` into `final_path`, returning the SHA-256 of the content
    async fn download_file(&self, url: &str, final_path: &Path) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgChangerError::network_error(&format!("Failed to download {}", url), e))?;

        if !response.status().is_success() {
            return Err(BgChangerError::network_error(
                &format!("Failed to download {}", url),
                format!("HTTP status {}", response.status()),
            ));
        }

        let total_size = response.content_length();
        let temp = tempfile::NamedTempFile::new_in(&self.cache_dir).map_err(|e| {
            BgChangerError::file_io_error("create temporary model file", &self.cache_dir, &e)
        })?;
        let mut file = tokio::fs::File::from_std(temp.reopen().map_err(|e| {
            BgChangerError::file_io_error("open temporary model file", temp.path(), &e)
        })?);

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgChangerError::network_error("Failed to read download stream", e))?;
            if bytes_read == 0 {
                break;
            }

            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            hasher.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| BgChangerError::file_io_error("write model", temp.path(), &e))?;
            downloaded += bytes_read as u64;

            log::trace!("downloaded {} of {:?} bytes", downloaded, total_size);
        }

        file.flush()
            .await
            .map_err(|e| BgChangerError::file_io_error("flush model", temp.path(), &e))?;
        drop(file);

        temp.persist(final_path).map_err(|e| {
            BgChangerError::file_io_error("move downloaded model into cache", final_path, &e.error)
        })?;

        log::debug!("Downloaded {} bytes to {}", downloaded, final_path.display());
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Compare the SHA-256 of a file with an expected hex digest
    pub fn verify_file_integrity(file_path: &Path, expected: &str) -> Result<bool> {
        let contents = fs::read(file_path).map_err(|e| {
            BgChangerError::file_io_error("read file for verification", file_path, &e)
        })?;
        let actual = sha256_hex(&contents);
        if actual.eq_ignore_ascii_case(expected) {
            Ok(true)
        } else {
            log::warn!(
                "File integrity check failed for {}: expected {}, got {}",
                file_path.display(),
                expected,
                actual
            );
            Ok(false)
        }
    }
}

/// Lowercase hex SHA-256 digest
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Port 9 (discard) is never listening in test environments
    const UNREACHABLE_URL: &str = "http://127.0.0.1:9/models/u2net.onnx";

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_cache_path_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ModelDownloader::with_cache_dir(dir.path()).unwrap();
        let a = downloader.cache_path_for(UNREACHABLE_URL);
        let b = downloader.cache_path_for(UNREACHABLE_URL);
        assert_eq!(a, b);
        assert!(a.starts_with(dir.path()));
        let name = a.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("u2net-"));
        assert!(name.ends_with(".onnx"));
    }

    #[tokio::test]
    async fn test_cached_model_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ModelDownloader::with_cache_dir(dir.path()).unwrap();
        let path = downloader.cache_path_for(UNREACHABLE_URL);
        fs::write(&path, b"onnx-bytes").unwrap();

        let resolved = downloader.ensure_model(UNREACHABLE_URL, None).await.unwrap();
        assert_eq!(resolved, path);

        let digest = sha256_hex(b"onnx-bytes");
        let resolved = downloader
            .ensure_model(UNREACHABLE_URL, Some(&digest))
            .await
            .unwrap();
        assert_eq!(resolved, path);
    }

    #[tokio::test]
    async fn test_stale_cache_triggers_download() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ModelDownloader::with_cache_dir(dir.path()).unwrap();
        fs::write(downloader.cache_path_for(UNREACHABLE_URL), b"corrupted").unwrap();

        let err = downloader
            .ensure_model(UNREACHABLE_URL, Some(&sha256_hex(b"expected")))
            .await
            .unwrap_err();
        assert!(matches!(err, BgChangerError::Network(_)));
    }
}
