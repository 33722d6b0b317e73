//! Remote image retrieval

use crate::{
    error::{BgChangerError, Result},
    services::ImageIOService,
};
use futures::future::try_join_all;
use image::DynamicImage;
use reqwest::{Client, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parse `link` and require an `http` or `https` scheme
///
/// # Errors
/// - `InvalidArgument` for unparsable links or other schemes
pub fn validate_link(link: &str) -> Result<Url> {
    let url = Url::parse(link.trim())
        .map_err(|e| BgChangerError::invalid_argument(format!("invalid link '{}': {}", link, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(BgChangerError::invalid_argument(format!(
            "link '{}' must use http or https, got '{}'",
            link, other
        ))),
    }
}

/// HTTP client for downloading source and background images
#[derive(Debug, Clone)]
pub struct ImageFetcher {
    client: Client,
    jpeg_quality: u8,
}

impl ImageFetcher {
    /// Create a fetcher with a per-request timeout
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(timeout: Duration, jpeg_quality: u8) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bg-changer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BgChangerError::network_error("Failed to create HTTP client", e))?;
        Ok(Self {
            client,
            jpeg_quality,
        })
    }

    /// Download the raw bytes behind `link`
    ///
    /// # Errors
    /// - `InvalidArgument` for non-HTTP links
    /// - `Network` for connection failures and non-2xx responses
    pub async fn fetch_bytes(&self, link: &str) -> Result<Vec<u8>> {
        let url = validate_link(link)?;
        tracing::debug!(url = %url, "fetching image");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| BgChangerError::network_error(&format!("GET {}", url), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BgChangerError::network_error(
                &format!("GET {}", url),
                format!("HTTP status {}", status),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BgChangerError::network_error(&format!("read body of {}", url), e))?;
        Ok(bytes.to_vec())
    }

    /// Download and decode the image behind `link`
    ///
    /// # Errors
    /// - See [`Self::fetch_bytes`]
    /// - `Decode` when the payload is not an image
    pub async fn fetch(&self, link: &str) -> Result<DynamicImage> {
        let bytes = self.fetch_bytes(link).await?;
        tokio::task::spawn_blocking(move || ImageIOService::load_from_bytes(&bytes))
            .await
            .map_err(|e| BgChangerError::internal(format!("decode task failed: {e}")))?
    }

    /// Download `link` and save it to `path` as an RGB JPEG
    pub async fn fetch_to(&self, link: &str, path: &Path) -> Result<PathBuf> {
        let bytes = self.fetch_bytes(link).await?;
        let path = path.to_path_buf();
        let quality = self.jpeg_quality;
        tokio::task::spawn_blocking(move || {
            let image = ImageIOService::load_from_bytes(&bytes)?;
            ImageIOService::save_jpeg(&image.to_rgb8(), &path, quality)?;
            Ok(path)
        })
        .await
        .map_err(|e| BgChangerError::internal(format!("save task failed: {e}")))?
    }

    /// Download several images concurrently, preserving order
    ///
    /// Fails as soon as any download fails.
    pub async fn fetch_all(&self, links: &[String]) -> Result<Vec<DynamicImage>> {
        try_join_all(links.iter().map(|link| self.fetch(link))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use image::{Rgb, RgbImage};

    async fn serve_fixture() -> String {
        let png = ImageIOService::encode_png(&DynamicImage::ImageRgb8(RgbImage::from_pixel(
            6,
            4,
            Rgb([10, 200, 30]),
        ))
        .to_rgba8())
        .unwrap();

        let app = Router::new()
            .route(
                "/car.png",
                get(move || {
                    let png = png.clone();
                    async move { png }
                }),
            )
            .route("/text", get(|| async { "hello" }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn fetcher() -> ImageFetcher {
        ImageFetcher::new(Duration::from_secs(5), 90).unwrap()
    }

    #[test]
    fn test_validate_link() {
        assert!(validate_link("https://example.com/car.jpg").is_ok());
        assert!(validate_link(" http://example.com/a.png ").is_ok());
        assert!(matches!(
            validate_link("ftp://example.com/a.png"),
            Err(BgChangerError::InvalidArgument(_))
        ));
        assert!(validate_link("not a url").is_err());
    }

    #[tokio::test]
    async fn test_fetch_decodes_image() {
        let base = serve_fixture().await;
        let image = fetcher().fetch(&format!("{}/car.png", base)).await.unwrap();
        assert_eq!((image.width(), image.height()), (6, 4));
    }

    #[tokio::test]
    async fn test_fetch_errors() {
        let base = serve_fixture().await;
        let fetcher = fetcher();

        let err = fetcher.fetch(&format!("{}/missing", base)).await.unwrap_err();
        assert!(matches!(err, BgChangerError::Network(_)));
        assert!(err.to_string().contains("404"));

        let err = fetcher.fetch(&format!("{}/text", base)).await.unwrap_err();
        assert!(matches!(err, BgChangerError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_to_saves_jpeg() {
        let base = serve_fixture().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.jpg");

        fetcher()
            .fetch_to(&format!("{}/car.png", base), &path)
            .await
            .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_fetch_all_preserves_order_and_fails_fast() {
        let base = serve_fixture().await;
        let fetcher = fetcher();
        let links = vec![format!("{}/car.png", base), format!("{}/car.png", base)];
        assert_eq!(fetcher.fetch_all(&links).await.unwrap().len(), 2);

        let links = vec![format!("{}/car.png", base), format!("{}/missing", base)];
        assert!(fetcher.fetch_all(&links).await.is_err());
    }
}
