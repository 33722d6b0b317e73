//! Cloud blob storage for finished composites

use crate::{
    config::StorageConfig,
    error::{BgChangerError, Result},
};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::path::Path;

/// Content type for a file, inferred from its extension
#[must_use]
pub fn content_type_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Destination for uploaded results
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `local_path` as `object_name` into `container`, returning the public blob URL
    ///
    /// # Errors
    /// - Unreadable local file
    /// - `Storage` for rejected uploads
    /// - `Network` for connection failures
    async fn upload(
        &self,
        local_path: &Path,
        object_name: &str,
        container: &str,
        content_type: &str,
    ) -> Result<String>;

    /// Container used when a job does not name one
    fn default_container(&self) -> Option<&str> {
        None
    }
}

/// Azure Blob Storage client authenticated with a SAS token
#[derive(Debug, Clone)]
pub struct AzureBlobStore {
    client: Client,
    service_url: Url,
    sas_token: String,
    default_container: Option<String>,
}

impl AzureBlobStore {
    /// Create a store from settings
    ///
    /// # Errors
    /// - Malformed service URL
    /// - Failed to create HTTP client
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let service_url = Url::parse(&config.service_url()).map_err(|e| {
            BgChangerError::invalid_config(format!(
                "invalid blob service url '{}': {}",
                config.service_url(),
                e
            ))
        })?;
        let client = Client::builder()
            .build()
            .map_err(|e| BgChangerError::network_error("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            service_url,
            sas_token: config.sas_token.trim_start_matches('?').to_string(),
            default_container: config.default_container.clone(),
        })
    }

    /// Blob URL (without the SAS query) for `container/object_name`
    pub fn blob_url(&self, container: &str, object_name: &str) -> Result<Url> {
        if container.is_empty() || object_name.is_empty() {
            return Err(BgChangerError::invalid_argument(
                "container and object name must not be empty",
            ));
        }
        let mut url = self.service_url.clone();
        url.path_segments_mut()
            .map_err(|()| BgChangerError::invalid_config("blob service url cannot be a base"))?
            .pop_if_empty()
            .push(container)
            .push(object_name);
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn upload(
        &self,
        local_path: &Path,
        object_name: &str,
        container: &str,
        content_type: &str,
    ) -> Result<String> {
        let blob_url = self.blob_url(container, object_name)?;
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| BgChangerError::file_io_error("read upload", local_path, &e))?;

        let mut request_url = blob_url.clone();
        request_url.set_query(Some(&self.sas_token));
        tracing::info!(blob = %blob_url, bytes = data.len(), content_type, "uploading blob");

        let response = self
            .client
            .put(request_url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("Content-Type", content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| BgChangerError::network_error(&format!("PUT {}", blob_url), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BgChangerError::storage(format!(
                "upload of {} rejected with HTTP {}: {}",
                blob_url,
                status,
                body.trim()
            )));
        }

        Ok(blob_url.to_string())
    }

    fn default_container(&self) -> Option<&str> {
        self.default_container.as_deref()
    }
}
