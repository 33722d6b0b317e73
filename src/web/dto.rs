//! Request and response bodies

use crate::{position::PositionConfig, tasks::JobId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChangeBgByLinksRequest {
    pub car_link: String,
    pub background_link: String,
    #[serde(default)]
    pub position: Option<PositionConfig>,
    /// Blob container for the result
    #[serde(default)]
    pub container: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoveBgByLinkRequest {
    pub link: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BulkRemoveBgRequest {
    pub links: Vec<String>,
}

/// Where a queued job will write its result
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileResponse {
    pub file_path: String,
    pub file_link: String,
    pub job_id: JobId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BulkFileResponse {
    pub file_paths: Vec<String>,
    pub file_links: Vec<String>,
    pub job_ids: Vec<JobId>,
}
