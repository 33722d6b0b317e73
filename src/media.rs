//! Request-scoped media files
//!
//! Inputs, cutouts and composites live under the media directory with unique names.
//! Responses link to them as `public_base_url/media/<path inside the media dir>`.

use crate::error::{BgChangerError, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// Unique base name `image_{YYYYmmddHHMMSS}_{8 hex chars}`
#[must_use]
pub fn generate_unique_name() -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let id = Uuid::new_v4().simple().to_string();
    format!("image_{}_{}", timestamp, id.get(..8).unwrap_or(&id))
}

/// Strip directory components from a client-supplied file name
///
/// Returns `None` when nothing usable remains.
#[must_use]
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let normalized = name.replace('\\', "/");
    let file_name = normalized
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")?;
    Some(file_name.to_string())
}

/// Delete files, logging failures instead of returning them
///
/// Each distinct path is removed once; files that are already gone are skipped quietly.
pub fn delete_files<P: AsRef<Path>>(paths: &[P]) {
    let mut seen = HashSet::new();
    for path in paths {
        let path = path.as_ref();
        if !seen.insert(path.to_path_buf()) {
            continue;
        }
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "already deleted");
            },
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to delete file"),
        }
    }
}

/// Layout of the media directories and their public URLs
#[derive(Debug, Clone)]
pub struct MediaStore {
    media_dir: PathBuf,
    background_dir: PathBuf,
    public_base_url: String,
}

impl MediaStore {
    #[must_use]
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(
        media_dir: P,
        background_dir: Q,
        public_base_url: &str,
    ) -> Self {
        Self {
            media_dir: media_dir.into(),
            background_dir: background_dir.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create the media and background directories
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.media_dir, &self.background_dir] {
            std::fs::create_dir_all(dir)
                .map_err(|e| BgChangerError::file_io_error("create media directory", dir, &e))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    #[must_use]
    pub fn media_path(&self, file_name: &str) -> PathBuf {
        self.media_dir.join(file_name)
    }

    #[must_use]
    pub fn background_path(&self, file_name: &str) -> PathBuf {
        self.background_dir.join(file_name)
    }

    /// Public link for a media path, served under `/media/`
    ///
    /// Paths outside the media directory are linked by their display path.
    #[must_use]
    pub fn public_url(&self, path: &Path) -> String {
        match path.strip_prefix(&self.media_dir) {
            Ok(relative) => format!(
                "{}/media/{}",
                self.public_base_url,
                Self::display_path(relative)
            ),
            Err(_) => format!("{}/{}", self.public_base_url, Self::display_path(path)),
        }
    }

    /// Path as returned to clients (`/` separated, no leading `./`)
    #[must_use]
    pub fn display_path(path: &Path) -> String {
        path.components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Resolve a client-requested relative path inside the media directory
    ///
    /// # Errors
    /// - `NotFound` for empty paths and paths escaping the media directory
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let relative = Path::new(relative);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || relative.as_os_str().is_empty() {
            return Err(BgChangerError::not_found(format!(
                "media file '{}'",
                relative.display()
            )));
        }
        Ok(self.media_dir.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_name_pattern() {
        let name = generate_unique_name();
        let parts: Vec<&str> = name.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "image");
        assert_eq!(parts[1].len(), 14);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_unique_name(), name);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("car.jpg").as_deref(), Some("car.jpg"));
        assert_eq!(sanitize_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_file_name("C:\\Users\\me\\bg.png").as_deref(), Some("bg.png"));
        assert_eq!(sanitize_file_name("uploads/.."), None);
        assert_eq!(sanitize_file_name("  "), None);
    }

    #[test]
    fn test_delete_files_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        std::fs::write(&a, b"a").unwrap();
        let missing = dir.path().join("missing.jpg");

        delete_files(&[a.clone(), a.clone(), missing, dir.path().to_path_buf()]);
        assert!(!a.exists());
        assert!(dir.path().exists());
    }

    #[test]
    fn test_public_url_and_resolve() {
        let store = MediaStore::new("media", "media/backgrounds", "http://localhost:8000/");
        let path = store.media_path("image_x.jpg");
        assert_eq!(MediaStore::display_path(&path), "media/image_x.jpg");
        assert_eq!(
            store.public_url(&path),
            "http://localhost:8000/media/image_x.jpg"
        );
        assert_eq!(
            store.background_path("bg.jpg"),
            PathBuf::from("media/backgrounds/bg.jpg")
        );

        let absolute =
            MediaStore::new("/srv/data", "/srv/data/backgrounds", "https://rmbg.example");
        assert_eq!(
            absolute.public_url(&absolute.background_path("bg.jpg")),
            "https://rmbg.example/media/backgrounds/bg.jpg"
        );

        assert!(store.resolve("image_x.jpg").is_ok());
        assert!(store.resolve("../secret").is_err());
        assert!(store.resolve("/etc/passwd").is_err());
        assert!(store.resolve("").is_err());
    }
}
