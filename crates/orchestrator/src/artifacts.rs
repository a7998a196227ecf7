//! Artifact directory management
//!
//! Every file a run produces lives under one artifact directory:
//!
//! ```text
//! <artifact_dir>/
//!   report.html
//!   report.pdf
//!   images/
//!     cover.png
//!     slide_01.png
//!     chart_01_<name>.png
//! ```
//!
//! Files are written through a hidden temp file and renamed into place, so a
//! path is either absent or holds complete content.

use std::path::{Component, Path, PathBuf};

use carousel_core::{Artifact, StageId};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Assembled document
pub const PRIMARY_DOCUMENT: &str = "report.html";
/// Converted document
pub const CONVERTED_DOCUMENT: &str = "report.pdf";
/// Directory for generated images and charts
pub const IMAGES_DIR: &str = "images";

const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone)]
pub struct ArtifactManager {
    root: PathBuf,
}

impl ArtifactManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    /// Relative artifact name for the cover image
    pub fn cover_image_name() -> String {
        format!("{}/cover.png", IMAGES_DIR)
    }

    /// Relative artifact name for a slide image (1-indexed)
    pub fn slide_image_name(index: usize) -> String {
        format!("{}/slide_{:02}.png", IMAGES_DIR, index)
    }

    /// Remove outputs left by a previous run and recreate the layout.
    ///
    /// Returns the paths that were removed.
    pub async fn prepare_run(&self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();

        for name in [PRIMARY_DOCUMENT, CONVERTED_DOCUMENT] {
            let path = self.root.join(name);
            if remove_if_exists(&path).await? {
                removed.push(path);
            }
        }

        let images = self.images_dir();
        if fs::try_exists(&images).await.unwrap_or(false) {
            fs::remove_dir_all(&images)
                .await
                .map_err(|e| OrchestratorError::artifact_write(&images, e))?;
            removed.push(images.clone());
        }

        if fs::try_exists(&self.root).await.unwrap_or(false) {
            let mut dir = fs::read_dir(&self.root)
                .await
                .map_err(|e| OrchestratorError::artifact_write(&self.root, e))?;
            while let Some(entry) = dir
                .next_entry()
                .await
                .map_err(|e| OrchestratorError::artifact_write(&self.root, e))?
            {
                if is_temp_file(&entry.path()) && remove_if_exists(&entry.path()).await? {
                    removed.push(entry.path());
                }
            }
        }

        fs::create_dir_all(&images)
            .await
            .map_err(|e| OrchestratorError::artifact_write(&images, e))?;

        if !removed.is_empty() {
            info!(
                root = %self.root.display(),
                removed = removed.len(),
                "Removed artifacts from previous run"
            );
        }
        Ok(removed)
    }

    /// Resolve a relative artifact name to its final path, creating parent
    /// directories. Names may not escape the artifact directory.
    pub async fn reserve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if name.is_empty() || escapes {
            return Err(OrchestratorError::Internal(format!(
                "artifact name '{}' is outside the artifact directory",
                name
            )));
        }

        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| OrchestratorError::artifact_write(parent, e))?;
        }
        Ok(path)
    }

    /// Atomically write `bytes` to the artifact `name` and describe it.
    pub async fn commit(&self, name: &str, stage: StageId, bytes: &[u8]) -> Result<Artifact> {
        let path = self.reserve(name).await?;
        write_atomic(&path, bytes).await?;
        Ok(Artifact::new(name, path, stage))
    }
}

/// Write `bytes` to `path` via a sibling temp file and a rename.
///
/// Readers never observe a partially written file. On failure the temp
/// file is removed and `path` is left untouched.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            OrchestratorError::Internal(format!("artifact path {} has no file name", path.display()))
        })?;
    let temp_path = parent.join(format!(".{}.{}{}", file_name, Uuid::new_v4(), TEMP_SUFFIX));

    debug!(path = %path.display(), bytes = bytes.len(), "Writing artifact");

    if let Err(e) = fs::write(&temp_path, bytes).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(OrchestratorError::artifact_write(path, e));
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(OrchestratorError::artifact_write(path, e));
    }

    Ok(())
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX))
        .unwrap_or(false)
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove stale artifact");
            Err(OrchestratorError::artifact_write(path, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (ArtifactManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let manager = ArtifactManager::new(temp_dir.path());
        (manager, temp_dir)
    }

    #[test]
    fn test_image_names() {
        assert_eq!(ArtifactManager::cover_image_name(), "images/cover.png");
        assert_eq!(ArtifactManager::slide_image_name(3), "images/slide_03.png");
        assert_eq!(ArtifactManager::slide_image_name(12), "images/slide_12.png");
    }

    #[tokio::test]
    async fn test_prepare_run_removes_stale_outputs() {
        let (manager, temp_dir) = setup();
        let root = temp_dir.path();

        std::fs::write(root.join(PRIMARY_DOCUMENT), "old").unwrap();
        std::fs::write(root.join(CONVERTED_DOCUMENT), "old").unwrap();
        std::fs::create_dir_all(root.join(IMAGES_DIR)).unwrap();
        std::fs::write(root.join("images/slide_01.png"), "old").unwrap();
        std::fs::write(root.join(".report.html.abc.tmp"), "partial").unwrap();
        std::fs::write(root.join("notes.txt"), "keep").unwrap();

        let removed = manager.prepare_run().await.unwrap();
        assert_eq!(removed.len(), 4);

        assert!(!root.join(PRIMARY_DOCUMENT).exists());
        assert!(!root.join(CONVERTED_DOCUMENT).exists());
        assert!(!root.join("images/slide_01.png").exists());
        assert!(!root.join(".report.html.abc.tmp").exists());
        assert!(root.join(IMAGES_DIR).is_dir());
        assert!(root.join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_prepare_run_on_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ArtifactManager::new(temp_dir.path().join("out"));

        let removed = manager.prepare_run().await.unwrap();
        assert!(removed.is_empty());
        assert!(manager.images_dir().is_dir());
    }

    #[tokio::test]
    async fn test_commit_writes_complete_file() {
        let (manager, _temp_dir) = setup();

        let artifact = manager
            .commit("images/chart_01_growth.png", StageId::VisualDesign, b"png")
            .await
            .unwrap();

        assert_eq!(artifact.name, "images/chart_01_growth.png");
        assert_eq!(artifact.produced_by, StageId::VisualDesign);
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"png");

        let leftovers: Vec<_> = std::fs::read_dir(manager.images_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| is_temp_file(&e.path()))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_commit_replaces_existing() {
        let (manager, _temp_dir) = setup();

        manager
            .commit(PRIMARY_DOCUMENT, StageId::DocumentAssembly, b"first")
            .await
            .unwrap();
        let artifact = manager
            .commit(PRIMARY_DOCUMENT, StageId::DocumentAssembly, b"second")
            .await
            .unwrap();

        assert_eq!(std::fs::read(artifact.path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_reserve_rejects_escaping_names() {
        let (manager, _temp_dir) = setup();

        assert!(manager.reserve("../outside.html").await.is_err());
        assert!(manager.reserve("/etc/passwd").await.is_err());
        assert!(manager.reserve("").await.is_err());

        let path = manager.reserve("images/nested/cover.png").await.unwrap();
        assert!(path.parent().unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_write_failure_leaves_no_file() {
        let (manager, temp_dir) = setup();
        let missing_dir = temp_dir.path().join("missing").join("report.html");

        let err = write_atomic(&missing_dir, b"data").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ArtifactWrite { .. }));
        assert!(!missing_dir.exists());
        assert!(manager.root().exists());
    }
}
