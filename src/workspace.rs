//! Workspace folders for captures
//!
//! Folder management belongs to the host application. The capture path only needs a way to
//! ask for a fresh folder, which is what [`WorkspaceProvider`] describes.

use crate::config::StorageConfig;
use crate::errors::TetherError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub trait WorkspaceProvider: Send + Sync {
    /// Create (or pick) the folder the next capture should land in.
    fn create_workspace(&self) -> Result<PathBuf, TetherError>;
}

/// Creates one `<root>/<YYYY-MM-DD_HHMMSS>` folder per call.
#[derive(Debug, Clone)]
pub struct DatedWorkspace {
    root: PathBuf,
}

impl DatedWorkspace {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn unused_path(&self, stem: &str) -> PathBuf {
        let first = self.root.join(stem);
        if !first.exists() {
            return first;
        }
        let mut n = 2u32;
        loop {
            let candidate = self.root.join(format!("{stem}_{n}"));
            if !candidate.exists() {
                return candidate;
            }
            n = n.saturating_add(1);
        }
    }
}

impl WorkspaceProvider for DatedWorkspace {
    fn create_workspace(&self) -> Result<PathBuf, TetherError> {
        let stem = chrono::Local::now().format("%Y-%m-%d_%H%M%S").to_string();
        let path = self.unused_path(&stem);

        fs::create_dir_all(&path).map_err(|e| {
            TetherError::Workspace(format!("Failed to create {}: {}", path.display(), e))
        })?;

        log::info!("Created capture workspace {:?}", path);
        Ok(path)
    }
}

/// Hands out the same folder every time, creating it on first use.
#[derive(Debug, Clone)]
pub struct SharedWorkspace {
    folder: PathBuf,
}

impl SharedWorkspace {
    pub fn new<P: AsRef<Path>>(folder: P) -> Self {
        Self {
            folder: folder.as_ref().to_path_buf(),
        }
    }
}

impl WorkspaceProvider for SharedWorkspace {
    fn create_workspace(&self) -> Result<PathBuf, TetherError> {
        fs::create_dir_all(&self.folder).map_err(|e| {
            TetherError::Workspace(format!("Failed to create {}: {}", self.folder.display(), e))
        })?;
        Ok(self.folder.clone())
    }
}

/// Provider described by the storage configuration, if it names a root.
pub fn provider_from_config(storage: &StorageConfig) -> Option<Arc<dyn WorkspaceProvider>> {
    let root = storage.workspace_root.as_ref()?;
    if storage.dated_workspaces {
        Some(Arc::new(DatedWorkspace::new(root)))
    } else {
        Some(Arc::new(SharedWorkspace::new(root)))
    }
}
