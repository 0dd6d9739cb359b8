use crate::errors::TetherError;
use crate::workspace::WorkspaceProvider;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Decides where a capture should land.
#[derive(Clone, Default)]
pub struct CaptureCoordinator {
    workspace: Option<Arc<dyn WorkspaceProvider>>,
}

impl std::fmt::Debug for CaptureCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureCoordinator")
            .field("has_workspace", &self.workspace.is_some())
            .finish()
    }
}

impl CaptureCoordinator {
    pub fn new(workspace: Option<Arc<dyn WorkspaceProvider>>) -> Self {
        Self { workspace }
    }

    /// The preferred folder wins. Otherwise a workspace is created if a provider is set,
    /// and with neither the camera's own default applies.
    pub fn resolve_folder(&self, preferred: Option<&Path>) -> Result<Option<PathBuf>, TetherError> {
        if let Some(folder) = preferred {
            return Ok(Some(folder.to_path_buf()));
        }
        match &self.workspace {
            Some(provider) => provider.create_workspace().map(Some),
            None => Ok(None),
        }
    }
}
