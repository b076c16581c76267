//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Files of the engine on the machine it runs on
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Application configs of the standalone store
    pub fn applications_file(&self) -> File {
        File::new(self.base_dir.join("applications.json"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), EngineError> {
        self.logs_dir().create().await
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/etc/launchpad")
    }
}
