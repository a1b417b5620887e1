//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::application::CatalogSource;

/// On-disk layout of the catalogs and deployer state
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

    /// Root of a catalog
    pub fn catalog_dir(&self, source: CatalogSource) -> Dir {
        match source {
            CatalogSource::Json => Dir::new(self.base_dir.join("json")),
            CatalogSource::Local => Dir::new(self.base_dir.join("local").join("json")),
        }
    }

    /// Directory holding one application of a catalog
    pub fn application_dir(&self, source: CatalogSource, id: &str) -> Dir {
        self.catalog_dir(source).subdir("applications").subdir(id)
    }

    /// Shared templates of a catalog
    pub fn shared_templates_dir(&self, source: CatalogSource) -> Dir {
        self.catalog_dir(source).subdir("shared").subdir("templates")
    }

    /// Shared scripts of a catalog
    pub fn shared_scripts_dir(&self, source: CatalogSource) -> Dir {
        self.catalog_dir(source).subdir("shared").subdir("scripts")
    }

    /// Persisted container identities
    pub fn contexts_file(&self) -> File {
        File::new(self.base_dir.join("local").join("contexts.json"))
    }

    /// Directory for execution checkpoints
    pub fn restart_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("local").join("restart"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Directory that `local:` file values are resolved against
    pub fn local_resources_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("local"))
    }

    /// Setup the writable part of the layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::DeployerError> {
        self.catalog_dir(CatalogSource::Local).create().await?;
        self.restart_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/etc/oci-lxc-deployer");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".oci-lxc-deployer");

        Self::new(base_dir)
    }
}
