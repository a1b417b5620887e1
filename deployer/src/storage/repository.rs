//! Catalog access: applications, templates, scripts and local resources

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::cache::documents::DocumentCache;
use crate::errors::{json_detail, ConfigurationError, ErrorDetail};
use crate::filesys::file::File;
use crate::models::application::{ApplicationDocument, CatalogSource, StoredApplication};
use crate::models::template::Template;
use crate::storage::layout::StorageLayout;

/// Read contract of the catalog storage.
///
/// Absence is reported as `None`; malformed documents as a
/// [`ConfigurationError`] whose details carry the offending line.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Read an application by id, honoring an optional `local:`/`json:` prefix
    async fn read_application(
        &self,
        name: &str,
    ) -> Result<Option<StoredApplication>, ConfigurationError>;

    /// Locate a template file, either in the applications of `hierarchy` or in
    /// the shared templates
    async fn resolve_template_path(
        &self,
        name: &str,
        hierarchy: &[String],
        is_shared: bool,
    ) -> Option<PathBuf>;

    /// Parse a template file
    async fn load_template(&self, path: &Path) -> Result<Option<Template>, ConfigurationError>;

    /// Script text, looked up in the applications of `hierarchy` first, then shared
    async fn get_script(&self, name: &str, hierarchy: &[String]) -> Option<String>;

    /// Bytes of a file referenced by a `local:` value
    async fn get_local_resource(&self, path: &str) -> Option<Vec<u8>>;
}

/// Appends `.json` to template names given without extension
pub fn template_file_name(name: &str) -> String {
    if name.ends_with(".json") {
        name.to_string()
    } else {
        format!("{}.json", name)
    }
}

/// Template name without directory or extension
pub fn template_display_name(name: &str) -> String {
    let file = name.rsplit('/').next().unwrap_or(name);
    file.strip_suffix(".json").unwrap_or(file).to_string()
}

/// [`Repository`] backed by the directories of a [`StorageLayout`]
pub struct FileRepository {
    layout: StorageLayout,
    templates: DocumentCache<Template>,
    applications: DocumentCache<ApplicationDocument>,
}

impl FileRepository {
    pub fn new(layout: StorageLayout, cache_capacity: usize) -> Self {
        Self {
            layout,
            templates: DocumentCache::new(cache_capacity),
            applications: DocumentCache::new(cache_capacity),
        }
    }

    /// Forget cached documents, e.g. after the API layer wrote a file
    pub fn invalidate(&self, path: &Path) {
        self.templates.invalidate(path);
        self.applications.invalidate(path);
    }

    async fn read_cached<T: Clone + DeserializeOwned>(
        cache: &DocumentCache<T>,
        file: &File,
    ) -> Result<Option<T>, ConfigurationError> {
        let Some(modified) = file.modified().await else {
            return Ok(None);
        };

        if let Some(document) = cache.get(file.path(), modified) {
            return Ok(Some(document));
        }

        let source = file.path().display().to_string();
        let text = file.read_string().await.map_err(|e| {
            ConfigurationError::with_details(
                "Unable to read file",
                vec![ErrorDetail::new(e.to_string()).in_template(source.clone())],
            )
        })?;

        let document: T = serde_json::from_str(&text).map_err(|e| {
            ConfigurationError::with_details("Invalid document", vec![json_detail(&source, &e)])
        })?;

        debug!("Parsed and cached {}", source);
        cache.insert(file.path().to_path_buf(), modified, document.clone());
        Ok(Some(document))
    }

    fn catalogs(preferred: Option<CatalogSource>) -> Vec<CatalogSource> {
        match preferred {
            Some(source) => vec![source],
            None => vec![CatalogSource::Local, CatalogSource::Json],
        }
    }
}

#[async_trait]
impl Repository for FileRepository {
    async fn read_application(
        &self,
        name: &str,
    ) -> Result<Option<StoredApplication>, ConfigurationError> {
        let (preferred, id) = CatalogSource::split_name(name);

        for source in Self::catalogs(preferred) {
            let file = self
                .layout
                .application_dir(source, id)
                .file("application.json");

            if let Some(document) = Self::read_cached(&self.applications, &file).await? {
                return Ok(Some(StoredApplication {
                    id: id.to_string(),
                    source,
                    path: file.path().to_path_buf(),
                    document,
                }));
            }
        }

        Ok(None)
    }

    async fn resolve_template_path(
        &self,
        name: &str,
        hierarchy: &[String],
        is_shared: bool,
    ) -> Option<PathBuf> {
        let file_name = template_file_name(name);

        let mut candidates = Vec::new();
        if is_shared {
            for source in Self::catalogs(None) {
                candidates.push(self.layout.shared_templates_dir(source).file(&file_name));
            }
        } else {
            for app in hierarchy {
                let (preferred, id) = CatalogSource::split_name(app);
                for source in Self::catalogs(preferred) {
                    candidates.push(
                        self.layout
                            .application_dir(source, id)
                            .subdir("templates")
                            .file(&file_name),
                    );
                }
            }
        }

        for file in candidates {
            if file.exists().await {
                return Some(file.path().to_path_buf());
            }
        }
        None
    }

    async fn load_template(&self, path: &Path) -> Result<Option<Template>, ConfigurationError> {
        let file = File::new(path);
        let template = Self::read_cached(&self.templates, &file).await?;

        Ok(template.map(|mut template| {
            if template.name.is_empty() {
                template.name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
            }
            template
        }))
    }

    async fn get_script(&self, name: &str, hierarchy: &[String]) -> Option<String> {
        let mut candidates = Vec::new();
        for app in hierarchy {
            let (preferred, id) = CatalogSource::split_name(app);
            for source in Self::catalogs(preferred) {
                candidates.push(
                    self.layout
                        .application_dir(source, id)
                        .subdir("scripts")
                        .file(name),
                );
            }
        }
        for source in Self::catalogs(None) {
            candidates.push(self.layout.shared_scripts_dir(source).file(name));
        }

        for file in candidates {
            if file.exists().await {
                return file.read_string().await.ok();
            }
        }
        None
    }

    async fn get_local_resource(&self, path: &str) -> Option<Vec<u8>> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            debug!("Refusing local resource outside the local directory: {}", path);
            return None;
        }

        self.layout
            .local_resources_dir()
            .file(path)
            .read_bytes()
            .await
            .ok()
    }
}
