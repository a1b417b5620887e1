//! Application models

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Task an application can run templates for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Installation,
    Backup,
    Restore,
    Uninstall,
    Update,
    Upgrade,
    Webui,
}

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::Installation,
        TaskType::Backup,
        TaskType::Restore,
        TaskType::Uninstall,
        TaskType::Update,
        TaskType::Upgrade,
        TaskType::Webui,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Installation => "installation",
            TaskType::Backup => "backup",
            TaskType::Restore => "restore",
            TaskType::Uninstall => "uninstall",
            TaskType::Update => "update",
            TaskType::Upgrade => "upgrade",
            TaskType::Webui => "webui",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .iter()
            .find(|task| task.as_str() == s.to_lowercase())
            .copied()
            .ok_or_else(|| format!("Invalid task: {}", s))
    }
}

/// A positional edit to a task's template list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateReference {
    pub name: String,

    /// Insert before this sibling, if present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,

    /// Insert after this sibling, if present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

/// Entry of a task list in `application.json`: a plain name or a positioned reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateEntry {
    Name(String),
    Positioned(TemplateReference),
}

impl TemplateEntry {
    pub fn into_reference(self) -> TemplateReference {
        match self {
            TemplateEntry::Name(name) => TemplateReference {
                name,
                before: None,
                after: None,
            },
            TemplateEntry::Positioned(reference) => reference,
        }
    }
}

/// Application definition as stored in `application.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationDocument {
    /// Display name, the application id when empty
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Parent application id
    #[serde(default)]
    pub extends: Option<String>,

    #[serde(default)]
    pub installation: Vec<TemplateEntry>,

    #[serde(default)]
    pub backup: Vec<TemplateEntry>,

    #[serde(default)]
    pub restore: Vec<TemplateEntry>,

    #[serde(default)]
    pub uninstall: Vec<TemplateEntry>,

    #[serde(default)]
    pub update: Vec<TemplateEntry>,

    #[serde(default)]
    pub upgrade: Vec<TemplateEntry>,

    #[serde(default)]
    pub webui: Vec<TemplateEntry>,
}

impl ApplicationDocument {
    pub fn task(&self, task: TaskType) -> &[TemplateEntry] {
        match task {
            TaskType::Installation => &self.installation,
            TaskType::Backup => &self.backup,
            TaskType::Restore => &self.restore,
            TaskType::Uninstall => &self.uninstall,
            TaskType::Update => &self.update,
            TaskType::Upgrade => &self.upgrade,
            TaskType::Webui => &self.webui,
        }
    }
}

/// Catalog an application was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogSource {
    /// Shipped with the deployer
    Json,
    /// User supplied, wins on name collision
    Local,
}

impl CatalogSource {
    /// Splits an optional `local:` / `json:` prefix off an application name
    pub fn split_name(name: &str) -> (Option<CatalogSource>, &str) {
        if let Some(rest) = name.strip_prefix("local:") {
            (Some(CatalogSource::Local), rest)
        } else if let Some(rest) = name.strip_prefix("json:") {
            (Some(CatalogSource::Json), rest)
        } else {
            (None, name)
        }
    }

    /// `id` prefixed so that lookups stay in this catalog
    pub fn qualified(&self, id: &str) -> String {
        match self {
            CatalogSource::Json => format!("json:{}", id),
            CatalogSource::Local => format!("local:{}", id),
        }
    }
}

/// An application document together with where it came from
#[derive(Debug, Clone)]
pub struct StoredApplication {
    pub id: String,
    pub source: CatalogSource,
    pub path: std::path::PathBuf,
    pub document: ApplicationDocument,
}

/// A fully merged application: inheritance resolved, task lists flattened
#[derive(Debug, Clone, Serialize)]
pub struct Application {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub extends: Option<String>,
    pub source: CatalogSource,

    /// Ids of this application and its ancestors, most derived first
    pub hierarchy: Vec<String>,

    /// Ordered template names per task
    pub tasks: HashMap<TaskType, Vec<String>>,
}

impl Application {
    pub fn templates(&self, task: TaskType) -> &[String] {
        self.tasks.get(&task).map(Vec::as_slice).unwrap_or(&[])
    }
}
