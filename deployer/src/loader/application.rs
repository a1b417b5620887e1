//! Application loading: `extends` chains and task list merging

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::errors::{ConfigurationError, ErrorDetail};
use crate::models::application::{Application, StoredApplication, TaskType, TemplateReference};
use crate::storage::repository::Repository;

/// Loads applications and merges inherited task lists
pub struct ApplicationLoader {
    repository: Arc<dyn Repository>,
}

impl ApplicationLoader {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    /// Load `name` and every ancestor it extends.
    ///
    /// All problems found along the chain are reported together.
    pub async fn load(&self, name: &str) -> Result<Application, ConfigurationError> {
        let mut chain: Vec<StoredApplication> = Vec::new();
        let mut paths: Vec<PathBuf> = Vec::new();
        let mut hierarchy: Vec<String> = Vec::new();
        let mut errors: Vec<ErrorDetail> = Vec::new();

        let mut next = Some(name.to_string());
        while let Some(current) = next.take() {
            match self.repository.read_application(&current).await {
                Ok(Some(stored)) => {
                    if paths.contains(&stored.path) {
                        errors.push(
                            ErrorDetail::new(format!(
                                "Cyclic inheritance: '{}' appears twice in [{}]",
                                current,
                                hierarchy.join(" -> ")
                            ))
                            .in_template(current.clone()),
                        );
                        break;
                    }
                    debug!("Loaded application {} from {}", stored.id, stored.path.display());
                    paths.push(stored.path.clone());
                    hierarchy.push(stored.source.qualified(&stored.id));
                    next = stored.document.extends.clone();
                    chain.push(stored);
                }
                Ok(None) => {
                    errors.push(ErrorDetail::new(format!("Application not found: {}", current)));
                    break;
                }
                Err(e) => {
                    errors.push(ErrorDetail::new(e.message.clone()).in_template(current.clone()));
                    errors.extend(e.details);
                    break;
                }
            }
        }

        if !errors.is_empty() {
            return Err(ConfigurationError::with_details(
                format!("Failed to load application '{}'", name),
                errors,
            )
            .for_application(hierarchy));
        }

        let Some(root) = chain.first() else {
            return Err(ConfigurationError::new(format!("Application not found: {}", name)));
        };

        let mut tasks = HashMap::new();
        for task in TaskType::ALL {
            let mut names = Vec::new();
            for stored in chain.iter().rev() {
                for entry in stored.document.task(task) {
                    merge_reference(&mut names, entry.clone().into_reference());
                }
            }
            if !names.is_empty() {
                tasks.insert(task, names);
            }
        }

        let document = &root.document;
        Ok(Application {
            id: root.id.clone(),
            name: if document.name.is_empty() {
                root.id.clone()
            } else {
                document.name.clone()
            },
            description: document.description.clone(),
            extends: document.extends.clone(),
            source: root.source,
            hierarchy,
            tasks,
        })
    }
}

/// Apply one positional reference to a task list.
///
/// A plain name appends unless already present; `before`/`after` place the
/// name next to that sibling, or append when the sibling is absent.
pub fn merge_reference(names: &mut Vec<String>, reference: TemplateReference) {
    let positioned = reference.before.is_some() || reference.after.is_some();
    if let Some(existing) = names.iter().position(|n| *n == reference.name) {
        if !positioned {
            return;
        }
        names.remove(existing);
    }

    let index = if let Some(before) = &reference.before {
        names.iter().position(|n| n == before)
    } else if let Some(after) = &reference.after {
        names.iter().position(|n| n == after).map(|i| i + 1)
    } else {
        None
    };

    match index {
        Some(index) => names.insert(index, reference.name),
        None => names.push(reference.name),
    }
}
