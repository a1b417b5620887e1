//! Persisted container identities

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::DeployerError;
use crate::filesys::file::File;
use crate::models::execution::VmIdentity;

/// Store of container identities created by earlier runs
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Identity recorded for a container hostname
    async fn vm_identity(&self, hostname: &str) -> Result<Option<VmIdentity>, DeployerError>;

    /// Record the identity of a finished installation
    async fn save_vm_identity(&self, identity: &VmIdentity) -> Result<(), DeployerError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContextsDocument {
    #[serde(default)]
    vms: BTreeMap<String, VmIdentity>,
}

/// [`ContextStore`] persisted as a single JSON file
pub struct FileContextStore {
    file: File,
    lock: Mutex<()>,
}

impl FileContextStore {
    pub fn new(file: File) -> Self {
        Self {
            file,
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<ContextsDocument, DeployerError> {
        if !self.file.exists().await {
            return Ok(ContextsDocument::default());
        }
        self.file.read_json().await
    }
}

#[async_trait]
impl ContextStore for FileContextStore {
    async fn vm_identity(&self, hostname: &str) -> Result<Option<VmIdentity>, DeployerError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.vms.remove(hostname))
    }

    async fn save_vm_identity(&self, identity: &VmIdentity) -> Result<(), DeployerError> {
        let hostname = identity.hostname.clone().ok_or_else(|| {
            DeployerError::ValidationError("Cannot store an identity without hostname".to_string())
        })?;

        let _guard = self.lock.lock().await;
        let mut document = self.read().await?;
        document.vms.insert(hostname.clone(), identity.clone());
        self.file.write_json(&document).await?;

        info!("Stored identity of container {} ({:?})", hostname, identity.vm_id);
        Ok(())
    }
}
