//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use oci_lxc_deployer::deploy::process::{OutputChunk, ProcessOutput};
use oci_lxc_deployer::deploy::transport::{ShellInvocation, Transport};
use oci_lxc_deployer::errors::{ConfigurationError, DeployerError};
use oci_lxc_deployer::models::application::{ApplicationDocument, CatalogSource, StoredApplication};
use oci_lxc_deployer::models::execution::{ValueMap, VmIdentity};
use oci_lxc_deployer::models::template::Template;
use oci_lxc_deployer::storage::context::ContextStore;
use oci_lxc_deployer::storage::repository::{template_display_name, Repository};

pub fn values(json: Value) -> ValueMap {
    match json {
        Value::Object(map) => map.into_iter().collect(),
        other => panic!("expected an object, got {}", other),
    }
}

/// Repository over documents held in memory
#[derive(Default)]
pub struct MemoryRepository {
    applications: HashMap<String, ApplicationDocument>,
    templates: HashMap<String, Template>,
    scripts: HashMap<String, String>,
    resources: HashMap<String, Vec<u8>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn application(mut self, id: &str, json: Value) -> Self {
        let document = serde_json::from_value(json).expect("valid application");
        self.applications.insert(id.to_string(), document);
        self
    }

    pub fn template(mut self, name: &str, json: Value) -> Self {
        let template = serde_json::from_value(json).expect("valid template");
        self.templates.insert(name.to_string(), template);
        self
    }

    pub fn script(mut self, name: &str, content: &str) -> Self {
        self.scripts.insert(name.to_string(), content.to_string());
        self
    }

    pub fn resource(mut self, path: &str, bytes: &[u8]) -> Self {
        self.resources.insert(path.to_string(), bytes.to_vec());
        self
    }

    pub fn into_arc(self) -> Arc<dyn Repository> {
        Arc::new(self)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn read_application(
        &self,
        name: &str,
    ) -> Result<Option<StoredApplication>, ConfigurationError> {
        let (_, id) = CatalogSource::split_name(name);
        Ok(self.applications.get(id).map(|document| StoredApplication {
            id: id.to_string(),
            source: CatalogSource::Json,
            path: PathBuf::from(format!("memory/applications/{}", id)),
            document: document.clone(),
        }))
    }

    async fn resolve_template_path(
        &self,
        name: &str,
        _hierarchy: &[String],
        is_shared: bool,
    ) -> Option<PathBuf> {
        let name = template_display_name(name);
        if is_shared || !self.templates.contains_key(&name) {
            return None;
        }
        Some(PathBuf::from(format!("memory/templates/{}.json", name)))
    }

    async fn load_template(&self, path: &Path) -> Result<Option<Template>, ConfigurationError> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self.templates.get(&name).cloned().map(|mut template| {
            if template.name.is_empty() {
                template.name = name.clone();
            }
            template
        }))
    }

    async fn get_script(&self, name: &str, _hierarchy: &[String]) -> Option<String> {
        self.scripts.get(name).cloned()
    }

    async fn get_local_resource(&self, path: &str) -> Option<Vec<u8>> {
        self.resources.get(path).cloned()
    }
}

pub fn ok(stdout: &str) -> ProcessOutput {
    ProcessOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: 0,
    }
}

pub fn failed(exit_code: i32, stderr: &str) -> ProcessOutput {
    ProcessOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

type Handler = Box<dyn Fn(&ShellInvocation) -> ProcessOutput + Send + Sync>;

/// Transport answering from a closure and recording every invocation
pub struct ScriptedTransport {
    handler: Handler,
    calls: Mutex<Vec<ShellInvocation>>,
    local: bool,
}

impl ScriptedTransport {
    pub fn new(
        handler: impl Fn(&ShellInvocation) -> ProcessOutput + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            local: false,
        })
    }

    pub fn local(
        handler: impl Fn(&ShellInvocation) -> ProcessOutput + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            local: true,
        })
    }

    pub fn calls(&self) -> Vec<ShellInvocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Scripts sent, in order
    pub fn scripts(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.script).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        invocation: &ShellInvocation,
        partial: UnboundedSender<OutputChunk>,
    ) -> Result<ProcessOutput, DeployerError> {
        self.calls.lock().unwrap().push(invocation.clone());
        let output = (self.handler)(invocation);
        if !output.stdout.is_empty() || !output.stderr.is_empty() {
            let _ = partial.send(OutputChunk {
                stdout: output.stdout.clone(),
                stderr: output.stderr.clone(),
            });
        }
        Ok(output)
    }

    fn is_local(&self) -> bool {
        self.local
    }
}

/// Context store kept in memory
#[derive(Default)]
pub struct MemoryContextStore {
    identities: Mutex<HashMap<String, VmIdentity>>,
}

impl MemoryContextStore {
    pub fn with(identity: VmIdentity) -> Arc<Self> {
        let store = Self::default();
        if let Some(hostname) = &identity.hostname {
            store
                .identities
                .lock()
                .unwrap()
                .insert(hostname.clone(), identity.clone());
        }
        Arc::new(store)
    }

    pub fn get(&self, hostname: &str) -> Option<VmIdentity> {
        self.identities.lock().unwrap().get(hostname).cloned()
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn vm_identity(&self, hostname: &str) -> Result<Option<VmIdentity>, DeployerError> {
        Ok(self.get(hostname))
    }

    async fn save_vm_identity(&self, identity: &VmIdentity) -> Result<(), DeployerError> {
        let hostname = identity.hostname.clone().unwrap_or_default();
        self.identities
            .lock()
            .unwrap()
            .insert(hostname, identity.clone());
        Ok(())
    }
}
