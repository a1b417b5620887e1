//! Execution models: checkpoints, progress messages and container identities

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DeployerError;
use crate::filesys::file::File;
use crate::models::template::ExecuteOn;

/// Insertion-ordered name -> value map used for inputs, outputs and defaults
pub type ValueMap = IndexMap<String, Value>;

/// An ordered name/value pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameValue {
    pub name: String,
    pub value: Value,
}

impl NameValue {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

pub fn to_pairs(map: &ValueMap) -> Vec<NameValue> {
    map.iter()
        .map(|(name, value)| NameValue::new(name.clone(), value.clone()))
        .collect()
}

pub fn from_pairs(pairs: &[NameValue]) -> ValueMap {
    pairs
        .iter()
        .map(|pair| (pair.name.clone(), pair.value.clone()))
        .collect()
}

/// Reads a Proxmox vm id from a JSON value (number or numeric string)
pub fn parse_vm_id(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Serializable execution checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<u32>,

    /// Index of the last command that completed, -1 when none did
    #[serde(rename = "lastSuccessfull")]
    pub last_successful: i64,

    #[serde(default)]
    pub inputs: Vec<NameValue>,

    #[serde(default)]
    pub outputs: Vec<NameValue>,

    #[serde(default)]
    pub defaults: Vec<NameValue>,
}

impl RestartInfo {
    /// Index of the first command a resumed run executes
    pub fn resume_index(&self) -> usize {
        usize::try_from(self.last_successful + 1).unwrap_or(0)
    }

    pub async fn save(&self, file: &File) -> Result<(), DeployerError> {
        file.write_json(self).await
    }

    pub async fn load(file: &File) -> Result<Self, DeployerError> {
        file.read_json().await
    }
}

/// Progress report for one command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMessage {
    /// Command name
    pub command: String,

    /// Command text after variable substitution
    pub commandtext: String,

    pub stderr: String,

    /// Captured stdout, or the error text on failure
    pub result: Option<String>,

    #[serde(rename = "exitCode")]
    pub exit_code: i32,

    pub execute_on: Option<ExecuteOn>,

    /// Correlates partial messages with the final one
    pub index: u64,

    pub partial: bool,
}

/// Identity of a provisioned container
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VmIdentity {
    #[serde(default)]
    pub hostname: Option<String>,

    #[serde(default)]
    pub vm_id: Option<u32>,

    /// Node (management host) the container lives on
    #[serde(default)]
    pub node: Option<String>,

    /// Values captured by the run that created the container
    #[serde(default)]
    pub data: ValueMap,

    #[serde(default)]
    pub installed_at: Option<DateTime<Utc>>,
}

/// Events emitted by a running execution
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    Message(ExecutionMessage),
    Finished(VmIdentity),
}

/// The management host commands are sent to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VeContext {
    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

impl VeContext {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}
