//! Locating containers by hostname on the management host

use serde::Deserialize;

use crate::errors::DeployerError;
use crate::models::execution::VmIdentity;

/// Lists every container of the cluster as `[{"hostname", "vmid", "node"}]`
pub const PROBE_SCRIPT: &str = r#"first=1
printf '['
for conf in /etc/pve/nodes/*/lxc/*.conf; do
  [ -f "$conf" ] || continue
  vmid=$(basename "$conf" .conf)
  node=$(basename "$(dirname "$(dirname "$conf")")")
  hostname=$(sed -n 's/^hostname:[[:space:]]*//p' "$conf" | head -n 1)
  [ "$first" -eq 1 ] || printf ','
  first=0
  printf '{"hostname":"%s","vmid":%s,"node":"%s"}' "$hostname" "$vmid" "$node"
done
printf ']\n'
"#;

/// A container as reported by the probe
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssignedContainer {
    pub hostname: String,
    pub vmid: u32,
    pub node: String,
}

pub fn parse_probe_output(stdout: &str) -> Result<Vec<AssignedContainer>, DeployerError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed).map_err(|e| {
        DeployerError::ExecutionError(format!("Unreadable container listing: {}", e))
    })
}

/// Pick the container named `hostname` and check it against the stored identity.
///
/// Both the node and the vm id recorded at installation must match what the
/// host reports now.
pub fn match_container(
    hostname: &str,
    containers: &[AssignedContainer],
    identity: Option<&VmIdentity>,
) -> Result<AssignedContainer, DeployerError> {
    let container = containers
        .iter()
        .find(|c| c.hostname == hostname)
        .ok_or_else(|| {
            DeployerError::NotFound(format!(
                "No container with hostname '{}' on the host",
                hostname
            ))
        })?;

    let identity = identity.ok_or_else(|| {
        DeployerError::NotFound(format!("No stored identity for container '{}'", hostname))
    })?;

    if let Some(node) = &identity.node {
        if node != &container.node {
            return Err(DeployerError::ValidationError(format!(
                "Container '{}' runs on node '{}', but was installed on '{}'",
                hostname, container.node, node
            )));
        }
    }

    match identity.vm_id {
        Some(vm_id) if vm_id == container.vmid => Ok(container.clone()),
        Some(vm_id) => Err(DeployerError::ValidationError(format!(
            "Container '{}' has id {}, but was installed as {}",
            hostname, container.vmid, vm_id
        ))),
        None => Err(DeployerError::ValidationError(format!(
            "Stored identity of '{}' has no vm id",
            hostname
        ))),
    }
}
