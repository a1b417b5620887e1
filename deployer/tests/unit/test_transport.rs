//! Transport retry and timeout tests, run against stub clients
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::sync::mpsc;

use oci_lxc_deployer::deploy::transport::{
    LocalTransport, ShellInvocation, ShellTarget, SshOptions, SshTransport, Transport,
};
use oci_lxc_deployer::errors::DeployerError;
use oci_lxc_deployer::models::execution::VeContext;

/// Writes an ssh stand-in that logs each call to `attempts` and exits with `code`
fn stub_client(dir: &TempDir, code: i32) -> (PathBuf, PathBuf) {
    let attempts = dir.path().join("attempts");
    let program = dir.path().join("ssh-stub");
    let script = format!(
        "#!/bin/sh\ncat > /dev/null\necho call >> '{}'\necho 'connection refused' >&2\nexit {}\n",
        attempts.display(),
        code
    );
    fs::write(&program, script).unwrap();
    fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();
    (program, attempts)
}

fn attempts(path: &Path) -> usize {
    fs::read_to_string(path).map(|s| s.lines().count()).unwrap_or(0)
}

fn ssh(program: &Path) -> SshTransport {
    SshTransport::new(SshOptions {
        program: program.display().to_string(),
        max_retries: 3,
        retry_delay: Duration::from_millis(10),
        ..Default::default()
    })
}

fn invocation(script: &str, timeout: Duration) -> ShellInvocation {
    ShellInvocation {
        ve: VeContext::new("pve1", 22),
        target: ShellTarget::Host,
        interpreter: vec!["sh".to_string()],
        script: script.to_string(),
        timeout,
    }
}

#[tokio::test]
async fn test_ssh_retries_connection_failures() {
    let dir = TempDir::new().unwrap();
    let (program, log) = stub_client(&dir, 255);
    let (tx, _rx) = mpsc::unbounded_channel();

    let result = ssh(&program)
        .execute(&invocation("echo hi", Duration::from_secs(5)), tx)
        .await;

    assert_eq!(attempts(&log), 3);
    match result {
        Err(DeployerError::TransportError(message)) => {
            assert!(message.contains("after 3 attempts"), "{}", message);
            assert!(message.contains("connection refused"), "{}", message);
        }
        other => panic!("expected a transport error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ssh_script_failure_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let (program, log) = stub_client(&dir, 1);
    let (tx, _rx) = mpsc::unbounded_channel();

    let output = ssh(&program)
        .execute(&invocation("exit 1", Duration::from_secs(5)), tx)
        .await
        .unwrap();

    assert_eq!(attempts(&log), 1);
    assert_eq!(output.exit_code, 1);
}

#[tokio::test]
async fn test_local_transport_times_out() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let started = Instant::now();

    let result = LocalTransport
        .execute(&invocation("sleep 5", Duration::from_millis(300)), tx)
        .await;

    assert!(started.elapsed() < Duration::from_secs(3));
    match result {
        Err(DeployerError::ExecutionError(message)) => {
            assert!(message.contains("timed out after 300ms"), "{}", message);
        }
        other => panic!("expected an execution error, got {:?}", other),
    }
}
