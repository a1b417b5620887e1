//! Shell transports: ssh to the management host, or the local machine in test mode

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, warn};

use crate::deploy::process::{run_process, OutputChunk, ProcessOutput};
use crate::errors::DeployerError;
use crate::models::execution::VeContext;
use crate::utils::{generate_marker, shell_quote};

/// Exit status ssh reports for connection-level failures
pub const SSH_CONNECTION_FAILED: i32 = 255;

/// Where on the management host a script runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellTarget {
    Host,
    Container(u32),
}

/// A script to run through a transport
#[derive(Debug, Clone)]
pub struct ShellInvocation {
    pub ve: VeContext,
    pub target: ShellTarget,

    /// Program reading the script from stdin, e.g. `["sh"]` or `["python3"]`
    pub interpreter: Vec<String>,

    pub script: String,
    pub timeout: Duration,
}

/// Runs shell invocations somewhere
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run the invocation, reporting cumulative output on `partial`.
    ///
    /// A non-zero exit of the script is a successful transport call; only
    /// failures to reach or run the script are errors.
    async fn execute(
        &self,
        invocation: &ShellInvocation,
        partial: UnboundedSender<OutputChunk>,
    ) -> Result<ProcessOutput, DeployerError>;

    /// Whether commands run on the deployer machine itself
    fn is_local(&self) -> bool;
}

/// Shell line that echoes `marker` and then runs the interpreter on the target
pub fn remote_command(marker: &str, invocation: &ShellInvocation) -> String {
    let interpreter = invocation
        .interpreter
        .iter()
        .map(|word| shell_quote(word))
        .collect::<Vec<_>>()
        .join(" ");

    match invocation.target {
        ShellTarget::Host => format!("echo {}; exec {}", marker, interpreter),
        ShellTarget::Container(vmid) => {
            format!("echo {}; exec lxc-attach -n {} -- {}", marker, vmid, interpreter)
        }
    }
}

/// Drops everything up to and including the marker line (login banners, MOTD).
///
/// Output without the marker is returned unchanged.
pub fn strip_banner(stdout: &str, marker: &str) -> String {
    match stdout.find(marker) {
        Some(pos) => {
            let rest = &stdout[pos + marker.len()..];
            rest.strip_prefix("\r\n")
                .or_else(|| rest.strip_prefix('\n'))
                .unwrap_or(rest)
                .to_string()
        }
        None => stdout.to_string(),
    }
}

/// Turns cumulative output snapshots into banner-free partial chunks.
///
/// Nothing passes before the marker line; empty and repeated chunks are dropped.
#[derive(Debug)]
pub struct BannerFilter {
    marker: String,
    last: OutputChunk,
}

impl BannerFilter {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            last: OutputChunk::default(),
        }
    }

    pub fn filter(&mut self, chunk: OutputChunk) -> Option<OutputChunk> {
        if !chunk.stdout.contains(&self.marker) {
            return None;
        }
        let chunk = OutputChunk {
            stdout: strip_banner(&chunk.stdout, &self.marker),
            stderr: chunk.stderr,
        };
        if (chunk.stdout.is_empty() && chunk.stderr.is_empty()) || chunk == self.last {
            return None;
        }
        self.last = chunk.clone();
        Some(chunk)
    }
}

/// Forwards partial output through a [`BannerFilter`]
fn banner_filter(
    marker: String,
    target: UnboundedSender<OutputChunk>,
) -> UnboundedSender<OutputChunk> {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputChunk>();
    tokio::spawn(async move {
        let mut filter = BannerFilter::new(marker);
        while let Some(chunk) = rx.recv().await {
            let Some(chunk) = filter.filter(chunk) else {
                continue;
            };
            if target.send(chunk).is_err() {
                break;
            }
        }
    });
    tx
}

/// Remote shell options
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Client binary, `ssh` unless configured otherwise
    pub program: String,
    pub user: String,
    pub identity_file: Option<String>,
    pub connect_timeout: Duration,

    /// Attempts made when ssh reports a connection failure
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            user: "root".to_string(),
            identity_file: None,
            connect_timeout: Duration::from_secs(10),
            max_retries: 5,
            retry_delay: Duration::from_secs(3),
        }
    }
}

/// Transport running scripts over ssh
pub struct SshTransport {
    options: SshOptions,
}

impl SshTransport {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Non-interactive, key-only ssh arguments without a pseudo-tty
    pub fn ssh_args(&self, ve: &VeContext) -> Vec<String> {
        let mut args = vec![
            "-T".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "PasswordAuthentication=no".to_string(),
            "-o".to_string(),
            "KbdInteractiveAuthentication=no".to_string(),
            "-o".to_string(),
            "PreferredAuthentications=publickey".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=30".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs()),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-p".to_string(),
            ve.port.to_string(),
        ];
        if let Some(key) = &self.options.identity_file {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args.push(format!("{}@{}", self.options.user, ve.host));
        args
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn execute(
        &self,
        invocation: &ShellInvocation,
        partial: UnboundedSender<OutputChunk>,
    ) -> Result<ProcessOutput, DeployerError> {
        let attempts = self.options.max_retries.max(1);
        let mut last_stderr = String::new();

        for attempt in 1..=attempts {
            let marker = generate_marker();
            let mut command = Command::new(&self.options.program);
            command
                .args(self.ssh_args(&invocation.ve))
                .arg(remote_command(&marker, invocation));

            debug!(
                "ssh {}:{} ({:?}), attempt {}/{}",
                invocation.ve.host, invocation.ve.port, invocation.target, attempt, attempts
            );

            let sink = banner_filter(marker.clone(), partial.clone());
            let mut output =
                run_process(command, &invocation.script, invocation.timeout, &sink).await?;

            if output.exit_code != SSH_CONNECTION_FAILED {
                output.stdout = strip_banner(&output.stdout, &marker);
                return Ok(output);
            }

            last_stderr = output.stderr;
            if attempt < attempts {
                warn!(
                    "Connection to {}:{} failed, retrying in {:?}: {}",
                    invocation.ve.host,
                    invocation.ve.port,
                    self.options.retry_delay,
                    last_stderr.trim()
                );
                tokio::time::sleep(self.options.retry_delay).await;
            }
        }

        Err(DeployerError::TransportError(format!(
            "Connection to {}:{} failed after {} attempts: {}",
            invocation.ve.host,
            invocation.ve.port,
            attempts,
            last_stderr.trim()
        )))
    }

    fn is_local(&self) -> bool {
        false
    }
}

/// Transport running scripts on this machine; used for tests and development.
///
/// Container targets run locally as well. Never retries.
#[derive(Debug, Default)]
pub struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    async fn execute(
        &self,
        invocation: &ShellInvocation,
        partial: UnboundedSender<OutputChunk>,
    ) -> Result<ProcessOutput, DeployerError> {
        let marker = generate_marker();
        let local = ShellInvocation {
            target: ShellTarget::Host,
            ..invocation.clone()
        };
        if let ShellTarget::Container(vmid) = invocation.target {
            debug!("Local mode: running container {} command on this machine", vmid);
        }

        let mut command = Command::new("sh");
        command.arg("-c").arg(remote_command(&marker, &local));

        let sink = banner_filter(marker.clone(), partial);
        let mut output = run_process(command, &invocation.script, invocation.timeout, &sink).await?;
        output.stdout = strip_banner(&output.stdout, &marker);
        Ok(output)
    }

    fn is_local(&self) -> bool {
        true
    }
}
