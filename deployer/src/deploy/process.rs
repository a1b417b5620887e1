//! Child process execution with streamed output

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::errors::DeployerError;

/// Cumulative output of a running process
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputChunk {
    pub stdout: String,
    pub stderr: String,
}

/// Result of a finished process
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,

    /// -1 when the process was killed by a signal
    pub exit_code: i32,
}

#[derive(Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Captured {
    fn snapshot(&self) -> OutputChunk {
        OutputChunk {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        }
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Run `command`, feeding `stdin` and reporting cumulative output on `partial`
/// as it arrives. The process is killed when `timeout` expires.
pub async fn run_process(
    mut command: Command,
    stdin: &str,
    timeout: Duration,
    partial: &UnboundedSender<OutputChunk>,
) -> Result<ProcessOutput, DeployerError> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DeployerError::TransportError(format!("Failed to spawn process: {}", e)))?;

    if let Some(mut child_stdin) = child.stdin.take() {
        let payload = stdin.as_bytes().to_vec();
        tokio::spawn(async move {
            if let Err(e) = child_stdin.write_all(&payload).await {
                debug!("Process closed stdin early: {}", e);
            }
        });
    }

    let captured = Arc::new(Mutex::new(Captured::default()));
    let mut pumps = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        pumps.push(spawn_pump(stdout, Stream::Stdout, captured.clone(), partial.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(spawn_pump(stderr, Stream::Stderr, captured.clone(), partial.clone()));
    }

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status?,
        Err(_) => {
            warn!("Process exceeded timeout of {:?}, killing it", timeout);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill timed out process: {}", e);
            }
            return Err(DeployerError::ExecutionError(format!(
                "Command timed out after {:?}",
                timeout
            )));
        }
    };

    for pump in pumps {
        let _ = pump.await;
    }

    let output = captured.lock().unwrap_or_else(|e| e.into_inner()).snapshot();
    Ok(ProcessOutput {
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: status.code().unwrap_or(-1),
    })
}

fn spawn_pump<R>(
    mut reader: R,
    stream: Stream,
    captured: Arc<Mutex<Captured>>,
    partial: UnboundedSender<OutputChunk>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let snapshot = {
                        let mut captured = captured.lock().unwrap_or_else(|e| e.into_inner());
                        match stream {
                            Stream::Stdout => captured.stdout.extend_from_slice(&buf[..n]),
                            Stream::Stderr => captured.stderr.extend_from_slice(&buf[..n]),
                        }
                        captured.snapshot()
                    };
                    // The receiver may be gone (e.g. probes); output is still captured
                    let _ = partial.send(snapshot);
                }
                Err(e) => {
                    debug!("Output pump stopped: {}", e);
                    break;
                }
            }
        }
    })
}
