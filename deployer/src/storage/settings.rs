//! Settings file management

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::deploy::executor::ExecutionOptions;
use crate::deploy::transport::SshOptions;
use crate::logs::LogLevel;

/// Deployer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Remote shell configuration
    #[serde(default)]
    pub ssh: SshSettings,

    /// Command timeouts
    #[serde(default)]
    pub timeouts: TimeoutSettings,

    /// Run commands on this machine instead of over ssh (test mode)
    #[serde(default)]
    pub local_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            ssh: SshSettings::default(),
            timeouts: TimeoutSettings::default(),
            local_mode: false,
        }
    }
}

impl Settings {
    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            program: self.ssh.program.clone(),
            user: self.ssh.user.clone(),
            identity_file: self.ssh.identity_file.clone(),
            connect_timeout: Duration::from_secs(self.ssh.connect_timeout_secs),
            max_retries: self.ssh.max_retries,
            retry_delay: Duration::from_secs(self.ssh.retry_delay_secs),
        }
    }

    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            command_timeout: Duration::from_secs(self.timeouts.command_secs),
            probe_timeout: Duration::from_secs(self.timeouts.probe_secs),
        }
    }
}

/// Remote shell settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    /// ssh client binary
    #[serde(default = "default_ssh_program")]
    pub program: String,

    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// Default port of management hosts
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default)]
    pub identity_file: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Attempts after a connection-level failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    3
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            program: default_ssh_program(),
            user: default_ssh_user(),
            port: default_ssh_port(),
            identity_file: None,
            connect_timeout_secs: default_connect_timeout(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

/// Timeout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Bound for regular commands and scripts
    #[serde(default = "default_command_timeout")]
    pub command_secs: u64,

    /// Bound for the container probe on the management host
    #[serde(default = "default_probe_timeout")]
    pub probe_secs: u64,
}

fn default_command_timeout() -> u64 {
    7200
}

fn default_probe_timeout() -> u64 {
    30
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            command_secs: default_command_timeout(),
            probe_secs: default_probe_timeout(),
        }
    }
}
