//! Error types for the deployer

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    Configuration(ConfigurationError),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DeployerError {
    fn from(err: anyhow::Error) -> Self {
        DeployerError::Internal(err.to_string())
    }
}

impl From<ConfigurationError> for DeployerError {
    fn from(err: ConfigurationError) -> Self {
        DeployerError::Configuration(err)
    }
}

/// A single problem found while loading an application or template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,

    /// Template (or application) the problem was found in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// 1-based line in the offending source file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            template: None,
            line: None,
        }
    }

    pub fn in_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(template) = &self.template {
            write!(f, "{}: ", template)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

/// Aggregated load/validation error.
///
/// Every problem found during one resolution walk is collected here so that a
/// single broken template does not hide the errors of its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationError {
    pub message: String,

    /// Application hierarchy trail, most derived first
    #[serde(default)]
    pub application: Vec<String>,

    #[serde(default)]
    pub details: Vec<ErrorDetail>,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            application: Vec::new(),
            details: Vec::new(),
        }
    }

    pub fn with_details(message: impl Into<String>, details: Vec<ErrorDetail>) -> Self {
        Self {
            message: message.into(),
            application: Vec::new(),
            details,
        }
    }

    pub fn for_application(mut self, hierarchy: Vec<String>) -> Self {
        self.application = hierarchy;
        self
    }

    /// Whether any detail message contains `needle`
    pub fn mentions(&self, needle: &str) -> bool {
        self.message.contains(needle) || self.details.iter().any(|d| d.message.contains(needle))
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration error: {}", self.message)?;
        if !self.application.is_empty() {
            write!(f, " [{}]", self.application.join(" -> "))?;
        }
        for detail in &self.details {
            write!(f, "\n  - {}", detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigurationError {}

/// Converts a serde_json parse error into a line-annotated detail
pub fn json_detail(source: &str, err: &serde_json::Error) -> ErrorDetail {
    let detail = ErrorDetail::new(err.to_string()).in_template(source);
    if err.line() > 0 {
        detail.at_line(err.line())
    } else {
        detail
    }
}
