//! Output contract of command stdout

use serde_json::{Map, Value};

use crate::errors::DeployerError;
use crate::models::execution::NameValue;
use crate::models::template::TemplateOutput;

/// Values starting with this prefix name a file on the deployer host
pub const LOCAL_FILE_PREFIX: &str = "local:";

/// Outputs parsed from one command's stdout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutputs {
    /// `{id, value}` entries
    pub values: Vec<(String, Value)>,

    /// `{name, value}` entries, kept in emission order
    pub raw: Vec<NameValue>,
}

impl ParsedOutputs {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.raw.is_empty()
    }

    /// Ids (and raw names) this payload produced
    pub fn produced_ids(&self) -> Vec<&str> {
        self.values
            .iter()
            .map(|(id, _)| id.as_str())
            .chain(self.raw.iter().map(|pair| pair.name.as_str()))
            .collect()
    }
}

/// Parse marker-stripped stdout.
///
/// Accepted shapes: one `{id, value}` object, an array of `{id, value}`
/// objects, or an array of `{name, value}` pairs. Blank output yields no
/// outputs.
pub fn parse_output_payload(stdout: &str) -> Result<ParsedOutputs, DeployerError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(ParsedOutputs::default());
    }

    let payload: Value = serde_json::from_str(trimmed).map_err(|e| {
        DeployerError::ExecutionError(format!("Output is not valid JSON: {}", e))
    })?;

    let mut parsed = ParsedOutputs::default();
    match payload {
        Value::Object(entry) => add_entry(&mut parsed, entry)?,
        Value::Array(entries) => {
            for entry in entries {
                match entry {
                    Value::Object(entry) => add_entry(&mut parsed, entry)?,
                    other => {
                        return Err(DeployerError::ExecutionError(format!(
                            "Output entry is not an object: {}",
                            other
                        )))
                    }
                }
            }
        }
        other => {
            return Err(DeployerError::ExecutionError(format!(
                "Output must be an object or an array, got: {}",
                other
            )))
        }
    }

    Ok(parsed)
}

fn add_entry(
    parsed: &mut ParsedOutputs,
    mut entry: Map<String, Value>,
) -> Result<(), DeployerError> {
    let Some(value) = entry.remove("value") else {
        return Err(DeployerError::ExecutionError(format!(
            "Output entry without value: {}",
            Value::Object(entry)
        )));
    };

    match (entry.remove("id"), entry.remove("name")) {
        (Some(Value::String(id)), _) => parsed.values.push((id, value)),
        (None, Some(Value::String(name))) => parsed.raw.push(NameValue { name, value }),
        _ => {
            return Err(DeployerError::ExecutionError(
                "Output entry needs a string id or name".to_string(),
            ))
        }
    }
    Ok(())
}

/// Fails unless every non-defaulted expected output was produced
pub fn check_expected_outputs(
    command: &str,
    expected: &[TemplateOutput],
    parsed: &ParsedOutputs,
) -> Result<(), DeployerError> {
    let received = parsed.produced_ids();
    let missing: Vec<&str> = expected
        .iter()
        .filter(|output| output.default.is_none())
        .map(|output| output.id.as_str())
        .filter(|id| !received.contains(id))
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    let expected_ids: Vec<&str> = expected.iter().map(|o| o.id.as_str()).collect();
    Err(DeployerError::ExecutionError(format!(
        "Command '{}' is missing outputs [{}]; expected [{}], received [{}]",
        command,
        missing.join(", "),
        expected_ids.join(", "),
        received.join(", ")
    )))
}

/// Path of a `local:` value
pub fn local_file_path(value: &Value) -> Option<&str> {
    value.as_str()?.strip_prefix(LOCAL_FILE_PREFIX)
}
