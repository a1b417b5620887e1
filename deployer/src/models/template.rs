//! Template, parameter and command models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a command runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExecuteOn {
    /// The management host itself
    Ve,

    /// Inside the container identified by `vm_id`
    Lxc,

    /// Inside the container whose hostname is given, located by probing the host
    Host(String),
}

impl FromStr for ExecuteOn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ve" => Ok(ExecuteOn::Ve),
            "lxc" => Ok(ExecuteOn::Lxc),
            other => match other.strip_prefix("host:") {
                Some(hostname) if !hostname.trim().is_empty() => {
                    Ok(ExecuteOn::Host(hostname.trim().to_string()))
                }
                _ => Err(format!("Invalid execute_on: {}", s)),
            },
        }
    }
}

impl TryFrom<String> for ExecuteOn {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExecuteOn> for String {
    fn from(value: ExecuteOn) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ExecuteOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteOn::Ve => f.write_str("ve"),
            ExecuteOn::Lxc => f.write_str("lxc"),
            ExecuteOn::Host(hostname) => write!(f, "host:{}", hostname),
        }
    }
}

/// Parameter value type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    String,
    Number,
    Boolean,
    Enum,
}

/// One choice of an enum parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnumValue {
    Plain(String),
    Named { name: String, value: Value },
}

/// A user- or system-supplied value declared by a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "type", default)]
    pub param_type: ParameterType,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub secure: bool,

    #[serde(default)]
    pub advanced: bool,

    #[serde(default)]
    pub upload: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<EnumValue>>,

    /// Template whose execution produces the enum choices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values_template: Option<String>,

    /// Sibling parameter id this parameter depends on
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Template that declared this parameter
    #[serde(default, skip_deserializing)]
    pub template: Option<String>,
}

impl Parameter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            param_type: ParameterType::String,
            description: None,
            required: false,
            secure: false,
            advanced: false,
            upload: false,
            default: None,
            enum_values: None,
            enum_values_template: None,
            condition: None,
            template: None,
        }
    }
}

/// A declared output, optionally with a default value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "OutputDecl")]
pub struct TemplateOutput {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl TemplateOutput {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            default: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OutputDecl {
    Id(String),
    Full {
        id: String,
        #[serde(default)]
        default: Option<Value>,
    },
}

impl From<OutputDecl> for TemplateOutput {
    fn from(decl: OutputDecl) -> Self {
        match decl {
            OutputDecl::Id(id) => TemplateOutput { id, default: None },
            OutputDecl::Full { id, default } => TemplateOutput { id, default },
        }
    }
}

/// A direct `{id, value}` assignment into the output map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyList {
    One(Property),
    Many(Vec<Property>),
}

impl PropertyList {
    pub fn into_vec(self) -> Vec<Property> {
        match self {
            PropertyList::One(property) => vec![property],
            PropertyList::Many(properties) => properties,
        }
    }
}

/// A command entry as written in a template file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateCommand {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Inline shell text
    #[serde(default)]
    pub command: Option<String>,

    /// Script file name
    #[serde(default)]
    pub script: Option<String>,

    /// Nested template name
    #[serde(default)]
    pub template: Option<String>,

    /// Script library prepended to `script`
    #[serde(default)]
    pub library: Option<String>,

    #[serde(default)]
    pub execute_on: Option<ExecuteOn>,

    #[serde(default)]
    pub outputs: Vec<TemplateOutput>,

    #[serde(default)]
    pub properties: Option<PropertyList>,
}

/// A reusable unit of parameters and commands
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Template {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Default target for the template's commands
    #[serde(default)]
    pub execute_on: Option<ExecuteOn>,

    #[serde(default)]
    pub skip_if_all_missing: Vec<String>,

    #[serde(default)]
    pub skip_if_property_set: Option<String>,

    #[serde(default)]
    pub parameters: Vec<Parameter>,

    #[serde(default)]
    pub commands: Vec<TemplateCommand>,

    #[serde(default)]
    pub outputs: Vec<TemplateOutput>,
}

/// Executable content of a resolved command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CommandBody {
    Inline { text: String },
    Script { name: String, content: String },
    Properties { properties: Vec<Property> },
}

/// A script library to prepend to a script body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Library {
    pub name: String,
    pub content: Option<String>,
}

/// One executable step, frozen after resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub body: CommandBody,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<Library>,

    pub execute_on: ExecuteOn,

    /// Output ids this command must produce
    pub outputs: Vec<TemplateOutput>,

    /// Template the command came from
    pub template: String,
}

impl Command {
    pub fn inline(name: impl Into<String>, text: impl Into<String>, execute_on: ExecuteOn) -> Self {
        Self {
            name: name.into(),
            description: None,
            body: CommandBody::Inline { text: text.into() },
            library: None,
            execute_on,
            outputs: Vec::new(),
            template: String::new(),
        }
    }

    pub fn with_outputs(mut self, ids: &[&str]) -> Self {
        self.outputs = ids.iter().map(|id| TemplateOutput::new(*id)).collect();
        self
    }
}

/// Provenance: the id was satisfied by the named template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedParam {
    pub id: String,
    pub template: String,
}
