//! `{{name}}` substitution over the live execution state

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::models::execution::{NameValue, ValueMap};

/// Substituted for names that no source defines
pub const NOT_DEFINED: &str = "NOT_DEFINED";

/// Prefix of grouped keys: `list.<group>.<key>`
const LIST_PREFIX: &str = "list.";

lazy_static! {
    static ref VARIABLE: Regex =
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("variable pattern is valid");
}

/// Mutable state of one execution.
///
/// Owned by the executor and only mutated from its sequential command loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    /// Values supplied by the caller
    pub inputs: ValueMap,

    /// Values produced by commands so far
    pub outputs: ValueMap,

    /// Declared defaults of parameters and outputs
    pub defaults: ValueMap,

    /// Order-preserving `{name, value}` pairs as emitted by commands
    pub raw_outputs: Vec<NameValue>,
}

impl ExecutionContext {
    pub fn new(inputs: ValueMap, defaults: ValueMap) -> Self {
        Self {
            inputs,
            outputs: ValueMap::new(),
            defaults,
            raw_outputs: Vec::new(),
        }
    }

    /// Live value of a name: outputs first, then inputs, then defaults
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        [&self.outputs, &self.inputs, &self.defaults]
            .into_iter()
            .find_map(|source| source.get(name).filter(|v| !v.is_null()))
    }
}

/// Renders a JSON value the way it appears in a script
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Every `{{name}}` in `text` with the 1-based line it appears on
pub fn variable_names(text: &str) -> Vec<(String, usize)> {
    text.lines()
        .enumerate()
        .flat_map(|(index, line)| {
            VARIABLE
                .captures_iter(line)
                .map(move |cap| (cap[1].to_string(), index + 1))
        })
        .collect()
}

/// Substitute variables from outputs, inputs and defaults, in that order
pub fn replace_vars(text: &str, ctx: &ExecutionContext) -> String {
    substitute(text, &[&ctx.outputs, &ctx.inputs, &ctx.defaults])
}

/// Like [`replace_vars`], but `context` takes precedence over every other source
pub fn replace_vars_with_context(text: &str, context: &ValueMap, ctx: &ExecutionContext) -> String {
    substitute(text, &[context, &ctx.outputs, &ctx.inputs, &ctx.defaults])
}

fn substitute(text: &str, sources: &[&ValueMap]) -> String {
    VARIABLE
        .replace_all(text, |cap: &Captures| {
            let name = &cap[1];
            // Grouped keys only appear inside their group's block
            if grouped_key_group(name).is_some() {
                return NOT_DEFINED.to_string();
            }
            group_block(name, sources)
                .or_else(|| lookup(name, sources))
                .unwrap_or_else(|| NOT_DEFINED.to_string())
        })
        .into_owned()
}

fn lookup(name: &str, sources: &[&ValueMap]) -> Option<String> {
    sources
        .iter()
        .find_map(|source| source.get(name).and_then(render_value))
}

/// `key=value` lines of all `list.<group>.<key>` entries, first source wins per key
fn group_block(group: &str, sources: &[&ValueMap]) -> Option<String> {
    let prefix = format!("{}{}.", LIST_PREFIX, group);
    let mut entries: Vec<(&str, String)> = Vec::new();

    for source in sources {
        for (name, value) in source.iter() {
            let Some(key) = name.strip_prefix(&prefix) else {
                continue;
            };
            if entries.iter().any(|(existing, _)| *existing == key) {
                continue;
            }
            if let Some(rendered) = render_value(value) {
                entries.push((key, rendered));
            }
        }
    }

    if entries.is_empty() {
        return None;
    }

    Some(
        entries
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// Group of a `list.<group>.<key>` name, `None` for ordinary names
pub fn grouped_key_group(name: &str) -> Option<&str> {
    let rest = name.strip_prefix(LIST_PREFIX)?;
    let (group, key) = rest.split_once('.')?;
    (!group.is_empty() && !key.is_empty()).then_some(group)
}

/// Whether an id names a group of `list.<group>.<key>` entries among `ids`
pub fn is_group_of<'a>(group: &str, mut ids: impl Iterator<Item = &'a str>) -> bool {
    let prefix = format!("{}{}.", LIST_PREFIX, group);
    ids.any(|id| id.starts_with(&prefix))
}
