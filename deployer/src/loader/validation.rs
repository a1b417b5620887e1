//! Static checks run while templates are resolved

use crate::deploy::variables::{grouped_key_group, is_group_of, variable_names};
use crate::errors::ErrorDetail;
use crate::models::template::Template;

/// `if` references must name another parameter of the same template
pub fn check_conditions(template: &Template) -> Vec<ErrorDetail> {
    let mut errors = Vec::new();
    for parameter in &template.parameters {
        let Some(condition) = &parameter.condition else {
            continue;
        };
        if condition == &parameter.id {
            errors.push(
                ErrorDetail::new(format!(
                    "Parameter '{}' has a condition on itself",
                    parameter.id
                ))
                .in_template(template.name.clone()),
            );
        } else if !template.parameters.iter().any(|p| &p.id == condition) {
            errors.push(
                ErrorDetail::new(format!(
                    "Parameter '{}' depends on unknown parameter '{}'",
                    parameter.id, condition
                ))
                .in_template(template.name.clone()),
            );
        }
    }
    errors
}

/// Report every `{{var}}` in `text` that no known id covers.
///
/// `known` lists parameter ids and resolved ids; a group name is covered when
/// some known id is a `list.<group>.<key>` entry. A grouped key itself is
/// never substituted, so referencing one directly is reported too.
pub fn check_variable_coverage(
    text: &str,
    source: &str,
    template: &str,
    known: &[&str],
) -> Vec<ErrorDetail> {
    variable_names(text)
        .into_iter()
        .filter_map(|(name, line)| {
            let covered = known.contains(&name.as_str())
                || is_group_of(&name, known.iter().copied());
            let message = if let Some(group) = grouped_key_group(&name) {
                format!(
                    "Grouped variable '{}' in {} must be referenced as '{{{{ {} }}}}'",
                    name, source, group
                )
            } else if covered {
                return None;
            } else {
                format!("Undefined variable '{}' in {}", name, source)
            };
            Some(
                ErrorDetail::new(message)
                    .in_template(template.to_string())
                    .at_line(line),
            )
        })
        .collect()
}
