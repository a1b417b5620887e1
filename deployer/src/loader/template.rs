//! Template resolution: expands a task's templates into parameters and commands

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::deploy::executor::{CommandExecutor, ExecutionOptions};
use crate::deploy::transport::Transport;
use crate::errors::{ConfigurationError, DeployerError, ErrorDetail};
use crate::loader::application::ApplicationLoader;
use crate::loader::validation::{check_conditions, check_variable_coverage};
use crate::models::application::{Application, TaskType};
use crate::models::execution::{ValueMap, VeContext};
use crate::models::template::{
    Command, CommandBody, EnumValue, ExecuteOn, Library, Parameter, ParameterType, ResolvedParam,
    Template, TemplateCommand,
};
use crate::storage::repository::{template_display_name, Repository};

/// Result of resolving one task of an application
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTask {
    pub application: Application,
    pub task: TaskType,

    /// Deduplicated by id, first declaration wins
    pub parameters: Vec<Parameter>,

    pub commands: Vec<Command>,

    /// Which template supplies which id
    pub resolved_params: Vec<ResolvedParam>,

    /// Declared defaults of parameters and outputs
    pub defaults: ValueMap,

    /// Templates executed to compute enum choices
    pub enum_templates: Vec<String>,
}

impl ResolvedTask {
    pub fn unresolved_parameters(&self) -> Vec<Parameter> {
        get_unresolved_parameters(&self.parameters, &self.resolved_params)
    }
}

/// Parameters no other template supplies a value for
pub fn get_unresolved_parameters(
    parameters: &[Parameter],
    resolved: &[ResolvedParam],
) -> Vec<Parameter> {
    parameters
        .iter()
        .filter(|parameter| {
            !resolved
                .iter()
                .any(|r| r.id == parameter.id && Some(&r.template) != parameter.template.as_ref())
        })
        .cloned()
        .collect()
}

/// Host used to run enumeration templates during resolution
pub struct EnumExecution {
    pub ve: VeContext,
    pub transport: Arc<dyn Transport>,
    pub options: ExecutionOptions,
}

struct OutputOwner {
    template: String,
    conditional: bool,
}

/// Accumulated state of one resolution walk
struct Walk {
    hierarchy: Vec<String>,
    inputs: ValueMap,
    parameters: Vec<Parameter>,
    commands: Vec<Command>,
    resolved: Vec<ResolvedParam>,
    defaults: ValueMap,
    enum_templates: Vec<String>,
    output_owners: HashMap<String, OutputOwner>,
    errors: Vec<ErrorDetail>,
}

impl Walk {
    fn new(hierarchy: Vec<String>, inputs: ValueMap) -> Self {
        Self {
            hierarchy,
            inputs,
            parameters: Vec::new(),
            commands: Vec::new(),
            resolved: Vec::new(),
            defaults: ValueMap::new(),
            enum_templates: Vec::new(),
            output_owners: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Non-empty supplied value
    fn has_input(&self, id: &str) -> bool {
        match self.inputs.get(id) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        }
    }

    fn is_resolved(&self, id: &str) -> bool {
        self.resolved.iter().any(|r| r.id == id)
    }

    fn has_parameter(&self, id: &str) -> bool {
        self.parameters.iter().any(|p| p.id == id)
    }

    fn add_parameter(&mut self, mut parameter: Parameter, template: &str) {
        if self.has_parameter(&parameter.id) {
            debug!("Parameter {} already declared, keeping the first", parameter.id);
            return;
        }
        if let Some(default) = &parameter.default {
            self.defaults
                .entry(parameter.id.clone())
                .or_insert_with(|| default.clone());
        }
        parameter.template = Some(template.to_string());
        self.parameters.push(parameter);
    }

    fn known_ids(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .map(|p| p.id.as_str())
            .chain(self.resolved.iter().map(|r| r.id.as_str()))
            .collect()
    }
}

/// Why a conditional template is skipped, if it is
fn skip_reason(template: &Template, walk: &Walk) -> Option<String> {
    let missing = |id: &String| !walk.is_resolved(id) && !walk.has_input(id);

    let skip = &template.skip_if_all_missing;
    if !skip.is_empty() && skip.iter().all(missing) {
        return Some(format!(
            "Skipped: none of [{}] is set",
            template.skip_if_all_missing.join(", ")
        ));
    }

    if let Some(id) = &template.skip_if_property_set {
        if !missing(id) {
            return Some(format!("Skipped: '{}' is already set", id));
        }
    }
    None
}

fn skipped_command(template: &str, reason: String, execute_on: Option<ExecuteOn>) -> Command {
    Command {
        name: format!("{} (skipped)", template),
        description: Some(reason),
        body: CommandBody::Inline {
            text: "exit 0".to_string(),
        },
        library: None,
        execute_on: execute_on.unwrap_or(ExecuteOn::Ve),
        outputs: Vec::new(),
        template: template.to_string(),
    }
}

/// Resolves application tasks into flat command lists
pub struct TemplateProcessor {
    repository: Arc<dyn Repository>,
    enum_execution: Option<EnumExecution>,
}

impl TemplateProcessor {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            enum_execution: None,
        }
    }

    /// Run enumeration templates against this host; without it enum choices stay empty
    pub fn with_enum_execution(mut self, execution: EnumExecution) -> Self {
        self.enum_execution = Some(execution);
        self
    }

    /// Resolve `task` of `app_name`.
    ///
    /// Every load and validation problem is collected into one
    /// [`ConfigurationError`].
    pub async fn load_application(
        &self,
        app_name: &str,
        task: TaskType,
        inputs: &ValueMap,
    ) -> Result<ResolvedTask, DeployerError> {
        let application = ApplicationLoader::new(self.repository.clone())
            .load(app_name)
            .await?;

        let names = application.templates(task).to_vec();
        if names.is_empty() {
            return Err(ConfigurationError::new(format!(
                "Application '{}' defines no {} templates",
                application.id, task
            ))
            .for_application(application.hierarchy.clone())
            .into());
        }

        info!(
            "Resolving {} of {} ({} templates)",
            task,
            application.id,
            names.len()
        );

        let mut walk = Walk::new(application.hierarchy.clone(), inputs.clone());
        for name in names {
            self.process_template(&mut walk, name, None, HashSet::new())
                .await;
        }

        if !walk.errors.is_empty() {
            return Err(ConfigurationError::with_details(
                format!("Failed to resolve {} of '{}'", task, application.id),
                walk.errors,
            )
            .for_application(application.hierarchy.clone())
            .into());
        }

        debug!(
            "Resolved {} parameters and {} commands",
            walk.parameters.len(),
            walk.commands.len()
        );

        Ok(ResolvedTask {
            application,
            task,
            parameters: walk.parameters,
            commands: walk.commands,
            resolved_params: walk.resolved,
            defaults: walk.defaults,
            enum_templates: walk.enum_templates,
        })
    }

    async fn locate_template(&self, name: &str, hierarchy: &[String]) -> Option<PathBuf> {
        match self.repository.resolve_template_path(name, hierarchy, false).await {
            Some(path) => Some(path),
            None => self.repository.resolve_template_path(name, hierarchy, true).await,
        }
    }

    /// Expand one template into `walk`.
    ///
    /// `visited` holds the template paths of the current inclusion chain.
    fn process_template<'a>(
        &'a self,
        walk: &'a mut Walk,
        name: String,
        inherited: Option<ExecuteOn>,
        mut visited: HashSet<String>,
    ) -> BoxFuture<'a, ()> {
        async move {
            let template_name = template_display_name(&name);

            let Some(path) = self.locate_template(&name, &walk.hierarchy).await else {
                walk.errors.push(
                    ErrorDetail::new(format!("Template not found: {}", name))
                        .in_template(template_name),
                );
                return;
            };

            if !visited.insert(path.display().to_string()) {
                walk.errors.push(
                    ErrorDetail::new(format!("Template '{}' includes itself", template_name))
                        .in_template(template_name),
                );
                return;
            }

            let template = match self.repository.load_template(&path).await {
                Ok(Some(template)) => template,
                Ok(None) => {
                    walk.errors.push(
                        ErrorDetail::new(format!("Template not found: {}", name))
                            .in_template(template_name),
                    );
                    return;
                }
                Err(e) => {
                    if e.details.is_empty() {
                        walk.errors
                            .push(ErrorDetail::new(e.message).in_template(template_name));
                    } else {
                        walk.errors.extend(e.details);
                    }
                    return;
                }
            };

            let execute_on = template.execute_on.clone().or(inherited);

            if let Some(reason) = skip_reason(&template, walk) {
                debug!("{}: {}", template_name, reason);
                for parameter in &template.parameters {
                    walk.add_parameter(parameter.clone(), &template_name);
                }
                walk.commands
                    .push(skipped_command(&template_name, reason, execute_on));
                return;
            }

            self.register_outputs(walk, &template, &template_name);
            walk.errors.extend(check_conditions(&template));

            for parameter in &template.parameters {
                if walk.has_parameter(&parameter.id) {
                    continue;
                }
                let mut parameter = parameter.clone();
                if parameter.param_type == ParameterType::Enum {
                    if let Some(enum_template) = parameter.enum_values_template.clone() {
                        if let Some(values) = self
                            .resolve_enum(walk, &enum_template, &template_name, visited.clone())
                            .await
                        {
                            parameter.enum_values = Some(values);
                        }
                    }
                }
                walk.add_parameter(parameter, &template_name);
            }

            for (position, entry) in template.commands.iter().enumerate() {
                let target = entry.execute_on.clone().or_else(|| execute_on.clone());
                if let Some(nested) = &entry.template {
                    self.process_template(walk, nested.clone(), target, visited.clone())
                        .await;
                    continue;
                }
                if let Some(command) = self
                    .build_command(walk, &template_name, entry, position, target)
                    .await
                {
                    walk.commands.push(command);
                }
            }
        }
        .boxed()
    }

    /// Outputs count as resolved before the template's own parameters are added
    fn register_outputs(&self, walk: &mut Walk, template: &Template, template_name: &str) {
        let conditional =
            !template.skip_if_all_missing.is_empty() || template.skip_if_property_set.is_some();

        let mut declared: Vec<(String, Option<Value>)> = template
            .outputs
            .iter()
            .chain(template.commands.iter().flat_map(|c| c.outputs.iter()))
            .map(|output| (output.id.clone(), output.default.clone()))
            .collect();
        for entry in &template.commands {
            if let Some(properties) = &entry.properties {
                for property in properties.clone().into_vec() {
                    declared.push((property.id, None));
                }
            }
        }

        for (id, default) in declared {
            match walk.output_owners.get(&id) {
                Some(owner) => {
                    if owner.template != template_name && !owner.conditional && !conditional {
                        let message = format!(
                            "Output '{}' is already declared by template '{}'",
                            id, owner.template
                        );
                        walk.errors
                            .push(ErrorDetail::new(message).in_template(template_name));
                    }
                }
                None => {
                    walk.output_owners.insert(
                        id.clone(),
                        OutputOwner {
                            template: template_name.to_string(),
                            conditional,
                        },
                    );
                }
            }

            if let Some(default) = default {
                walk.defaults.entry(id.clone()).or_insert(default);
            }
            if !walk
                .resolved
                .iter()
                .any(|r| r.id == id && r.template == template_name)
            {
                walk.resolved.push(ResolvedParam {
                    id,
                    template: template_name.to_string(),
                });
            }
        }
    }

    async fn build_command(
        &self,
        walk: &mut Walk,
        template_name: &str,
        entry: &TemplateCommand,
        position: usize,
        target: Option<ExecuteOn>,
    ) -> Option<Command> {
        let name = entry
            .name
            .clone()
            .or_else(|| entry.script.clone())
            .unwrap_or_else(|| format!("{} #{}", template_name, position + 1));

        if entry.command.is_none() && entry.script.is_none() {
            if let Some(properties) = &entry.properties {
                return Some(Command {
                    name,
                    description: entry.description.clone(),
                    body: CommandBody::Properties {
                        properties: properties.clone().into_vec(),
                    },
                    library: None,
                    execute_on: target.unwrap_or(ExecuteOn::Ve),
                    outputs: entry.outputs.clone(),
                    template: template_name.to_string(),
                });
            }
        }

        let Some(target) = target else {
            walk.errors.push(
                ErrorDetail::new(format!("Command '{}' has no execute_on", name))
                    .in_template(template_name),
            );
            return None;
        };

        // Identity data of host targets is only known at dispatch time
        let check_coverage = !matches!(target, ExecuteOn::Host(_));

        let body = if let Some(script) = &entry.script {
            let Some(content) = self.repository.get_script(script, &walk.hierarchy).await else {
                walk.errors.push(
                    ErrorDetail::new(format!("Script not found: {}", script))
                        .in_template(template_name),
                );
                return None;
            };
            if check_coverage {
                let errors = check_variable_coverage(
                    &content,
                    &format!("script {}", script),
                    template_name,
                    &walk.known_ids(),
                );
                walk.errors.extend(errors);
            }
            CommandBody::Script {
                name: script.clone(),
                content,
            }
        } else if let Some(text) = &entry.command {
            if check_coverage {
                let errors = check_variable_coverage(
                    text,
                    &format!("command '{}'", name),
                    template_name,
                    &walk.known_ids(),
                );
                walk.errors.extend(errors);
            }
            CommandBody::Inline { text: text.clone() }
        } else {
            walk.errors.push(
                ErrorDetail::new(format!(
                    "Command '{}' has neither command, script, template nor properties",
                    name
                ))
                .in_template(template_name),
            );
            return None;
        };

        let library = match &entry.library {
            Some(library) => Some(Library {
                name: library.clone(),
                content: self.repository.get_script(library, &walk.hierarchy).await,
            }),
            None => None,
        };

        Some(Command {
            name,
            description: entry.description.clone(),
            body,
            library,
            execute_on: target,
            outputs: entry.outputs.clone(),
            template: template_name.to_string(),
        })
    }

    /// Resolve and run an enumeration template; failures land in `walk.errors`
    async fn resolve_enum(
        &self,
        walk: &mut Walk,
        enum_template: &str,
        owner: &str,
        visited: HashSet<String>,
    ) -> Option<Vec<EnumValue>> {
        if !walk.enum_templates.iter().any(|t| t == enum_template) {
            walk.enum_templates.push(enum_template.to_string());
        }

        let mut sub = Walk::new(walk.hierarchy.clone(), walk.inputs.clone());
        self.process_template(&mut sub, enum_template.to_string(), None, visited)
            .await;
        if !sub.errors.is_empty() {
            walk.errors.extend(sub.errors);
            return None;
        }

        let Some(execution) = &self.enum_execution else {
            debug!("No host for enumeration template {}, choices stay open", enum_template);
            return None;
        };

        let mut executor = CommandExecutor::new(
            sub.commands,
            execution.ve.clone(),
            execution.transport.clone(),
            sub.inputs,
            sub.defaults,
        )
        .with_options(execution.options.clone());

        let failure = match executor.run(None).await {
            Ok(None) => {
                let ctx = executor.context();
                let values = if ctx.raw_outputs.is_empty() {
                    ctx.outputs
                        .iter()
                        .map(|(name, value)| EnumValue::Named {
                            name: name.clone(),
                            value: value.clone(),
                        })
                        .collect()
                } else {
                    ctx.raw_outputs
                        .iter()
                        .map(|pair| EnumValue::Named {
                            name: pair.name.clone(),
                            value: pair.value.clone(),
                        })
                        .collect()
                };
                return Some(values);
            }
            Ok(Some(_)) => executor.error().unwrap_or("command failed").to_string(),
            Err(e) => e.to_string(),
        };

        walk.errors.push(
            ErrorDetail::new(format!(
                "Enumeration template '{}' failed: {}",
                enum_template, failure
            ))
            .in_template(owner),
        );
        None
    }
}
