//! Command executor

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::deploy::fsm::{ExecutionFsm, ExecutionState, StepEvent};
use crate::deploy::host::{match_container, parse_probe_output, PROBE_SCRIPT};
use crate::deploy::output::{
    check_expected_outputs, local_file_path, parse_output_payload, ParsedOutputs,
};
use crate::deploy::process::{OutputChunk, ProcessOutput};
use crate::deploy::transport::{ShellInvocation, ShellTarget, Transport};
use crate::deploy::variables::{
    render_value, replace_vars, replace_vars_with_context, ExecutionContext, NOT_DEFINED,
};
use crate::errors::DeployerError;
use crate::models::execution::{
    from_pairs, parse_vm_id, to_pairs, ExecutionEvent, ExecutionMessage, RestartInfo, ValueMap,
    VeContext, VmIdentity,
};
use crate::models::template::{Command, CommandBody, ExecuteOn, Property};
use crate::storage::context::ContextStore;
use crate::storage::repository::Repository;

/// Interpreter used when a script has no shebang
pub const DEFAULT_INTERPRETER: &str = "sh";

/// Executor timeouts
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Upper bound for a single command
    pub command_timeout: Duration,

    /// Upper bound for the container listing probe
    pub probe_timeout: Duration,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(7200),
            probe_timeout: Duration::from_secs(30),
        }
    }
}

/// Interpreter named by a `#!` line, e.g. `#!/usr/bin/env python3` -> `["python3"]`
pub fn script_interpreter(content: &str) -> Option<Vec<String>> {
    let line = content.lines().next()?.strip_prefix("#!")?;
    let mut words: Vec<String> = line.split_whitespace().map(str::to_string).collect();
    if words.first().map(|w| w.ends_with("/env")).unwrap_or(false) {
        words.remove(0);
    }
    if words.is_empty() {
        None
    } else {
        Some(words)
    }
}

fn strip_shebang(content: &str) -> &str {
    if content.starts_with("#!") {
        content.split_once('\n').map(|(_, rest)| rest).unwrap_or("")
    } else {
        content
    }
}

/// Interpreter and full stdin payload of a shell command
pub fn prepare_script(command: &Command) -> Result<(Vec<String>, String), DeployerError> {
    let body = match &command.body {
        CommandBody::Inline { text } => text.as_str(),
        CommandBody::Script { content, .. } => content.as_str(),
        CommandBody::Properties { .. } => {
            return Err(DeployerError::Internal(format!(
                "Command '{}' has no script",
                command.name
            )))
        }
    };

    let mut interpreter = script_interpreter(body);
    let payload = match &command.library {
        Some(library) => {
            let content = library.content.as_deref().ok_or_else(|| {
                DeployerError::ExecutionError(format!(
                    "Library '{}' of command '{}' could not be loaded",
                    library.name, command.name
                ))
            })?;
            if interpreter.is_none() {
                interpreter = script_interpreter(content);
            }
            format!("{}\n{}", strip_shebang(content), body)
        }
        None => body.to_string(),
    };

    let interpreter = interpreter.unwrap_or_else(|| vec![DEFAULT_INTERPRETER.to_string()]);
    Ok((interpreter, payload))
}

/// Runs a resolved command list in order, streaming progress as [`ExecutionEvent`]s
pub struct CommandExecutor {
    commands: Vec<Command>,
    ve: VeContext,
    transport: Arc<dyn Transport>,
    contexts: Option<Arc<dyn ContextStore>>,
    repository: Option<Arc<dyn Repository>>,
    persist_identity: bool,
    options: ExecutionOptions,
    ctx: ExecutionContext,
    vm_id: Option<u32>,
    fsm: ExecutionFsm,
    events: Option<UnboundedSender<ExecutionEvent>>,
    next_index: u64,
}

impl CommandExecutor {
    pub fn new(
        commands: Vec<Command>,
        ve: VeContext,
        transport: Arc<dyn Transport>,
        inputs: ValueMap,
        defaults: ValueMap,
    ) -> Self {
        Self {
            commands,
            ve,
            transport,
            contexts: None,
            repository: None,
            persist_identity: false,
            options: ExecutionOptions::default(),
            ctx: ExecutionContext::new(inputs, defaults),
            vm_id: None,
            fsm: ExecutionFsm::new(),
            events: None,
            next_index: 0,
        }
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Store used to locate `host:` targets
    pub fn with_context_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.contexts = Some(store);
        self
    }

    /// Repository serving `local:` files in local mode
    pub fn with_repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Write the container identity to the context store on success
    pub fn persist_identity(mut self, persist: bool) -> Self {
        self.persist_identity = persist;
        self
    }

    /// Receive progress messages and the final identity
    pub fn subscribe(&mut self) -> UnboundedReceiver<ExecutionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn state(&self) -> &ExecutionState {
        self.fsm.state()
    }

    /// Error of the failed command, if any
    pub fn error(&self) -> Option<&str> {
        self.fsm.error()
    }

    /// Run every command after the checkpoint (or all of them).
    ///
    /// Returns `None` on success, or the checkpoint to resume from when a
    /// command failed.
    pub async fn run(
        &mut self,
        restart: Option<RestartInfo>,
    ) -> Result<Option<RestartInfo>, DeployerError> {
        if self.fsm.is_terminal() {
            self.transition(StepEvent::Reset)?;
        }

        let start = restart.as_ref().map(RestartInfo::resume_index).unwrap_or(0);
        if start > self.commands.len() {
            return Err(DeployerError::ValidationError(format!(
                "Checkpoint resumes at command {}, but only {} commands exist",
                start,
                self.commands.len()
            )));
        }

        if let Some(info) = &restart {
            self.transition(StepEvent::Resume)?;
            self.restore(info);
        }

        info!(
            "Executing {} commands on {} (starting at {})",
            self.commands.len(),
            self.ve.host,
            start
        );

        let mut last_successful = start as i64 - 1;
        for index in start..self.commands.len() {
            let command = self.commands[index].clone();
            self.transition(StepEvent::Dispatch)?;
            info!("[{}/{}] {}", index + 1, self.commands.len(), command.name);

            match self.execute_command(&command).await {
                Ok(()) => {
                    last_successful = index as i64;
                    self.transition(StepEvent::CommandDone)?;
                }
                Err(e) => {
                    error!("Command '{}' failed: {}", command.name, e);
                    self.transition(StepEvent::Fail(e.to_string()))?;
                    return Ok(Some(self.checkpoint(last_successful)));
                }
            }
        }

        self.transition(StepEvent::Finish)?;
        self.finish().await;
        Ok(None)
    }

    fn transition(&mut self, event: StepEvent) -> Result<(), DeployerError> {
        self.fsm.process(event).map_err(DeployerError::Internal)
    }

    fn restore(&mut self, info: &RestartInfo) {
        for (name, value) in from_pairs(&info.inputs) {
            self.ctx.inputs.insert(name, value);
        }
        for (name, value) in from_pairs(&info.defaults) {
            self.ctx.defaults.insert(name, value);
        }
        self.ctx.outputs = from_pairs(&info.outputs);
        self.vm_id = info.vm_id;
        debug!(
            "Restored checkpoint: {} inputs, {} outputs, vm_id {:?}",
            info.inputs.len(),
            info.outputs.len(),
            info.vm_id
        );
    }

    fn checkpoint(&self, last_successful: i64) -> RestartInfo {
        RestartInfo {
            vm_id: self.current_vm_id(),
            last_successful,
            inputs: to_pairs(&self.ctx.inputs),
            outputs: to_pairs(&self.ctx.outputs),
            defaults: to_pairs(&self.ctx.defaults),
        }
    }

    /// `vm_id` from inputs, then outputs, then the restored checkpoint
    fn current_vm_id(&self) -> Option<u32> {
        self.ctx
            .inputs
            .get("vm_id")
            .and_then(parse_vm_id)
            .or_else(|| self.ctx.outputs.get("vm_id").and_then(parse_vm_id))
            .or(self.vm_id)
    }

    fn next_message_index(&mut self) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                debug!("Execution event receiver dropped");
            }
        }
    }

    fn emit_message(
        &self,
        command: &Command,
        index: u64,
        commandtext: &str,
        output: &ProcessOutput,
        result: Option<String>,
        partial: bool,
    ) {
        self.emit(ExecutionEvent::Message(ExecutionMessage {
            command: command.name.clone(),
            commandtext: commandtext.to_string(),
            stderr: output.stderr.clone(),
            result,
            exit_code: output.exit_code,
            execute_on: Some(command.execute_on.clone()),
            index,
            partial,
        }));
    }

    fn emit_failure(
        &self,
        command: &Command,
        index: u64,
        commandtext: &str,
        output: &ProcessOutput,
        err: &DeployerError,
    ) {
        let output = ProcessOutput {
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            exit_code: if output.exit_code == 0 { -1 } else { output.exit_code },
        };
        self.emit_message(command, index, commandtext, &output, Some(err.to_string()), false);
    }

    async fn execute_command(&mut self, command: &Command) -> Result<(), DeployerError> {
        let index = self.next_message_index();

        if let CommandBody::Properties { properties } = &command.body {
            let applied = self.apply_properties(properties).await;
            let output = ProcessOutput {
                stdout: serde_json::to_string(&applied).unwrap_or_default(),
                ..Default::default()
            };
            self.emit_message(command, index, "", &output, Some(output.stdout.clone()), false);
            return Ok(());
        }

        let (commandtext, result) = self.dispatch(command, index).await;
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                self.emit_failure(command, index, &commandtext, &ProcessOutput::default(), &e);
                return Err(e);
            }
        };

        if output.exit_code != 0 {
            let err = DeployerError::ExecutionError(format!(
                "Command '{}' exited with code {}: {}",
                command.name,
                output.exit_code,
                output.stderr.trim()
            ));
            let result = Some(output.stdout.clone());
            self.emit_message(command, index, &commandtext, &output, result, false);
            return Err(err);
        }

        if let Err(e) = self.collect_outputs(command, &output.stdout).await {
            self.emit_failure(command, index, &commandtext, &output, &e);
            return Err(e);
        }

        let result = Some(output.stdout.clone());
        self.emit_message(command, index, &commandtext, &output, result, false);
        Ok(())
    }

    /// Substitute and send a shell command; returns the command text with the outcome
    async fn dispatch(
        &mut self,
        command: &Command,
        index: u64,
    ) -> (String, Result<ProcessOutput, DeployerError>) {
        let (interpreter, content) = match prepare_script(command) {
            Ok(prepared) => prepared,
            Err(e) => return (String::new(), Err(e)),
        };

        match &command.execute_on {
            ExecuteOn::Ve => {
                let text = replace_vars(&content, &self.ctx);
                let result = self
                    .invoke(command, index, ShellTarget::Host, interpreter, &text)
                    .await;
                (text, result)
            }
            ExecuteOn::Lxc => {
                let text = replace_vars(&content, &self.ctx);
                let Some(vm_id) = self.current_vm_id() else {
                    return (
                        text,
                        Err(DeployerError::ExecutionError(format!(
                            "Command '{}' runs in a container, but no vm_id is known",
                            command.name
                        ))),
                    );
                };
                let result = self
                    .invoke(command, index, ShellTarget::Container(vm_id), interpreter, &text)
                    .await;
                (text, result)
            }
            ExecuteOn::Host(hostname) => match self.locate_host(hostname).await {
                Ok((vm_id, identity)) => {
                    let text = replace_vars_with_context(&content, &identity.data, &self.ctx);
                    let result = self
                        .invoke(command, index, ShellTarget::Container(vm_id), interpreter, &text)
                        .await;
                    (text, result)
                }
                Err(e) => (content, Err(e)),
            },
        }
    }

    /// Run through the transport, forwarding output as partial messages
    async fn invoke(
        &mut self,
        command: &Command,
        index: u64,
        target: ShellTarget,
        interpreter: Vec<String>,
        text: &str,
    ) -> Result<ProcessOutput, DeployerError> {
        let invocation = ShellInvocation {
            ve: self.ve.clone(),
            target,
            interpreter,
            script: text.to_string(),
            timeout: self.options.command_timeout,
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<OutputChunk>();
        let transport = self.transport.clone();
        let run = transport.execute(&invocation, tx);
        tokio::pin!(run);

        loop {
            tokio::select! {
                result = &mut run => {
                    return result;
                }
                Some(chunk) = rx.recv() => {
                    self.transition(StepEvent::Output)?;
                    let output = ProcessOutput {
                        stdout: chunk.stdout,
                        stderr: chunk.stderr,
                        exit_code: -1,
                    };
                    let result = Some(output.stdout.clone());
                    self.emit_message(command, index, text, &output, result, true);
                }
            }
        }
    }

    /// Find the container of `hostname` and check it against its stored identity
    async fn locate_host(&self, hostname: &str) -> Result<(u32, VmIdentity), DeployerError> {
        let store = self.contexts.as_ref().ok_or_else(|| {
            DeployerError::Internal("Host targets need a context store".to_string())
        })?;
        let identity = store.vm_identity(hostname).await?;

        let invocation = ShellInvocation {
            ve: self.ve.clone(),
            target: ShellTarget::Host,
            interpreter: vec![DEFAULT_INTERPRETER.to_string()],
            script: PROBE_SCRIPT.to_string(),
            timeout: self.options.probe_timeout,
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let probe = self.transport.execute(&invocation, tx).await?;
        if probe.exit_code != 0 {
            return Err(DeployerError::ExecutionError(format!(
                "Listing containers on {} failed with code {}: {}",
                self.ve.host,
                probe.exit_code,
                probe.stderr.trim()
            )));
        }

        let containers = parse_probe_output(&probe.stdout)?;
        let container = match_container(hostname, &containers, identity.as_ref())?;
        debug!("Host '{}' is container {} on {}", hostname, container.vmid, container.node);

        Ok((container.vmid, identity.unwrap_or_default()))
    }

    async fn apply_properties(&mut self, properties: &[Property]) -> ValueMap {
        let mut applied = ValueMap::new();
        for property in properties {
            let value = match &property.value {
                Value::String(text) => {
                    let text = replace_vars(text, &self.ctx);
                    if text.contains(NOT_DEFINED) {
                        debug!("Skipping property '{}': undefined variables", property.id);
                        continue;
                    }
                    Value::String(text)
                }
                other => other.clone(),
            };
            let value = self.resolve_local_file(value).await;
            self.ctx.outputs.insert(property.id.clone(), value.clone());
            applied.insert(property.id.clone(), value);
        }
        applied
    }

    /// In local mode, `local:<path>` values become the base64 of that file
    async fn resolve_local_file(&self, value: Value) -> Value {
        if !self.transport.is_local() {
            return value;
        }
        let Some(repository) = &self.repository else {
            return value;
        };
        let Some(path) = local_file_path(&value).map(str::to_string) else {
            return value;
        };
        match repository.get_local_resource(&path).await {
            Some(bytes) => Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)),
            None => {
                warn!("Local file '{}' not found, keeping the value", path);
                value
            }
        }
    }

    async fn collect_outputs(
        &mut self,
        command: &Command,
        stdout: &str,
    ) -> Result<(), DeployerError> {
        let parsed = match parse_output_payload(stdout) {
            Ok(parsed) => parsed,
            Err(e) if command.outputs.is_empty() => {
                debug!("Ignoring non-JSON output of '{}': {}", command.name, e);
                ParsedOutputs::default()
            }
            Err(e) => return Err(e),
        };

        check_expected_outputs(&command.name, &command.outputs, &parsed)?;

        for (id, value) in parsed.values {
            let value = self.resolve_local_file(value).await;
            self.ctx.outputs.insert(id, value);
        }
        for pair in parsed.raw {
            self.ctx.outputs.insert(pair.name.clone(), pair.value.clone());
            self.ctx.raw_outputs.push(pair);
        }
        if let Some(vm_id) = self.ctx.outputs.get("vm_id").and_then(parse_vm_id) {
            self.vm_id = Some(vm_id);
        }
        Ok(())
    }

    async fn finish(&self) {
        let identity = VmIdentity {
            hostname: self.ctx.lookup("hostname").and_then(render_value),
            vm_id: self.current_vm_id(),
            node: self
                .ctx
                .lookup("node")
                .and_then(render_value)
                .or_else(|| Some(self.ve.host.clone())),
            data: self.ctx.outputs.clone(),
            installed_at: Some(Utc::now()),
        };
        info!(
            "Execution finished: {} commands, vm_id {:?}",
            self.fsm.commands_completed(),
            identity.vm_id
        );

        if self.persist_identity {
            match (&self.contexts, &identity.hostname) {
                (Some(store), Some(_)) => {
                    if let Err(e) = store.save_vm_identity(&identity).await {
                        error!("Failed to store container identity: {}", e);
                    }
                }
                _ => warn!("Container identity not stored: no store or hostname"),
            }
        }

        self.emit(ExecutionEvent::Finished(identity));
    }
}
