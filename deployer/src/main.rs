//! OCI LXC Deployer - Entry Point
//!
//! Resolves one task of an application and runs it against a Proxmox VE host.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use colored::Colorize;
use serde_json::Value;
use tracing::{error, info, warn};

use oci_lxc_deployer::deploy::executor::CommandExecutor;
use oci_lxc_deployer::deploy::transport::{LocalTransport, SshTransport, Transport};
use oci_lxc_deployer::errors::DeployerError;
use oci_lxc_deployer::filesys::file::File;
use oci_lxc_deployer::loader::template::{EnumExecution, TemplateProcessor};
use oci_lxc_deployer::logs::{init_logging, LogOptions};
use oci_lxc_deployer::models::application::TaskType;
use oci_lxc_deployer::models::execution::{ExecutionEvent, RestartInfo, ValueMap, VeContext};
use oci_lxc_deployer::storage::context::FileContextStore;
use oci_lxc_deployer::storage::layout::StorageLayout;
use oci_lxc_deployer::storage::repository::FileRepository;
use oci_lxc_deployer::storage::settings::Settings;
use oci_lxc_deployer::utils::version_info;

const USAGE: &str = "Usage: oci-lxc-deployer --app=<name> --task=<task> --ve-host=<host> \
[--ve-port=<port>] [--inputs=<json>|@<file>] [--restart=<file>] [--base-dir=<dir>]";

const DOCUMENT_CACHE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("{}", e),
        }
        return;
    }

    if cli_args.contains_key("help") {
        println!("{}", USAGE);
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file, defaults when absent
    let settings_file = layout.settings_file();
    let settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file: {}", e);
                std::process::exit(2);
            }
        }
    } else {
        Settings::default()
    };

    let setup = layout.setup().await;

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: setup.as_ref().ok().map(|_| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };
    if let Err(e) = setup {
        warn!("Unable to prepare {}: {}", layout.base_dir.display(), e);
    }

    let code = match run_cli(&cli_args, layout, settings).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(DeployerError::ValidationError(message)) => {
            eprintln!("{}\n{}", message.red(), USAGE);
            2
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e.to_string().red());
            1
        }
    };

    drop(_guard);
    std::process::exit(code);
}

fn required<'a>(
    cli_args: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a str, DeployerError> {
    cli_args
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| DeployerError::ValidationError(format!("Missing --{}", key)))
}

async fn read_inputs(arg: Option<&String>) -> Result<ValueMap, DeployerError> {
    let Some(arg) = arg else {
        return Ok(ValueMap::new());
    };
    let text = match arg.strip_prefix('@') {
        Some(path) => File::new(path).read_string().await?,
        None => arg.clone(),
    };
    match serde_json::from_str::<Value>(&text)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(DeployerError::ValidationError(
            "--inputs must be a JSON object".to_string(),
        )),
    }
}

/// Resolve, run and checkpoint; `Ok(false)` when a command failed
async fn run_cli(
    cli_args: &HashMap<String, String>,
    layout: StorageLayout,
    settings: Settings,
) -> Result<bool, DeployerError> {
    let app = required(cli_args, "app")?.to_string();
    let task: TaskType = required(cli_args, "task")?
        .parse()
        .map_err(DeployerError::ValidationError)?;
    let host = required(cli_args, "ve-host")?;
    let port = match cli_args.get("ve-port") {
        Some(port) => port
            .parse()
            .map_err(|_| DeployerError::ValidationError(format!("Invalid --ve-port: {}", port)))?,
        None => settings.ssh.port,
    };
    let ve = VeContext::new(host, port);
    let inputs = read_inputs(cli_args.get("inputs")).await?;

    let restart_file = match cli_args.get("restart") {
        Some(path) => File::new(path),
        None => layout
            .restart_dir()
            .file(&format!("{}-{}.json", app.replace(':', "_"), task)),
    };
    let restart = if cli_args.contains_key("restart") {
        Some(RestartInfo::load(&restart_file).await?)
    } else {
        None
    };

    let repository = Arc::new(FileRepository::new(layout.clone(), DOCUMENT_CACHE_CAPACITY));
    let transport: Arc<dyn Transport> = if settings.local_mode {
        info!("Local mode: commands run on this machine");
        Arc::new(LocalTransport)
    } else {
        Arc::new(SshTransport::new(settings.ssh_options()))
    };

    let processor = TemplateProcessor::new(repository.clone()).with_enum_execution(EnumExecution {
        ve: ve.clone(),
        transport: transport.clone(),
        options: settings.execution_options(),
    });
    let resolved = processor.load_application(&app, task, &inputs).await?;

    let missing: Vec<_> = resolved
        .unresolved_parameters()
        .into_iter()
        .filter(|p| p.required && p.default.is_none() && !inputs.contains_key(&p.id))
        .collect();
    if !missing.is_empty() {
        eprintln!("{}", "Missing required parameters:".yellow());
        for parameter in &missing {
            eprintln!(
                "  {} {}",
                parameter.id.bold(),
                parameter.description.as_deref().unwrap_or("")
            );
        }
        return Err(DeployerError::ValidationError(format!(
            "{} required parameters have no value",
            missing.len()
        )));
    }

    println!(
        "{} {} of {}: {} commands",
        "Running".bold(),
        task,
        resolved.application.name,
        resolved.commands.len()
    );

    let contexts = Arc::new(FileContextStore::new(layout.contexts_file()));
    let mut executor = CommandExecutor::new(
        resolved.commands,
        ve,
        transport,
        inputs,
        resolved.defaults,
    )
    .with_options(settings.execution_options())
    .with_context_store(contexts)
    .with_repository(repository)
    .persist_identity(task == TaskType::Installation);

    let mut events = executor.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ExecutionEvent::Message(message) if message.partial => {}
                ExecutionEvent::Message(message) => {
                    let status = if message.exit_code == 0 {
                        "ok".green()
                    } else {
                        format!("failed ({})", message.exit_code).red()
                    };
                    println!("[{}] {} {}", message.index + 1, message.command, status);
                    if message.exit_code != 0 {
                        if let Some(result) = &message.result {
                            eprintln!("{}", result.trim_end());
                        }
                        if !message.stderr.is_empty() {
                            eprintln!("{}", message.stderr.trim_end().dimmed());
                        }
                    }
                }
                ExecutionEvent::Finished(identity) => {
                    println!(
                        "{} vm_id {:?} ({})",
                        "Finished:".green().bold(),
                        identity.vm_id,
                        identity.hostname.as_deref().unwrap_or("-")
                    );
                }
            }
        }
    });

    let outcome = executor.run(restart).await;
    drop(executor);
    let _ = printer.await;

    match outcome? {
        None => {
            if cli_args.contains_key("restart") {
                restart_file.delete().await?;
            }
            Ok(true)
        }
        Some(checkpoint) => {
            checkpoint.save(&restart_file).await?;
            eprintln!(
                "Checkpoint written to {}; resume with --restart={}",
                restart_file.path().display(),
                restart_file.path().display()
            );
            Ok(false)
        }
    }
}
