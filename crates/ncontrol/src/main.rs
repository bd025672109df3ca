mod cli;
mod error;

use std::io::Write;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ncontrol_config::FileConfig;
use ncontrol_core::{
    AgentConfig, CommunicatorRegistry, Controller, builtin_packages, select_packages,
};

use crate::cli::{Cli, Command, GlobalOpts, LogFormat};
use crate::error::AgentError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_format);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<(), AgentError> {
    let file = resolve_file_config(&cli.global)?;

    match cli.command {
        Command::Config => print_config(&file),
        Command::Communicators => {
            let registry = build_registry(file.communicator_packages.as_deref());
            let mut out = std::io::stdout().lock();
            for name in registry.names() {
                writeln!(out, "{name}").map_err(|e| AgentError::Internal(e.to_string()))?;
            }
            Ok(())
        }
        Command::Run => {
            let config = file.into_agent_config()?;
            run_agent(config).await
        }
    }
}

// ── Configuration ────────────────────────────────────────────────────

/// Load config files and environment, then apply command-line overrides.
fn resolve_file_config(global: &GlobalOpts) -> Result<FileConfig, AgentError> {
    let name = global.config_name.as_deref();
    let mut file = match &global.config_dir {
        Some(dir) => ncontrol_config::load_from(std::slice::from_ref(dir), name)?,
        None => ncontrol_config::load_config(name)?,
    };

    if let Some(ws_url) = &global.ws_url {
        file.ws_url.clone_from(ws_url);
    }
    if let Some(io_path) = &global.io_path {
        file.io_path.clone_from(io_path);
    }
    if let Some(endpoint_id) = &global.endpoint_id {
        file.endpoint_id.clone_from(endpoint_id);
    }
    if let Some(auth_id) = &global.auth_id {
        file.auth_id.clone_from(auth_id);
    }
    if global.stub {
        file.use_stub_communicator = true;
    }
    Ok(file)
}

fn print_config(file: &FileConfig) -> Result<(), AgentError> {
    // Validate first so `ncontrol config` doubles as a config check.
    file.clone().into_agent_config()?;

    let mut value =
        serde_json::to_value(file).map_err(|e| AgentError::Internal(e.to_string()))?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("authId".into(), "[REDACTED]".into());
    }
    let text =
        serde_json::to_string_pretty(&value).map_err(|e| AgentError::Internal(e.to_string()))?;
    println!("{text}");
    Ok(())
}

// ── Agent ────────────────────────────────────────────────────────────

fn build_registry(enabled: Option<&[String]>) -> CommunicatorRegistry {
    let packages = select_packages(builtin_packages(), enabled);
    CommunicatorRegistry::discover(&packages)
}

async fn run_agent(config: AgentConfig) -> Result<(), AgentError> {
    let registry = build_registry(config.communicator_packages.as_deref());
    info!(
        endpoint_id = %config.endpoint_id,
        server = %config.server_url,
        communicators = ?registry.names(),
        "starting agent"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            on_signal.cancel();
        }
    });

    Controller::new(config, registry).run(cancel).await?;
    info!("agent stopped");
    Ok(())
}

// ── Tracing ──────────────────────────────────────────────────────────

fn init_tracing(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
