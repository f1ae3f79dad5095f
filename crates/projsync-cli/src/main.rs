//! projsync - watch and control projects on a remote control plane
//!
//! Connects to one endpoint, mirrors its projects and drives restart,
//! enable, disable and remove requests until the server confirms them.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use projsync_client::{
    ClientConfig, Connection, ConnectionConfig, ConnectionManager, LifecycleCommand, OperationKind,
};
use projsync_core::StartMode;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::output::{OutputContext, OutputFormat};

const CONNECTION_ID: &str = "default";

#[derive(Parser)]
#[command(name = "projsync")]
#[command(author, version, about = "Project control plane CLI")]
#[command(propagate_version = true)]
struct Cli {
    /// Server URL
    #[arg(short, long, env = "PROJSYNC_SERVER")]
    server: Option<String>,

    /// Bearer token
    #[arg(long, env = "PROJSYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "PROJSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Client settings file (YAML or TOML)
    #[arg(long)]
    client_config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Start modes accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Run,
    Debug,
    DebugNoInit,
}

impl From<ModeArg> for StartMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Run => StartMode::Run,
            ModeArg::Debug => StartMode::Debug,
            ModeArg::DebugNoInit => StartMode::DebugNoInit,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List all projects
    List,

    /// Follow project changes (SSE streaming)
    Watch {
        /// Only show this project
        project: Option<String>,

        /// Also print application and build log updates
        #[arg(long)]
        logs: bool,
    },

    /// Restart a project and wait until it is running again
    Restart {
        /// Project ID
        project: String,

        /// Start mode
        #[arg(long, value_enum, default_value = "run")]
        mode: ModeArg,
    },

    /// Open a closed project
    Enable {
        /// Project ID
        project: String,
    },

    /// Close a project
    Disable {
        /// Project ID
        project: String,
    },

    /// Delete a project from the server
    Remove {
        /// Project ID
        project: String,
    },

    /// Run the control plane installer: install, start, stop, remove, upgrade
    Installer {
        #[arg(value_name = "COMMAND")]
        command: LifecycleCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    // Merge CLI args with config
    let merged = config.merge_with_args(
        cli.server.as_deref(),
        cli.token.as_deref(),
        cli.client_config.as_deref(),
        cli.no_color,
    );

    let client_config = match &merged.client_config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load client config: {}", path.display()))?,
        None => ClientConfig::default(),
    };

    // Create output context
    let ctx = OutputContext::new(cli.output, merged.no_color, cli.quiet);
    let manager = ConnectionManager::from_config(&client_config);

    // Execute command
    match &cli.command {
        Commands::List => {
            let connection = connect(&manager, &merged.server, merged.token.as_deref()).await?;
            commands::list(&connection, &ctx)?;
        }
        Commands::Watch { project, logs } => {
            let connection = connect(&manager, &merged.server, merged.token.as_deref()).await?;
            commands::watch(&connection, project.as_deref(), *logs, &ctx).await?;
        }
        Commands::Restart { project, mode } => {
            let connection = connect(&manager, &merged.server, merged.token.as_deref()).await?;
            let kind = OperationKind::Restart((*mode).into());
            commands::control(&connection, project, kind, &ctx).await?;
        }
        Commands::Enable { project } => {
            let connection = connect(&manager, &merged.server, merged.token.as_deref()).await?;
            commands::control(&connection, project, OperationKind::Enable, &ctx).await?;
        }
        Commands::Disable { project } => {
            let connection = connect(&manager, &merged.server, merged.token.as_deref()).await?;
            commands::control(&connection, project, OperationKind::Disable, &ctx).await?;
        }
        Commands::Remove { project } => {
            let connection = connect(&manager, &merged.server, merged.token.as_deref()).await?;
            commands::control(&connection, project, OperationKind::Delete, &ctx).await?;
        }
        Commands::Installer { command } => {
            commands::installer(
                manager.lifecycle(),
                client_config.installer.as_ref(),
                *command,
                &ctx,
            )
            .await?;
        }
    }

    Ok(())
}

/// Connect to the server and wait for the first project listing
async fn connect(
    manager: &ConnectionManager,
    server: &str,
    token: Option<&str>,
) -> Result<Arc<Connection>> {
    let mut connection = ConnectionConfig::new(CONNECTION_ID, server);
    connection.token = token.map(String::from);
    manager
        .connect_http(&connection)
        .await
        .with_context(|| format!("Failed to connect to {}", server))
}
