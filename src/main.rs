use anyhow::Result;
use clap::{Parser, Subcommand};
use pploy::config::HumanDuration;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "pploy")]
#[command(version, about = "Deployment dashboard with per-project deploy locks")]
pub struct Cli {
    /// Work directory holding `projects/`, `logs/` and `pploy.toml`
    #[arg(long, global = true, env = "PPLOY_WORKDIR", default_value = ".")]
    pub workdir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the dashboard HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// URL path prefix, e.g. /pploy/
        #[arg(long)]
        prefix: Option<String>,

        /// Lock duration (e.g. 10m, 90s, 1h)
        #[arg(long)]
        lock: Option<HumanDuration>,

        /// Number of rotated deploy logs to keep per project
        #[arg(long)]
        log_max: Option<usize>,

        /// Emit logs as JSON
        #[arg(long)]
        log_json: bool,

        /// Enable dev mode (CORS permissive for a separately served UI)
        #[arg(long)]
        dev: bool,
    },
    /// View, validate or create pploy.toml
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// List checked-out projects
    Projects {
        /// Delete a project's checkout and all of its deploy logs
        #[arg(long, value_name = "NAME")]
        remove: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration
    Validate,
    /// Write a default pploy.toml into the work directory
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve {
            port,
            prefix,
            lock,
            log_max,
            log_json,
            dev,
        } => {
            let overrides = cmd::ServeOverrides {
                port: *port,
                prefix: prefix.clone(),
                lock: *lock,
                log_max: *log_max,
                log_json: *log_json,
                dev: *dev,
            };
            cmd::cmd_serve(&cli.workdir, overrides).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&cli.workdir, command.clone())?,
        Commands::Projects { remove } => cmd::cmd_projects(&cli.workdir, remove.as_deref())?,
    }

    Ok(())
}
