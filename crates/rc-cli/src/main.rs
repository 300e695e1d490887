//! remocolab CLI
//!
//! Run from a notebook cell on a Colab VM:
//! - `sshd` provisions sshd and a tunnel and prints the ssh command
//! - `vnc` does the same plus a TurboVNC desktop
//! - `config` inspects or creates the configuration file

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remocolab::commands::{self, SetupArgs};
use remocolab::output::print_error;

#[derive(Parser)]
#[command(name = "remocolab")]
#[command(author, version, about = "Remote SSH and VNC access to Colab VMs")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up an SSH server reachable through a tunnel
    Sshd {
        #[command(flatten)]
        args: SetupArgs,

        /// Ask before continuing on a VM without a usable GPU
        #[arg(long)]
        check_gpu: bool,
    },

    /// Set up an SSH server plus a TurboVNC desktop (GPU accelerated if present)
    Vnc {
        #[command(flatten)]
        args: SetupArgs,

        /// Do not ask before continuing on a VM without a usable GPU
        #[arg(long)]
        no_check_gpu: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show the config file path
    Path,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Sshd { args, check_gpu } => {
            commands::setup_command(config_path, &args, check_gpu, false, cli.quiet).await
        }
        Commands::Vnc { args, no_check_gpu } => {
            commands::setup_command(config_path, &args, !no_check_gpu, true, cli.quiet).await
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(config_path).map(|_| true),
            ConfigAction::Path => commands::config_path(config_path).map(|_| true),
            ConfigAction::Init { force } => commands::config_init(config_path, force).map(|_| true),
        },
    };

    match result {
        Ok(true) => Ok(ExitCode::SUCCESS),
        Ok(false) => Ok(ExitCode::from(1)),
        Err(e) => {
            print_error(&format!("{:#}", e));
            Err(e)
        }
    }
}
