use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod commands;

use commands::{audit, gate, risk, Outcome};

#[derive(Parser)]
#[command(name = "tg")]
#[command(about = "Permission and risk-control gate", long_about = None)]
struct Cli {
    /// Session config paths in merge order (falls back to TG_CONFIG)
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> desk overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Risk ledger commands
    Risk {
        #[command(subcommand)]
        cmd: risk::RiskCmd,
    },

    /// Redeem permission tokens
    Gate {
        #[command(subcommand)]
        cmd: gate::GateCmd,
    },

    /// Execution audit trail utilities
    Audit {
        #[command(subcommand)]
        cmd: audit::AuditCmd,
    },
}

fn main() -> Result<ExitCode> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let outcome = match cli.cmd {
        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = tg_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
            Outcome::Done
        }
        Commands::Risk { cmd } => risk::run(&cli.config_paths, cmd)?,
        Commands::Gate { cmd } => gate::run(&cli.config_paths, cmd)?,
        Commands::Audit { cmd } => audit::run(&cli.config_paths, cmd)?,
    };

    Ok(match outcome {
        Outcome::Done => ExitCode::SUCCESS,
        Outcome::Refused => ExitCode::from(2),
    })
}

/// Logs go to stderr; stdout carries only command output.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
