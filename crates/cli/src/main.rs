// tgraph - headless driver for the taxgraph reconciliation engine

mod exit_codes;
mod recon;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use taxgraph_recon::ReconError;

use exit_codes::{recon_exit_code, EXIT_SUCCESS};
use recon::{NetworkArgs, ReconcileArgs};

#[derive(Parser)]
#[command(name = "tgraph")]
#[command(about = "Multi-source tax filing reconciliation and network risk analysis")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match seller- and buyer-filed records and validate credit claims
    #[command(after_help = "\
Examples:
  tgraph reconcile engine.toml -e 29AABCB1234C1ZA -p 012025
  tgraph reconcile engine.toml --all -p 2025-01 --json
  tgraph reconcile engine.toml -e 29AABCB1234C1ZA -p 012025 --full --fail-on high")]
    Reconcile(ReconcileArgs),

    /// Detect circular trading and propagate risk over the transaction graph
    #[command(after_help = "\
Examples:
  tgraph network engine.toml -p 012025
  tgraph network engine.toml --from 2025-01-01 --to 2025-03-31 --output network.json")]
    Network(NetworkArgs),

    /// Check a config and its data files without running the engine
    #[command(after_help = "\
Examples:
  tgraph validate engine.toml")]
    Validate {
        /// Path to the engine TOML config
        config: PathBuf,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  taxgraph-recon ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
    )
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Reconcile(args) => recon::cmd_reconcile(args),
        Commands::Network(args) => recon::cmd_network(args),
        Commands::Validate { config } => recon::cmd_validate(config),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<ReconError> for CliError {
    fn from(err: ReconError) -> Self {
        let hint = match &err {
            ReconError::UnknownEntity(_) => {
                Some("check the entity id against the [data] entities file".to_string())
            }
            ReconError::InvalidPeriod(_) => Some("periods look like 012025 or 2025-01".to_string()),
            _ => None,
        };
        Self {
            code: recon_exit_code(&err),
            message: err.to_string(),
            hint,
        }
    }
}
