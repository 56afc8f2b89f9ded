mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use memvault::config::VaultConfig;

#[derive(Parser)]
#[command(name = "memvault", version, about = "Local memory vault and run tracker for a desktop assistant")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create, migrate, or load the vault and report the resulting state
    Init,
    /// Print a vault health report
    Doctor,
    /// Undo a completed migration: restore legacy files and delete the vault
    Rollback {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Read and write facts about the local user
    Fact {
        #[command(subcommand)]
        action: FactAction,
    },
    /// Send a request to the executor and follow the run to completion
    Run {
        /// What to ask the assistant
        message: String,
    },
    /// Re-attach to runs still active on the executor
    Resume,
}

#[derive(Subcommand)]
enum FactAction {
    /// Show one fact
    Get { category: String, predicate: String },
    /// Store a fact, replacing any previous value for the same category and predicate
    Set {
        category: String,
        predicate: String,
        object: String,
        #[arg(long, default_value_t = 1.0)]
        confidence: f64,
        /// PII sensitivity, 0 (none) to 3 (highly sensitive)
        #[arg(long, default_value_t = 0)]
        pii_level: u8,
    },
    /// List facts, optionally for one category
    List {
        #[arg(long)]
        category: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = VaultConfig::load()?;

    // Log to stderr so command output on stdout stays clean.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Init => cli::init(config).await?,
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::Rollback { yes } => cli::rollback::rollback(&config, yes)?,
        Command::Fact { action } => match action {
            FactAction::Get { category, predicate } => {
                cli::facts::get(config, &category, &predicate).await?
            }
            FactAction::Set {
                category,
                predicate,
                object,
                confidence,
                pii_level,
            } => {
                cli::facts::set(config, &category, &predicate, &object, confidence, pii_level)
                    .await?
            }
            FactAction::List { category } => cli::facts::list(config, category.as_deref()).await?,
        },
        Command::Run { message } => cli::run::run(config, &message).await?,
        Command::Resume => cli::run::resume(config).await?,
    }

    Ok(())
}
