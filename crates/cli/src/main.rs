//! Marshal CLI: the main entry point.
//!
//! Commands:
//! - `init`      Write a default config file
//! - `chat`      Talk to the coordinator, interactively or one message at a time
//! - `sessions`  List stored sessions
//! - `show`      Print a session's history
//! - `delete`    Delete a session
//! - `ingest`    Add a document to the knowledge store

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "marshal",
    about = "Marshal — a coordinator agent that delegates to specialists",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Chat with the coordinator
    Chat {
        /// Continue an existing session instead of starting a new one
        #[arg(short, long)]
        session: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List stored sessions, most recent first
    Sessions,

    /// Print the history of a session
    Show {
        /// Session id
        id: String,
    },

    /// Delete a session and its history
    Delete {
        /// Session id
        id: String,
    },

    /// Add a text or markdown file to the knowledge store
    Ingest {
        /// File to ingest
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { force } => commands::init::run(force)?,
        Commands::Chat { session, message } => commands::chat::run(session, message).await?,
        Commands::Sessions => commands::sessions::list().await?,
        Commands::Show { id } => commands::sessions::show(&id).await?,
        Commands::Delete { id } => commands::sessions::delete(&id).await?,
        Commands::Ingest { file } => commands::ingest::run(&file).await?,
    }

    Ok(())
}
