//! Terminal interface for the GuideBot GMP/SOP document assistant.
//!
//! Wires the core pipeline (retrieval, prompt assembly, completion) to a
//! filesystem blob store and exposes it as subcommands.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// GuideBot: retrieval-augmented Q&A over internal GMP/SOP documents
#[derive(Parser, Debug)]
#[command(name = "guidebot", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (looks for .guidebot/config.toml here)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Ask a question over the stored documents
    Ask {
        /// The question to answer
        question: String,
        /// File to attach to this question (document or image)
        #[arg(short, long)]
        attach: Option<PathBuf>,
        /// User id the conversation is recorded under
        #[arg(short, long, default_value = "cli")]
        user: String,
    },
    /// Learn a document or image into the reference store
    Ingest {
        /// Path to the file to ingest
        path: PathBuf,
        /// User id recorded in the upload log
        #[arg(short, long, default_value = "cli")]
        uploader: String,
    },
    /// Browse archived conversations
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Show token usage totals
    Usage,
    /// Show configuration, store, and user status
    Status,
}

#[derive(clap::Subcommand, Debug)]
enum HistoryAction {
    /// List conversations, most recently updated first
    List {
        /// User whose history to list
        #[arg(short, long, default_value = "cli")]
        user: String,
    },
    /// Show the messages of one conversation
    Show {
        /// Conversation id
        id: String,
        /// User whose history to search
        #[arg(short, long, default_value = "cli")]
        user: String,
    },
    /// Delete one conversation
    Delete {
        /// Conversation id
        id: String,
        /// User whose history to delete from
        #[arg(short, long, default_value = "cli")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    tracing_subscriber::registry().with(stderr_layer).init();

    // Resolve workspace
    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace).await
}
