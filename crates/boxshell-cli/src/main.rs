//! boxshell — interactive client for sandboxed remote terminals.
//!
//! Opens a WebSocket session against a boxshell server and bridges it to the
//! local terminal in raw mode.

mod commands;
mod terminal;

use clap::{Parser, Subcommand};
use tracing::error;

/// boxshell — sandboxed shell client
#[derive(Parser)]
#[command(name = "boxshell", version, about = "Interactive client for boxshell sandboxed terminals")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open an interactive shell in a fresh sandbox
    Connect {
        /// Server WebSocket URL, e.g. ws://localhost:3002/ws
        url: String,

        /// Project whose directory becomes the shell's working directory
        #[arg(long)]
        project: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr and stay quiet unless asked; stdout belongs to the remote shell.
    let filter = if cli.verbose {
        "boxshell=debug,boxshell_cli=debug,boxshell_core=debug"
    } else {
        "boxshell=warn,boxshell_cli=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose)
        .init();

    let result = match cli.command {
        Command::Connect { url, project } => {
            commands::connect::run(&url, project.as_deref()).await
        }
    };

    if let Err(e) = result {
        error!("{e:#}");
        std::process::exit(1);
    }
}
