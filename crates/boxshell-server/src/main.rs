//! boxshell-server: sandboxed remote terminals.
//!
//! Every WebSocket connection gets a fresh, resource-capped, network-less
//! container with an interactive shell on a real PTY. The container is
//! destroyed when the connection ends.

mod config;
mod container;
mod project;
mod pty;
mod server;
mod session;
#[cfg(test)]
mod testing;
mod transport;

use clap::Parser;
use config::{Overrides, ServerConfig};
use container::RuntimeKind;
use server::BoxshellServer;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// boxshell-server — sandboxed shells over WebSocket
#[derive(Parser, Debug)]
#[command(name = "boxshell-server", version, about = "Sandboxed remote terminal server")]
struct Cli {
    /// Listen port
    #[arg(short, long, env = "TERMINAL_SERVER_PORT")]
    port: Option<u16>,

    /// Bind address
    #[arg(long, env = "BOXSHELL_BIND")]
    bind: Option<IpAddr>,

    /// Maximum concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Container runtime (docker or podman)
    #[arg(long, env = "BOXSHELL_RUNTIME")]
    runtime: Option<RuntimeKind>,

    /// Container image for session sandboxes
    #[arg(long, env = "TERMINAL_IMAGE")]
    image: Option<String>,

    /// Memory limit per container, in MiB
    #[arg(long, env = "TERMINAL_MEMORY_MB")]
    memory_mb: Option<u64>,

    /// CPU limit per container (fractional cores)
    #[arg(long, env = "TERMINAL_CPUS")]
    cpus: Option<f64>,

    /// Config file path
    #[arg(long, default_value = "~/.boxshell/config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            bind: self.bind,
            port: self.port,
            max_sessions: self.max_sessions,
            runtime: self.runtime,
            image: self.image.clone(),
            memory_mb: self.memory_mb,
            cpus: self.cpus,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), &cli.overrides()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = server_config.port,
        runtime = %server_config.runtime,
        "starting boxshell-server"
    );

    let server = BoxshellServer::new(server_config);
    if let Err(e) = server.run(shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("boxshell-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
