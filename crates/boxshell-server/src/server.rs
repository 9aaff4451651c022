//! Core server: HTTP routes, shared state, and shutdown cleanup.
//!
//! Owns the container manager, PTY bridge, and session registry, and wires
//! them into the axum router. Everything per-connection lives in
//! [`SessionController`](crate::session::SessionController).

use crate::config::ServerConfig;
use crate::container::{CliRuntime, ContainerManager, ContainerRuntime};
use crate::project::{ProjectResolver, WorkspaceResolver};
use crate::pty::{ExecPtyBridge, PtyBridge};
use crate::session::{spawn_registry, SessionDeps};
use crate::transport::ws_handler;
use axum::routing::get;
use axum::{Json, Router};
use boxshell_core::{BoxshellError, BoxshellResult};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Service name reported by the health endpoint.
pub const SERVICE_NAME: &str = "terminal-ws";

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionDeps>,
    pub projects: Arc<dyn ProjectResolver>,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /health`, plus `GET /` and `GET /ws` for terminal sessions.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// The boxshell server instance.
pub struct BoxshellServer {
    config: ServerConfig,
    state: AppState,
}

impl BoxshellServer {
    /// Build a server backed by the configured container runtime CLI.
    pub fn new(config: ServerConfig) -> Self {
        let cli = match config.runtime_binary {
            Some(ref binary) => CliRuntime::with_binary(binary.clone()),
            None => CliRuntime::new(config.runtime),
        };
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(cli);
        let bridge = Arc::new(ExecPtyBridge::new(runtime.clone(), config.shell.clone()));
        Self::with_backends(config, runtime, bridge)
    }

    /// Build a server over explicit runtime and PTY backends.
    pub fn with_backends(
        config: ServerConfig,
        runtime: Arc<dyn ContainerRuntime>,
        bridge: Arc<dyn PtyBridge>,
    ) -> Self {
        let containers = Arc::new(ContainerManager::new(
            runtime,
            config.image.clone(),
            config.limits,
            config.timeouts.provision,
            config.timeouts.cleanup,
        ));
        let sessions = Arc::new(SessionDeps {
            containers,
            bridge,
            registry: spawn_registry(),
            max_sessions: config.max_sessions,
            attach_timeout: config.timeouts.attach,
        });
        let projects = Arc::new(WorkspaceResolver::new(config.workspace_root.clone()));

        Self {
            config,
            state: AppState { sessions, projects },
        }
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) -> BoxshellResult<()> {
        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BoxshellError::Transport(format!("bind {addr} failed: {e}")))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves, then
    /// kill every container still recorded in the registry.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send,
    ) -> BoxshellResult<()> {
        let addr = listener.local_addr()?;
        info!(
            addr = %addr,
            runtime = %self.config.runtime,
            image = %self.config.image,
            max_sessions = self.config.max_sessions,
            "terminal server listening"
        );

        let app = router(self.state.clone());
        let result = tokio::select! {
            result = async { axum::serve(listener, app).await } => {
                result.map_err(|e| BoxshellError::Transport(format!("server error: {e}")))
            }
            _ = shutdown => {
                info!("shutdown signal received");
                Ok(())
            }
        };

        self.shutdown().await;
        result
    }

    /// Best-effort kill of every container still owned by a live session,
    /// then of anything else this server launched.
    async fn shutdown(&self) {
        self.reap_sessions().await;
        self.state.sessions.containers.sweep().await;
    }

    async fn reap_sessions(&self) {
        let entries = self.state.sessions.registry.drain().await;
        if entries.is_empty() {
            return;
        }
        info!(count = entries.len(), "cleaning up live sessions");

        let kills = entries.into_iter().filter_map(|entry| {
            debug!(
                session_id = %entry.id,
                state = ?entry.state,
                age_secs = entry.created_at.elapsed().map(|d| d.as_secs()).unwrap_or(0),
                container = ?entry.container,
                "reaping session"
            );
            let containers = self.state.sessions.containers.clone();
            entry.container.map(|name| {
                tokio::spawn(async move { containers.kill_by_name(&name).await })
            })
        });
        for kill in kills.collect::<Vec<_>>() {
            if let Err(e) = kill.await {
                warn!(error = %e, "shutdown kill task failed");
            }
        }
    }
}
