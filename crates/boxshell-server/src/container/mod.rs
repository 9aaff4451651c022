//! Container lifecycle: one isolated, resource-capped, network-less
//! container per session.
//!
//! The runtime itself (docker or podman) is reached through the
//! [`ContainerRuntime`] trait so the session logic can be driven against any
//! isolation target.

pub mod manager;
pub mod name;
pub mod runtime;

pub use manager::ContainerManager;
pub use name::{container_name, validate_container_name};
pub use runtime::CliRuntime;

use async_trait::async_trait;
use boxshell_core::{BoxshellResult, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    Docker,
    Podman,
}

impl RuntimeKind {
    /// Default binary name for this runtime.
    pub fn default_binary(&self) -> &'static str {
        match self {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Podman => "podman",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_binary())
    }
}

impl FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(RuntimeKind::Docker),
            "podman" => Ok(RuntimeKind::Podman),
            other => Err(format!("unknown container runtime '{other}' (expected docker or podman)")),
        }
    }
}

/// Per-container resource ceilings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    /// Memory ceiling in MiB.
    pub memory_mb: u64,
    /// CPU share ceiling, in cores.
    pub cpus: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 256,
            cpus: 0.5,
        }
    }
}

/// Network attachment for a sandbox container. Only `None` is ever produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    None,
}

impl NetworkMode {
    pub fn as_arg(&self) -> &'static str {
        match self {
            NetworkMode::None => "none",
        }
    }
}

/// Label attached to every sandbox container, value is the session ID.
pub const SESSION_LABEL: &str = "boxshell.session";
/// Label naming the server instance that owns the container.
pub const SERVER_LABEL: &str = "boxshell.server";

/// Everything the runtime needs to launch one sandbox.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub limits: ResourceLimits,
    pub network: NetworkMode,
    /// Working directory inside the container, if the session has a project.
    pub workdir: Option<String>,
    /// Long-lived idle process that keeps the container alive.
    pub entrypoint: String,
    pub session_id: SessionId,
    /// Instance ID of the server that launched the container.
    pub server_id: String,
}

impl ContainerSpec {
    /// `key=value` labels to attach at launch.
    pub fn labels(&self) -> Vec<String> {
        vec![
            format!("{SESSION_LABEL}={}", self.session_id),
            server_label(&self.server_id),
        ]
    }
}

/// The label selecting every container owned by `server_id`.
pub fn server_label(server_id: &str) -> String {
    format!("{SERVER_LABEL}={server_id}")
}

/// A running sandbox container owned by exactly one session.
///
/// Killing consumes the handle, so a handle always names a container that
/// has not been killed through it.
#[derive(Debug)]
pub struct ContainerHandle {
    name: String,
    limits: ResourceLimits,
    network: NetworkMode,
}

impl ContainerHandle {
    pub(crate) fn running(spec: &ContainerSpec) -> Self {
        Self {
            name: spec.name.clone(),
            limits: spec.limits,
            network: spec.network,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    pub fn network(&self) -> NetworkMode {
        self.network
    }
}

/// Container runtime abstraction for testability.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launch a detached, interactive, auto-removing container.
    ///
    /// On failure the error carries the runtime's captured stderr/stdout.
    async fn run_detached(&self, spec: &ContainerSpec) -> BoxshellResult<()>;

    /// Force-kill a container by name.
    async fn kill(&self, name: &str) -> BoxshellResult<()>;

    /// Whether the named container is currently running.
    async fn is_running(&self, name: &str) -> BoxshellResult<bool>;

    /// Names of all containers carrying the `key=value` label.
    async fn list_labeled(&self, label: &str) -> BoxshellResult<Vec<String>>;

    /// Argument vector that execs `shell` inside the container with a TTY.
    fn exec_argv(&self, name: &str, shell: &str) -> Vec<String>;
}
