//! Server configuration: TOML file + environment + CLI overrides.

use crate::container::{ResourceLimits, RuntimeKind};
use boxshell_core::{BoxshellError, BoxshellResult};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub container: ContainerSection,
    #[serde(default)]
    pub timeouts: TimeoutSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// `[container]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerSection {
    #[serde(default)]
    pub runtime: RuntimeKind,
    /// Path to the runtime binary; defaults to `docker` or `podman` on `PATH`.
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    #[serde(default = "default_cpus")]
    pub cpus: f64,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
}

impl Default for ContainerSection {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::default(),
            binary: None,
            image: default_image(),
            memory_mb: default_memory_mb(),
            cpus: default_cpus(),
            shell: default_shell(),
            workspace_root: default_workspace_root(),
        }
    }
}

/// `[timeouts]` section of the config TOML. All values in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutSection {
    #[serde(default = "default_provision_secs")]
    pub provision_secs: u64,
    #[serde(default = "default_attach_secs")]
    pub attach_secs: u64,
    #[serde(default = "default_cleanup_secs")]
    pub cleanup_secs: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            provision_secs: default_provision_secs(),
            attach_secs: default_attach_secs(),
            cleanup_secs: default_cleanup_secs(),
        }
    }
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_port() -> u16 {
    3002
}
fn default_max_sessions() -> usize {
    100
}
fn default_image() -> String {
    "alpine:latest".to_string()
}
fn default_memory_mb() -> u64 {
    256
}
fn default_cpus() -> f64 {
    0.5
}
fn default_shell() -> String {
    "/bin/sh".to_string()
}
fn default_workspace_root() -> String {
    "/workspace".to_string()
}
fn default_provision_secs() -> u64 {
    30
}
fn default_attach_secs() -> u64 {
    15
}
fn default_cleanup_secs() -> u64 {
    10
}

/// Values taken from the command line or the environment. `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub max_sessions: Option<usize>,
    pub runtime: Option<RuntimeKind>,
    pub image: Option<String>,
    pub memory_mb: Option<u64>,
    pub cpus: Option<f64>,
}

/// Per-phase time bounds.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub provision: Duration,
    pub attach: Duration,
    pub cleanup: Duration,
}

/// Resolved server configuration (overrides applied, validated).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub max_sessions: usize,
    pub runtime: RuntimeKind,
    pub runtime_binary: Option<String>,
    pub image: String,
    pub limits: ResourceLimits,
    pub shell: String,
    pub workspace_root: String,
    pub timeouts: Timeouts,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_parts(ConfigFile::default(), &Overrides::default())
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply overrides and validate.
    pub fn load(config_path: Option<&Path>, overrides: &Overrides) -> BoxshellResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| BoxshellError::Config(format!("parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let config = Self::from_parts(file_config, overrides);
        config.validate()?;
        Ok(config)
    }

    fn from_parts(file: ConfigFile, overrides: &Overrides) -> Self {
        Self {
            bind: overrides.bind.unwrap_or(file.server.bind),
            port: overrides.port.unwrap_or(file.server.port),
            max_sessions: overrides.max_sessions.unwrap_or(file.server.max_sessions),
            runtime: overrides.runtime.unwrap_or(file.container.runtime),
            runtime_binary: file.container.binary,
            image: overrides.image.clone().unwrap_or(file.container.image),
            limits: ResourceLimits {
                memory_mb: overrides.memory_mb.unwrap_or(file.container.memory_mb),
                cpus: overrides.cpus.unwrap_or(file.container.cpus),
            },
            shell: file.container.shell,
            workspace_root: file.container.workspace_root,
            timeouts: Timeouts {
                provision: Duration::from_secs(file.timeouts.provision_secs),
                attach: Duration::from_secs(file.timeouts.attach_secs),
                cleanup: Duration::from_secs(file.timeouts.cleanup_secs),
            },
        }
    }

    fn validate(&self) -> BoxshellResult<()> {
        // Docker refuses memory limits below 6 MiB.
        if self.limits.memory_mb < 6 {
            return Err(BoxshellError::Config(format!(
                "memory_mb must be at least 6, got {}",
                self.limits.memory_mb
            )));
        }
        if !(self.limits.cpus > 0.0 && self.limits.cpus <= 64.0) {
            return Err(BoxshellError::Config(format!(
                "cpus must be in (0, 64], got {}",
                self.limits.cpus
            )));
        }
        if self.image.trim().is_empty() {
            return Err(BoxshellError::Config("image cannot be empty".into()));
        }
        if self.shell.trim().is_empty() {
            return Err(BoxshellError::Config("shell cannot be empty".into()));
        }
        if self.max_sessions == 0 {
            return Err(BoxshellError::Config("max_sessions must be at least 1".into()));
        }
        let t = &self.timeouts;
        if t.provision.is_zero() || t.attach.is_zero() || t.cleanup.is_zero() {
            return Err(BoxshellError::Config("timeouts must be at least 1 second".into()));
        }
        Ok(())
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
