//! Docker/Podman CLI runtime.
//!
//! Every operation is a short-lived invocation of the runtime binary, awaited
//! on the tokio process driver so a slow runtime only stalls the session that
//! issued the call.

use super::{ContainerRuntime, ContainerSpec, RuntimeKind};
use async_trait::async_trait;
use boxshell_core::{BoxshellError, BoxshellResult};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Container runtime driven through its command-line client.
#[derive(Debug, Clone)]
pub struct CliRuntime {
    binary: String,
}

impl CliRuntime {
    pub fn new(kind: RuntimeKind) -> Self {
        Self {
            binary: kind.default_binary().to_string(),
        }
    }

    /// Use a custom binary path (e.g. a wrapper script).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Build the `run` argument vector for a sandbox container.
    pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "-dit".into(),
            "--rm".into(),
            "--name".into(),
            spec.name.clone(),
            "--memory".into(),
            format!("{}m", spec.limits.memory_mb),
            "--cpus".into(),
            spec.limits.cpus.to_string(),
            "--network".into(),
            spec.network.as_arg().into(),
        ];
        for label in spec.labels() {
            args.push("--label".into());
            args.push(label);
        }

        if let Some(ref workdir) = spec.workdir {
            args.push("--workdir".into());
            args.push(workdir.clone());
        }

        args.push(spec.image.clone());
        args.push(spec.entrypoint.clone());
        args
    }

    /// Run the binary to completion. `Err` carries stderr, else stdout, else the exit code.
    async fn invoke(&self, args: &[String]) -> Result<String, String> {
        debug!(binary = %self.binary, ?args, "invoking container runtime");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("{}: {e}", self.binary))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            Err(stderr)
        } else if !stdout.is_empty() {
            Err(stdout)
        } else {
            Err(format!("{} exit {}", self.binary, output.status))
        }
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn run_detached(&self, spec: &ContainerSpec) -> BoxshellResult<()> {
        let args = Self::run_args(spec);
        self.invoke(&args)
            .await
            .map(|_id| ())
            .map_err(BoxshellError::Provision)
    }

    async fn kill(&self, name: &str) -> BoxshellResult<()> {
        let args = ["kill".to_string(), name.to_string()];
        self.invoke(&args)
            .await
            .map(|_| ())
            .map_err(BoxshellError::Cleanup)
    }

    async fn is_running(&self, name: &str) -> BoxshellResult<bool> {
        let args = [
            "inspect".to_string(),
            "-f".to_string(),
            "{{.State.Running}}".to_string(),
            name.to_string(),
        ];
        let out = self.invoke(&args).await.map_err(BoxshellError::Attach)?;
        Ok(out.trim() == "true")
    }

    async fn list_labeled(&self, label: &str) -> BoxshellResult<Vec<String>> {
        let args = [
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            format!("label={label}"),
            "--format".to_string(),
            "{{.Names}}".to_string(),
        ];
        let out = self.invoke(&args).await.map_err(BoxshellError::Cleanup)?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    fn exec_argv(&self, name: &str, shell: &str) -> Vec<String> {
        vec![
            self.binary.clone(),
            "exec".into(),
            "-it".into(),
            name.into(),
            shell.into(),
        ]
    }
}

/// Whether a runtime error text means the container no longer exists.
pub fn is_already_gone(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("no such container")
        || lower.contains("is not running")
        || lower.contains("no container with name or id")
}
