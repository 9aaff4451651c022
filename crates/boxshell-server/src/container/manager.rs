//! Container Lifecycle Manager: start and destroy per-session sandboxes.

use super::runtime::is_already_gone;
use super::{
    container_name, server_label, validate_container_name, ContainerHandle, ContainerRuntime,
    ContainerSpec, NetworkMode, ResourceLimits,
};
use boxshell_core::{BoxshellError, BoxshellResult, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Idle process that keeps the sandbox alive until it is killed.
const IDLE_ENTRYPOINT: &str = "sh";

/// Creates one isolated container per session and tears it down again.
pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    limits: ResourceLimits,
    provision_timeout: Duration,
    cleanup_timeout: Duration,
    /// Labels every container this manager launches.
    server_id: String,
}

impl ContainerManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        image: impl Into<String>,
        limits: ResourceLimits,
        provision_timeout: Duration,
        cleanup_timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            image: image.into(),
            limits,
            provision_timeout,
            cleanup_timeout,
            server_id: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Start a sandbox for `session_id`. Failures are never retried.
    pub async fn start_container(
        &self,
        session_id: SessionId,
        workdir: Option<&str>,
    ) -> BoxshellResult<ContainerHandle> {
        let name = container_name(&session_id);
        validate_container_name(&name).map_err(|e| BoxshellError::Provision(e.to_string()))?;

        let spec = ContainerSpec {
            name,
            image: self.image.clone(),
            limits: self.limits,
            network: NetworkMode::None,
            workdir: workdir.map(String::from),
            entrypoint: IDLE_ENTRYPOINT.to_string(),
            session_id,
            server_id: self.server_id.clone(),
        };

        debug!(
            session_id = %session_id,
            container = %spec.name,
            image = %spec.image,
            memory_mb = spec.limits.memory_mb,
            cpus = spec.limits.cpus,
            "starting container"
        );

        match tokio::time::timeout(self.provision_timeout, self.runtime.run_detached(&spec)).await {
            Ok(Ok(())) => {
                let handle = ContainerHandle::running(&spec);
                info!(
                    session_id = %session_id,
                    container = %handle.name(),
                    network = %handle.network().as_arg(),
                    memory_mb = handle.limits().memory_mb,
                    "container started"
                );
                Ok(handle)
            }
            Ok(Err(BoxshellError::Provision(detail))) => Err(BoxshellError::Provision(detail)),
            Ok(Err(e)) => Err(BoxshellError::Provision(e.to_string())),
            Err(_) => {
                // The runtime may still bring the container up after we stop waiting.
                warn!(
                    session_id = %session_id,
                    container = %spec.name,
                    timeout = ?self.provision_timeout,
                    "container start timed out"
                );
                self.kill_by_name(&spec.name).await;
                Err(BoxshellError::Provision(format!(
                    "timed out after {:?}",
                    self.provision_timeout
                )))
            }
        }
    }

    /// Force-kill a session's container. Never fails.
    pub async fn kill_container(&self, handle: ContainerHandle) {
        self.kill_by_name(handle.name()).await;
    }

    /// Best-effort kill by name; failures are logged and swallowed.
    pub async fn kill_by_name(&self, name: &str) {
        match tokio::time::timeout(self.cleanup_timeout, self.runtime.kill(name)).await {
            Ok(Ok(())) => info!(container = %name, "container killed"),
            Ok(Err(e)) if is_already_gone(&e.to_string()) => {
                debug!(container = %name, "container already gone")
            }
            Ok(Err(e)) => warn!(container = %name, error = %e, "container kill failed"),
            Err(_) => warn!(container = %name, "container kill timed out"),
        }
    }

    /// Kill every container this server launched that is still around,
    /// including ones the runtime started after a provisioning timeout.
    /// Returns how many were found.
    pub async fn sweep(&self) -> usize {
        let label = server_label(&self.server_id);
        let listed = tokio::time::timeout(self.cleanup_timeout, self.runtime.list_labeled(&label));
        let names = match listed.await {
            Ok(Ok(names)) => names,
            Ok(Err(e)) => {
                warn!(label = %label, error = %e, "container sweep failed");
                return 0;
            }
            Err(_) => {
                warn!(label = %label, "container sweep timed out");
                return 0;
            }
        };
        if !names.is_empty() {
            info!(count = names.len(), "sweeping leftover containers");
        }
        futures_util::future::join_all(names.iter().map(|name| self.kill_by_name(name))).await;
        names.len()
    }
}
