//! Session Controller: drives one connection through
//! `Provisioning → Attaching → Active → Closing → Closed` (or `Failed`).
//!
//! The controller owns the container and PTY for its session. Once a
//! container exists it is held by a [`LiveSession`] guard, so cleanup runs
//! exactly once whether the session closes normally or its task is dropped.

use super::registry::RegistryHandle;
use crate::container::{container_name, ContainerHandle, ContainerManager};
use crate::pty::{OutputPump, PtyBridge, PtyHandle};
use boxshell_core::{BoxshellError, BoxshellResult, Inbound, ServerNotice, SessionId, TerminalSize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Provisioning,
    Attaching,
    Active,
    Closing,
    Closed,
    /// Startup failed; nothing is left to clean up.
    Failed,
}

/// Messages from a session to its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Raw PTY output, relayed unmodified.
    Output(Vec<u8>),
    /// Structured notice (startup error).
    Notice(ServerNotice),
    /// The session is over; close the connection.
    Close,
}

/// Collaborators shared by every session.
pub struct SessionDeps {
    pub containers: Arc<ContainerManager>,
    pub bridge: Arc<dyn PtyBridge>,
    pub registry: RegistryHandle,
    pub max_sessions: usize,
    pub attach_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Disconnected,
    PtyExited,
    PtyError,
}

/// Outbound messages buffered ahead of the socket writer. When full, PTY
/// output waits, which in turn stops the PTY reader.
pub const OUTBOUND_CAPACITY: usize = 64;

/// Drives a single session. Consumed by [`SessionController::run`]; a new
/// connection always gets a new controller.
pub struct SessionController {
    id: SessionId,
    state: SessionState,
    workdir: Option<String>,
    deps: Arc<SessionDeps>,
}

impl SessionController {
    pub fn new(deps: Arc<SessionDeps>, workdir: Option<String>) -> Self {
        Self {
            id: SessionId::generate(),
            state: SessionState::Provisioning,
            workdir,
            deps,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    fn transition(&mut self, next: SessionState) {
        debug!(session_id = %self.id, from = ?self.state, to = ?next, "session transition");
        self.state = next;
        self.deps.registry.set_state(self.id, next);
    }

    /// Run the session until the client disconnects or startup fails.
    ///
    /// The client is gone once `inbound` ends or the receiving side of
    /// `outbound` is dropped. Returns the terminal state.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Inbound>,
        outbound: mpsc::Sender<Outbound>,
    ) -> SessionState {
        if let Err(e) = self
            .deps
            .registry
            .register(self.id, self.deps.max_sessions)
            .await
        {
            self.fail(&outbound, e).await;
            return self.state;
        }
        info!(session_id = %self.id, workdir = ?self.workdir, "session started");

        // Not raced against disconnect: a half-finished `run` could still
        // leave a container behind.
        let container = match self.provision().await {
            Ok(container) => container,
            Err(e) => {
                self.fail(&outbound, e).await;
                return self.state;
            }
        };

        let mut live = LiveSession::new(self.id, container, &self.deps);

        if outbound.is_closed() {
            return self.abandon(live).await;
        }

        self.transition(SessionState::Attaching);
        let attached = tokio::select! {
            attached = live.attach(self.deps.bridge.as_ref(), self.deps.attach_timeout) => Some(attached),
            _ = outbound.closed() => None,
        };
        let Some(attached) = attached else {
            return self.abandon(live).await;
        };
        if let Err(e) = attached {
            live.teardown().await;
            self.fail(&outbound, e).await;
            return self.state;
        }

        let out = outbound.clone();
        let pump = live.pty_mut().and_then(|pty| {
            pty.on_data(move |chunk| {
                let out = out.clone();
                async move {
                    let _ = out.send(Outbound::Output(chunk)).await;
                }
            })
        });
        let mut pump = match pump {
            Ok(pump) => pump,
            Err(e) => {
                live.teardown().await;
                self.fail(&outbound, BoxshellError::Attach(e.to_string())).await;
                return self.state;
            }
        };

        self.transition(SessionState::Active);
        info!(session_id = %self.id, "session active");

        let reason = self
            .pump_input(&mut live, &mut pump, &mut inbound, &outbound)
            .await;

        self.transition(SessionState::Closing);
        debug!(session_id = %self.id, ?reason, "closing session");
        pump.stop();
        drop(inbound);
        live.teardown().await;

        self.transition(SessionState::Closed);
        self.deps.registry.remove(self.id);
        // Dropping `outbound` also ends the writer if this does not fit.
        let _ = outbound.try_send(Outbound::Close);
        info!(session_id = %self.id, "session closed");
        self.state
    }

    async fn provision(&mut self) -> BoxshellResult<ContainerHandle> {
        let name = container_name(&self.id);
        self.deps.registry.claim_container(self.id, &name).await?;
        self.deps
            .containers
            .start_container(self.id, self.workdir.as_deref())
            .await
    }

    /// The client left before the session became active.
    async fn abandon(&mut self, mut live: LiveSession) -> SessionState {
        info!(session_id = %self.id, state = ?self.state, "client left during startup");
        self.transition(SessionState::Closing);
        live.teardown().await;
        self.transition(SessionState::Closed);
        self.deps.registry.remove(self.id);
        self.state
    }

    /// Active steady state: client bytes and resizes in, until disconnect or PTY end.
    async fn pump_input(
        &self,
        live: &mut LiveSession,
        pump: &mut OutputPump,
        inbound: &mut mpsc::Receiver<Inbound>,
        outbound: &mpsc::Sender<Outbound>,
    ) -> CloseReason {
        loop {
            tokio::select! {
                msg = inbound.recv() => match msg {
                    Some(Inbound::Input(bytes)) => {
                        let pty = match live.pty_mut() {
                            Ok(pty) => pty,
                            Err(e) => {
                                warn!(session_id = %self.id, error = %e, "PTY write failed");
                                return CloseReason::PtyError;
                            }
                        };
                        // A full PTY input queue must not hide a disconnect.
                        tokio::select! {
                            written = pty.write(&bytes) => if let Err(e) = written {
                                warn!(session_id = %self.id, error = %e, "PTY write failed");
                                return CloseReason::PtyError;
                            },
                            _ = outbound.closed() => return CloseReason::Disconnected,
                        }
                    }
                    Some(Inbound::Resize(size)) => {
                        let resized = live.pty_mut().and_then(|pty| pty.resize(size));
                        if let Err(e) = resized {
                            debug!(session_id = %self.id, error = %e, "resize ignored");
                        }
                    }
                    Some(Inbound::Malformed(reason)) => {
                        debug!(session_id = %self.id, %reason, "dropping malformed control message");
                    }
                    None => return CloseReason::Disconnected,
                },
                _ = outbound.closed() => return CloseReason::Disconnected,
                _ = pump.finished() => return CloseReason::PtyExited,
            }
        }
    }

    /// Report a startup failure. Errors that are not client-facing are
    /// reported as provisioning failures.
    async fn fail(&mut self, outbound: &mpsc::Sender<Outbound>, error: BoxshellError) {
        let error = if error.is_client_visible() {
            error
        } else {
            BoxshellError::Provision(error.to_string())
        };
        warn!(session_id = %self.id, error = %error, "session failed to start");
        self.transition(SessionState::Failed);
        self.deps.registry.remove(self.id);

        let _ = outbound
            .send(Outbound::Notice(ServerNotice::error(error.to_string())))
            .await;
        let _ = outbound.send(Outbound::Close).await;
    }
}

/// Resources a session holds once its container exists.
///
/// `teardown` kills the PTY, then the container, each at most once. If the
/// owning task is dropped first, `Drop` schedules the same cleanup.
struct LiveSession {
    id: SessionId,
    container: Option<ContainerHandle>,
    pty: Option<PtyHandle>,
    containers: Arc<ContainerManager>,
    registry: RegistryHandle,
}

impl LiveSession {
    fn new(id: SessionId, container: ContainerHandle, deps: &SessionDeps) -> Self {
        Self {
            id,
            container: Some(container),
            pty: None,
            containers: deps.containers.clone(),
            registry: deps.registry.clone(),
        }
    }

    async fn attach(&mut self, bridge: &dyn PtyBridge, timeout: Duration) -> BoxshellResult<()> {
        let container = self
            .container
            .as_ref()
            .ok_or_else(|| BoxshellError::Attach("container already released".into()))?;

        let pty = tokio::time::timeout(timeout, bridge.attach(container, TerminalSize::default()))
            .await
            .map_err(|_| BoxshellError::Attach(format!("timed out after {timeout:?}")))?
            .map_err(|e| match e {
                BoxshellError::Attach(_) => e,
                other => BoxshellError::Attach(other.to_string()),
            })?;

        debug!(
            session_id = %self.id,
            container = %pty.container(),
            cols = pty.size().cols,
            rows = pty.size().rows,
            "pty attached"
        );
        self.pty = Some(pty);
        Ok(())
    }

    fn pty_mut(&mut self) -> BoxshellResult<&mut PtyHandle> {
        self.pty
            .as_mut()
            .ok_or_else(|| BoxshellError::Other("PTY already released".into()))
    }

    async fn teardown(&mut self) {
        if let Some(pty) = self.pty.take() {
            pty.kill();
        }
        if let Some(container) = self.container.take() {
            // Detached so the kill still lands if this task is cancelled mid-way.
            let containers = self.containers.clone();
            let kill = tokio::spawn(async move { containers.kill_container(container).await });
            if let Err(e) = kill.await {
                warn!(session_id = %self.id, error = %e, "container kill task failed");
            }
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        let pty = self.pty.take();
        let container = self.container.take();
        if pty.is_none() && container.is_none() {
            return;
        }

        warn!(session_id = %self.id, "session dropped while live, scheduling cleanup");
        if let Some(pty) = pty {
            pty.kill();
        }
        if let Some(container) = container {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let containers = self.containers.clone();
                    handle.spawn(async move { containers.kill_container(container).await });
                }
                Err(_) => warn!(
                    session_id = %self.id,
                    container = %container.name(),
                    "no runtime for cleanup, relying on container auto-removal"
                ),
            }
        }
        self.registry.remove(self.id);
    }
}
