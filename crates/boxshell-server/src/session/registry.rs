//! Process-wide session registry.
//!
//! A single task owns the `session id → entry` map; everything else talks to
//! it through a cloneable [`RegistryHandle`]. The registry is bookkeeping for
//! capacity, container-name uniqueness, and shutdown cleanup only; sessions
//! never coordinate through it.

use super::controller::SessionState;
use boxshell_core::{BoxshellError, BoxshellResult, SessionId};
use std::collections::HashMap;
use std::time::SystemTime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Snapshot of one live session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub id: SessionId,
    pub created_at: SystemTime,
    pub state: SessionState,
    pub container: Option<String>,
}

enum Command {
    Register {
        id: SessionId,
        max_sessions: usize,
        reply: oneshot::Sender<BoxshellResult<()>>,
    },
    ClaimContainer {
        id: SessionId,
        name: String,
        reply: oneshot::Sender<BoxshellResult<()>>,
    },
    SetState {
        id: SessionId,
        state: SessionState,
    },
    Lookup {
        id: SessionId,
        reply: oneshot::Sender<Option<SessionEntry>>,
    },
    Remove {
        id: SessionId,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    Drain {
        reply: oneshot::Sender<Vec<SessionEntry>>,
    },
}

/// Cloneable handle to the registry task.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::UnboundedSender<Command>,
}

/// Spawn the registry task and return its handle.
pub fn spawn_registry() -> RegistryHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(rx));
    RegistryHandle { tx }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut sessions: HashMap<SessionId, SessionEntry> = HashMap::new();
    let mut draining = false;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Register {
                id,
                max_sessions,
                reply,
            } => {
                let result = if draining {
                    Err(BoxshellError::Other("server is shutting down".into()))
                } else if sessions.len() >= max_sessions {
                    Err(BoxshellError::Capacity(max_sessions))
                } else {
                    sessions.insert(
                        id,
                        SessionEntry {
                            id,
                            created_at: SystemTime::now(),
                            state: SessionState::Provisioning,
                            container: None,
                        },
                    );
                    debug!(session_id = %id, live = sessions.len(), "session registered");
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::ClaimContainer { id, name, reply } => {
                let in_use = sessions
                    .values()
                    .any(|s| s.id != id && s.container.as_deref() == Some(name.as_str()));
                let result = if in_use {
                    Err(BoxshellError::Provision(format!(
                        "container name {name} is already in use"
                    )))
                } else if let Some(entry) = sessions.get_mut(&id) {
                    entry.container = Some(name);
                    Ok(())
                } else {
                    Err(BoxshellError::Other(format!("session {id} is not registered")))
                };
                let _ = reply.send(result);
            }
            Command::SetState { id, state } => {
                if let Some(entry) = sessions.get_mut(&id) {
                    entry.state = state;
                }
            }
            Command::Lookup { id, reply } => {
                let _ = reply.send(sessions.get(&id).cloned());
            }
            Command::Remove { id } => {
                if sessions.remove(&id).is_some() {
                    debug!(session_id = %id, live = sessions.len(), "session removed");
                }
            }
            Command::Count { reply } => {
                let _ = reply.send(sessions.len());
            }
            Command::Drain { reply } => {
                draining = true;
                let entries: Vec<SessionEntry> = sessions.drain().map(|(_, e)| e).collect();
                info!(count = entries.len(), "session registry drained");
                let _ = reply.send(entries);
            }
        }
    }
}

fn gone() -> BoxshellError {
    BoxshellError::Other("session registry stopped".into())
}

impl RegistryHandle {
    /// Register a new session, refusing once `max_sessions` are live.
    pub async fn register(&self, id: SessionId, max_sessions: usize) -> BoxshellResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Register {
                id,
                max_sessions,
                reply,
            })
            .map_err(|_| gone())?;
        rx.await.map_err(|_| gone())?
    }

    /// Record the container name for a session; fails if another live session holds it.
    pub async fn claim_container(&self, id: SessionId, name: &str) -> BoxshellResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::ClaimContainer {
                id,
                name: name.to_string(),
                reply,
            })
            .map_err(|_| gone())?;
        rx.await.map_err(|_| gone())?
    }

    pub fn set_state(&self, id: SessionId, state: SessionState) {
        let _ = self.tx.send(Command::SetState { id, state });
    }

    pub async fn lookup(&self, id: SessionId) -> Option<SessionEntry> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Lookup { id, reply }).ok()?;
        rx.await.ok().flatten()
    }

    /// Forget a session. Synchronous so it can be called from `Drop`.
    pub fn remove(&self, id: SessionId) {
        let _ = self.tx.send(Command::Remove { id });
    }

    pub async fn count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Count { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Take every live entry and refuse further registrations.
    pub async fn drain(&self) -> Vec<SessionEntry> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Drain { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_lookup_remove() {
        let registry = spawn_registry();
        let id = SessionId::generate();
        registry.register(id, 10).await.unwrap();

        let entry = registry.lookup(id).await.unwrap();
        assert_eq!(entry.state, SessionState::Provisioning);
        assert!(entry.container.is_none());

        registry.set_state(id, SessionState::Active);
        assert_eq!(registry.lookup(id).await.unwrap().state, SessionState::Active);

        registry.remove(id);
        assert!(registry.lookup(id).await.is_none());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let registry = spawn_registry();
        registry.register(SessionId::generate(), 2).await.unwrap();
        registry.register(SessionId::generate(), 2).await.unwrap();
        let err = registry.register(SessionId::generate(), 2).await.unwrap_err();
        assert!(matches!(err, BoxshellError::Capacity(2)));
    }

    #[tokio::test]
    async fn container_names_are_exclusive() {
        let registry = spawn_registry();
        let a = SessionId::generate();
        let b = SessionId::generate();
        registry.register(a, 10).await.unwrap();
        registry.register(b, 10).await.unwrap();

        registry.claim_container(a, "sess_x").await.unwrap();
        assert!(matches!(
            registry.claim_container(b, "sess_x").await,
            Err(BoxshellError::Provision(_))
        ));

        // Released once the owner is gone.
        registry.remove(a);
        registry.claim_container(b, "sess_x").await.unwrap();
    }

    #[tokio::test]
    async fn drain_empties_and_closes() {
        let registry = spawn_registry();
        let id = SessionId::generate();
        registry.register(id, 10).await.unwrap();
        registry.claim_container(id, "sess_y").await.unwrap();

        let drained = registry.drain().await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].container.as_deref(), Some("sess_y"));
        assert_eq!(registry.count().await, 0);
        assert!(registry.register(SessionId::generate(), 10).await.is_err());
    }
}
