//! In-process fakes for the container runtime and the PTY bridge.

use crate::container::{ContainerHandle, ContainerRuntime, ContainerSpec};
use crate::pty::{PtyBridge, PtyControl, PtyHandle};
use async_trait::async_trait;
use boxshell_core::{BoxshellError, BoxshellResult, TerminalSize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Poll `cond` until it holds, panicking after a few seconds.
pub async fn eventually<F: FnMut() -> bool>(mut cond: F) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Ordered record of teardown events, shared between fakes.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Run(String),
    Kill(String),
}

/// Records every runtime call and tracks which containers are alive.
#[derive(Default)]
pub struct FakeRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
    specs: Mutex<Vec<ContainerSpec>>,
    live: Mutex<HashSet<String>>,
    run_error: Option<String>,
    kill_error: Option<String>,
    hang_run: bool,
    start_anyway: bool,
    pending: Mutex<Vec<String>>,
    stopped: bool,
    journal: Option<Journal>,
}

impl FakeRuntime {
    pub fn failing_run(message: &str) -> Self {
        Self {
            run_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn hanging_run() -> Self {
        Self {
            hang_run: true,
            ..Default::default()
        }
    }

    /// With `hanging_run`: the container still comes up once
    /// [`finish_pending_runs`](Self::finish_pending_runs) is called.
    pub fn starting_anyway(mut self) -> Self {
        self.start_anyway = true;
        self
    }

    pub fn finish_pending_runs(&self) {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        self.live.lock().unwrap().extend(pending);
    }

    pub fn failing_kill(message: &str) -> Self {
        Self {
            kill_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Containers start but immediately report as not running.
    pub fn stopped() -> Self {
        Self {
            stopped: true,
            ..Default::default()
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<ContainerSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub fn kills(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::Kill(name) => Some(name),
                RuntimeCall::Run(_) => None,
            })
            .collect()
    }

    pub fn kill_count(&self) -> usize {
        self.kills().len()
    }

    pub fn live(&self) -> HashSet<String> {
        self.live.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn run_detached(&self, spec: &ContainerSpec) -> BoxshellResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(RuntimeCall::Run(spec.name.clone()));
        self.specs.lock().unwrap().push(spec.clone());

        if self.hang_run {
            if self.start_anyway {
                self.pending.lock().unwrap().push(spec.name.clone());
            }
            std::future::pending::<()>().await;
        }
        if let Some(ref message) = self.run_error {
            return Err(BoxshellError::Provision(message.clone()));
        }
        if !self.live.lock().unwrap().insert(spec.name.clone()) {
            return Err(BoxshellError::Provision(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        Ok(())
    }

    async fn kill(&self, name: &str) -> BoxshellResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(RuntimeCall::Kill(name.to_string()));
        if let Some(ref journal) = self.journal {
            journal.record(format!("container-kill:{name}"));
        }
        if let Some(ref message) = self.kill_error {
            return Err(BoxshellError::Cleanup(message.clone()));
        }
        if self.live.lock().unwrap().remove(name) {
            Ok(())
        } else {
            Err(BoxshellError::Cleanup(format!("No such container: {name}")))
        }
    }

    async fn is_running(&self, name: &str) -> BoxshellResult<bool> {
        Ok(!self.stopped && self.live.lock().unwrap().contains(name))
    }

    async fn list_labeled(&self, label: &str) -> BoxshellResult<Vec<String>> {
        let live = self.live.lock().unwrap();
        Ok(self
            .specs
            .lock()
            .unwrap()
            .iter()
            .filter(|spec| live.contains(&spec.name) && spec.labels().iter().any(|l| l == label))
            .map(|spec| spec.name.clone())
            .collect())
    }

    fn exec_argv(&self, name: &str, shell: &str) -> Vec<String> {
        vec!["fake".into(), "exec".into(), name.into(), shell.into()]
    }
}

/// Runtime whose "containers" are plain host shells, for exercising the real
/// PTY path without docker.
#[derive(Default)]
pub struct HostShellRuntime;

#[async_trait]
impl ContainerRuntime for HostShellRuntime {
    async fn run_detached(&self, _spec: &ContainerSpec) -> BoxshellResult<()> {
        Ok(())
    }

    async fn kill(&self, _name: &str) -> BoxshellResult<()> {
        Ok(())
    }

    async fn is_running(&self, _name: &str) -> BoxshellResult<bool> {
        Ok(true)
    }

    async fn list_labeled(&self, _label: &str) -> BoxshellResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn exec_argv(&self, _name: &str, shell: &str) -> Vec<String> {
        vec![shell.to_string()]
    }
}

/// Produces a reply for one input chunk given the current terminal size.
pub type Responder = fn(&[u8], TerminalSize) -> Option<Vec<u8>>;

#[derive(Default)]
struct FakePtyState {
    input: Vec<u8>,
    resizes: Vec<TerminalSize>,
    size: Option<TerminalSize>,
    kills: usize,
    fail_kill: bool,
    responder: Option<Responder>,
    journal: Option<Journal>,
}

/// Shared view of everything a fake PTY has received.
#[derive(Clone, Default)]
pub struct FakePtyLog {
    state: Arc<Mutex<FakePtyState>>,
}

impl FakePtyLog {
    pub fn input(&self) -> Vec<u8> {
        self.state.lock().unwrap().input.clone()
    }

    pub fn resizes(&self) -> Vec<TerminalSize> {
        self.state.lock().unwrap().resizes.clone()
    }

    pub fn kill_count(&self) -> usize {
        self.state.lock().unwrap().kills
    }

    pub fn fail_kill(&self) {
        self.state.lock().unwrap().fail_kill = true;
    }

    pub fn respond_with(&self, responder: Responder) {
        self.state.lock().unwrap().responder = Some(responder);
    }

    fn set_journal(&self, journal: Journal) {
        self.state.lock().unwrap().journal = Some(journal);
    }

    fn receive(&self, chunk: &[u8]) -> Option<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.input.extend_from_slice(chunk);
        let size = state.size.unwrap_or_default();
        state.responder.and_then(|r| r(chunk, size))
    }
}

struct FakeControl {
    container: String,
    log: FakePtyLog,
}

impl PtyControl for FakeControl {
    fn resize(&mut self, size: TerminalSize) -> BoxshellResult<()> {
        let mut state = self.log.state.lock().unwrap();
        state.resizes.push(size);
        state.size = Some(size);
        Ok(())
    }

    fn kill(&mut self) -> BoxshellResult<()> {
        let mut state = self.log.state.lock().unwrap();
        state.kills += 1;
        if let Some(ref journal) = state.journal {
            journal.record(format!("pty-kill:{}", self.container));
        }
        if state.fail_kill {
            return Err(BoxshellError::Cleanup("fake kill failure".into()));
        }
        Ok(())
    }
}

/// Build a PTY handle backed by channels. The returned sender feeds PTY
/// output; dropping it ends the output stream.
pub fn fake_pty(container: &str) -> (PtyHandle, FakePtyLog, mpsc::Sender<Vec<u8>>) {
    let (in_tx, mut in_rx) = mpsc::channel::<Vec<u8>>(64);
    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(64);
    let log = FakePtyLog::default();

    let task_log = log.clone();
    let echo = out_tx.downgrade();
    tokio::spawn(async move {
        while let Some(chunk) = in_rx.recv().await {
            if let Some(reply) = task_log.receive(&chunk) {
                if let Some(tx) = echo.upgrade() {
                    let _ = tx.send(reply).await;
                }
            }
        }
    });

    let control = FakeControl {
        container: container.to_string(),
        log: log.clone(),
    };
    let handle = PtyHandle::new(
        container,
        TerminalSize::default(),
        in_tx,
        out_rx,
        Box::new(control),
    );
    (handle, log, out_tx)
}

/// Bridge that hands out fake PTYs and records every attach attempt.
#[derive(Default)]
pub struct FakeBridge {
    fail: Option<String>,
    hang: bool,
    responder: Option<Responder>,
    journal: Option<Journal>,
    attempts: Mutex<Vec<String>>,
    attached: Mutex<Vec<(String, FakePtyLog, Option<mpsc::Sender<Vec<u8>>>)>>,
}

impl FakeBridge {
    pub fn failing(message: &str) -> Self {
        Self {
            fail: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn responding(responder: Responder) -> Self {
        Self {
            responder: Some(responder),
            ..Default::default()
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn attach_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Log of the PTY attached to `container`.
    pub fn log(&self, container: &str) -> Option<FakePtyLog> {
        self.attached
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _, _)| name == container)
            .map(|(_, log, _)| log.clone())
    }

    pub fn logs(&self) -> Vec<FakePtyLog> {
        self.attached
            .lock()
            .unwrap()
            .iter()
            .map(|(_, log, _)| log.clone())
            .collect()
    }

    /// Push output from the PTY attached to `container`.
    pub async fn emit(&self, container: &str, data: &[u8]) {
        let tx = self
            .attached
            .lock()
            .unwrap()
            .iter()
            .find(|(name, _, _)| name == container)
            .and_then(|(_, _, tx)| tx.clone());
        if let Some(tx) = tx {
            let _ = tx.send(data.to_vec()).await;
        }
    }

    /// Simulate the shell exiting on its own.
    pub fn exit(&self, container: &str) {
        let mut attached = self.attached.lock().unwrap();
        if let Some(entry) = attached.iter_mut().find(|(name, _, _)| name == container) {
            entry.2 = None;
        }
    }
}

#[async_trait]
impl PtyBridge for FakeBridge {
    async fn attach(
        &self,
        container: &ContainerHandle,
        size: TerminalSize,
    ) -> BoxshellResult<PtyHandle> {
        self.attempts
            .lock()
            .unwrap()
            .push(container.name().to_string());

        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(ref message) = self.fail {
            return Err(BoxshellError::Attach(message.clone()));
        }
        let (mut handle, log, feeder) = fake_pty(container.name());
        if let Some(responder) = self.responder {
            log.respond_with(responder);
        }
        if let Some(ref journal) = self.journal {
            log.set_journal(journal.clone());
        }
        if size != TerminalSize::default() {
            handle.resize(size)?;
        }
        self.attached
            .lock()
            .unwrap()
            .push((container.name().to_string(), log, Some(feeder)));
        Ok(handle)
    }
}
