//! PTY bridge: an interactive shell inside a running container, attached to a
//! real pseudo-terminal on the host.
//!
//! The bridge runs `<runtime> exec -it <container> <shell>` under a
//! portable-pty master, so the shell sees a terminal (job control, line
//! editing, screen control) rather than a pipe. Blocking PTY I/O lives on
//! dedicated blocking threads; the async side only sees channels.

use crate::container::{ContainerHandle, ContainerRuntime};
use async_trait::async_trait;
use boxshell_core::{BoxshellError, BoxshellResult, TerminalSize};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::future::Future;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Read buffer for PTY output.
const READ_CHUNK: usize = 8192;
/// Output chunks buffered between the PTY reader and the pump. When full,
/// the reader thread stops reading and the shell blocks on its own writes.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;
/// Client writes buffered ahead of the PTY writer thread.
const INPUT_CHANNEL_CAPACITY: usize = 64;

/// Resize and kill for one live PTY process.
pub trait PtyControl: Send {
    fn resize(&mut self, size: TerminalSize) -> BoxshellResult<()>;

    /// Terminate the process. Must succeed if the process already exited.
    fn kill(&mut self) -> BoxshellResult<()>;
}

/// Live process + terminal pair attached to a container.
pub struct PtyHandle {
    container: String,
    size: TerminalSize,
    input: mpsc::Sender<Vec<u8>>,
    output: Option<mpsc::Receiver<Vec<u8>>>,
    // Mutex only makes the handle `Sync`; access is always through `&mut self`.
    control: std::sync::Mutex<Box<dyn PtyControl>>,
}

impl PtyHandle {
    pub fn new(
        container: impl Into<String>,
        size: TerminalSize,
        input: mpsc::Sender<Vec<u8>>,
        output: mpsc::Receiver<Vec<u8>>,
        control: Box<dyn PtyControl>,
    ) -> Self {
        Self {
            container: container.into(),
            size,
            input,
            output: Some(output),
            control: std::sync::Mutex::new(control),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Current terminal size.
    pub fn size(&self) -> TerminalSize {
        self.size
    }

    /// Forward bytes to the process input exactly as received.
    ///
    /// Writes are queued to a single writer thread, so send order is preserved.
    /// Waits while the queue is full.
    pub async fn write(&self, data: &[u8]) -> BoxshellResult<()> {
        self.input
            .send(data.to_vec())
            .await
            .map_err(|_| BoxshellError::Other("PTY input closed".into()))
    }

    /// Deliver every output chunk to `callback` until the PTY exits or the
    /// returned pump is stopped. Can only be registered once.
    ///
    /// The next chunk is not read until the callback's future completes, so a
    /// slow consumer throttles the PTY.
    pub fn on_data<F, Fut>(&mut self, mut callback: F) -> BoxshellResult<OutputPump>
    where
        F: FnMut(Vec<u8>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut output = self
            .output
            .take()
            .ok_or_else(|| BoxshellError::Other("PTY output already registered".into()))?;

        let task = tokio::spawn(async move {
            while let Some(chunk) = output.recv().await {
                callback(chunk).await;
            }
        });
        Ok(OutputPump { task })
    }

    /// Propagate a terminal size change to the live PTY.
    pub fn resize(&mut self, size: TerminalSize) -> BoxshellResult<()> {
        self.control
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .resize(size)?;
        self.size = size;
        debug!(container = %self.container, cols = size.cols, rows = size.rows, "PTY resized");
        Ok(())
    }

    /// Terminate the process. Best-effort: errors are logged, never returned.
    pub fn kill(mut self) {
        match self
            .control
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .kill()
        {
            Ok(()) => debug!(container = %self.container, "PTY process killed"),
            Err(e) => warn!(container = %self.container, error = %e, "PTY kill failed"),
        }
    }
}

/// Long-lived task forwarding PTY output to a callback.
pub struct OutputPump {
    task: JoinHandle<()>,
}

impl OutputPump {
    /// Resolves once the PTY output stream has ended.
    pub async fn finished(&mut self) {
        let _ = (&mut self.task).await;
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for OutputPump {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Attaches an interactive process to a running isolation target.
#[async_trait]
pub trait PtyBridge: Send + Sync {
    /// Spawn a shell inside `container` on a fresh PTY of the given size.
    ///
    /// Fails with [`BoxshellError::Attach`]; never retries.
    async fn attach(
        &self,
        container: &ContainerHandle,
        size: TerminalSize,
    ) -> BoxshellResult<PtyHandle>;
}

/// [`PtyBridge`] that execs a shell in a container via the runtime CLI.
pub struct ExecPtyBridge {
    runtime: Arc<dyn ContainerRuntime>,
    shell: String,
}

impl ExecPtyBridge {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, shell: impl Into<String>) -> Self {
        Self {
            runtime,
            shell: shell.into(),
        }
    }
}

#[async_trait]
impl PtyBridge for ExecPtyBridge {
    async fn attach(
        &self,
        container: &ContainerHandle,
        size: TerminalSize,
    ) -> BoxshellResult<PtyHandle> {
        if !self.runtime.is_running(container.name()).await? {
            return Err(BoxshellError::Attach(format!(
                "container {} is not running",
                container.name()
            )));
        }

        let argv = self.runtime.exec_argv(container.name(), &self.shell);
        let spawned = tokio::task::spawn_blocking(move || spawn_pty(&argv, size))
            .await
            .map_err(|e| BoxshellError::Attach(format!("join error: {e}")))??;

        info!(container = %container.name(), cols = size.cols, rows = size.rows, "PTY spawned");
        Ok(spawned.into_handle(container.name(), size))
    }
}

struct SpawnedPty {
    master: Box<dyn MasterPty + Send>,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn portable_pty::Child + Send + Sync>,
}

fn pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn spawn_pty(argv: &[String], size: TerminalSize) -> BoxshellResult<SpawnedPty> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| BoxshellError::Attach("empty exec command".into()))?;

    let pair = native_pty_system()
        .openpty(pty_size(size))
        .map_err(|e| BoxshellError::Attach(format!("failed to open PTY: {e}")))?;

    let mut cmd = CommandBuilder::new(program);
    cmd.args(args);
    cmd.env("TERM", "xterm-256color");

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| BoxshellError::Attach(format!("failed to spawn {program}: {e}")))?;
    // Only the child keeps the slave open, so the reader sees EOF when it exits.
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| BoxshellError::Attach(format!("failed to clone PTY reader: {e}")))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| BoxshellError::Attach(format!("failed to take PTY writer: {e}")))?;

    Ok(SpawnedPty {
        master: pair.master,
        reader,
        writer,
        child,
    })
}

impl SpawnedPty {
    fn into_handle(self, container: &str, size: TerminalSize) -> PtyHandle {
        let SpawnedPty {
            master,
            mut reader,
            mut writer,
            mut child,
        } = self;

        let exited = Arc::new(AtomicBool::new(false));
        let killer = child.clone_killer();

        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(OUTPUT_CHANNEL_CAPACITY);
        let reader_container = container.to_string();
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if out_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(container = %reader_container, error = %e, "PTY read ended");
                        break;
                    }
                }
            }
        });

        let (in_tx, mut in_rx) = mpsc::channel::<Vec<u8>>(INPUT_CHANNEL_CAPACITY);
        let writer_container = container.to_string();
        tokio::task::spawn_blocking(move || {
            while let Some(data) = in_rx.blocking_recv() {
                if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                    debug!(container = %writer_container, error = %e, "PTY write ended");
                    break;
                }
            }
        });

        let wait_exited = exited.clone();
        let wait_container = container.to_string();
        tokio::task::spawn_blocking(move || {
            match child.wait() {
                Ok(status) => {
                    info!(container = %wait_container, code = status.exit_code(), "PTY child exited")
                }
                Err(e) => warn!(container = %wait_container, error = %e, "PTY wait failed"),
            }
            wait_exited.store(true, Ordering::SeqCst);
        });

        let control = ExecPtyControl {
            master,
            killer,
            exited,
        };
        PtyHandle::new(container, size, in_tx, out_rx, Box::new(control))
    }
}

struct ExecPtyControl {
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    exited: Arc<AtomicBool>,
}

impl PtyControl for ExecPtyControl {
    fn resize(&mut self, size: TerminalSize) -> BoxshellResult<()> {
        self.master
            .resize(pty_size(size))
            .map_err(|e| BoxshellError::Other(format!("PTY resize failed: {e}")))
    }

    fn kill(&mut self) -> BoxshellResult<()> {
        if self.exited.load(Ordering::SeqCst) {
            return Ok(());
        }
        match self.killer.kill() {
            Ok(()) => Ok(()),
            // Raced with a natural exit.
            Err(_) if self.exited.load(Ordering::SeqCst) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BoxshellError::Cleanup(format!("PTY kill: {e}"))),
        }
    }
}
