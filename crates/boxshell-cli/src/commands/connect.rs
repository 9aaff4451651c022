//! `boxshell connect <url>` — open an interactive sandboxed shell.
//!
//! Connects to the server's WebSocket endpoint, enters raw terminal mode, and
//! pipes keystrokes to the remote PTY and PTY output to stdout. Terminal
//! resize events become resize control messages. Ctrl+] disconnects.

use anyhow::{bail, Context, Result};
use boxshell_core::{resize_message, ServerNotice, TerminalSize};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Stylize;
use futures_util::{SinkExt, StreamExt};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::terminal as term;

/// How often the input thread checks whether it should stop.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How an interactive session ended.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    /// The user pressed Ctrl+].
    Detached,
    /// The server closed the connection (shell exited).
    Closed,
    /// The server reported a startup failure.
    ServerError(String),
}

/// Run an interactive session against `url`.
pub async fn run(url: &str, project: Option<&str>) -> Result<()> {
    let url = session_url(url, project)?;
    info!(url = %url, "connecting");

    let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    let (mut sink, mut stream) = ws.split();

    let size = term::terminal_size();
    debug!(cols = size.cols, rows = size.rows, "terminal size");
    if size != TerminalSize::default() {
        sink.send(Message::Text(resize_message(size)?.into()))
            .await
            .context("failed to send initial size")?;
    }

    let guard = term::RawModeGuard::enter()?;

    let (tx_input, mut rx_input) = mpsc::channel::<Vec<u8>>(64);
    let (tx_resize, mut rx_resize) = mpsc::channel::<(u16, u16)>(8);
    let (tx_quit, mut rx_quit) = mpsc::channel::<()>(1);
    let stop = Arc::new(AtomicBool::new(false));

    // crossterm events are blocking; poll so the thread notices `stop`.
    let input_stop = stop.clone();
    let input_handle = tokio::task::spawn_blocking(move || {
        while !input_stop.load(Ordering::Relaxed) {
            match event::poll(EVENT_POLL_INTERVAL) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => {
                    warn!("crossterm poll error: {e}");
                    break;
                }
            }
            match event::read() {
                Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => {
                    if is_escape(&key) {
                        let _ = tx_quit.blocking_send(());
                        break;
                    }
                    if let Some(bytes) = key_event_to_bytes(&key) {
                        if tx_input.blocking_send(bytes).is_err() {
                            break;
                        }
                    }
                }
                Ok(Event::Paste(text)) => {
                    if tx_input.blocking_send(text.into_bytes()).is_err() {
                        break;
                    }
                }
                Ok(Event::Resize(cols, rows)) => {
                    let _ = tx_resize.blocking_send((cols, rows));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("crossterm event error: {e}");
                    break;
                }
            }
        }
    });

    let mut stdout = std::io::stdout();
    let outcome = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Binary(data))) => {
                    stdout.write_all(&data)?;
                    stdout.flush()?;
                }
                Some(Ok(Message::Text(text))) => match ServerNotice::parse(text.as_bytes()) {
                    Some(ServerNotice::Error { message }) => break Outcome::ServerError(message),
                    None => {
                        stdout.write_all(text.as_bytes())?;
                        stdout.flush()?;
                    }
                },
                Some(Ok(Message::Close(_))) | None => break Outcome::Closed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket read ended");
                    break Outcome::Closed;
                }
            },
            Some(bytes) = rx_input.recv() => {
                sink.send(Message::Binary(bytes.into()))
                    .await
                    .context("failed to send input")?;
            }
            Some((cols, rows)) = rx_resize.recv() => {
                if let Some(size) = TerminalSize::new(cols, rows) {
                    sink.send(Message::Text(resize_message(size)?.into()))
                        .await
                        .context("failed to send resize")?;
                }
            }
            _ = rx_quit.recv() => {
                let _ = sink.send(Message::Close(None)).await;
                break Outcome::Detached;
            }
        }
    };

    stop.store(true, Ordering::Relaxed);
    drop(guard);
    let _ = input_handle.await;
    info!(?outcome, "session ended");

    match outcome {
        Outcome::Detached => {
            eprintln!("\r\nboxshell: disconnected.");
            Ok(())
        }
        Outcome::Closed => {
            eprintln!("\r\nboxshell: connection closed.");
            Ok(())
        }
        Outcome::ServerError(message) => {
            eprintln!("{}", format!("boxshell: {message}").red());
            bail!("session failed to start")
        }
    }
}

/// Append `?project=<id>` to `url`, checking the scheme.
fn session_url(url: &str, project: Option<&str>) -> Result<String> {
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        bail!("expected a ws:// or wss:// URL, got {url}");
    }
    let Some(project) = project else {
        return Ok(url.to_string());
    };
    if project.is_empty()
        || !project
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        bail!("invalid project id {project:?}");
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    Ok(format!("{url}{sep}project={project}"))
}

/// Ctrl+] ends the session, like telnet.
fn is_escape(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char(']')
}

/// Convert a crossterm key event to the bytes a terminal would send.
fn key_event_to_bytes(event: &KeyEvent) -> Option<Vec<u8>> {
    let mut bytes = match event.code {
        KeyCode::Char(c) if event.modifiers.contains(KeyModifiers::CONTROL) => {
            match c.to_ascii_lowercase() {
                // Ctrl+A = 0x01 ... Ctrl+Z = 0x1a
                l @ 'a'..='z' => vec![l as u8 - b'a' + 1],
                '@' | ' ' => vec![0x00],
                '[' => vec![0x1b],
                '\\' => vec![0x1c],
                '^' => vec![0x1e],
                '_' => vec![0x1f],
                _ => return None,
            }
        }
        KeyCode::Char(c) => {
            let mut buf = [0u8; 4];
            c.encode_utf8(&mut buf).as_bytes().to_vec()
        }
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::PageUp => b"\x1b[5~".to_vec(),
        KeyCode::PageDown => b"\x1b[6~".to_vec(),
        KeyCode::Insert => b"\x1b[2~".to_vec(),
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        KeyCode::F(n) => {
            let seq: &[u8] = match n {
                1 => b"\x1bOP",
                2 => b"\x1bOQ",
                3 => b"\x1bOR",
                4 => b"\x1bOS",
                5 => b"\x1b[15~",
                6 => b"\x1b[17~",
                7 => b"\x1b[18~",
                8 => b"\x1b[19~",
                9 => b"\x1b[20~",
                10 => b"\x1b[21~",
                11 => b"\x1b[23~",
                12 => b"\x1b[24~",
                _ => return None,
            };
            seq.to_vec()
        }
        _ => return None,
    };

    // Meta sends ESC first.
    if event.modifiers.contains(KeyModifiers::ALT) {
        bytes.insert(0, 0x1b);
    }
    Some(bytes)
}
