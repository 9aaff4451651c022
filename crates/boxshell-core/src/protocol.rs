//! Wire protocol spoken over the persistent terminal connection.
//!
//! Client → server frames are either a resize control message, recognized by
//! the fixed leading marker `{"type":"resize"`, or raw terminal input that is
//! forwarded to the PTY byte-for-byte. Server → client frames are raw PTY
//! output, except for the single error notice sent when a session fails to
//! start.

use crate::error::BoxshellResult;
use serde::{Deserialize, Serialize};

/// Leading bytes that mark a resize control message.
pub const RESIZE_MARKER: &[u8] = br#"{"type":"resize""#;

/// Initial terminal width for a freshly attached shell.
pub const DEFAULT_COLS: u16 = 80;
/// Initial terminal height for a freshly attached shell.
pub const DEFAULT_ROWS: u16 = 24;

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    /// Build a size, rejecting zero-width or zero-height terminals.
    pub fn new(cols: u16, rows: u16) -> Option<Self> {
        if cols == 0 || rows == 0 {
            return None;
        }
        Some(Self { cols, rows })
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self {
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

/// A classified client → server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Keystrokes or pasted bytes destined for the PTY.
    Input(Vec<u8>),
    /// Terminal dimension change.
    Resize(TerminalSize),
    /// Frame carried the resize marker but could not be used.
    Malformed(String),
}

#[derive(Deserialize)]
struct ResizeFields {
    cols: u64,
    rows: u64,
}

/// Classify one inbound frame payload.
///
/// Anything that does not start with [`RESIZE_MARKER`] is raw input, even if
/// it happens to be valid JSON.
pub fn classify(payload: &[u8]) -> Inbound {
    if !payload.starts_with(RESIZE_MARKER) {
        return Inbound::Input(payload.to_vec());
    }

    let fields: ResizeFields = match serde_json::from_slice(payload) {
        Ok(f) => f,
        Err(e) => return Inbound::Malformed(format!("resize parse error: {e}")),
    };

    let cols = u16::try_from(fields.cols).ok();
    let rows = u16::try_from(fields.rows).ok();
    match (cols, rows) {
        (Some(c), Some(r)) => match TerminalSize::new(c, r) {
            Some(size) => Inbound::Resize(size),
            None => Inbound::Malformed(format!("zero terminal dimension {c}x{r}")),
        },
        _ => Inbound::Malformed(format!(
            "terminal dimension out of range {}x{}",
            fields.cols, fields.rows
        )),
    }
}

#[derive(Serialize)]
struct ResizeWire {
    #[serde(rename = "type")]
    kind: &'static str,
    cols: u16,
    rows: u16,
}

/// Encode a resize control message. The output always begins with [`RESIZE_MARKER`].
pub fn resize_message(size: TerminalSize) -> BoxshellResult<String> {
    let wire = ResizeWire {
        kind: "resize",
        cols: size.cols,
        rows: size.rows,
    };
    Ok(serde_json::to_string(&wire)?)
}

/// Structured server → client messages. Everything else is raw PTY output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerNotice {
    /// Session could not be started; the connection closes after this.
    Error { message: String },
}

impl ServerNotice {
    pub fn error(message: impl Into<String>) -> Self {
        ServerNotice::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> BoxshellResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Try to read a notice out of a server frame. Returns `None` for ordinary output.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let trimmed = data.trim_ascii_start();
        if !trimmed.starts_with(b"{") {
            return None;
        }
        serde_json::from_slice(trimmed).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_bytes_are_input() {
        assert_eq!(classify(b"ls\n"), Inbound::Input(b"ls\n".to_vec()));
        assert_eq!(classify(b""), Inbound::Input(Vec::new()));
        assert_eq!(classify(&[0x1b, b'[', b'A']), Inbound::Input(vec![0x1b, b'[', b'A']));
    }

    #[test]
    fn json_without_marker_is_input() {
        // Field order matters: only the exact leading marker is a control message.
        let payload = br#"{"cols":100,"rows":40,"type":"resize"}"#;
        assert_eq!(classify(payload), Inbound::Input(payload.to_vec()));
        let payload = br#"{"type":"other"}"#;
        assert_eq!(classify(payload), Inbound::Input(payload.to_vec()));
    }

    #[test]
    fn resize_is_recognized() {
        let payload = br#"{"type":"resize","cols":120,"rows":40}"#;
        assert_eq!(
            classify(payload),
            Inbound::Resize(TerminalSize { cols: 120, rows: 40 })
        );
    }

    #[test]
    fn bad_resize_is_malformed() {
        assert!(matches!(
            classify(br#"{"type":"resize","cols":"wide","rows":40}"#),
            Inbound::Malformed(_)
        ));
        assert!(matches!(
            classify(br#"{"type":"resize","cols":0,"rows":40}"#),
            Inbound::Malformed(_)
        ));
        assert!(matches!(
            classify(br#"{"type":"resize","cols":70000,"rows":40}"#),
            Inbound::Malformed(_)
        ));
        assert!(matches!(
            classify(br#"{"type":"resize","cols":80"#),
            Inbound::Malformed(_)
        ));
    }

    #[test]
    fn encoded_resize_carries_marker() {
        let size = TerminalSize::new(132, 43).unwrap();
        let msg = resize_message(size).unwrap();
        assert!(msg.as_bytes().starts_with(RESIZE_MARKER));
        assert_eq!(classify(msg.as_bytes()), Inbound::Resize(size));
    }

    #[test]
    fn error_notice_shape() {
        let json = ServerNotice::error("Failed to start container: boom")
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","message":"Failed to start container: boom"}"#
        );
    }

    #[test]
    fn notice_parse_ignores_output() {
        assert_eq!(ServerNotice::parse(b"total 0\r\n"), None);
        assert_eq!(ServerNotice::parse(b"{ not json"), None);
        assert_eq!(
            ServerNotice::parse(br#" {"type":"error","message":"x"}"#),
            Some(ServerNotice::error("x"))
        );
    }

    #[test]
    fn zero_size_rejected() {
        assert!(TerminalSize::new(0, 24).is_none());
        assert!(TerminalSize::new(80, 0).is_none());
        assert_eq!(TerminalSize::default(), TerminalSize { cols: 80, rows: 24 });
    }
}
