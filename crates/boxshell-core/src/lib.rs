//! boxshell-core: Shared protocol library for the sandboxed terminal.
//!
//! Provides the client/server wire messages (raw input vs. resize control,
//! error notices), session identity, and the error taxonomy shared by the
//! server and the native client.

pub mod error;
pub mod protocol;
pub mod session_id;

// Re-export commonly used items at crate root.
pub use error::{BoxshellError, BoxshellResult};
pub use protocol::{classify, resize_message, Inbound, ServerNotice, TerminalSize, RESIZE_MARKER};
pub use session_id::SessionId;
