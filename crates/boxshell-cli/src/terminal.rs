//! Terminal utilities for raw mode and terminal size.
//!
//! Wraps crossterm's terminal operations and provides a RAII guard that
//! restores the terminal state on drop.

use anyhow::{Context, Result};
use boxshell_core::TerminalSize;
use crossterm::terminal;

/// RAII guard that restores cooked mode on drop.
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    pub fn enter() -> Result<Self> {
        terminal::enable_raw_mode().context("failed to enable raw terminal mode")?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        // Nothing useful to do on failure here.
        let _ = terminal::disable_raw_mode();
    }
}

/// Current terminal size, falling back to 80×24 when it cannot be read.
pub fn terminal_size() -> TerminalSize {
    terminal::size()
        .ok()
        .and_then(|(cols, rows)| TerminalSize::new(cols, rows))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_size_is_never_zero() {
        // Under CI or a pipe this is the fallback.
        let size = terminal_size();
        assert!(size.cols > 0);
        assert!(size.rows > 0);
    }
}
