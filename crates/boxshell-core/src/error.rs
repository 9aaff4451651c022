use thiserror::Error;

/// Errors produced by the boxshell subsystem.
///
/// Only `Provision` and `Attach` are ever surfaced to a client; the rendered
/// message of those two variants is the text of the error notice.
#[derive(Debug, Error)]
pub enum BoxshellError {
    #[error("Failed to start container: {0}")]
    Provision(String),

    #[error("PTY failed: {0}")]
    Attach(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("cleanup failed: {0}")]
    Cleanup(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("server at capacity ({0} sessions)")]
    Capacity(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl BoxshellError {
    /// Whether this error is reported to the client before the connection closes.
    pub fn is_client_visible(&self) -> bool {
        matches!(
            self,
            BoxshellError::Provision(_) | BoxshellError::Attach(_) | BoxshellError::Capacity(_)
        )
    }
}

impl From<serde_json::Error> for BoxshellError {
    fn from(e: serde_json::Error) -> Self {
        BoxshellError::InvalidMessage(e.to_string())
    }
}

pub type BoxshellResult<T> = Result<T, BoxshellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_failures_render_client_text() {
        let e = BoxshellError::Provision("docker: not found".into());
        assert_eq!(e.to_string(), "Failed to start container: docker: not found");
        let e = BoxshellError::Attach("no such file: /bin/sh".into());
        assert_eq!(e.to_string(), "PTY failed: no such file: /bin/sh");
    }

    #[test]
    fn only_startup_errors_are_client_visible() {
        assert!(BoxshellError::Provision("x".into()).is_client_visible());
        assert!(BoxshellError::Attach("x".into()).is_client_visible());
        assert!(BoxshellError::Capacity(10).is_client_visible());
        assert!(!BoxshellError::Cleanup("x".into()).is_client_visible());
        assert!(!BoxshellError::Transport("x".into()).is_client_visible());
        assert!(!BoxshellError::Other("x".into()).is_client_visible());
    }
}
