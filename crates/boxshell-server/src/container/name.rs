//! Container naming.
//!
//! Names are derived from the session ID so that two live sessions can never
//! collide, and carry a fixed prefix so sandbox containers are easy to tell
//! apart from unrelated containers on the host.

use boxshell_core::{BoxshellError, BoxshellResult, SessionId};

/// Namespace tag prepended to every sandbox container name.
pub const NAME_PREFIX: &str = "sess_";

const MAX_NAME_LEN: usize = 128;

/// Derive the container name for a session.
///
/// Characters that are not valid in resource names (the UUID hyphens) are
/// stripped.
pub fn container_name(session_id: &SessionId) -> String {
    let stripped: String = session_id
        .to_string()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    format!("{NAME_PREFIX}{stripped}")
}

/// Validate a container name.
///
/// Container names must start with an alphanumeric character or underscore
/// and contain only alphanumerics, hyphens, underscores and dots.
pub fn validate_container_name(name: &str) -> BoxshellResult<()> {
    let Some(first) = name.chars().next() else {
        return Err(BoxshellError::InvalidMessage(
            "container name cannot be empty".into(),
        ));
    };

    if name.len() > MAX_NAME_LEN {
        return Err(BoxshellError::InvalidMessage(format!(
            "container name exceeds maximum length of {MAX_NAME_LEN} characters"
        )));
    }

    if !first.is_ascii_alphanumeric() && first != '_' {
        return Err(BoxshellError::InvalidMessage(
            "container name must start with an alphanumeric character or underscore".into(),
        ));
    }

    let valid = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.';
    if !name.chars().all(valid) {
        return Err(BoxshellError::InvalidMessage(format!(
            "container name '{name}' contains invalid characters"
        )));
    }

    Ok(())
}
