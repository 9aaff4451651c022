//! Maps a caller-supplied project id to a working directory inside the
//! sandbox. Nothing here touches the host filesystem.

use tracing::debug;

/// Longest accepted project id.
const MAX_PROJECT_ID_LEN: usize = 64;

/// Resolves a project identifier to a container working directory.
pub trait ProjectResolver: Send + Sync {
    /// `None` means "use the image's default working directory".
    fn resolve(&self, project: &str) -> Option<String>;
}

/// Places every project under one root directory: `<root>/<id>`.
pub struct WorkspaceResolver {
    root: String,
}

impl WorkspaceResolver {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let trimmed = root.trim_end_matches('/');
        Self {
            root: if trimmed.is_empty() {
                String::new()
            } else {
                trimmed.to_string()
            },
        }
    }
}

fn is_valid_project_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_PROJECT_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

impl ProjectResolver for WorkspaceResolver {
    fn resolve(&self, project: &str) -> Option<String> {
        if !is_valid_project_id(project) {
            debug!(project = %project, "ignoring invalid project id");
            return None;
        }
        Some(format!("{}/{}", self.root, project))
    }
}
