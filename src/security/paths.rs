use std::path::{Component, Path, PathBuf};

use crate::core::errors::AgentError;

/// Resolve a user-supplied path against the workspace root and verify the
/// result stays inside it.
///
/// Absolute inputs are allowed only when they already satisfy the same
/// containment check. The returned path is lexically normalized; it does not
/// need to exist yet (write_file creates parents).
pub fn safe_path(workspace: &Path, user_path: &str) -> Result<PathBuf, AgentError> {
    if user_path.contains('\0') {
        return Err(AgentError::security("path contains NUL byte"));
    }

    let requested = Path::new(user_path);
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        workspace.join(requested)
    };

    let normalized = normalize(&joined);
    let root = normalize(workspace);

    if normalized == root || normalized.starts_with(&root) {
        Ok(normalized)
    } else {
        Err(AgentError::security(format!(
            "path '{}' escapes the workspace",
            user_path
        )))
    }
}

/// Lexical normalization: resolves `.` and `..` components without touching
/// the filesystem. `..` at the root is dropped rather than underflowing.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws() -> PathBuf {
        PathBuf::from("/srv/agent/workspace")
    }

    #[test]
    fn relative_path_resolves_inside_workspace() {
        let p = safe_path(&ws(), "notes/today.md").unwrap();
        assert_eq!(p, PathBuf::from("/srv/agent/workspace/notes/today.md"));
    }

    #[test]
    fn workspace_root_itself_is_allowed() {
        let p = safe_path(&ws(), ".").unwrap();
        assert_eq!(p, ws());
    }

    #[test]
    fn dotdot_escape_is_rejected() {
        assert!(safe_path(&ws(), "../outside.txt").is_err());
        assert!(safe_path(&ws(), "a/../../../etc/passwd").is_err());
    }

    #[test]
    fn dotdot_inside_workspace_is_allowed() {
        let p = safe_path(&ws(), "a/b/../c.txt").unwrap();
        assert_eq!(p, PathBuf::from("/srv/agent/workspace/a/c.txt"));
    }

    #[test]
    fn absolute_path_inside_workspace_is_allowed() {
        let p = safe_path(&ws(), "/srv/agent/workspace/deep/file").unwrap();
        assert!(p.starts_with(ws()));
    }

    #[test]
    fn absolute_path_outside_workspace_is_rejected() {
        assert!(safe_path(&ws(), "/etc/passwd").is_err());
        assert!(safe_path(&ws(), "/srv/agent/workspace2/file").is_err());
    }

    #[test]
    fn nul_byte_is_rejected() {
        assert!(safe_path(&ws(), "evil\0.txt").is_err());
    }

    #[test]
    fn prefix_sibling_directory_is_rejected() {
        // "/srv/agent/workspace-old" shares a string prefix but is outside.
        assert!(safe_path(&ws(), "/srv/agent/workspace-old/x").is_err());
    }
}
