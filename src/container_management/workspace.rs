use log::{debug, info};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;

use crate::error_handling::types::WorkspaceError;

/// Throwaway host directory holding a project's files until they are copied
/// into a container. Deleted on drop.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Writes `files` (relative path -> content) into a fresh temp directory.
    ///
    /// Paths are normalised: backslashes become `/`, leading slashes are
    /// stripped. Anything still absolute or containing `..` is rejected.
    pub fn materialize(files: &BTreeMap<String, String>) -> Result<Self, WorkspaceError> {
        let dir = tempfile::Builder::new().prefix("sandboxd-").tempdir()?;
        for (raw_path, content) in files {
            let relative = normalize_path(raw_path)?;
            let full_path = dir.path().join(&relative);
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full_path, content)?;
            debug!("Materialized {} ({} bytes)", relative.display(), content.len());
        }
        info!(
            "Materialized {} file(s) into {}",
            files.len(),
            dir.path().display()
        );
        Ok(Self { dir })
    }

    /// Empty workspace, used as a landing directory for `copy_out`.
    pub fn empty() -> Result<Self, WorkspaceError> {
        let dir = tempfile::Builder::new().prefix("sandboxd-").tempdir()?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Turns a caller-supplied project path into a safe relative path.
pub fn normalize_path(raw: &str) -> Result<PathBuf, WorkspaceError> {
    let unified = raw.replace('\\', "/");
    let trimmed = unified.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(WorkspaceError::InvalidPath(raw.to_string()));
    }

    let mut clean = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(WorkspaceError::InvalidPath(raw.to_string()));
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(WorkspaceError::InvalidPath(raw.to_string()));
    }
    Ok(clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_files_are_written() {
        let mut files = BTreeMap::new();
        files.insert("main.py".to_string(), "print('hi')\n".to_string());
        files.insert("pkg/util.py".to_string(), "X = 1\n".to_string());

        let workspace = Workspace::materialize(&files).unwrap();
        let main = std::fs::read_to_string(workspace.path().join("main.py")).unwrap();
        assert_eq!(main, "print('hi')\n");
        assert!(workspace.path().join("pkg/util.py").is_file());
    }

    #[test]
    fn directory_is_removed_on_drop() {
        let workspace = Workspace::empty().unwrap();
        let path = workspace.path().to_path_buf();
        assert!(path.is_dir());
        drop(workspace);
        assert!(!path.exists());
    }

    #[test]
    fn windows_and_rooted_paths_are_normalised() {
        assert_eq!(
            normalize_path("src\\app.js").unwrap(),
            PathBuf::from("src/app.js")
        );
        assert_eq!(
            normalize_path("/main.py").unwrap(),
            PathBuf::from("main.py")
        );
        assert_eq!(
            normalize_path("./a/./b.txt").unwrap(),
            PathBuf::from("a/b.txt")
        );
    }

    #[test]
    fn escaping_paths_are_rejected() {
        for bad in ["../etc/passwd", "a/../../b", "", "/", "."] {
            assert!(
                matches!(normalize_path(bad), Err(WorkspaceError::InvalidPath(_))),
                "{} should be rejected",
                bad
            );
        }
    }
}
