//! Filesystem guards shared by state persistence and the cgroup writer.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsGuardError {
    #[error("path {path:?} escapes base directory {base:?}")]
    PathOutsideBase { path: PathBuf, base: PathBuf },
    #[error("{0:?} is a symbolic link")]
    Symlink(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Lexically normalizes `path` (resolving `.` and `..` components) and
/// verifies the result still lives under `base`. Used before cgroup writes so
/// a crafted container id cannot steer the write outside the cgroup root.
pub fn validate_path_inside_base(path: &Path, base: &Path) -> Result<PathBuf, FsGuardError> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(FsGuardError::PathOutsideBase {
                        path: path.to_path_buf(),
                        base: base.to_path_buf(),
                    });
                }
            }
            other => normalized.push(other),
        }
    }
    if !normalized.starts_with(base) {
        return Err(FsGuardError::PathOutsideBase {
            path: path.to_path_buf(),
            base: base.to_path_buf(),
        });
    }
    Ok(normalized)
}

/// Fails when `path` is a symbolic link (or cannot be inspected at all).
pub async fn error_if_symlink(path: &Path) -> Result<(), FsGuardError> {
    let meta = tokio::fs::symlink_metadata(path).await?;
    if meta.file_type().is_symlink() {
        return Err(FsGuardError::Symlink(path.to_path_buf()));
    }
    Ok(())
}
