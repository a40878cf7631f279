//! Course directories on the shared storage volume.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Numeric owner applied to provisioned directories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

impl Ownership {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }
}

/// Errors that can occur while provisioning directories.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to set ownership of '{path}': {source}")]
    SetOwnership {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to provision '{path}': only plain path segments are allowed")]
    InvalidPath { path: PathBuf },

    #[error("Directory ownership is not supported on this platform")]
    Unsupported,
}

/// Ensures directories exist with the required ownership
#[async_trait]
pub trait DirectoryProvisioner: Send + Sync {
    /// Create `path` and any missing ancestors, then chown `path` and its
    /// immediate parent. Succeeds when the directory already exists.
    async fn ensure_directory(&self, path: &Path, owner: Ownership) -> Result<(), StorageError>;
}

/// Provisioner writing to the local filesystem.
///
/// Logical paths (`/<mnt_root>/...`) are resolved below `base`, the place the
/// shared volume's parent is visible to this process (`/` in production).
#[derive(Debug, Clone)]
pub struct LocalDirectoryProvisioner {
    base: PathBuf,
}

impl LocalDirectoryProvisioner {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Physical location of a logical path.
    ///
    /// `..` segments, a leading `.` and prefixes are rejected so the
    /// directory created is always the one the logical path names.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, StorageError> {
        let mut relative = PathBuf::new();
        for component in path.components() {
            match component {
                Component::RootDir => {}
                Component::Normal(segment) => relative.push(segment),
                Component::CurDir | Component::ParentDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath {
                        path: path.to_path_buf(),
                    });
                }
            }
        }
        Ok(self.base.join(relative))
    }
}

#[cfg(unix)]
fn chown(path: &Path, owner: Ownership) -> Result<(), StorageError> {
    std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid)).map_err(|source| {
        StorageError::SetOwnership {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn chown(_path: &Path, _owner: Ownership) -> Result<(), StorageError> {
    Err(StorageError::Unsupported)
}

#[async_trait]
impl DirectoryProvisioner for LocalDirectoryProvisioner {
    async fn ensure_directory(&self, path: &Path, owner: Ownership) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        debug!(
            path = %target.display(),
            uid = owner.uid,
            gid = owner.gid,
            "Ensuring directory with ownership"
        );

        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|source| StorageError::CreateDirectory {
                path: target.clone(),
                source,
            })?;

        chown(&target, owner)?;
        if let Some(parent) = target.parent() {
            chown(parent, owner)?;
        }
        Ok(())
    }
}

/// Provisioner that only records requests; for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct RecordingProvisioner {
    requests: Arc<Mutex<Vec<(PathBuf, Ownership)>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn requests(&self) -> Vec<(PathBuf, Ownership)> {
        self.requests.lock().await.clone()
    }

    /// Make every following request fail with a permission error
    pub async fn set_failing(&self, fail: bool) {
        *self.fail.lock().await = fail;
    }
}

#[async_trait]
impl DirectoryProvisioner for RecordingProvisioner {
    async fn ensure_directory(&self, path: &Path, owner: Ownership) -> Result<(), StorageError> {
        self.requests.lock().await.push((path.to_path_buf(), owner));
        if *self.fail.lock().await {
            return Err(StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "injected failure"),
            });
        }
        Ok(())
    }
}
