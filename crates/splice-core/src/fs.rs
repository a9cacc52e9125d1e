//! Scoped file/config capability.
//!
//! Backup and restore never touch the filesystem directly; they go through
//! the [`FileStore`] trait so the orchestrator can be backed by a real
//! directory in production and by an in-memory map in tests.
//!
//! # Security
//!
//! Paths are relative to the store root. Absolute paths and traversal
//! segments (`..`) are rejected before any I/O happens.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Validates a store-relative path.
fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::PathOutOfScope {
            path: path.to_string(),
        });
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(Error::PathOutOfScope {
            path: path.to_string(),
        });
    }
    for segment in path.split(['/', '\\']) {
        if segment == ".." {
            return Err(Error::PathOutOfScope {
                path: path.to_string(),
            });
        }
    }
    Ok(())
}

/// Scoped read/write access to the files the orchestrator may touch.
///
/// All paths are relative to an implementation-defined root.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Reads a file's contents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] when the path has no content, or
    /// [`Error::PathOutOfScope`] for invalid paths.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Writes a file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error when the path is invalid or the write fails.
    async fn write(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Deletes a file. Deleting a missing file is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error when the path is invalid or the delete fails.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Returns true if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the path is invalid.
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Production store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalFiles {
    root: PathBuf,
}

impl LocalFiles {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl FileStore for LocalFiles {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::FileNotFound {
                path: path.to_string(),
            }),
            Err(source) => Err(Error::Io {
                path: path.to_string(),
                source,
            }),
        }
    }

    async fn write(&self, path: &str, contents: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| Error::Io {
                    path: path.to_string(),
                    source,
                })?;
        }
        tokio::fs::write(&full, contents)
            .await
            .map_err(|source| Error::Io {
                path: path.to_string(),
                source,
            })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Io {
                path: path.to_string(),
                source,
            }),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full).await.unwrap_or(false))
    }
}

/// In-memory store for tests.
///
/// Not suitable for production: no durability, single process only.
#[derive(Debug, Default)]
pub struct MemoryFiles {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryFiles {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a file synchronously (test setup convenience).
    pub fn seed(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        if let Ok(mut guard) = self.files.write() {
            guard.insert(path.into(), contents.into());
        }
    }

    /// Returns the number of stored files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Returns true when no files are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FileStore for MemoryFiles {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        validate_path(path)?;
        self.files
            .read()
            .ok()
            .and_then(|guard| guard.get(path).cloned())
            .ok_or_else(|| Error::FileNotFound {
                path: path.to_string(),
            })
    }

    async fn write(&self, path: &str, contents: &[u8]) -> Result<()> {
        validate_path(path)?;
        if let Ok(mut guard) = self.files.write() {
            guard.insert(path.to_string(), contents.to_vec());
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        if let Ok(mut guard) = self.files.write() {
            guard.remove(path);
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        validate_path(path)?;
        Ok(self
            .files
            .read()
            .map(|guard| guard.contains_key(path))
            .unwrap_or(false))
    }
}
