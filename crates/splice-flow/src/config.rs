//! Configuration merging and backup.
//!
//! Configuration stores are plain JSON objects. Three merge strategies are
//! supported:
//!
//! - `Override`: shallow replace of top-level keys
//! - `Merge`: recursive merge; object values merge key-by-key, anything else
//!   from `incoming` replaces `base`
//! - `Append`: array values concatenate; everything else behaves like
//!   `Override`
//!
//! Backups go through the scoped [`FileStore`] capability and are idempotent:
//! backing up a missing path records an empty handle, and restoring it
//! deletes whatever is there now.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use splice_core::FileStore;

use crate::error::Result;

/// Merge strategy for configuration updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Shallow replace of top-level keys.
    Override,
    /// Recursive merge of object values.
    Merge,
    /// Concatenate array values; otherwise override.
    Append,
}

/// Merges `incoming` into `base` under the given strategy.
#[must_use]
pub fn merge_configurations(
    base: &Map<String, Value>,
    incoming: &Map<String, Value>,
    strategy: MergeStrategy,
) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, incoming_value) in incoming {
        let replacement = match (strategy, merged.get(key)) {
            (MergeStrategy::Merge, Some(Value::Object(base_obj))) => {
                if let Value::Object(incoming_obj) = incoming_value {
                    Value::Object(merge_configurations(
                        base_obj,
                        incoming_obj,
                        MergeStrategy::Merge,
                    ))
                } else {
                    incoming_value.clone()
                }
            }
            (MergeStrategy::Append, Some(Value::Array(base_arr))) => {
                if let Value::Array(incoming_arr) = incoming_value {
                    let mut combined = base_arr.clone();
                    combined.extend(incoming_arr.iter().cloned());
                    Value::Array(combined)
                } else {
                    incoming_value.clone()
                }
            }
            _ => incoming_value.clone(),
        };
        merged.insert(key.clone(), replacement);
    }
    merged
}

/// One backed-up path and its content at backup time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    /// The backed-up path.
    pub path: String,
    /// Content at backup time; `None` when the path did not exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<Vec<u8>>,
}

/// An opaque handle describing a set of backed-up paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupHandle {
    /// Backed-up entries, in backup order.
    pub entries: Vec<BackupEntry>,
}

impl BackupHandle {
    /// Returns the number of backed-up paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing was backed up.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Backs up and restores files through the scoped file capability.
#[derive(Clone)]
pub struct ConfigMerger {
    files: Arc<dyn FileStore>,
}

impl ConfigMerger {
    /// Creates a merger over the given file store.
    #[must_use]
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self { files }
    }

    /// Backs up the given paths.
    ///
    /// A path with no current content is recorded with empty contents so
    /// that restore can delete whatever later appeared there. Safe to call
    /// repeatedly.
    ///
    /// # Errors
    ///
    /// Returns an error if a path is invalid or a read fails for a reason
    /// other than the file being absent.
    pub async fn backup<I, S>(&self, paths: I) -> Result<BackupHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let contents = if self.files.exists(path).await? {
                Some(self.files.read(path).await?)
            } else {
                None
            };
            entries.push(BackupEntry {
                path: path.to_string(),
                contents,
            });
        }
        Ok(BackupHandle { entries })
    }

    /// Restores every entry in the handle.
    ///
    /// Idempotent: restoring twice leaves the same state. Entries recorded
    /// without contents delete the current file (no-op if already absent).
    ///
    /// # Errors
    ///
    /// Returns an error if a write or delete fails.
    pub async fn restore(&self, handle: &BackupHandle) -> Result<()> {
        for entry in &handle.entries {
            match &entry.contents {
                Some(contents) => self.files.write(&entry.path, contents).await?,
                None => self.files.delete(&entry.path).await?,
            }
        }
        Ok(())
    }
}
