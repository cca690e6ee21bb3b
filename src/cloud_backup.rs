//! Abstract snapshot backup for cloud storage providers.
//!
//! A signed-in user's full note and tag collections are mirrored to a remote
//! blob keyed by `(user id, kind)`. The mirror is best-effort and never
//! authoritative: it is written only after a remote API write has already
//! succeeded, and every failure here is logged and swallowed because the
//! data is already persisted locally and remotely.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Which collection a snapshot blob holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Notes,
    Tags,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Notes => "notes",
            SnapshotKind::Tags => "tags",
        }
    }
}

/// Errors from snapshot backup operations.
///
/// Deliberately not convertible into `ScribeError`: callers log these and
/// move on, they never fail the primary operation.
#[derive(Debug)]
pub enum BackupError {
    /// Configuration is missing or invalid
    Config(String),
    /// Failed to push a snapshot
    Push(String),
    /// Failed to pull a snapshot
    Pull(String),
    /// Network or connectivity error
    Network(String),
    /// Authentication or authorization error
    Auth(String),
}

impl std::error::Error for BackupError {}

impl fmt::Display for BackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupError::Config(msg) => write!(f, "Configuration error: {}", msg),
            BackupError::Push(msg) => write!(f, "Snapshot push failed: {}", msg),
            BackupError::Pull(msg) => write!(f, "Snapshot pull failed: {}", msg),
            BackupError::Network(msg) => write!(f, "Network error: {}", msg),
            BackupError::Auth(msg) => write!(f, "Authentication error: {}", msg),
        }
    }
}

/// Trait for snapshot backup implementations.
///
/// Payloads are full JSON snapshot arrays serialized by the caller; the
/// store treats them as opaque bytes.
pub trait BackupStore: Send + Sync {
    /// Overwrite the snapshot blob for `(user_id, kind)`.
    fn push_snapshot(
        &self,
        user_id: &str,
        kind: SnapshotKind,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), BackupError>> + Send;

    /// Fetch the snapshot blob for `(user_id, kind)`, or `None` if the user
    /// has never pushed one.
    fn pull_snapshot(
        &self,
        user_id: &str,
        kind: SnapshotKind,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, BackupError>> + Send;

    /// Provider identifier (e.g. "s3", "memory").
    fn provider_name(&self) -> &'static str;
}

/// Build the blob key for a snapshot: `{prefix}/{user_id}/{kind}.json`.
pub fn snapshot_key(prefix: Option<&str>, user_id: &str, kind: SnapshotKind) -> String {
    let leaf = format!("{}/{}.json", user_id, kind.as_str());
    match prefix {
        Some(p) => {
            let p = p.trim_end_matches('/');
            if p.is_empty() {
                leaf
            } else {
                format!("{}/{}", p, leaf)
            }
        }
        None => leaf,
    }
}

/// In-memory backup store for tests and for running without a provider.
#[derive(Default)]
pub struct MemoryBackupStore {
    blobs: Mutex<HashMap<(String, SnapshotKind), Vec<u8>>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackupStore for MemoryBackupStore {
    async fn push_snapshot(
        &self,
        user_id: &str,
        kind: SnapshotKind,
        payload: &[u8],
    ) -> Result<(), BackupError> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| BackupError::Push("store lock poisoned".to_string()))?;
        blobs.insert((user_id.to_string(), kind), payload.to_vec());
        Ok(())
    }

    async fn pull_snapshot(
        &self,
        user_id: &str,
        kind: SnapshotKind,
    ) -> Result<Option<Vec<u8>>, BackupError> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| BackupError::Pull("store lock poisoned".to_string()))?;
        Ok(blobs.get(&(user_id.to_string(), kind)).cloned())
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
