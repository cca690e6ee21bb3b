//! ScribeCore - offline-first sync and persistence core for the Scribe
//! note-taking application.
//!
//! This library provides:
//! - Data models (Note, Tag, NoteTag, NoteWithTags) with explicit
//!   draft/patch types for creates and partial updates
//! - A SQLite-backed local store (the client-side cache)
//! - An HTTP client for the authoritative notes backend
//! - Best-effort cloud snapshot backup for signed-in users
//! - The connectivity policy and the sync orchestrator that ties the
//!   pieces together with offline fallback and placeholder reconciliation
//! - Export rendering (text, Markdown, JSON) shared by server and client
//! - A debounced auto-save task
//!
//! UI layers (web, desktop, mobile) sit on top of [`sync::SyncService`] and
//! never talk to the stores directly.
//!
//! # Feature Flags
//!
//! - `server` (default): the in-memory authoritative repository and its
//!   axum HTTP surface. Clients embedding only the offline core can disable
//!   it.
//! - `s3-backup`: AWS SDK implementation of the backup store, for S3 and
//!   S3-compatible providers.

pub mod api_client;
pub mod autosave;
pub mod cloud_backup;
#[cfg(feature = "s3-backup")]
pub mod cloud_backup_s3;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod export;
pub mod local_store;
pub mod models;
#[cfg(feature = "server")]
pub mod repository;
#[cfg(feature = "server")]
pub mod server;
pub mod sync;
pub mod validation;

// Re-export commonly used types
pub use api_client::{ApiClient, ExportPayload, RemoteApi};
pub use autosave::{AutosaveConfig, Autosaver};
pub use cloud_backup::{BackupError, BackupStore, MemoryBackupStore, SnapshotKind};
#[cfg(feature = "s3-backup")]
pub use cloud_backup_s3::{S3BackupStore, S3Config};
pub use config::Config;
pub use connectivity::{Connectivity, ConnectivityGuard, ConnectivityProbe};
pub use error::{ScribeError, ScribeResult};
pub use export::ExportFormat;
pub use local_store::LocalStore;
pub use models::{Note, NoteDraft, NotePatch, NoteTag, NoteWithTags, Tag, TagDraft, TagPatch};
#[cfg(feature = "server")]
pub use repository::Repository;
pub use sync::{FlushReport, Origin, SyncOutcome, SyncService};
