//! Sync orchestration: every read and write intent wrapped in a fallback
//! chain across the remote API, the local store, and the cloud backup.
//!
//! The rules, applied uniformly:
//! - offline: serve and mutate the local store only, never touch the network
//! - online, remote success: write the server record through to the local
//!   store (full replace), then best-effort mirror snapshots to the backup
//! - online, network failure: degrade to the local store; the intent is
//!   never lost and never surfaces as an error
//! - online, application rejection: propagate unchanged with no local
//!   mutation, so local state cannot diverge from a rejected request
//!
//! Every operation reports its provenance so callers can tell a live result
//! from a degraded one instead of inferring it from side effects.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use crate::api_client::{ExportPayload, RemoteApi};
use crate::cloud_backup::{BackupStore, MemoryBackupStore, SnapshotKind};
use crate::connectivity::ConnectivityProbe;
use crate::error::{ScribeError, ScribeResult};
use crate::export::{self, ExportFormat};
use crate::local_store::LocalStore;
use crate::models::{Note, NoteDraft, NotePatch, NoteWithTags, Tag, TagDraft, TagPatch};
use crate::validation;

/// Where a result came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Served by the authoritative backend
    Live,
    /// Connectivity policy said offline; the network was never attempted
    Offline,
    /// The network was attempted and failed; served from the local store
    Degraded { reason: String },
}

impl Origin {
    /// True when the result was served from the local store.
    pub fn is_local(&self) -> bool {
        !matches!(self, Origin::Live)
    }
}

/// An operation result annotated with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome<T> {
    pub value: T,
    pub origin: Origin,
}

impl<T> SyncOutcome<T> {
    fn live(value: T) -> Self {
        Self { value, origin: Origin::Live }
    }

    fn offline(value: T) -> Self {
        Self { value, origin: Origin::Offline }
    }

    fn degraded(value: T, reason: impl Into<String>) -> Self {
        Self {
            value,
            origin: Origin::Degraded { reason: reason.into() },
        }
    }
}

/// Result of reconciling pending offline creates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Placeholders replaced by server-assigned records
    pub reconciled: usize,
    /// Creates the server rejected (kept locally, no longer retried)
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Synthesize a placeholder id for an entity created while offline.
/// Negative, so it can never collide with a server-assigned id; random, so
/// concurrent offline creates are overwhelmingly unlikely to collide.
fn placeholder_id() -> i64 {
    -(rand::thread_rng().gen_range(1..=u32::MAX as i64))
}

/// Offline-first orchestrator over the remote API, the local store, the
/// connectivity policy, and an optional cloud backup for a signed-in user.
///
/// All collaborators are passed in explicitly; a fresh set per test gives
/// full isolation.
pub struct SyncService<R, C, B = MemoryBackupStore> {
    api: R,
    local: Arc<Mutex<LocalStore>>,
    connectivity: C,
    backup: Option<B>,
    account: Option<String>,
}

impl<R, C> SyncService<R, C>
where
    R: RemoteApi,
    C: ConnectivityProbe,
{
    /// Orchestrator without cloud backup (signed-out operation).
    pub fn new(api: R, local: Arc<Mutex<LocalStore>>, connectivity: C) -> Self {
        Self {
            api,
            local,
            connectivity,
            backup: None,
            account: None,
        }
    }
}

impl<R, C, B> SyncService<R, C, B>
where
    R: RemoteApi,
    C: ConnectivityProbe,
    B: BackupStore,
{
    /// Orchestrator for a signed-in user: successful remote writes are
    /// mirrored to the backup store under the account id.
    pub fn with_backup(
        api: R,
        local: Arc<Mutex<LocalStore>>,
        connectivity: C,
        backup: B,
        account: impl Into<String>,
    ) -> Self {
        Self {
            api,
            local,
            connectivity,
            backup: Some(backup),
            account: Some(account.into()),
        }
    }

    fn local<T>(&self, f: impl FnOnce(&mut LocalStore) -> ScribeResult<T>) -> ScribeResult<T> {
        let mut store = self
            .local
            .lock()
            .map_err(|_| ScribeError::Other("local store lock poisoned".to_string()))?;
        f(&mut store)
    }

    /// Last successful sync time, for status display.
    pub fn last_sync(&self) -> Option<chrono::DateTime<Utc>> {
        self.local.lock().ok().and_then(|store| store.last_sync())
    }

    // Reads

    pub async fn list_notes(
        &self,
        include_deleted: bool,
    ) -> ScribeResult<SyncOutcome<Vec<NoteWithTags>>> {
        if self.connectivity.is_offline() {
            return Ok(SyncOutcome::offline(
                self.local(|s| s.notes_with_tags(include_deleted))?,
            ));
        }

        match self.api.list_notes(include_deleted).await {
            Ok(views) => {
                self.local(|s| {
                    for view in &views {
                        s.store_note_with_tags(view)?;
                    }
                    s.set_last_sync(Utc::now())
                })?;
                Ok(SyncOutcome::live(views))
            }
            Err(e) if e.is_network() => {
                tracing::warn!("list_notes degraded to local store: {}", e);
                Ok(SyncOutcome::degraded(
                    self.local(|s| s.notes_with_tags(include_deleted))?,
                    e.to_string(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_note(&self, id: i64) -> ScribeResult<SyncOutcome<NoteWithTags>> {
        if self.connectivity.is_offline() {
            let view = self
                .local(|s| s.note_with_tags(id))?
                .ok_or_else(|| ScribeError::NotFound(format!("note {} not found", id)))?;
            return Ok(SyncOutcome::offline(view));
        }

        match self.api.get_note(id).await {
            Ok(view) => {
                self.local(|s| {
                    s.store_note_with_tags(&view)?;
                    s.set_last_sync(Utc::now())
                })?;
                Ok(SyncOutcome::live(view))
            }
            Err(e) if e.is_network() => {
                tracing::warn!(note_id = id, "get_note degraded to local store: {}", e);
                let view = self
                    .local(|s| s.note_with_tags(id))?
                    .ok_or_else(|| ScribeError::NotFound(format!("note {} not found", id)))?;
                Ok(SyncOutcome::degraded(view, e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn list_tags(&self) -> ScribeResult<SyncOutcome<Vec<Tag>>> {
        if self.connectivity.is_offline() {
            return Ok(SyncOutcome::offline(self.local(|s| s.tags())?));
        }

        match self.api.list_tags().await {
            Ok(tags) => {
                self.local(|s| {
                    for tag in &tags {
                        s.save_tag(tag)?;
                    }
                    s.set_last_sync(Utc::now())
                })?;
                Ok(SyncOutcome::live(tags))
            }
            Err(e) if e.is_network() => {
                tracing::warn!("list_tags degraded to local store: {}", e);
                Ok(SyncOutcome::degraded(self.local(|s| s.tags())?, e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Online search queries the backend (title and content); the local
    /// fallback also matches tag names, a documented superset.
    pub async fn search(&self, query: &str) -> ScribeResult<SyncOutcome<Vec<NoteWithTags>>> {
        validation::validate_search_query(query)?;

        if self.connectivity.is_offline() {
            return Ok(SyncOutcome::offline(self.local(|s| s.search(query))?));
        }

        match self.api.search_notes(query).await {
            Ok(views) => {
                self.local(|s| {
                    for view in &views {
                        s.store_note_with_tags(view)?;
                    }
                    s.set_last_sync(Utc::now())
                })?;
                Ok(SyncOutcome::live(views))
            }
            Err(e) if e.is_network() => {
                tracing::warn!("search degraded to local store: {}", e);
                Ok(SyncOutcome::degraded(
                    self.local(|s| s.search(query))?,
                    e.to_string(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    // Writes

    pub async fn create_note(&self, draft: &NoteDraft) -> ScribeResult<SyncOutcome<NoteWithTags>> {
        validation::validate_note_draft(draft)?;

        if self.connectivity.is_offline() {
            return Ok(SyncOutcome::offline(self.create_note_locally(draft)?));
        }

        match self.api.create_note(draft).await {
            Ok(view) => {
                self.local(|s| s.store_note_with_tags(&view))?;
                self.mirror_to_backup().await;
                Ok(SyncOutcome::live(view))
            }
            Err(e) if e.is_network() => {
                tracing::warn!("create_note degraded to local store: {}", e);
                Ok(SyncOutcome::degraded(
                    self.create_note_locally(draft)?,
                    e.to_string(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Apply a create to the local store only, with a placeholder id and a
    /// correlation row so a later flush can reconcile it.
    fn create_note_locally(&self, draft: &NoteDraft) -> ScribeResult<NoteWithTags> {
        let tag_ids = draft.tag_ids.clone().unwrap_or_default();
        self.local(|s| {
            for tag_id in &tag_ids {
                if s.tag(*tag_id)?.is_none() {
                    return Err(ScribeError::inconsistent(format!(
                        "cannot tag new note: tag {} not in local store",
                        tag_id
                    )));
                }
            }

            let note = Note::from_draft(placeholder_id(), draft);
            let id = note.id;
            s.save_note(&note)?;
            for tag_id in &tag_ids {
                s.attach_tag(id, *tag_id)?;
            }
            s.record_pending(Uuid::new_v4(), id)?;

            tracing::info!(placeholder_id = id, "Created note locally while offline");
            s.note_with_tags(id)?
                .ok_or_else(|| ScribeError::inconsistent("note vanished after local create"))
        })
    }

    pub async fn update_note(
        &self,
        id: i64,
        patch: &NotePatch,
    ) -> ScribeResult<SyncOutcome<NoteWithTags>> {
        validation::validate_note_patch(patch)?;

        if self.connectivity.is_offline() {
            return Ok(SyncOutcome::offline(self.update_note_locally(id, patch)?));
        }

        match self.api.update_note(id, patch).await {
            Ok(view) => {
                self.local(|s| s.store_note_with_tags(&view))?;
                self.mirror_to_backup().await;
                Ok(SyncOutcome::live(view))
            }
            Err(e) if e.is_network() => {
                tracing::warn!(note_id = id, "update_note degraded to local store: {}", e);
                Ok(SyncOutcome::degraded(
                    self.update_note_locally(id, patch)?,
                    e.to_string(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    fn update_note_locally(&self, id: i64, patch: &NotePatch) -> ScribeResult<NoteWithTags> {
        self.local(|s| {
            let mut note = s.note(id)?.ok_or_else(|| {
                ScribeError::inconsistent(format!("cannot update note {}: not in local store", id))
            })?;
            patch.apply_to(&mut note);
            s.save_note(&note)?;

            if let Some(tag_ids) = &patch.tag_ids {
                let current: Vec<i64> = s.tags_for_note(id)?.iter().map(|t| t.id).collect();
                for tag_id in &current {
                    if !tag_ids.contains(tag_id) {
                        s.detach_tag(id, *tag_id)?;
                    }
                }
                for tag_id in tag_ids {
                    if !current.contains(tag_id) {
                        s.attach_tag(id, *tag_id)?;
                    }
                }
            }

            s.note_with_tags(id)?
                .ok_or_else(|| ScribeError::inconsistent("note vanished during local update"))
        })
    }

    /// Soft delete (move to trash).
    pub async fn delete_note(&self, id: i64) -> ScribeResult<SyncOutcome<NoteWithTags>> {
        self.flagged_note_write(id, FlagWrite::Delete).await
    }

    pub async fn restore_note(&self, id: i64) -> ScribeResult<SyncOutcome<NoteWithTags>> {
        self.flagged_note_write(id, FlagWrite::Restore).await
    }

    pub async fn toggle_favorite(&self, id: i64) -> ScribeResult<SyncOutcome<NoteWithTags>> {
        self.flagged_note_write(id, FlagWrite::ToggleFavorite).await
    }

    async fn flagged_note_write(
        &self,
        id: i64,
        kind: FlagWrite,
    ) -> ScribeResult<SyncOutcome<NoteWithTags>> {
        if self.connectivity.is_offline() {
            return Ok(SyncOutcome::offline(self.flag_note_locally(id, kind)?));
        }

        let result = match kind {
            FlagWrite::Delete => self.api.delete_note(id).await,
            FlagWrite::Restore => self.api.restore_note(id).await,
            FlagWrite::ToggleFavorite => self.api.toggle_favorite(id).await,
        };

        match result {
            Ok(view) => {
                self.local(|s| s.store_note_with_tags(&view))?;
                self.mirror_to_backup().await;
                Ok(SyncOutcome::live(view))
            }
            Err(e) if e.is_network() => {
                tracing::warn!(note_id = id, "{:?} degraded to local store: {}", kind, e);
                Ok(SyncOutcome::degraded(
                    self.flag_note_locally(id, kind)?,
                    e.to_string(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    fn flag_note_locally(&self, id: i64, kind: FlagWrite) -> ScribeResult<NoteWithTags> {
        self.local(|s| {
            let mut note = s.note(id)?.ok_or_else(|| {
                ScribeError::inconsistent(format!(
                    "cannot modify note {}: not in local store",
                    id
                ))
            })?;
            match kind {
                FlagWrite::Delete => note.is_deleted = true,
                FlagWrite::Restore => note.is_deleted = false,
                FlagWrite::ToggleFavorite => note.is_favorite = !note.is_favorite,
            }
            note.touch();
            s.save_note(&note)?;
            s.note_with_tags(id)?
                .ok_or_else(|| ScribeError::inconsistent("note vanished during local write"))
        })
    }

    // Tag writes

    pub async fn create_tag(&self, draft: &TagDraft) -> ScribeResult<SyncOutcome<Tag>> {
        validation::validate_tag_draft(draft)?;

        if self.connectivity.is_offline() {
            return Ok(SyncOutcome::offline(self.create_tag_locally(draft)?));
        }

        match self.api.create_tag(draft).await {
            Ok(tag) => {
                self.local(|s| s.save_tag(&tag))?;
                self.mirror_to_backup().await;
                Ok(SyncOutcome::live(tag))
            }
            Err(e) if e.is_network() => {
                tracing::warn!("create_tag degraded to local store: {}", e);
                Ok(SyncOutcome::degraded(
                    self.create_tag_locally(draft)?,
                    e.to_string(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    fn create_tag_locally(&self, draft: &TagDraft) -> ScribeResult<Tag> {
        let tag = Tag::from_draft(placeholder_id(), draft);
        self.local(|s| s.save_tag(&tag))?;
        tracing::info!(placeholder_id = tag.id, "Created tag locally while offline");
        Ok(tag)
    }

    pub async fn update_tag(&self, id: i64, patch: &TagPatch) -> ScribeResult<SyncOutcome<Tag>> {
        validation::validate_tag_patch(patch)?;

        if self.connectivity.is_offline() {
            return Ok(SyncOutcome::offline(self.update_tag_locally(id, patch)?));
        }

        match self.api.update_tag(id, patch).await {
            Ok(tag) => {
                self.local(|s| s.save_tag(&tag))?;
                self.mirror_to_backup().await;
                Ok(SyncOutcome::live(tag))
            }
            Err(e) if e.is_network() => {
                tracing::warn!(tag_id = id, "update_tag degraded to local store: {}", e);
                Ok(SyncOutcome::degraded(
                    self.update_tag_locally(id, patch)?,
                    e.to_string(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    fn update_tag_locally(&self, id: i64, patch: &TagPatch) -> ScribeResult<Tag> {
        self.local(|s| {
            let mut tag = s.tag(id)?.ok_or_else(|| {
                ScribeError::inconsistent(format!("cannot update tag {}: not in local store", id))
            })?;
            patch.apply_to(&mut tag);
            s.save_tag(&tag)?;
            Ok(tag)
        })
    }

    /// Delete a tag everywhere; relations cascade on both sides.
    pub async fn delete_tag(&self, id: i64) -> ScribeResult<SyncOutcome<()>> {
        if self.connectivity.is_offline() {
            self.local(|s| s.delete_tag(id))?;
            return Ok(SyncOutcome::offline(()));
        }

        match self.api.delete_tag(id).await {
            Ok(()) => {
                self.local(|s| s.delete_tag(id))?;
                self.mirror_to_backup().await;
                Ok(SyncOutcome::live(()))
            }
            Err(e) if e.is_network() => {
                tracing::warn!(tag_id = id, "delete_tag degraded to local store: {}", e);
                self.local(|s| s.delete_tag(id))?;
                Ok(SyncOutcome::degraded((), e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn attach_tag(
        &self,
        note_id: i64,
        tag_id: i64,
    ) -> ScribeResult<SyncOutcome<NoteWithTags>> {
        if self.connectivity.is_offline() {
            return Ok(SyncOutcome::offline(self.local(|s| {
                s.attach_tag(note_id, tag_id)?;
                s.note_with_tags(note_id)?
                    .ok_or_else(|| ScribeError::inconsistent("note vanished during attach"))
            })?));
        }

        match self.api.attach_tag(note_id, tag_id).await {
            Ok(view) => {
                self.local(|s| s.store_note_with_tags(&view))?;
                self.mirror_to_backup().await;
                Ok(SyncOutcome::live(view))
            }
            Err(e) if e.is_network() => {
                tracing::warn!(note_id, tag_id, "attach_tag degraded to local store: {}", e);
                let view = self.local(|s| {
                    s.attach_tag(note_id, tag_id)?;
                    s.note_with_tags(note_id)?
                        .ok_or_else(|| ScribeError::inconsistent("note vanished during attach"))
                })?;
                Ok(SyncOutcome::degraded(view, e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn detach_tag(
        &self,
        note_id: i64,
        tag_id: i64,
    ) -> ScribeResult<SyncOutcome<NoteWithTags>> {
        if self.connectivity.is_offline() {
            return Ok(SyncOutcome::offline(self.local(|s| {
                s.detach_tag(note_id, tag_id)?;
                s.note_with_tags(note_id)?
                    .ok_or_else(|| ScribeError::inconsistent("note vanished during detach"))
            })?));
        }

        match self.api.detach_tag(note_id, tag_id).await {
            Ok(view) => {
                self.local(|s| s.store_note_with_tags(&view))?;
                self.mirror_to_backup().await;
                Ok(SyncOutcome::live(view))
            }
            Err(e) if e.is_network() => {
                tracing::warn!(note_id, tag_id, "detach_tag degraded to local store: {}", e);
                let view = self.local(|s| {
                    s.detach_tag(note_id, tag_id)?;
                    s.note_with_tags(note_id)?
                        .ok_or_else(|| ScribeError::inconsistent("note vanished during detach"))
                })?;
                Ok(SyncOutcome::degraded(view, e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    // Export

    /// Prefer the backend's rendering for byte-identical output with the
    /// authoritative copy; fall back to the same conversion rules applied to
    /// the local record.
    pub async fn export_note(
        &self,
        id: i64,
        format: ExportFormat,
    ) -> ScribeResult<SyncOutcome<ExportPayload>> {
        if self.connectivity.is_offline() {
            return Ok(SyncOutcome::offline(self.export_locally(id, format)?));
        }

        match self.api.export_note(id, format).await {
            Ok(payload) => Ok(SyncOutcome::live(payload)),
            Err(e) if e.is_network() => {
                tracing::warn!(note_id = id, "export degraded to local rendering: {}", e);
                Ok(SyncOutcome::degraded(
                    self.export_locally(id, format)?,
                    e.to_string(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    fn export_locally(&self, id: i64, format: ExportFormat) -> ScribeResult<ExportPayload> {
        let view = self
            .local(|s| s.note_with_tags(id))?
            .ok_or_else(|| ScribeError::NotFound(format!("note {} not found", id)))?;
        let body = export::render(&view, format)?;
        Ok(ExportPayload {
            filename: export::attachment_filename(&view.note.title, format),
            content_type: format.content_type().to_string(),
            body: body.into_bytes(),
        })
    }

    // Reconciliation

    /// Retry pending offline creates against the backend. Each success
    /// replaces the placeholder record with the server-assigned one in a
    /// single local transaction; a rejection keeps the note locally but
    /// stops retrying it; a network failure stops the whole flush.
    pub async fn flush_pending(&self) -> ScribeResult<FlushReport> {
        let mut report = FlushReport::default();
        let pending = self.local(|s| s.pending())?;

        for (correlation, placeholder) in pending {
            if self.connectivity.is_offline() {
                break;
            }

            let Some(view) = self.local(|s| s.note_with_tags(placeholder))? else {
                // The placeholder was cleaned up locally; drop the marker.
                self.local(|s| s.clear_pending(correlation))?;
                continue;
            };

            // Tags created offline have placeholder ids the server does not
            // know; they stay local-only until their own reconciliation.
            let tag_ids: Vec<i64> = view.tag_ids().into_iter().filter(|id| *id > 0).collect();
            let draft = NoteDraft {
                title: Some(view.note.title.clone()),
                content: Some(view.note.content.clone()),
                is_favorite: Some(view.note.is_favorite),
                is_deleted: Some(view.note.is_deleted),
                tag_ids: Some(tag_ids),
            };

            match self.api.create_note(&draft).await {
                Ok(server_view) => {
                    self.local(|s| {
                        s.replace_note(placeholder, &server_view)?;
                        s.clear_pending(correlation)?;
                        s.set_last_sync(Utc::now())
                    })?;
                    tracing::info!(
                        placeholder_id = placeholder,
                        server_id = server_view.note.id,
                        "Reconciled offline create"
                    );
                    report.reconciled += 1;
                }
                Err(e) if e.is_network() => {
                    report.errors.push(format!(
                        "flush stopped at placeholder {}: {}",
                        placeholder, e
                    ));
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        placeholder_id = placeholder,
                        "Server rejected offline create, keeping local copy: {}",
                        e
                    );
                    self.local(|s| s.clear_pending(correlation))?;
                    report.failed += 1;
                    report.errors.push(e.to_string());
                }
            }
        }

        if report.reconciled > 0 {
            self.mirror_to_backup().await;
        }
        Ok(report)
    }

    // Cloud backup

    /// Best-effort mirror of the full note and tag snapshots for the
    /// signed-in account. Every failure is logged and swallowed: the data is
    /// already safe locally and remotely.
    async fn mirror_to_backup(&self) {
        let (Some(backup), Some(account)) = (&self.backup, &self.account) else {
            return;
        };

        let snapshots = self.local(|s| Ok((s.notes_with_tags(true)?, s.tags()?)));
        let (notes, tags) = match snapshots {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("Skipping backup mirror, local read failed: {}", e);
                return;
            }
        };

        match serde_json::to_vec(&notes) {
            Ok(payload) => {
                if let Err(e) = backup
                    .push_snapshot(account, SnapshotKind::Notes, &payload)
                    .await
                {
                    tracing::warn!(provider = backup.provider_name(), "Notes backup failed: {}", e);
                }
            }
            Err(e) => tracing::warn!("Notes snapshot serialization failed: {}", e),
        }

        match serde_json::to_vec(&tags) {
            Ok(payload) => {
                if let Err(e) = backup
                    .push_snapshot(account, SnapshotKind::Tags, &payload)
                    .await
                {
                    tracing::warn!(provider = backup.provider_name(), "Tags backup failed: {}", e);
                }
            }
            Err(e) => tracing::warn!("Tags snapshot serialization failed: {}", e),
        }
    }

    /// Pull the signed-in account's snapshots and install them locally
    /// (the sign-in restore path). Missing or corrupt snapshots degrade to
    /// empty collections. Returns (notes restored, tags restored).
    pub async fn restore_from_backup(&self) -> ScribeResult<(usize, usize)> {
        let (Some(backup), Some(account)) = (&self.backup, &self.account) else {
            return Err(ScribeError::Config(
                "no backup store or signed-in account configured".to_string(),
            ));
        };

        let tags: Vec<Tag> = match backup.pull_snapshot(account, SnapshotKind::Tags).await {
            Ok(Some(payload)) => serde_json::from_slice(&payload).unwrap_or_else(|e| {
                tracing::warn!("Corrupt tags snapshot, treating as empty: {}", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!("Tags snapshot pull failed: {}", e);
                Vec::new()
            }
        };

        let notes: Vec<NoteWithTags> = match backup.pull_snapshot(account, SnapshotKind::Notes).await
        {
            Ok(Some(payload)) => serde_json::from_slice(&payload).unwrap_or_else(|e| {
                tracing::warn!("Corrupt notes snapshot, treating as empty: {}", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!("Notes snapshot pull failed: {}", e);
                Vec::new()
            }
        };

        self.local(|s| {
            for tag in &tags {
                s.save_tag(tag)?;
            }
            for view in &notes {
                s.store_note_with_tags(view)?;
            }
            Ok(())
        })?;

        tracing::info!(
            notes = notes.len(),
            tags = tags.len(),
            "Restored snapshots from backup"
        );
        Ok((notes.len(), tags.len()))
    }
}

#[derive(Debug, Clone, Copy)]
enum FlagWrite {
    Delete,
    Restore,
    ToggleFavorite,
}

#[cfg(all(test, feature = "server"))]
mod tests {
    use super::*;
    use crate::connectivity::Connectivity;
    use crate::repository::Repository;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Remote API stub backed by a real in-process repository, with a switch
    /// that makes every call fail like a dead network.
    #[derive(Clone)]
    struct TestApi {
        repo: Arc<Mutex<Repository>>,
        unreachable: Arc<AtomicBool>,
    }

    impl TestApi {
        fn new() -> Self {
            Self {
                repo: Arc::new(Mutex::new(Repository::new())),
                unreachable: Arc::new(AtomicBool::new(false)),
            }
        }

        fn set_unreachable(&self, dead: bool) {
            self.unreachable.store(dead, Ordering::SeqCst);
        }

        fn check(&self) -> ScribeResult<()> {
            if self.unreachable.load(Ordering::SeqCst) {
                Err(ScribeError::unreachable("connection refused"))
            } else {
                Ok(())
            }
        }

        /// What the HTTP client would hand back for a server-side error.
        fn as_remote(err: ScribeError) -> ScribeError {
            match err {
                ScribeError::NotFound(msg) => ScribeError::rejected(404, msg),
                ScribeError::Validation { field, message } => {
                    ScribeError::rejected(400, format!("{}: {}", field, message))
                }
                other => other,
            }
        }

        fn repo<T>(
            &self,
            f: impl FnOnce(&mut Repository) -> ScribeResult<T>,
        ) -> ScribeResult<T> {
            self.check()?;
            let mut repo = self.repo.lock().unwrap();
            f(&mut repo).map_err(Self::as_remote)
        }
    }

    impl RemoteApi for TestApi {
        async fn list_notes(&self, include_deleted: bool) -> ScribeResult<Vec<NoteWithTags>> {
            self.repo(|r| Ok(r.list_notes(include_deleted)))
        }

        async fn search_notes(&self, query: &str) -> ScribeResult<Vec<NoteWithTags>> {
            self.repo(|r| r.search_notes(query))
        }

        async fn get_note(&self, id: i64) -> ScribeResult<NoteWithTags> {
            self.repo(|r| r.get_note(id))
        }

        async fn create_note(&self, draft: &NoteDraft) -> ScribeResult<NoteWithTags> {
            self.repo(|r| r.create_note(draft))
        }

        async fn update_note(&self, id: i64, patch: &NotePatch) -> ScribeResult<NoteWithTags> {
            self.repo(|r| r.update_note(id, patch))
        }

        async fn delete_note(&self, id: i64) -> ScribeResult<NoteWithTags> {
            self.repo(|r| r.delete_note(id))
        }

        async fn restore_note(&self, id: i64) -> ScribeResult<NoteWithTags> {
            self.repo(|r| r.restore_note(id))
        }

        async fn toggle_favorite(&self, id: i64) -> ScribeResult<NoteWithTags> {
            self.repo(|r| r.toggle_favorite(id))
        }

        async fn export_note(&self, id: i64, format: ExportFormat) -> ScribeResult<ExportPayload> {
            self.repo(|r| {
                let rendered = r.export_note(id, format)?;
                Ok(ExportPayload {
                    filename: rendered.filename,
                    content_type: rendered.content_type,
                    body: rendered.body.into_bytes(),
                })
            })
        }

        async fn list_tags(&self) -> ScribeResult<Vec<Tag>> {
            self.repo(|r| Ok(r.list_tags()))
        }

        async fn create_tag(&self, draft: &TagDraft) -> ScribeResult<Tag> {
            self.repo(|r| r.create_tag(draft))
        }

        async fn update_tag(&self, id: i64, patch: &TagPatch) -> ScribeResult<Tag> {
            self.repo(|r| r.update_tag(id, patch))
        }

        async fn delete_tag(&self, id: i64) -> ScribeResult<()> {
            self.repo(|r| r.delete_tag(id))
        }

        async fn attach_tag(&self, note_id: i64, tag_id: i64) -> ScribeResult<NoteWithTags> {
            self.repo(|r| r.attach_tag(note_id, tag_id))
        }

        async fn detach_tag(&self, note_id: i64, tag_id: i64) -> ScribeResult<NoteWithTags> {
            self.repo(|r| r.detach_tag(note_id, tag_id))
        }
    }

    fn service(api: TestApi, online: bool) -> SyncService<TestApi, Connectivity> {
        let local = Arc::new(Mutex::new(LocalStore::open_in_memory().unwrap()));
        SyncService::new(api, local, Connectivity::new(online))
    }

    fn draft(title: &str, content: &str) -> NoteDraft {
        NoteDraft {
            title: Some(title.to_string()),
            content: Some(content.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_online_create_is_live_and_cached() {
        let api = TestApi::new();
        let service = service(api, true);

        let created = service.create_note(&draft("Trip", "<p>Pack bags</p>")).await.unwrap();
        assert_eq!(created.origin, Origin::Live);
        assert!(created.value.note.id > 0);

        // write-through: visible locally when the network later dies
        let cached = service
            .local(|s| s.note_with_tags(created.value.note.id))
            .unwrap()
            .unwrap();
        assert_eq!(cached.note.title, "Trip");
    }

    #[tokio::test]
    async fn test_offline_create_gets_placeholder_id() {
        let api = TestApi::new();
        let service = service(api, false);

        let created = service.create_note(&draft("Offline", "")).await.unwrap();
        assert_eq!(created.origin, Origin::Offline);
        assert!(created.value.note.id < 0, "offline create must use a negative id");
        assert_eq!(service.local(|s| s.pending()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_create_then_reconcile() {
        // after flush, the positive-id record exists and no negative-id
        // duplicate remains
        let api = TestApi::new();
        let connectivity = Connectivity::new(false);
        let local = Arc::new(Mutex::new(LocalStore::open_in_memory().unwrap()));
        let service = SyncService::new(api.clone(), local, connectivity.clone());

        let created = service.create_note(&draft("Offline", "<p>x</p>")).await.unwrap();
        let placeholder = created.value.note.id;
        assert!(placeholder < 0);

        connectivity.set_reachable(true);
        let report = service.flush_pending().await.unwrap();
        assert_eq!(report.reconciled, 1);
        assert_eq!(report.failed, 0);

        let all = service.local(|s| s.notes_with_tags(true)).unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].note.id > 0);
        assert!(service.local(|s| s.note(placeholder)).unwrap().is_none());
        assert!(service.local(|s| s.pending()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_network_failure_degrades_every_intent() {
        // a dead network never produces an error, and results match a
        // local-only execution
        let api = TestApi::new();
        let service = service(api.clone(), true);

        // Seed the cache while live
        let note = service.create_note(&draft("Cached", "body")).await.unwrap().value;
        let tag = service
            .create_tag(&TagDraft { name: "Work".to_string(), color: None })
            .await
            .unwrap()
            .value;

        api.set_unreachable(true);

        let listed = service.list_notes(false).await.unwrap();
        assert!(matches!(listed.origin, Origin::Degraded { .. }));
        assert_eq!(listed.value.len(), 1);

        let fetched = service.get_note(note.note.id).await.unwrap();
        assert!(matches!(fetched.origin, Origin::Degraded { .. }));

        let searched = service.search("cached").await.unwrap();
        assert!(matches!(searched.origin, Origin::Degraded { .. }));
        assert_eq!(searched.value.len(), 1);

        let updated = service
            .update_note(
                note.note.id,
                &NotePatch { title: Some("Still cached".to_string()), ..Default::default() },
            )
            .await
            .unwrap();
        assert!(matches!(updated.origin, Origin::Degraded { .. }));
        assert_eq!(updated.value.note.title, "Still cached");

        let attached = service.attach_tag(note.note.id, tag.id).await.unwrap();
        assert!(matches!(attached.origin, Origin::Degraded { .. }));
        assert_eq!(attached.value.tags.len(), 1);

        let created = service.create_note(&draft("New while down", "")).await.unwrap();
        assert!(matches!(created.origin, Origin::Degraded { .. }));
        assert!(created.value.note.id < 0);

        let exported = service
            .export_note(note.note.id, ExportFormat::Markdown)
            .await
            .unwrap();
        assert!(matches!(exported.origin, Origin::Degraded { .. }));
    }

    #[tokio::test]
    async fn test_rejection_propagates_without_local_mutation() {
        let api = TestApi::new();
        let service = service(api, true);

        let err = service
            .update_note(999, &NotePatch { title: Some("X".to_string()), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, ScribeError::Rejected { status: 404, .. }));
        assert!(service.local(|s| s.notes_with_tags(true)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_update_of_unknown_note_is_inconsistency() {
        let api = TestApi::new();
        let service = service(api, false);

        let err = service
            .update_note(7, &NotePatch { title: Some("X".to_string()), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, ScribeError::Inconsistent(_)));
    }

    #[tokio::test]
    async fn test_offline_delete_then_restore_is_reversible() {
        let api = TestApi::new();
        let service = service(api.clone(), true);
        let note = service.create_note(&draft("Trip", "<p>x</p>")).await.unwrap().value;

        api.set_unreachable(true);

        let deleted = service.delete_note(note.note.id).await.unwrap().value;
        assert!(deleted.note.is_deleted);
        assert!(service.local(|s| s.notes_with_tags(false)).unwrap().is_empty());

        let restored = service.restore_note(note.note.id).await.unwrap().value;
        assert!(!restored.note.is_deleted);
        assert_eq!(restored.note.title, note.note.title);
        assert_eq!(restored.note.content, note.note.content);
        assert!(restored.note.updated_at >= note.note.updated_at);
    }

    #[tokio::test]
    async fn test_offline_toggle_favorite_flips_local_flag() {
        let api = TestApi::new();
        let service = service(api.clone(), true);
        let note = service.create_note(&draft("N", "")).await.unwrap().value;

        api.set_unreachable(true);
        assert!(service.toggle_favorite(note.note.id).await.unwrap().value.note.is_favorite);
        assert!(!service.toggle_favorite(note.note.id).await.unwrap().value.note.is_favorite);
    }

    #[tokio::test]
    async fn test_degraded_search_matches_tag_names() {
        // The local fallback is a superset of the server search
        let api = TestApi::new();
        let service = service(api.clone(), true);

        let note = service.create_note(&draft("Standup", "")).await.unwrap().value;
        let tag = service
            .create_tag(&TagDraft { name: "meetings".to_string(), color: None })
            .await
            .unwrap()
            .value;
        service.attach_tag(note.note.id, tag.id).await.unwrap();

        let live = service.search("meeting").await.unwrap();
        assert_eq!(live.origin, Origin::Live);
        assert!(live.value.is_empty(), "server search ignores tag names");

        api.set_unreachable(true);
        let degraded = service.search("meeting").await.unwrap();
        assert_eq!(degraded.value.len(), 1);
        assert_eq!(degraded.value[0].note.id, note.note.id);
    }

    #[tokio::test]
    async fn test_flush_keeps_note_when_server_rejects() {
        let api = TestApi::new();
        let connectivity = Connectivity::new(false);
        let local = Arc::new(Mutex::new(LocalStore::open_in_memory().unwrap()));
        let service = SyncService::new(api.clone(), local, connectivity.clone());

        let created = service.create_note(&draft("Offline", "")).await.unwrap().value;

        // Sabotage the retry: overwrite the local copy with a blank title the
        // server will refuse.
        service
            .local(|s| {
                let mut note = s.note(created.note.id).unwrap().unwrap();
                note.title = "  ".to_string();
                s.save_note(&note)
            })
            .unwrap();

        connectivity.set_reachable(true);
        let report = service.flush_pending().await.unwrap();
        assert_eq!(report.reconciled, 0);
        assert_eq!(report.failed, 1);

        // Note kept locally, marker cleared, no endless retry
        assert!(service.local(|s| s.note(created.note.id)).unwrap().is_some());
        assert!(service.local(|s| s.pending()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backup_mirrors_after_live_write() {
        let api = TestApi::new();
        let local = Arc::new(Mutex::new(LocalStore::open_in_memory().unwrap()));
        let backup = MemoryBackupStore::new();
        let service = SyncService::with_backup(
            api,
            local,
            Connectivity::new(true),
            backup,
            "user-17",
        );

        service.create_note(&draft("Backed up", "")).await.unwrap();

        let backup = service.backup.as_ref().unwrap();
        let snapshot = backup
            .pull_snapshot("user-17", SnapshotKind::Notes)
            .await
            .unwrap()
            .expect("notes snapshot must exist after a live write");
        let notes: Vec<NoteWithTags> = serde_json::from_slice(&snapshot).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].note.title, "Backed up");
    }

    #[tokio::test]
    async fn test_backup_failure_is_swallowed() {
        struct FailingBackup;
        impl BackupStore for FailingBackup {
            async fn push_snapshot(
                &self,
                _user_id: &str,
                _kind: SnapshotKind,
                _payload: &[u8],
            ) -> Result<(), crate::cloud_backup::BackupError> {
                Err(crate::cloud_backup::BackupError::Network("down".to_string()))
            }

            async fn pull_snapshot(
                &self,
                _user_id: &str,
                _kind: SnapshotKind,
            ) -> Result<Option<Vec<u8>>, crate::cloud_backup::BackupError> {
                Err(crate::cloud_backup::BackupError::Network("down".to_string()))
            }

            fn provider_name(&self) -> &'static str {
                "failing"
            }
        }

        let api = TestApi::new();
        let local = Arc::new(Mutex::new(LocalStore::open_in_memory().unwrap()));
        let service = SyncService::with_backup(
            api,
            local,
            Connectivity::new(true),
            FailingBackup,
            "user-17",
        );

        // The primary operation must still succeed as live
        let created = service.create_note(&draft("Safe", "")).await.unwrap();
        assert_eq!(created.origin, Origin::Live);
    }

    #[tokio::test]
    async fn test_restore_from_backup_roundtrip() {
        let api = TestApi::new();
        let backup = Arc::new(MemoryBackupStore::new());

        struct SharedBackup(Arc<MemoryBackupStore>);
        impl BackupStore for SharedBackup {
            async fn push_snapshot(
                &self,
                user_id: &str,
                kind: SnapshotKind,
                payload: &[u8],
            ) -> Result<(), crate::cloud_backup::BackupError> {
                self.0.push_snapshot(user_id, kind, payload).await
            }

            async fn pull_snapshot(
                &self,
                user_id: &str,
                kind: SnapshotKind,
            ) -> Result<Option<Vec<u8>>, crate::cloud_backup::BackupError> {
                self.0.pull_snapshot(user_id, kind).await
            }

            fn provider_name(&self) -> &'static str {
                self.0.provider_name()
            }
        }

        // First device: write a note live, mirroring it to the backup
        let first = SyncService::with_backup(
            api.clone(),
            Arc::new(Mutex::new(LocalStore::open_in_memory().unwrap())),
            Connectivity::new(true),
            SharedBackup(Arc::clone(&backup)),
            "user-17",
        );
        let tag = first
            .create_tag(&TagDraft { name: "Work".to_string(), color: None })
            .await
            .unwrap()
            .value;
        let note = first.create_note(&draft("Synced", "")).await.unwrap().value;
        first.attach_tag(note.note.id, tag.id).await.unwrap();

        // Second device: empty local store, restore from the backup
        let second = SyncService::with_backup(
            api,
            Arc::new(Mutex::new(LocalStore::open_in_memory().unwrap())),
            Connectivity::new(true),
            SharedBackup(backup),
            "user-17",
        );
        let (notes_restored, tags_restored) = second.restore_from_backup().await.unwrap();
        assert_eq!(notes_restored, 1);
        assert_eq!(tags_restored, 1);

        let restored = second
            .local(|s| s.note_with_tags(note.note.id))
            .unwrap()
            .unwrap();
        assert_eq!(restored.note.title, "Synced");
        assert_eq!(restored.tags.len(), 1);
    }

    #[tokio::test]
    async fn test_reads_record_last_sync() {
        let api = TestApi::new();
        let service = service(api.clone(), true);
        assert!(service.last_sync().is_none());

        service.list_notes(false).await.unwrap();
        assert!(service.last_sync().is_some());
    }

    #[tokio::test]
    async fn test_offline_export_markdown_scenario() {
        let api = TestApi::new();
        let service = service(api.clone(), true);
        let note = service
            .create_note(&draft("Trip", "<p>Pack bags</p>"))
            .await
            .unwrap()
            .value;

        api.set_unreachable(true);
        let exported = service
            .export_note(note.note.id, ExportFormat::Markdown)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(exported.value.body).unwrap(),
            "# Trip\n\nPack bags"
        );
        assert_eq!(exported.value.filename, "trip.md");
    }

    #[test]
    fn test_placeholder_ids_are_negative() {
        for _ in 0..64 {
            assert!(placeholder_id() < 0);
        }
    }
}
