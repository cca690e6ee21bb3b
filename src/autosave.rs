//! Debounced auto-save: a timer-driven task that coalesces the latest
//! pending edits per note and flushes them through the sync layer on a fixed
//! interval or after an idle gap, whichever comes first. The task is
//! cancellable on teardown; closing the handle flushes whatever is pending.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

use crate::api_client::RemoteApi;
use crate::cloud_backup::BackupStore;
use crate::connectivity::ConnectivityProbe;
use crate::models::NotePatch;
use crate::sync::SyncService;

/// Configuration for the auto-save task.
#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    /// Maximum time a dirty note waits before being flushed.
    pub flush_interval: Duration,
    /// Flush early once the user has stopped editing for this long.
    pub idle_timeout: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(2),
        }
    }
}

enum Command {
    Queue { note_id: i64, patch: NotePatch },
    Flush,
    Shutdown,
}

/// Merge a newer patch into an older pending one; the latest value per
/// field wins, untouched fields survive.
fn coalesce(pending: &mut NotePatch, newer: &NotePatch) {
    if newer.title.is_some() {
        pending.title = newer.title.clone();
    }
    if newer.content.is_some() {
        pending.content = newer.content.clone();
    }
    if newer.is_favorite.is_some() {
        pending.is_favorite = newer.is_favorite;
    }
    if newer.is_deleted.is_some() {
        pending.is_deleted = newer.is_deleted;
    }
    if newer.tag_ids.is_some() {
        pending.tag_ids = newer.tag_ids.clone();
    }
}

/// Handle to a running auto-save task.
pub struct Autosaver {
    tx: mpsc::UnboundedSender<Command>,
    task: tokio::task::JoinHandle<()>,
}

impl Autosaver {
    /// Spawn the auto-save task over a sync service.
    pub fn spawn<R, C, B>(service: Arc<SyncService<R, C, B>>, config: AutosaveConfig) -> Self
    where
        R: RemoteApi + 'static,
        C: ConnectivityProbe + 'static,
        B: BackupStore + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(service, config, rx));
        Self { tx, task }
    }

    /// Queue an edit. Replaces the pending values for that note field by
    /// field, so only the latest content is ever flushed.
    pub fn queue(&self, note_id: i64, patch: NotePatch) {
        let _ = self.tx.send(Command::Queue { note_id, patch });
    }

    /// Flush everything pending now, without waiting for a timer.
    pub fn flush_now(&self) {
        let _ = self.tx.send(Command::Flush);
    }

    /// Flush pending edits and stop the task.
    pub async fn close(mut self) {
        let _ = self.tx.send(Command::Shutdown);
        let _ = (&mut self.task).await;
    }
}

impl Drop for Autosaver {
    fn drop(&mut self) {
        // Teardown without close(): cancel rather than leak the task.
        self.task.abort();
    }
}

async fn run<R, C, B>(
    service: Arc<SyncService<R, C, B>>,
    config: AutosaveConfig,
    mut rx: mpsc::UnboundedReceiver<Command>,
) where
    R: RemoteApi,
    C: ConnectivityProbe,
    B: BackupStore,
{
    let mut pending: HashMap<i64, NotePatch> = HashMap::new();
    let mut dirty_since: Option<Instant> = None;
    let mut last_edit = Instant::now();

    loop {
        let deadline = dirty_since.map(|since| {
            let interval_due = since + config.flush_interval;
            let idle_due = last_edit + config.idle_timeout;
            interval_due.min(idle_due)
        });

        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Queue { note_id, patch }) => {
                    pending
                        .entry(note_id)
                        .and_modify(|existing| coalesce(existing, &patch))
                        .or_insert(patch);
                    last_edit = Instant::now();
                    dirty_since.get_or_insert(last_edit);
                }
                Some(Command::Flush) => {
                    flush(&service, &mut pending).await;
                    dirty_since = None;
                }
                Some(Command::Shutdown) | None => {
                    flush(&service, &mut pending).await;
                    break;
                }
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                flush(&service, &mut pending).await;
                dirty_since = None;
            }
        }
    }
}

async fn flush<R, C, B>(service: &SyncService<R, C, B>, pending: &mut HashMap<i64, NotePatch>)
where
    R: RemoteApi,
    C: ConnectivityProbe,
    B: BackupStore,
{
    for (note_id, patch) in pending.drain() {
        if patch.is_empty() {
            continue;
        }
        // Network failures already degrade inside the sync layer; anything
        // surfacing here is an application error and retrying would repeat it.
        if let Err(e) = service.update_note(note_id, &patch).await {
            tracing::warn!(note_id, "Auto-save flush failed, dropping edit: {}", e);
        }
    }
}
