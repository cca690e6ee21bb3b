//! Client-local persistent cache backed by SQLite.
//!
//! The local store owns the client-visible copy of notes, tags, and
//! note-tag relations, surviving process restarts. All operations are
//! synchronous. Every multi-statement operation runs in a single
//! transaction, so relation rows never reference a missing note or tag
//! after any single operation completes. There is no cross-entity
//! transaction spanning this store and the remote API.
//!
//! All timestamps are Unix seconds (INTEGER) in SQL, `DateTime<Utc>` in the
//! models.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{ScribeError, ScribeResult};
use crate::models::{Note, NoteWithTags, Tag};

/// sync_meta key holding the last successful sync timestamp (RFC 3339).
const META_LAST_SYNC: &str = "last_sync_at";

/// Convert Unix seconds to a UTC datetime, degrading out-of-range values to
/// the epoch rather than failing the read.
fn datetime_from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Escape LIKE wildcards so a query matches substrings literally.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped.to_lowercase())
}

/// SQLite-backed local store
pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    /// Open (or create) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> ScribeResult<Self> {
        let conn = Connection::open(path)?;

        // WAL for better concurrent access from readers
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn open_in_memory() -> ScribeResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> ScribeResult<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                is_favorite INTEGER NOT NULL DEFAULT 0,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                color TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS note_tags (
                note_id INTEGER NOT NULL REFERENCES notes (id) ON DELETE CASCADE,
                tag_id INTEGER NOT NULL REFERENCES tags (id) ON DELETE CASCADE,
                PRIMARY KEY (note_id, tag_id)
            );

            CREATE TABLE IF NOT EXISTS sync_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Correlation ledger for offline creates awaiting reconciliation
            CREATE TABLE IF NOT EXISTS pending_notes (
                correlation_id TEXT PRIMARY KEY,
                placeholder_id INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_note_tags_tag ON note_tags (tag_id);
            "#,
        )?;
        Ok(())
    }

    fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
        Ok(Note {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            is_favorite: row.get::<_, i64>(3)? != 0,
            is_deleted: row.get::<_, i64>(4)? != 0,
            created_at: datetime_from_unix(row.get(5)?),
            updated_at: datetime_from_unix(row.get(6)?),
        })
    }

    fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
            color: row.get(2)?,
        })
    }

    // Notes

    /// All notes, newest-updated first. Trashed notes are excluded unless
    /// `include_deleted` is set.
    pub fn notes(&self, include_deleted: bool) -> ScribeResult<Vec<Note>> {
        let sql = if include_deleted {
            "SELECT id, title, content, is_favorite, is_deleted, created_at, updated_at
             FROM notes ORDER BY updated_at DESC, id DESC"
        } else {
            "SELECT id, title, content, is_favorite, is_deleted, created_at, updated_at
             FROM notes WHERE is_deleted = 0 ORDER BY updated_at DESC, id DESC"
        };

        let mut stmt = self.conn.prepare(sql)?;
        let notes = stmt
            .query_map([], Self::note_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notes)
    }

    pub fn note(&self, id: i64) -> ScribeResult<Option<Note>> {
        let note = self
            .conn
            .query_row(
                "SELECT id, title, content, is_favorite, is_deleted, created_at, updated_at
                 FROM notes WHERE id = ?1",
                [id],
                Self::note_from_row,
            )
            .optional()?;
        Ok(note)
    }

    pub fn note_with_tags(&self, id: i64) -> ScribeResult<Option<NoteWithTags>> {
        match self.note(id)? {
            Some(note) => {
                let tags = self.tags_for_note(id)?;
                Ok(Some(NoteWithTags::new(note, tags)))
            }
            None => Ok(None),
        }
    }

    pub fn notes_with_tags(&self, include_deleted: bool) -> ScribeResult<Vec<NoteWithTags>> {
        self.notes(include_deleted)?
            .into_iter()
            .map(|note| {
                let tags = self.tags_for_note(note.id)?;
                Ok(NoteWithTags::new(note, tags))
            })
            .collect()
    }

    /// Upsert keyed by id. Full replace, no field merging.
    pub fn save_note(&self, note: &Note) -> ScribeResult<()> {
        self.conn.execute(
            "INSERT INTO notes (id, title, content, is_favorite, is_deleted, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (id) DO UPDATE SET
                 title = excluded.title,
                 content = excluded.content,
                 is_favorite = excluded.is_favorite,
                 is_deleted = excluded.is_deleted,
                 created_at = excluded.created_at,
                 updated_at = excluded.updated_at",
            params![
                note.id,
                note.title,
                note.content,
                note.is_favorite as i64,
                note.is_deleted as i64,
                note.created_at.timestamp(),
                note.updated_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Hard delete, cascading relation rows. Used for offline cleanup only;
    /// a normal "delete" is `save_note` with `is_deleted = true`.
    pub fn delete_note(&self, id: i64) -> ScribeResult<()> {
        self.conn.execute("DELETE FROM notes WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Write a server-returned record through, replacing the note, upserting
    /// its tags, and making the relation set exactly match. One transaction.
    pub fn store_note_with_tags(&mut self, view: &NoteWithTags) -> ScribeResult<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO notes (id, title, content, is_favorite, is_deleted, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (id) DO UPDATE SET
                 title = excluded.title,
                 content = excluded.content,
                 is_favorite = excluded.is_favorite,
                 is_deleted = excluded.is_deleted,
                 created_at = excluded.created_at,
                 updated_at = excluded.updated_at",
            params![
                view.note.id,
                view.note.title,
                view.note.content,
                view.note.is_favorite as i64,
                view.note.is_deleted as i64,
                view.note.created_at.timestamp(),
                view.note.updated_at.timestamp(),
            ],
        )?;

        for tag in &view.tags {
            tx.execute(
                "INSERT INTO tags (id, name, color) VALUES (?1, ?2, ?3)
                 ON CONFLICT (id) DO UPDATE SET name = excluded.name, color = excluded.color",
                params![tag.id, tag.name, tag.color],
            )?;
        }

        tx.execute("DELETE FROM note_tags WHERE note_id = ?1", [view.note.id])?;
        for tag in &view.tags {
            tx.execute(
                "INSERT OR IGNORE INTO note_tags (note_id, tag_id) VALUES (?1, ?2)",
                params![view.note.id, tag.id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Install a server-assigned record in place of a local placeholder.
    /// The placeholder row and its relations are removed in the same
    /// transaction, so no duplicate negative-id record can remain.
    pub fn replace_note(&mut self, placeholder_id: i64, view: &NoteWithTags) -> ScribeResult<()> {
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM notes WHERE id = ?1", [placeholder_id])?;

        tx.execute(
            "INSERT INTO notes (id, title, content, is_favorite, is_deleted, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (id) DO UPDATE SET
                 title = excluded.title,
                 content = excluded.content,
                 is_favorite = excluded.is_favorite,
                 is_deleted = excluded.is_deleted,
                 created_at = excluded.created_at,
                 updated_at = excluded.updated_at",
            params![
                view.note.id,
                view.note.title,
                view.note.content,
                view.note.is_favorite as i64,
                view.note.is_deleted as i64,
                view.note.created_at.timestamp(),
                view.note.updated_at.timestamp(),
            ],
        )?;

        for tag in &view.tags {
            tx.execute(
                "INSERT INTO tags (id, name, color) VALUES (?1, ?2, ?3)
                 ON CONFLICT (id) DO UPDATE SET name = excluded.name, color = excluded.color",
                params![tag.id, tag.name, tag.color],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO note_tags (note_id, tag_id) VALUES (?1, ?2)",
                params![view.note.id, tag.id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // Tags

    pub fn tags(&self) -> ScribeResult<Vec<Tag>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, color FROM tags ORDER BY name, id")?;
        let tags = stmt
            .query_map([], Self::tag_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    pub fn tag(&self, id: i64) -> ScribeResult<Option<Tag>> {
        let tag = self
            .conn
            .query_row(
                "SELECT id, name, color FROM tags WHERE id = ?1",
                [id],
                Self::tag_from_row,
            )
            .optional()?;
        Ok(tag)
    }

    /// Upsert keyed by id. Full replace.
    pub fn save_tag(&self, tag: &Tag) -> ScribeResult<()> {
        self.conn.execute(
            "INSERT INTO tags (id, name, color) VALUES (?1, ?2, ?3)
             ON CONFLICT (id) DO UPDATE SET name = excluded.name, color = excluded.color",
            params![tag.id, tag.name, tag.color],
        )?;
        Ok(())
    }

    /// Remove a tag and all its relations.
    pub fn delete_tag(&self, id: i64) -> ScribeResult<()> {
        self.conn.execute("DELETE FROM tags WHERE id = ?1", [id])?;
        Ok(())
    }

    // Relations

    /// Idempotent: attaching an existing relation is a no-op. Attaching to a
    /// note or tag absent from the store is an inconsistency error.
    pub fn attach_tag(&self, note_id: i64, tag_id: i64) -> ScribeResult<()> {
        if self.note(note_id)?.is_none() {
            return Err(ScribeError::inconsistent(format!(
                "cannot tag note {}: not in local store",
                note_id
            )));
        }
        if self.tag(tag_id)?.is_none() {
            return Err(ScribeError::inconsistent(format!(
                "cannot attach tag {}: not in local store",
                tag_id
            )));
        }

        self.conn.execute(
            "INSERT OR IGNORE INTO note_tags (note_id, tag_id) VALUES (?1, ?2)",
            params![note_id, tag_id],
        )?;
        Ok(())
    }

    /// Idempotent: detaching a non-existent relation is a no-op.
    pub fn detach_tag(&self, note_id: i64, tag_id: i64) -> ScribeResult<()> {
        self.conn.execute(
            "DELETE FROM note_tags WHERE note_id = ?1 AND tag_id = ?2",
            params![note_id, tag_id],
        )?;
        Ok(())
    }

    pub fn tags_for_note(&self, note_id: i64) -> ScribeResult<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.name, t.color FROM tags t
             JOIN note_tags nt ON nt.tag_id = t.id
             WHERE nt.note_id = ?1 ORDER BY t.id",
        )?;
        let tags = stmt
            .query_map([note_id], Self::tag_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    // Search

    /// Case-insensitive substring match over title, content, and tag names.
    /// A blank query returns all non-deleted notes with their tags.
    pub fn search(&self, query: &str) -> ScribeResult<Vec<NoteWithTags>> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return self.notes_with_tags(false);
        }

        let pattern = like_pattern(trimmed);
        let mut stmt = self.conn.prepare(
            r"SELECT DISTINCT n.id, n.title, n.content, n.is_favorite, n.is_deleted,
                     n.created_at, n.updated_at
              FROM notes n
              LEFT JOIN note_tags nt ON nt.note_id = n.id
              LEFT JOIN tags t ON t.id = nt.tag_id
              WHERE n.is_deleted = 0
                AND (lower(n.title) LIKE ?1 ESCAPE '\'
                     OR lower(n.content) LIKE ?1 ESCAPE '\'
                     OR lower(t.name) LIKE ?1 ESCAPE '\')
              ORDER BY n.updated_at DESC, n.id DESC",
        )?;

        let notes = stmt
            .query_map([&pattern], Self::note_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        notes
            .into_iter()
            .map(|note| {
                let tags = self.tags_for_note(note.id)?;
                Ok(NoteWithTags::new(note, tags))
            })
            .collect()
    }

    // Sync metadata

    pub fn set_last_sync(&self, at: DateTime<Utc>) -> ScribeResult<()> {
        self.conn.execute(
            "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![META_LAST_SYNC, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Last successful sync time. A missing or corrupt value degrades to
    /// `None`, never an error.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                [META_LAST_SYNC],
                |row| row.get(0),
            )
            .optional()
            .ok()
            .flatten();

        value
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    // Pending offline creates

    pub fn record_pending(&self, correlation_id: Uuid, placeholder_id: i64) -> ScribeResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO pending_notes (correlation_id, placeholder_id) VALUES (?1, ?2)",
            params![correlation_id.to_string(), placeholder_id],
        )?;
        Ok(())
    }

    /// All offline creates awaiting reconciliation. Rows with an unparseable
    /// correlation id are skipped, not fatal.
    pub fn pending(&self) -> ScribeResult<Vec<(Uuid, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT correlation_id, placeholder_id FROM pending_notes")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, placeholder)| Uuid::parse_str(&id).ok().map(|u| (u, placeholder)))
            .collect())
    }

    pub fn clear_pending(&self, correlation_id: Uuid) -> ScribeResult<()> {
        self.conn.execute(
            "DELETE FROM pending_notes WHERE correlation_id = ?1",
            [correlation_id.to_string()],
        )?;
        Ok(())
    }
}
