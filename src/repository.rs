//! In-memory authoritative store backing the notes API.
//!
//! Owns server-assigned id generation, filtering, and the note/tag joins.
//! Explicitly constructed and passed by handle into request handlers; a
//! fresh instance per test gives full isolation.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ScribeError, ScribeResult};
use crate::export::{self, ExportFormat};
use crate::models::{Note, NoteDraft, NotePatch, NoteWithTags, Tag, TagDraft, TagPatch};
use crate::validation;

/// Rendered export, ready to serve as an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedExport {
    pub filename: String,
    pub content_type: String,
    pub body: String,
}

/// Authoritative note/tag store
pub struct Repository {
    notes: BTreeMap<i64, Note>,
    tags: BTreeMap<i64, Tag>,
    relations: BTreeSet<(i64, i64)>,
    next_note_id: i64,
    next_tag_id: i64,
}

impl Repository {
    pub fn new() -> Self {
        Self {
            notes: BTreeMap::new(),
            tags: BTreeMap::new(),
            relations: BTreeSet::new(),
            next_note_id: 1,
            next_tag_id: 1,
        }
    }

    fn with_tags(&self, note: &Note) -> NoteWithTags {
        let tags = self
            .relations
            .iter()
            .filter(|(note_id, _)| *note_id == note.id)
            .filter_map(|(_, tag_id)| self.tags.get(tag_id).cloned())
            .collect();
        NoteWithTags::new(note.clone(), tags)
    }

    fn note_mut(&mut self, id: i64) -> ScribeResult<&mut Note> {
        self.notes
            .get_mut(&id)
            .ok_or_else(|| ScribeError::NotFound(format!("note {} not found", id)))
    }

    /// Verify every id refers to an existing tag.
    fn check_tag_ids(&self, tag_ids: &[i64]) -> ScribeResult<()> {
        for tag_id in tag_ids {
            if !self.tags.contains_key(tag_id) {
                return Err(ScribeError::validation(
                    "tagIds",
                    format!("tag {} does not exist", tag_id),
                ));
            }
        }
        Ok(())
    }

    // Notes

    pub fn list_notes(&self, include_deleted: bool) -> Vec<NoteWithTags> {
        let mut notes: Vec<NoteWithTags> = self
            .notes
            .values()
            .filter(|n| include_deleted || !n.is_deleted)
            .map(|n| self.with_tags(n))
            .collect();
        notes.sort_by(|a, b| {
            b.note
                .updated_at
                .cmp(&a.note.updated_at)
                .then(b.note.id.cmp(&a.note.id))
        });
        notes
    }

    /// Case-insensitive substring search over title and content only (tag
    /// names are not matched server-side). A blank query returns everything
    /// not deleted.
    pub fn search_notes(&self, query: &str) -> ScribeResult<Vec<NoteWithTags>> {
        validation::validate_search_query(query)?;

        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(self.list_notes(false));
        }

        Ok(self
            .list_notes(false)
            .into_iter()
            .filter(|view| {
                view.note.title.to_lowercase().contains(&needle)
                    || view.note.content.to_lowercase().contains(&needle)
            })
            .collect())
    }

    pub fn get_note(&self, id: i64) -> ScribeResult<NoteWithTags> {
        self.notes
            .get(&id)
            .map(|n| self.with_tags(n))
            .ok_or_else(|| ScribeError::NotFound(format!("note {} not found", id)))
    }

    pub fn create_note(&mut self, draft: &NoteDraft) -> ScribeResult<NoteWithTags> {
        validation::validate_note_draft(draft)?;
        let tag_ids = draft.tag_ids.clone().unwrap_or_default();
        self.check_tag_ids(&tag_ids)?;

        let id = self.next_note_id;
        self.next_note_id += 1;

        let note = Note::from_draft(id, draft);
        self.notes.insert(id, note);
        for tag_id in tag_ids {
            self.relations.insert((id, tag_id));
        }

        tracing::debug!(note_id = id, "Created note");
        self.get_note(id)
    }

    /// Apply a partial update. `tag_ids`, when present, is diffed against the
    /// current relations: missing ones are added, absent ones removed.
    pub fn update_note(&mut self, id: i64, patch: &NotePatch) -> ScribeResult<NoteWithTags> {
        validation::validate_note_patch(patch)?;
        if let Some(tag_ids) = &patch.tag_ids {
            self.check_tag_ids(tag_ids)?;
        }

        let note = self.note_mut(id)?;
        patch.apply_to(note);

        if let Some(tag_ids) = &patch.tag_ids {
            let desired: BTreeSet<i64> = tag_ids.iter().copied().collect();
            self.relations
                .retain(|(note_id, tag_id)| *note_id != id || desired.contains(tag_id));
            for tag_id in desired {
                self.relations.insert((id, tag_id));
            }
        }

        self.get_note(id)
    }

    /// Soft delete: the note is marked, never removed.
    pub fn delete_note(&mut self, id: i64) -> ScribeResult<NoteWithTags> {
        let note = self.note_mut(id)?;
        note.is_deleted = true;
        note.touch();
        self.get_note(id)
    }

    pub fn restore_note(&mut self, id: i64) -> ScribeResult<NoteWithTags> {
        let note = self.note_mut(id)?;
        note.is_deleted = false;
        note.touch();
        self.get_note(id)
    }

    pub fn toggle_favorite(&mut self, id: i64) -> ScribeResult<NoteWithTags> {
        let note = self.note_mut(id)?;
        note.is_favorite = !note.is_favorite;
        note.touch();
        self.get_note(id)
    }

    pub fn export_note(&self, id: i64, format: ExportFormat) -> ScribeResult<RenderedExport> {
        let view = self.get_note(id)?;
        let body = export::render(&view, format)?;
        Ok(RenderedExport {
            filename: export::attachment_filename(&view.note.title, format),
            content_type: format.content_type().to_string(),
            body,
        })
    }

    // Tags

    pub fn list_tags(&self) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self.tags.values().cloned().collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        tags
    }

    pub fn create_tag(&mut self, draft: &TagDraft) -> ScribeResult<Tag> {
        validation::validate_tag_draft(draft)?;

        let id = self.next_tag_id;
        self.next_tag_id += 1;

        let tag = Tag::from_draft(id, draft);
        self.tags.insert(id, tag.clone());
        tracing::debug!(tag_id = id, "Created tag");
        Ok(tag)
    }

    pub fn update_tag(&mut self, id: i64, patch: &TagPatch) -> ScribeResult<Tag> {
        validation::validate_tag_patch(patch)?;
        let tag = self
            .tags
            .get_mut(&id)
            .ok_or_else(|| ScribeError::NotFound(format!("tag {} not found", id)))?;
        patch.apply_to(tag);
        Ok(tag.clone())
    }

    /// Hard delete, cascading every relation referencing the tag.
    pub fn delete_tag(&mut self, id: i64) -> ScribeResult<()> {
        if self.tags.remove(&id).is_none() {
            return Err(ScribeError::NotFound(format!("tag {} not found", id)));
        }
        self.relations.retain(|(_, tag_id)| *tag_id != id);
        Ok(())
    }

    // Relations

    /// Idempotent: attaching an existing relation is a no-op.
    pub fn attach_tag(&mut self, note_id: i64, tag_id: i64) -> ScribeResult<NoteWithTags> {
        if !self.notes.contains_key(&note_id) {
            return Err(ScribeError::NotFound(format!("note {} not found", note_id)));
        }
        if !self.tags.contains_key(&tag_id) {
            return Err(ScribeError::NotFound(format!("tag {} not found", tag_id)));
        }
        self.relations.insert((note_id, tag_id));
        self.get_note(note_id)
    }

    /// Idempotent: detaching a non-existent relation is a no-op.
    pub fn detach_tag(&mut self, note_id: i64, tag_id: i64) -> ScribeResult<NoteWithTags> {
        if !self.notes.contains_key(&note_id) {
            return Err(ScribeError::NotFound(format!("note {} not found", note_id)));
        }
        self.relations.remove(&(note_id, tag_id));
        self.get_note(note_id)
    }
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}
