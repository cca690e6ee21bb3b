//! Data models for Scribe.
//!
//! This module defines the core entities: Note, Tag, and NoteTag, plus the
//! NoteWithTags view and the explicit draft/patch structs used for creates
//! and partial updates. Entity ids are server-assigned positive integers;
//! negative ids are placeholders for entities created while offline.
//!
//! Wire JSON is camelCase to match the remote API contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to notes created without one.
pub const DEFAULT_NOTE_TITLE: &str = "Untitled";

/// Color given to tags created without one.
pub const DEFAULT_TAG_COLOR: &str = "#9e9e9e";

/// A user-authored rich-text note.
///
/// Notes are never hard-deleted by normal flows; `is_deleted` marks them as
/// trashed and excludes them from default listings while keeping them
/// restorable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Server-assigned id; negative for not-yet-synced local creates
    pub id: i64,
    pub title: String,
    /// Rich-text markup (HTML)
    pub content: String,
    pub is_favorite: bool,
    /// Soft delete flag (trash)
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Build a note from a draft, applying the contract defaults.
    pub fn from_draft(id: i64, draft: &NoteDraft) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: draft
                .title
                .clone()
                .unwrap_or_else(|| DEFAULT_NOTE_TITLE.to_string()),
            content: draft.content.clone().unwrap_or_default(),
            is_favorite: draft.is_favorite.unwrap_or(false),
            is_deleted: draft.is_deleted.unwrap_or(false),
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh `updated_at`. Invariant: called on every mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Whether this note was created locally and has not been synced yet.
    pub fn is_placeholder(&self) -> bool {
        self.id < 0
    }
}

/// A named, colored label attachable to multiple notes.
///
/// Tags have no soft delete: deleting a tag removes it and all its relations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: i64,
    pub name: String,
    /// Hex color, "#RRGGBB"
    pub color: String,
}

impl Tag {
    /// Build a tag from a draft, applying the contract defaults.
    pub fn from_draft(id: i64, draft: &TagDraft) -> Self {
        Self {
            id,
            name: draft.name.clone(),
            color: draft
                .color
                .clone()
                .unwrap_or_else(|| DEFAULT_TAG_COLOR.to_string()),
        }
    }
}

/// Association between a note and a tag. Unique per pair, no ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteTag {
    pub note_id: i64,
    pub tag_id: i64,
}

/// A note enriched with its resolved tag set. View only, recomputed from the
/// relation rows on every read — never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteWithTags {
    #[serde(flatten)]
    pub note: Note,
    pub tags: Vec<Tag>,
}

impl NoteWithTags {
    pub fn new(note: Note, mut tags: Vec<Tag>) -> Self {
        tags.sort_by_key(|t| t.id);
        Self { note, tags }
    }

    pub fn tag_ids(&self) -> Vec<i64> {
        self.tags.iter().map(|t| t.id).collect()
    }
}

/// Fields accepted when creating a note. Unknown fields are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NoteDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_ids: Option<Vec<i64>>,
}

/// Partial update for a note. Absent fields are left untouched; `tag_ids`
/// is diffed against the current relations by the store applying the patch.
/// Unknown fields are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NotePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_deleted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_ids: Option<Vec<i64>>,
}

impl NotePatch {
    /// Whether the patch carries no changes at all.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.is_favorite.is_none()
            && self.is_deleted.is_none()
            && self.tag_ids.is_none()
    }

    /// Merge the scalar fields into `note` and refresh its `updated_at`.
    /// Relation changes (`tag_ids`) are the applying store's concern.
    pub fn apply_to(&self, note: &mut Note) {
        if let Some(title) = &self.title {
            note.title = title.clone();
        }
        if let Some(content) = &self.content {
            note.content = content.clone();
        }
        if let Some(favorite) = self.is_favorite {
            note.is_favorite = favorite;
        }
        if let Some(deleted) = self.is_deleted {
            note.is_deleted = deleted;
        }
        note.touch();
    }
}

/// Fields accepted when creating a tag. Unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TagDraft {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Partial update for a tag. Unknown fields are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TagPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl TagPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.color.is_none()
    }

    pub fn apply_to(&self, tag: &mut Tag) {
        if let Some(name) = &self.name {
            tag.name = name.clone();
        }
        if let Some(color) = &self.color {
            tag.color = color.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_from_empty_draft_uses_defaults() {
        let note = Note::from_draft(1, &NoteDraft::default());

        assert_eq!(note.id, 1);
        assert_eq!(note.title, "Untitled");
        assert_eq!(note.content, "");
        assert!(!note.is_favorite);
        assert!(!note.is_deleted);
        assert_eq!(note.created_at, note.updated_at);
    }

    #[test]
    fn test_placeholder_detection() {
        let mut note = Note::from_draft(-417, &NoteDraft::default());
        assert!(note.is_placeholder());
        note.id = 417;
        assert!(!note.is_placeholder());
    }

    #[test]
    fn test_touch_refreshes_updated_at() {
        let mut note = Note::from_draft(1, &NoteDraft::default());
        let before = note.updated_at;
        note.touch();
        assert!(note.updated_at >= before);
    }

    #[test]
    fn test_patch_apply_merges_only_present_fields() {
        let mut note = Note::from_draft(1, &NoteDraft {
            title: Some("Trip".to_string()),
            content: Some("<p>Pack bags</p>".to_string()),
            ..Default::default()
        });

        let patch = NotePatch {
            is_favorite: Some(true),
            ..Default::default()
        };
        patch.apply_to(&mut note);

        assert_eq!(note.title, "Trip");
        assert_eq!(note.content, "<p>Pack bags</p>");
        assert!(note.is_favorite);
    }

    #[test]
    fn test_note_serializes_camel_case() {
        let note = Note::from_draft(7, &NoteDraft::default());
        let json = serde_json::to_string(&note).unwrap();

        assert!(json.contains("\"isFavorite\":false"));
        assert!(json.contains("\"isDeleted\":false"));
        assert!(json.contains("\"createdAt\""));
        assert!(!json.contains("is_favorite"));
    }

    #[test]
    fn test_patch_rejects_unknown_fields() {
        let result: Result<NotePatch, _> =
            serde_json::from_str(r#"{"title":"x","pinned":true}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_note_with_tags_sorts_tags_by_id() {
        let note = Note::from_draft(10, &NoteDraft::default());
        let tags = vec![
            Tag { id: 2, name: "Home".to_string(), color: "#00ff00".to_string() },
            Tag { id: 1, name: "Work".to_string(), color: "#ff0000".to_string() },
        ];
        let view = NoteWithTags::new(note, tags);
        assert_eq!(view.tag_ids(), vec![1, 2]);
    }

    #[test]
    fn test_tag_draft_default_color() {
        let tag = Tag::from_draft(3, &TagDraft { name: "Work".to_string(), color: None });
        assert_eq!(tag.color, DEFAULT_TAG_COLOR);
    }

    #[test]
    fn test_empty_patch_detection() {
        assert!(NotePatch::default().is_empty());
        assert!(!NotePatch { title: Some("t".to_string()), ..Default::default() }.is_empty());
    }
}
