//! Input validation for Scribe.
//!
//! This module provides validation functions for all user inputs.
//! All validators return ScribeError::Validation on failure. Drafts and
//! patches are validated field-by-field before any store applies them;
//! unknown fields are already rejected at deserialization time.

use crate::error::{ScribeError, ScribeResult};
use crate::models::{NoteDraft, NotePatch, TagDraft, TagPatch};

// Limits
pub const MAX_NOTE_TITLE_LENGTH: usize = 200;
pub const MAX_NOTE_CONTENT_LENGTH: usize = 1_000_000; // 1MB of markup
pub const MAX_TAG_NAME_LENGTH: usize = 100;
pub const MAX_SEARCH_QUERY_LENGTH: usize = 500;

/// Validate a note title.
pub fn validate_title(value: &str) -> ScribeResult<()> {
    if value.trim().is_empty() {
        return Err(ScribeError::validation("title", "must not be blank"));
    }
    if value.len() > MAX_NOTE_TITLE_LENGTH {
        return Err(ScribeError::validation(
            "title",
            format!(
                "must be at most {} characters, got {}",
                MAX_NOTE_TITLE_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Validate note content markup.
pub fn validate_content(value: &str) -> ScribeResult<()> {
    if value.len() > MAX_NOTE_CONTENT_LENGTH {
        return Err(ScribeError::validation(
            "content",
            format!(
                "must be at most {} bytes, got {}",
                MAX_NOTE_CONTENT_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Validate a tag name.
pub fn validate_tag_name(value: &str) -> ScribeResult<()> {
    if value.trim().is_empty() {
        return Err(ScribeError::validation("name", "must not be blank"));
    }
    if value.len() > MAX_TAG_NAME_LENGTH {
        return Err(ScribeError::validation(
            "name",
            format!(
                "must be at most {} characters, got {}",
                MAX_TAG_NAME_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Validate a tag color: "#RRGGBB" with lowercase or uppercase hex digits.
pub fn validate_tag_color(value: &str) -> ScribeResult<()> {
    let hex = value.strip_prefix('#').ok_or_else(|| {
        ScribeError::validation("color", "must be a hex color starting with '#'")
    })?;

    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ScribeError::validation(
            "color",
            format!("must be in #RRGGBB format, got '{}'", value),
        ));
    }
    Ok(())
}

/// Validate a search query. Blank queries are valid (they mean "everything").
pub fn validate_search_query(value: &str) -> ScribeResult<()> {
    if value.len() > MAX_SEARCH_QUERY_LENGTH {
        return Err(ScribeError::validation(
            "query",
            format!(
                "must be at most {} characters, got {}",
                MAX_SEARCH_QUERY_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Validate a note draft field-by-field.
pub fn validate_note_draft(draft: &NoteDraft) -> ScribeResult<()> {
    if let Some(title) = &draft.title {
        validate_title(title)?;
    }
    if let Some(content) = &draft.content {
        validate_content(content)?;
    }
    Ok(())
}

/// Validate a note patch field-by-field. An empty patch is rejected.
pub fn validate_note_patch(patch: &NotePatch) -> ScribeResult<()> {
    if patch.is_empty() {
        return Err(ScribeError::validation("patch", "no fields to update"));
    }
    if let Some(title) = &patch.title {
        validate_title(title)?;
    }
    if let Some(content) = &patch.content {
        validate_content(content)?;
    }
    Ok(())
}

/// Validate a tag draft field-by-field.
pub fn validate_tag_draft(draft: &TagDraft) -> ScribeResult<()> {
    validate_tag_name(&draft.name)?;
    if let Some(color) = &draft.color {
        validate_tag_color(color)?;
    }
    Ok(())
}

/// Validate a tag patch field-by-field. An empty patch is rejected.
pub fn validate_tag_patch(patch: &TagPatch) -> ScribeResult<()> {
    if patch.is_empty() {
        return Err(ScribeError::validation("patch", "no fields to update"));
    }
    if let Some(name) = &patch.name {
        validate_tag_name(name)?;
    }
    if let Some(color) = &patch.color {
        validate_tag_color(color)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_title() {
        assert!(validate_title("Trip").is_ok());
        assert!(validate_title("   ").is_err());
        assert!(validate_title(&"x".repeat(MAX_NOTE_TITLE_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_tag_color() {
        assert!(validate_tag_color("#ff0000").is_ok());
        assert!(validate_tag_color("#FF8800").is_ok());
        assert!(validate_tag_color("ff0000").is_err());
        assert!(validate_tag_color("#ff00").is_err());
        assert!(validate_tag_color("#gg0000").is_err());
    }

    #[test]
    fn test_validate_search_query_blank_is_ok() {
        assert!(validate_search_query("").is_ok());
        assert!(validate_search_query("   ").is_ok());
        assert!(validate_search_query(&"q".repeat(MAX_SEARCH_QUERY_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_empty_patch_rejected() {
        assert!(validate_note_patch(&NotePatch::default()).is_err());
        assert!(validate_tag_patch(&TagPatch::default()).is_err());
    }

    #[test]
    fn test_patch_with_bad_color_rejected() {
        let patch = TagPatch {
            color: Some("red".to_string()),
            ..Default::default()
        };
        let err = validate_tag_patch(&patch).unwrap_err();
        assert!(matches!(err, ScribeError::Validation { .. }));
    }

    #[test]
    fn test_draft_validation() {
        assert!(validate_note_draft(&NoteDraft::default()).is_ok());
        let bad = NoteDraft {
            title: Some(" ".to_string()),
            ..Default::default()
        };
        assert!(validate_note_draft(&bad).is_err());
    }
}
