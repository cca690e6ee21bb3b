//! HTTP client for the authoritative notes backend.
//!
//! Translates sync-layer intents into requests against the REST contract and
//! never swallows errors: the caller decides whether to fall back. Transport
//! failures (no response) map to `ScribeError::Unreachable`; any answered
//! non-2xx maps to `ScribeError::Rejected` with the status and server
//! message, which must propagate to the UI.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ScribeError, ScribeResult};
use crate::export::ExportFormat;
use crate::models::{NoteDraft, NotePatch, NoteWithTags, Tag, TagDraft, TagPatch};

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A note export fetched from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPayload {
    /// Filename from the Content-Disposition header
    pub filename: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// The remote API surface the sync layer depends on. `ApiClient` is the HTTP
/// implementation; tests substitute stubs to exercise the fallback paths.
pub trait RemoteApi: Send + Sync {
    fn list_notes(
        &self,
        include_deleted: bool,
    ) -> impl Future<Output = ScribeResult<Vec<NoteWithTags>>> + Send;

    fn search_notes(
        &self,
        query: &str,
    ) -> impl Future<Output = ScribeResult<Vec<NoteWithTags>>> + Send;

    fn get_note(&self, id: i64) -> impl Future<Output = ScribeResult<NoteWithTags>> + Send;

    fn create_note(
        &self,
        draft: &NoteDraft,
    ) -> impl Future<Output = ScribeResult<NoteWithTags>> + Send;

    fn update_note(
        &self,
        id: i64,
        patch: &NotePatch,
    ) -> impl Future<Output = ScribeResult<NoteWithTags>> + Send;

    fn delete_note(&self, id: i64) -> impl Future<Output = ScribeResult<NoteWithTags>> + Send;

    fn restore_note(&self, id: i64) -> impl Future<Output = ScribeResult<NoteWithTags>> + Send;

    fn toggle_favorite(&self, id: i64)
        -> impl Future<Output = ScribeResult<NoteWithTags>> + Send;

    fn export_note(
        &self,
        id: i64,
        format: ExportFormat,
    ) -> impl Future<Output = ScribeResult<ExportPayload>> + Send;

    fn list_tags(&self) -> impl Future<Output = ScribeResult<Vec<Tag>>> + Send;

    fn create_tag(&self, draft: &TagDraft) -> impl Future<Output = ScribeResult<Tag>> + Send;

    fn update_tag(
        &self,
        id: i64,
        patch: &TagPatch,
    ) -> impl Future<Output = ScribeResult<Tag>> + Send;

    fn delete_tag(&self, id: i64) -> impl Future<Output = ScribeResult<()>> + Send;

    fn attach_tag(
        &self,
        note_id: i64,
        tag_id: i64,
    ) -> impl Future<Output = ScribeResult<NoteWithTags>> + Send;

    fn detach_tag(
        &self,
        note_id: i64,
        tag_id: i64,
    ) -> impl Future<Output = ScribeResult<NoteWithTags>> + Send;
}

/// Server error body shape
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Build the rejection error for an answered non-2xx response.
fn rejection_from(status: StatusCode, body: &str) -> ScribeError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| {
            if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request rejected")
                    .to_string()
            } else {
                body.trim().to_string()
            }
        });
    ScribeError::rejected(status.as_u16(), message)
}

/// Extract the filename from a Content-Disposition header value.
fn filename_from_disposition(value: &str) -> Option<String> {
    let marker = "filename=";
    let idx = value.find(marker)?;
    let raw = value[idx + marker.len()..].trim();
    let raw = raw.split(';').next().unwrap_or(raw).trim();
    let name = raw.trim_matches('"').trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// HTTP implementation of [`RemoteApi`].
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client against the given backend base URL.
    pub fn new(base_url: impl Into<String>) -> ScribeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ScribeError::unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Resolve a response: 2xx passes through, everything else becomes a
    /// `Rejected` error carrying the server's message.
    async fn checked(response: Response) -> ScribeResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(rejection_from(status, &body))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ScribeResult<T> {
        let response = Self::checked(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ScribeError::Protocol(format!("failed to parse response body: {}", e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ScribeResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ScribeError::unreachable(e.to_string()))?;
        Self::decode(response).await
    }

    async fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> ScribeResult<T> {
        let mut request = self.client.post(self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ScribeError::unreachable(e.to_string()))?;
        Self::decode(response).await
    }
}

impl RemoteApi for ApiClient {
    async fn list_notes(&self, include_deleted: bool) -> ScribeResult<Vec<NoteWithTags>> {
        self.get_json(&format!("/notes?includeDeleted={}", include_deleted))
            .await
    }

    async fn search_notes(&self, query: &str) -> ScribeResult<Vec<NoteWithTags>> {
        self.get_json(&format!("/notes/search?q={}", urlencoding::encode(query)))
            .await
    }

    async fn get_note(&self, id: i64) -> ScribeResult<NoteWithTags> {
        self.get_json(&format!("/notes/{}", id)).await
    }

    async fn create_note(&self, draft: &NoteDraft) -> ScribeResult<NoteWithTags> {
        self.post_json("/notes", Some(draft)).await
    }

    async fn update_note(&self, id: i64, patch: &NotePatch) -> ScribeResult<NoteWithTags> {
        let response = self
            .client
            .put(self.url(&format!("/notes/{}", id)))
            .json(patch)
            .send()
            .await
            .map_err(|e| ScribeError::unreachable(e.to_string()))?;
        Self::decode(response).await
    }

    async fn delete_note(&self, id: i64) -> ScribeResult<NoteWithTags> {
        let response = self
            .client
            .delete(self.url(&format!("/notes/{}", id)))
            .send()
            .await
            .map_err(|e| ScribeError::unreachable(e.to_string()))?;
        Self::decode(response).await
    }

    async fn restore_note(&self, id: i64) -> ScribeResult<NoteWithTags> {
        self.post_json::<(), _>(&format!("/notes/{}/restore", id), None)
            .await
    }

    async fn toggle_favorite(&self, id: i64) -> ScribeResult<NoteWithTags> {
        self.post_json::<(), _>(&format!("/notes/{}/toggle-favorite", id), None)
            .await
    }

    async fn export_note(&self, id: i64, format: ExportFormat) -> ScribeResult<ExportPayload> {
        let response = self
            .client
            .get(self.url(&format!("/notes/{}/export?format={}", id, format.as_str())))
            .send()
            .await
            .map_err(|e| ScribeError::unreachable(e.to_string()))?;
        let response = Self::checked(response).await?;

        let filename = response
            .headers()
            .get("content-disposition")
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| format!("note.{}", format.extension()));
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| ScribeError::unreachable(e.to_string()))?
            .to_vec();

        Ok(ExportPayload {
            filename,
            content_type,
            body,
        })
    }

    async fn list_tags(&self) -> ScribeResult<Vec<Tag>> {
        self.get_json("/tags").await
    }

    async fn create_tag(&self, draft: &TagDraft) -> ScribeResult<Tag> {
        self.post_json("/tags", Some(draft)).await
    }

    async fn update_tag(&self, id: i64, patch: &TagPatch) -> ScribeResult<Tag> {
        let response = self
            .client
            .put(self.url(&format!("/tags/{}", id)))
            .json(patch)
            .send()
            .await
            .map_err(|e| ScribeError::unreachable(e.to_string()))?;
        Self::decode(response).await
    }

    async fn delete_tag(&self, id: i64) -> ScribeResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/tags/{}", id)))
            .send()
            .await
            .map_err(|e| ScribeError::unreachable(e.to_string()))?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn attach_tag(&self, note_id: i64, tag_id: i64) -> ScribeResult<NoteWithTags> {
        self.post_json::<(), _>(&format!("/notes/{}/tags/{}", note_id, tag_id), None)
            .await
    }

    async fn detach_tag(&self, note_id: i64, tag_id: i64) -> ScribeResult<NoteWithTags> {
        let response = self
            .client
            .delete(self.url(&format!("/notes/{}/tags/{}", note_id, tag_id)))
            .send()
            .await
            .map_err(|e| ScribeError::unreachable(e.to_string()))?;
        Self::decode(response).await
    }
}
