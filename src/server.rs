//! HTTP surface for the authoritative notes backend, using Axum.
//!
//! Exposes the REST contract the sync layer consumes:
//! - /notes           - list, create
//! - /notes/search    - substring search
//! - /notes/{id}      - get, update, soft-delete
//! - /notes/{id}/restore, /notes/{id}/toggle-favorite, /notes/{id}/export
//! - /notes/{noteId}/tags/{tagId} - attach/detach
//! - /tags, /tags/{id} - tag CRUD
//!
//! The repository handle is explicit state; tests build a fresh router over
//! a fresh repository.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::oneshot;

use crate::error::{ScribeError, ScribeResult};
use crate::export::ExportFormat;
use crate::models::{NoteDraft, NotePatch, TagDraft, TagPatch};
use crate::repository::Repository;

/// Shared server state
#[derive(Clone)]
struct AppState {
    repo: Arc<Mutex<Repository>>,
}

impl AppState {
    /// Run a closure against the repository. A poisoned lock is reported as
    /// an internal error rather than a panic.
    fn with_repo<T>(&self, f: impl FnOnce(&mut Repository) -> ScribeResult<T>) -> ScribeResult<T> {
        let mut repo = self
            .repo
            .lock()
            .map_err(|_| ScribeError::Other("repository lock poisoned".to_string()))?;
        f(&mut repo)
    }
}

#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    error: String,
}

/// Map a domain error onto the HTTP status it travels as.
fn error_status(err: &ScribeError) -> StatusCode {
    match err {
        ScribeError::NotFound(_) => StatusCode::NOT_FOUND,
        ScribeError::Validation { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: ScribeError) -> Response {
    let status = error_status(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("Request failed: {}", err);
    }
    (status, Json(ErrorResponse { error: err.to_string() })).into_response()
}

fn json_result<T: serde::Serialize>(result: ScribeResult<T>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(err) => error_response(err),
    }
}

// Request/query types

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(rename = "includeDeleted")]
    include_deleted: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

// Route handlers

async fn list_notes(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let include_deleted = query.include_deleted.unwrap_or(false);
    json_result(state.with_repo(|repo| Ok(repo.list_notes(include_deleted))))
}

async fn search_notes(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let q = query.q.unwrap_or_default();
    json_result(state.with_repo(|repo| repo.search_notes(&q)))
}

async fn get_note(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    json_result(state.with_repo(|repo| repo.get_note(id)))
}

async fn create_note(
    State(state): State<AppState>,
    Json(draft): Json<NoteDraft>,
) -> Response {
    match state.with_repo(|repo| repo.create_note(&draft)) {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn update_note(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<NotePatch>,
) -> Response {
    json_result(state.with_repo(|repo| repo.update_note(id, &patch)))
}

async fn delete_note(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    json_result(state.with_repo(|repo| repo.delete_note(id)))
}

async fn restore_note(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    json_result(state.with_repo(|repo| repo.restore_note(id)))
}

async fn toggle_favorite(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    json_result(state.with_repo(|repo| repo.toggle_favorite(id)))
}

async fn export_note(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ExportQuery>,
) -> Response {
    let format = match ExportFormat::parse(query.format.as_deref().unwrap_or("text")) {
        Ok(format) => format,
        Err(err) => return error_response(err),
    };

    match state.with_repo(|repo| repo.export_note(id, format)) {
        Ok(rendered) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, rendered.content_type),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", rendered.filename),
                ),
            ],
            rendered.body,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn list_tags(State(state): State<AppState>) -> Response {
    json_result(state.with_repo(|repo| Ok(repo.list_tags())))
}

async fn create_tag(State(state): State<AppState>, Json(draft): Json<TagDraft>) -> Response {
    match state.with_repo(|repo| repo.create_tag(&draft)) {
        Ok(tag) => (StatusCode::CREATED, Json(tag)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn update_tag(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<TagPatch>,
) -> Response {
    json_result(state.with_repo(|repo| repo.update_tag(id, &patch)))
}

async fn delete_tag(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.with_repo(|repo| repo.delete_tag(id)) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

async fn attach_tag(
    State(state): State<AppState>,
    Path((note_id, tag_id)): Path<(i64, i64)>,
) -> Response {
    json_result(state.with_repo(|repo| repo.attach_tag(note_id, tag_id)))
}

async fn detach_tag(
    State(state): State<AppState>,
    Path((note_id, tag_id)): Path<(i64, i64)>,
) -> Response {
    json_result(state.with_repo(|repo| repo.detach_tag(note_id, tag_id)))
}

/// Build the API router over an explicit repository handle.
pub fn build_router(repo: Arc<Mutex<Repository>>) -> Router {
    let state = AppState { repo };

    Router::new()
        .route("/notes", get(list_notes).post(create_note))
        .route("/notes/search", get(search_notes))
        .route(
            "/notes/:id",
            get(get_note).put(update_note).delete(delete_note),
        )
        .route("/notes/:id/restore", post(restore_note))
        .route("/notes/:id/toggle-favorite", post(toggle_favorite))
        .route("/notes/:id/export", get(export_note))
        .route(
            "/notes/:note_id/tags/:tag_id",
            post(attach_tag).delete(detach_tag),
        )
        .route("/tags", get(list_tags).post(create_tag))
        .route("/tags/:id", put(update_tag).delete(delete_tag))
        .with_state(state)
}

/// A running API server. Dropping the handle does not stop the server; call
/// [`ServerHandle::shutdown`] for a graceful stop.
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Signal the server to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

/// Bind and serve the API on the given address. Pass port 0 to let the OS
/// pick one; the bound address is on the returned handle.
pub async fn serve(repo: Arc<Mutex<Repository>>, addr: SocketAddr) -> ScribeResult<ServerHandle> {
    let app = build_router(repo);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tracing::info!(%addr, "Notes API listening");

    let task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(ServerHandle {
        addr,
        shutdown_tx,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_status(&ScribeError::NotFound("note 9 not found".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_status(&ScribeError::validation("format", "unknown")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&ScribeError::Other("boom".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_router_builds() {
        let repo = Arc::new(Mutex::new(Repository::new()));
        let _router = build_router(repo);
    }

    #[tokio::test]
    async fn test_serve_binds_ephemeral_port_and_shuts_down() {
        let repo = Arc::new(Mutex::new(Repository::new()));
        let handle = serve(repo, "127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert_ne!(handle.addr.port(), 0);
        handle.shutdown().await;
    }
}
