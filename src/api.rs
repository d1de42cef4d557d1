//! HTTP routes for books, files and tags.
//!
//! Every repository call runs on the blocking pool under a deadline; see
//! [`run_blocking`].

use std::{sync::Arc, time::Duration};

use axum::{
    Json,
    Router,
    body::{Body, Bytes},
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Value, json};
use tokio_util::io::ReaderStream;

use crate::{
    data_dir::DataDir,
    deadline::run_blocking,
    entity::{EntityKind, UpdateRequest, UploadedFile},
    error::{Error, Result},
    query::SearchRequest,
    repository::EntityRepository,
    stores::Stores,
    tag_ledger::TagLedger,
};

/// Everything outside the RFC 5987 `attr-char` set.
const FILENAME_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Deadlines for calls into the two stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Document-store bound work: uploads, updates, deletes, tags.
    pub store: Duration,
    /// Search-index bound work: searches and lookups by id.
    pub index: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            store: Duration::from_secs(5),
            index: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityState {
    pub repo: EntityRepository,
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone)]
pub struct TagState {
    pub tags: TagLedger,
    pub timeouts: Timeouts,
}

/// Everything the router needs, built once at startup.
#[derive(Debug, Clone)]
pub struct AppState {
    pub books: EntityState,
    pub files: EntityState,
    pub tags: TagState,
}

impl AppState {
    pub fn new(
        stores: Arc<Stores>,
        data_dir: &DataDir,
        timeouts: Timeouts,
    ) -> Result<Self> {
        let entity = |kind: EntityKind| -> Result<EntityState> {
            Ok(EntityState {
                repo: EntityRepository::new(
                    kind,
                    Arc::clone(&stores),
                    data_dir.storage_dir(kind)?,
                ),
                timeouts,
            })
        };

        Ok(Self {
            books: entity(EntityKind::Book)?,
            files: entity(EntityKind::File)?,
            tags: TagState {
                tags: TagLedger::new(Arc::clone(&stores)),
                timeouts,
            },
        })
    }
}

pub fn router(state: AppState) -> Router {
    let tags = Router::new()
        .route("/", get(list_tags))
        .route("/suggestions", get(suggest_tags))
        .with_state(state.tags);

    Router::new()
        .route("/health", get(health))
        .nest("/books", entity_routes(state.books))
        .nest("/files", entity_routes(state.files))
        .nest("/tags", tags)
}

fn entity_routes(state: EntityState) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/search", post(search))
        .route("/{id}", get(find).put(update).delete(remove))
        .route("/{id}/download", get(download))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

// -- Entities --

async fn upload(
    State(state): State<EntityState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let kind = state.repo.kind();
    let field_name = kind.upload_field();

    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(e.body_text()))?
    {
        if field.name() != Some(field_name) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::Validation(e.body_text()))?;
        files.push(UploadedFile::new(file_name, data));
    }

    let count = files.len();
    let after = state.timeouts.store.saturating_mul(count.max(1) as u32);
    let repo = state.repo.clone();
    let report =
        run_blocking("upload", after, move || Ok(repo.save_uploaded(files)))
            .await?;

    if report.is_success() {
        Ok((StatusCode::OK, format!("uploaded {count} {field_name}")))
    } else {
        for err in &report.errors {
            tracing::error!(kind = %kind, error = %err, "upload failed");
        }
        Ok((StatusCode::BAD_REQUEST, format!("error saving {field_name}")))
    }
}

async fn search(
    State(state): State<EntityState>,
    body: Bytes,
) -> Result<Json<Value>> {
    let request = SearchRequest::from_slice(&body)?;
    let kind = state.repo.kind();
    let repo = state.repo;
    let page =
        run_blocking("search", state.timeouts.index, move || {
            repo.search(&request)
        })
        .await?;

    let list: Vec<Value> = page.list.iter().map(|r| r.to_wire(kind)).collect();
    Ok(Json(json!({ "list": list, "total": page.total })))
}

async fn find(
    State(state): State<EntityState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let kind = state.repo.kind();
    let repo = state.repo;
    let record =
        run_blocking("find", state.timeouts.index, move || repo.find_by_id(&id))
            .await?;
    Ok(Json(record.to_wire(kind)))
}

/// Failed mutations answer 500 whatever the cause, a missing record
/// included. Only a bad request body is a client error.
fn mutation_failed(err: Error) -> Response {
    tracing::error!(error = %err, "mutation failed");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}

async fn update(
    State(state): State<EntityState>,
    Path(id): Path<String>,
    body: Bytes,
) -> std::result::Result<StatusCode, Response> {
    let request: UpdateRequest = serde_json::from_slice(&body)
        .map_err(|e| Error::Validation(format!("malformed update body: {e}")))
        .and_then(|request: UpdateRequest| request.validate().map(|()| request))
        .map_err(IntoResponse::into_response)?;

    let repo = state.repo;
    run_blocking("update", state.timeouts.store, move || {
        repo.update_by_id(&id, &request)
    })
    .await
    .map_err(mutation_failed)?;
    Ok(StatusCode::OK)
}

async fn remove(
    State(state): State<EntityState>,
    Path(id): Path<String>,
) -> std::result::Result<StatusCode, Response> {
    let repo = state.repo;
    run_blocking("delete", state.timeouts.store, move || repo.delete_by_id(&id))
        .await
        .map_err(mutation_failed)?;
    Ok(StatusCode::OK)
}

async fn download(
    State(state): State<EntityState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let repo = state.repo;
    let (record, file, len) =
        run_blocking("download", state.timeouts.index, move || {
            let record = repo.find_by_id(&id)?;
            let (file, len) = repo.open_file(&record)?;
            Ok((record, file, len))
        })
        .await?;

    let stream = ReaderStream::new(tokio::fs::File::from_std(file));
    let name = record.download_name();
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(&name, FILENAME_ESCAPE)
    );
    let headers = [
        (header::CONTENT_TYPE, "application/pdf".to_string()),
        (header::CONTENT_LENGTH, len.to_string()),
        (header::CONTENT_DISPOSITION, disposition),
    ];
    Ok((headers, Body::from_stream(stream)))
}

// -- Tags --

async fn list_tags(State(state): State<TagState>) -> Result<Json<Value>> {
    let tags = state.tags;
    let names =
        run_blocking("list tags", state.timeouts.store, move || tags.list_all())
            .await?;
    Ok(Json(tag_list(names)))
}

async fn suggest_tags(State(state): State<TagState>) -> Result<Json<Value>> {
    let tags = state.tags;
    let names = run_blocking("suggest tags", state.timeouts.store, move || {
        tags.suggest_tags()
    })
    .await?;
    Ok(Json(tag_list(names)))
}

fn tag_list(names: Vec<String>) -> Value {
    let list: Vec<Value> =
        names.into_iter().map(|name| json!({ "name": name })).collect();
    json!({ "list": list })
}
