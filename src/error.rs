use std::{path::PathBuf, time::Duration};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A failure reported by the search index, tagged with an
    /// Elasticsearch-style error type.
    #[error("[{category}] {reason}")]
    Index { category: String, reason: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("duplicated {index} documents for id {id} ({count} hits)")]
    DuplicateIndexEntry {
        index: &'static str,
        id: String,
        count: usize,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("error saving {file} to {stage}: {source}")]
    Upload {
        file: String,
        stage: &'static str,
        source: Box<Error>,
    },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    pub fn index(category: &str, reason: impl Into<String>) -> Self {
        Self::Index {
            category: category.to_string(),
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// The HTTP status an endpoint answers with when an operation fails.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } | Self::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Upload { source, .. } => source.status(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tantivy::TantivyError> for Error {
    fn from(err: tantivy::TantivyError) -> Self {
        use tantivy::TantivyError as T;

        let category = match &err {
            T::FieldNotFound(_) | T::SchemaError(_) => "query_shard_exception",
            T::InvalidArgument(_) => "illegal_argument_exception",
            T::IndexAlreadyExists => "resource_already_exists_exception",
            T::LockFailure(..) => "lock_obtain_failed_exception",
            T::OpenDirectoryError(_) | T::OpenReadError(_) => {
                "index_not_found_exception"
            }
            _ => "index_exception",
        };
        Self::index(category, err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}
