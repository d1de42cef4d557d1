//! Entity kinds and the records stored for them.

use std::{collections::BTreeSet, fmt, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};

/// The kinds of uploaded entities. Both share one repository
/// implementation and differ only in naming.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Book,
    File,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Book, EntityKind::File];

    /// Name of the document-store table and of the search index.
    pub fn index_name(self) -> &'static str {
        match self {
            Self::Book => "book",
            Self::File => "file",
        }
    }

    /// Multipart form field carrying the uploads.
    pub fn upload_field(self) -> &'static str {
        match self {
            Self::Book => "books",
            Self::File => "files",
        }
    }

    /// Key used for the display name in JSON responses and update bodies.
    pub fn name_key(self) -> &'static str {
        match self {
            Self::Book => "title",
            Self::File => "name",
        }
    }

    pub fn storage_dir(self) -> &'static str {
        self.upload_field()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.index_name())
    }
}

/// Metadata for one uploaded book or file.
///
/// The document store holds the authoritative copy; the search index holds
/// the same shape as a denormalized document under the same `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub title: String,
    pub path: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl EntityRecord {
    /// JSON body written to the search index.
    pub fn index_body(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "title": self.title,
            "path": self.path,
            "tags": self.tags,
        })
    }

    /// JSON representation returned over HTTP.
    pub fn to_wire(&self, kind: EntityKind) -> serde_json::Value {
        let mut value = json!({
            "id": self.id,
            "path": self.path,
            "tags": self.tags,
        });
        value[kind.name_key()] = json!(self.title);
        value
    }

    /// File name to offer when the stored bytes are downloaded.
    pub fn download_name(&self) -> String {
        Path::new(&self.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.id.clone())
    }
}

/// Body of an update request. Accepts either `title` or `name`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdateRequest {
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl UpdateRequest {
    pub fn new<I, S>(title: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            title: title.into(),
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::Validation("title must not be empty".into()));
        }
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::Validation("tags must not be blank".into()));
        }
        Ok(())
    }
}

/// An uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }
}

/// Derive the on-disk file name for an upload: lowercase, spaces
/// replaced by `_`, reduced to its final path component.
///
/// Distinct uploads may map to the same name; the later write wins.
pub fn sanitize_file_name(name: &str) -> Result<String> {
    let base = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(name);
    let sanitized = base.to_lowercase().replace(' ', "_");

    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        return Err(Error::Validation(format!("invalid file name: {name:?}")));
    }
    Ok(sanitized)
}
