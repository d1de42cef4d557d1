//! Orchestration of the document store, the search index and the tag
//! ledger for one entity kind.
//!
//! The document store is authoritative. Every mutation writes it first and
//! then rebuilds the search index document from what was stored. The two
//! writes do not share a transaction: a failure between them is reported
//! to the caller and left for [`EntityRepository::reindex_all`] to repair.

use std::{
    collections::HashSet,
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    entity::{
        EntityKind,
        EntityRecord,
        UpdateRequest,
        UploadedFile,
        sanitize_file_name,
    },
    error::{Error, Result},
    query::{QueryClause, SearchRequest},
    search_index::SearchHit,
    stores::Stores,
    tag_ledger::TagLedger,
};

/// Outcome of a batch upload. Failed files do not stop the batch.
#[derive(Debug, Default)]
pub struct UploadReport {
    pub saved: Vec<EntityRecord>,
    pub errors: Vec<Error>,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityPage {
    pub total: usize,
    pub list: Vec<EntityRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexReport {
    pub indexed: usize,
    pub removed: usize,
}

#[derive(Debug, Clone)]
pub struct EntityRepository {
    kind: EntityKind,
    stores: Arc<Stores>,
    tags: TagLedger,
    storage_dir: PathBuf,
}

impl EntityRepository {
    pub fn new(kind: EntityKind, stores: Arc<Stores>, storage_dir: PathBuf) -> Self {
        Self {
            kind,
            tags: TagLedger::new(Arc::clone(&stores)),
            stores,
            storage_dir,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn index_name(&self) -> &'static str {
        self.kind.index_name()
    }

    // -- Uploads --

    /// Store each upload on disk, record it and index it.
    ///
    /// A file whose bytes cannot be written is skipped entirely. A file
    /// whose record or index write fails keeps whatever earlier steps
    /// already wrote.
    pub fn save_uploaded(&self, files: Vec<UploadedFile>) -> UploadReport {
        let mut report = UploadReport::default();
        for file in files {
            match self.save_one(&file) {
                Ok(record) => {
                    tracing::info!(
                        kind = %self.kind,
                        id = %record.id,
                        path = %record.path,
                        "saved upload"
                    );
                    report.saved.push(record);
                }
                Err(err) => {
                    tracing::warn!(
                        kind = %self.kind,
                        file = %file.file_name,
                        error = %err,
                        "upload failed"
                    );
                    report.errors.push(err);
                }
            }
        }
        report
    }

    fn save_one(&self, file: &UploadedFile) -> Result<EntityRecord> {
        let upload_error = |stage: &'static str, source: Error| Error::Upload {
            file: file.file_name.clone(),
            stage,
            source: Box::new(source),
        };

        let path = sanitize_file_name(&file.file_name)
            .map(|name| self.storage_dir.join(name))
            .map_err(|e| upload_error("disk", e))?;
        std::fs::write(&path, &file.data)
            .map_err(|e| upload_error("disk", e.into()))?;

        let path = path.to_string_lossy();
        let record = self
            .stores
            .doc_store
            .insert(self.kind, &file.file_name, &path)
            .map_err(|e| upload_error("document store", e))?;

        self.stores
            .search_index
            .index(self.index_name(), &record.id, &record.index_body())
            .map_err(|e| upload_error("search index", e))?;

        Ok(record)
    }

    // -- Reads --

    /// Look a record up in the search index by exact id.
    pub fn find_by_id(&self, id: &str) -> Result<EntityRecord> {
        let request = SearchRequest::new(QueryClause::ids([id])).with_page(0, 2);
        let result = self.stores.search_index.search(self.index_name(), &request)?;

        match result.total {
            0 => Err(Error::not_found(self.index_name(), id)),
            1 => match result.hits.into_iter().next() {
                Some(hit) => hit_to_record(hit),
                None => Err(Error::not_found(self.index_name(), id)),
            },
            count => Err(Error::DuplicateIndexEntry {
                index: self.index_name(),
                id: id.to_string(),
                count,
            }),
        }
    }

    pub fn search(&self, request: &SearchRequest) -> Result<EntityPage> {
        let result = self.stores.search_index.search(self.index_name(), request)?;
        let list = result
            .hits
            .into_iter()
            .map(hit_to_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(EntityPage {
            total: result.total,
            list,
        })
    }

    /// Open the stored bytes of a record for streaming.
    pub fn open_file(&self, record: &EntityRecord) -> Result<(File, u64)> {
        let file = File::open(&record.path)?;
        let len = file.metadata()?.len();
        Ok((file, len))
    }

    // -- Mutations --

    pub fn update_by_id(&self, id: &str, update: &UpdateRequest) -> Result<()> {
        update.validate()?;

        let current = self.stores.doc_store.find_by_id(self.kind, id)?;
        self.stores
            .doc_store
            .update(self.kind, id, &update.title, &update.tags)?;
        self.reindex(id)?;
        self.tags.update_tags(&current.tags, &update.tags)?;

        tracing::info!(kind = %self.kind, id, "updated record");
        Ok(())
    }

    /// Delete the record, its index document and its tag references.
    /// The stored bytes stay on disk.
    pub fn delete_by_id(&self, id: &str) -> Result<()> {
        let removed = self.stores.doc_store.delete(self.kind, id)?;
        self.stores.search_index.delete(self.index_name(), id)?;
        self.tags.update_tags(&removed.tags, &Default::default())?;

        tracing::info!(kind = %self.kind, id, "deleted record");
        Ok(())
    }

    /// Replace the index document for `id` with the stored record.
    pub fn reindex(&self, id: &str) -> Result<EntityRecord> {
        let record = self.stores.doc_store.find_by_id(self.kind, id)?;
        self.stores
            .search_index
            .index(self.index_name(), &record.id, &record.index_body())?;
        Ok(record)
    }

    /// Rebuild the whole index from the document store and drop index
    /// documents whose record no longer exists.
    pub fn reindex_all(&self) -> Result<ReindexReport> {
        let records = self.stores.doc_store.list(self.kind)?;
        let known: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();

        let mut report = ReindexReport::default();
        for record in &records {
            self.stores
                .search_index
                .index(self.index_name(), &record.id, &record.index_body())?;
            report.indexed += 1;
        }

        let mut stale: Vec<String> = self
            .stores
            .search_index
            .ids(self.index_name())?
            .into_iter()
            .filter(|id| !known.contains(id.as_str()))
            .collect();
        stale.sort();
        stale.dedup();
        for id in &stale {
            self.stores.search_index.delete(self.index_name(), id)?;
            report.removed += 1;
        }

        tracing::info!(
            kind = %self.kind,
            indexed = report.indexed,
            removed = report.removed,
            "reindexed"
        );
        Ok(report)
    }
}

fn hit_to_record(hit: SearchHit) -> Result<EntityRecord> {
    Ok(serde_json::from_value(hit.source)?)
}
