use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, RwLock},
};

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    ReloadPolicy,
    TantivyDocument,
    Term,
    collector::{Count, DocSetCollector, TopDocs},
    query::AllQuery,
    schema::{
        Field,
        IndexRecordOption,
        STORED,
        STRING,
        Schema,
        TextFieldIndexing,
        TextOptions,
        Value as _,
    },
    tokenizer::{
        LowerCaser,
        RawTokenizer,
        RemoveLongFilter,
        SimpleTokenizer,
        TextAnalyzer,
    },
};

use crate::{
    error::{Error, Result},
    query::SearchRequest,
};

/// Field names used in the schema.
pub mod fields {
    pub const ID: &str = "id";
    pub const TITLE: &str = "title";
    pub const PATH: &str = "path";
    pub const TAGS: &str = "tags";
    pub const SOURCE: &str = "source";
}

/// Full-text analyzer for titles.
pub const STANDARD_ANALYZER: &str = "standard";
/// Keyword normalizer for paths: the whole value, lowercased.
pub const LOWERCASE_NORMALIZER: &str = "lowercase_normalizer";

const WRITER_MEMORY_BUDGET: usize = 15_000_000;

/// Resolved field handles for the schema.
#[derive(Debug, Clone, Copy)]
pub struct SchemaFields {
    pub id: Field,
    pub title: Field,
    pub path: Field,
    pub tags: Field,
    pub source: Field,
}

impl SchemaFields {
    fn resolve(schema: &Schema) -> Result<Self> {
        Ok(Self {
            id: schema.get_field(fields::ID)?,
            title: schema.get_field(fields::TITLE)?,
            path: schema.get_field(fields::PATH)?,
            tags: schema.get_field(fields::TAGS)?,
            source: schema.get_field(fields::SOURCE)?,
        })
    }

    /// Look up a queryable field by the name a client uses for it.
    pub fn by_name(&self, name: &str) -> Option<Field> {
        match name {
            "id" | "_id" => Some(self.id),
            "title" | "name" => Some(self.title),
            "path" | "filePath" => Some(self.path),
            "tags" => Some(self.tags),
            _ => None,
        }
    }
}

/// One matching document.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub source: serde_json::Value,
}

/// Total match count plus the requested page of hits, in relevance order.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub total: usize,
    pub hits: Vec<SearchHit>,
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    builder.add_text_field(fields::ID, STRING | STORED);

    let title_opts = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(STANDARD_ANALYZER)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    builder.add_text_field(fields::TITLE, title_opts);

    let path_opts = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(LOWERCASE_NORMALIZER)
                .set_index_option(IndexRecordOption::Basic),
        )
        .set_stored();
    builder.add_text_field(fields::PATH, path_opts);

    builder.add_text_field(fields::TAGS, STRING | STORED);
    builder.add_text_field(fields::SOURCE, STORED);

    builder.build()
}

fn register_tokenizers(index: &Index) {
    let standard = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .build();
    index.tokenizers().register(STANDARD_ANALYZER, standard);

    let normalizer = TextAnalyzer::builder(RawTokenizer::default())
        .filter(LowerCaser)
        .build();
    index.tokenizers().register(LOWERCASE_NORMALIZER, normalizer);
}

struct NamedIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: SchemaFields,
}

impl NamedIndex {
    fn new(index: Index) -> Result<Self> {
        register_tokenizers(&index);
        let fields = SchemaFields::resolve(&index.schema())?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer = index.writer(WRITER_MEMORY_BUDGET)?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    fn writer(&self) -> Result<MutexGuard<'_, IndexWriter>> {
        self.writer.lock().map_err(|_| {
            Error::index("index_exception", "index writer lock poisoned")
        })
    }
}

/// A set of named Tantivy indices, one per entity kind.
///
/// Each index keeps a single writer (Tantivy allows one per index) and a
/// manually reloaded reader that is refreshed after every commit, so a
/// write is visible to the next search.
pub struct SearchIndex {
    root: Option<PathBuf>,
    indices: RwLock<HashMap<String, Arc<NamedIndex>>>,
}

impl SearchIndex {
    /// Use `dir` as the parent directory of the named indices.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            root: Some(dir.to_path_buf()),
            indices: RwLock::default(),
        })
    }

    /// Keep every named index in memory (for testing).
    pub fn open_in_ram() -> Self {
        Self {
            root: None,
            indices: RwLock::default(),
        }
    }

    /// Open the named index, creating it with the schema if it does not
    /// exist yet. Returns whether it was created.
    pub fn ensure_index(&self, name: &str) -> Result<bool> {
        let mut indices = self.indices.write().map_err(|_| {
            Error::index("index_exception", "index registry lock poisoned")
        })?;
        if indices.contains_key(name) {
            return Ok(false);
        }

        let (index, created) = match &self.root {
            Some(root) => {
                let dir = root.join(name);
                std::fs::create_dir_all(&dir)?;
                let mmap_dir = tantivy::directory::MmapDirectory::open(&dir)
                    .map_err(|e| Error::index("index_exception", e.to_string()))?;
                if Index::exists(&mmap_dir).map_err(|e| {
                    Error::index("index_exception", e.to_string())
                })? {
                    (Index::open(mmap_dir)?, false)
                } else {
                    let index = Index::create(
                        mmap_dir,
                        build_schema(),
                        tantivy::IndexSettings::default(),
                    )?;
                    (index, true)
                }
            }
            None => (Index::create_in_ram(build_schema()), true),
        };

        if created {
            tracing::info!(index = name, "created search index");
        } else {
            tracing::debug!(index = name, "search index found");
        }

        indices.insert(name.to_string(), Arc::new(NamedIndex::new(index)?));
        Ok(created)
    }

    fn named(&self, name: &str) -> Result<Arc<NamedIndex>> {
        let indices = self.indices.read().map_err(|_| {
            Error::index("index_exception", "index registry lock poisoned")
        })?;
        indices.get(name).cloned().ok_or_else(|| {
            Error::index("index_not_found_exception", format!("no such index [{name}]"))
        })
    }

    /// Index `body` under `id`, replacing any document with the same id.
    pub fn index(
        &self,
        name: &str,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<()> {
        self.write(name, id, body, true)
    }

    /// Add a document without removing earlier ones with the same id.
    #[cfg(test)]
    pub(crate) fn append_unchecked(
        &self,
        name: &str,
        id: &str,
        body: &serde_json::Value,
    ) -> Result<()> {
        self.write(name, id, body, false)
    }

    fn write(
        &self,
        name: &str,
        id: &str,
        body: &serde_json::Value,
        replace: bool,
    ) -> Result<()> {
        let named = self.named(name)?;
        let f = named.fields;

        let mut doc = TantivyDocument::default();
        doc.add_text(f.id, id);
        if let Some(title) = body.get("title").and_then(|v| v.as_str()) {
            doc.add_text(f.title, title);
        }
        if let Some(path) = body.get("path").and_then(|v| v.as_str()) {
            doc.add_text(f.path, path);
        }
        if let Some(tags) = body.get("tags").and_then(|v| v.as_array()) {
            for tag in tags.iter().filter_map(|t| t.as_str()) {
                doc.add_text(f.tags, tag);
            }
        }
        doc.add_text(f.source, body.to_string());

        {
            let mut writer = named.writer()?;
            commit_or_rollback(&mut writer, |writer| {
                if replace {
                    writer.delete_term(Term::from_field_text(f.id, id));
                }
                writer.add_document(doc)?;
                Ok(())
            })?;
        }
        named.reader.reload()?;
        Ok(())
    }

    /// Run a search request against the named index.
    pub fn search(
        &self,
        name: &str,
        request: &SearchRequest,
    ) -> Result<SearchResult> {
        request.check_window()?;
        let named = self.named(name)?;
        let f = named.fields;
        let query = request.query.compile(&named.index, &f)?;
        let searcher = named.reader.searcher();

        let total = searcher.search(&*query, &Count)?;
        let mut hits = Vec::new();
        if request.size > 0 && request.from < total {
            let collector =
                TopDocs::with_limit(request.size).and_offset(request.from);
            for (score, address) in searcher.search(&*query, &collector)? {
                let doc: TantivyDocument = searcher.doc(address)?;
                let source = extract_text(&doc, f.source);
                hits.push(SearchHit {
                    id: extract_text(&doc, f.id),
                    score,
                    source: if source.is_empty() {
                        serde_json::Value::Null
                    } else {
                        serde_json::from_str(&source)?
                    },
                });
            }
        }

        Ok(SearchResult { total, hits })
    }

    /// Delete the document with `id`. Deleting an id that is not indexed
    /// is a no-op.
    pub fn delete(&self, name: &str, id: &str) -> Result<()> {
        let named = self.named(name)?;
        {
            let mut writer = named.writer()?;
            let term = Term::from_field_text(named.fields.id, id);
            commit_or_rollback(&mut writer, |writer| {
                writer.delete_term(term);
                Ok(())
            })?;
        }
        named.reader.reload()?;
        Ok(())
    }

    /// Every id currently in the named index, in no particular order.
    pub fn ids(&self, name: &str) -> Result<Vec<String>> {
        let named = self.named(name)?;
        let searcher = named.reader.searcher();
        let addresses = searcher.search(&AllQuery, &DocSetCollector)?;

        let mut ids = Vec::with_capacity(addresses.len());
        for address in addresses {
            let doc: TantivyDocument = searcher.doc(address)?;
            ids.push(extract_text(&doc, named.fields.id));
        }
        Ok(ids)
    }

    pub fn doc_count(&self, name: &str) -> Result<u64> {
        let named = self.named(name)?;
        Ok(named.reader.searcher().num_docs())
    }
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndex")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Stage operations on the shared writer and commit them. On failure the
/// staged operations are rolled back so a later commit cannot apply them.
fn commit_or_rollback<F>(writer: &mut IndexWriter, stage: F) -> Result<()>
where
    F: FnOnce(&mut IndexWriter) -> tantivy::Result<()>,
{
    let staged = stage(writer).and_then(|()| writer.commit().map(|_| ()));
    if let Err(err) = staged {
        if let Err(rollback) = writer.rollback() {
            tracing::error!(error = %rollback, "index writer rollback failed");
        }
        return Err(err.into());
    }
    Ok(())
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}
