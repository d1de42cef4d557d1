use crate::{
    data_dir::DataDir,
    doc_store::DocStore,
    entity::EntityKind,
    error::Result,
    search_index::SearchIndex,
};

/// The long-lived store handles shared by every repository and handler.
#[derive(Debug)]
pub struct Stores {
    pub doc_store: DocStore,
    pub search_index: SearchIndex,
}

impl Stores {
    /// Open both stores under the data directory and make sure every
    /// entity kind has its search index.
    pub fn open(data_dir: &DataDir) -> Result<Self> {
        let doc_store = DocStore::open(&data_dir.store_db())?;
        let search_index = SearchIndex::open(&data_dir.index_dir()?)?;
        Self::new(doc_store, search_index)
    }

    pub fn new(doc_store: DocStore, search_index: SearchIndex) -> Result<Self> {
        for kind in EntityKind::ALL {
            search_index.ensure_index(kind.index_name())?;
        }
        Ok(Self {
            doc_store,
            search_index,
        })
    }
}
