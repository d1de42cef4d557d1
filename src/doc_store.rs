use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    entity::{EntityKind, EntityRecord},
    error::{Error, Result},
};

const BOOKS: TableDefinition<&str, &[u8]> = TableDefinition::new("book");
const FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("file");
const TAGS: TableDefinition<&str, u64> = TableDefinition::new("tag");

fn entity_table(
    kind: EntityKind,
) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match kind {
        EntityKind::Book => BOOKS,
        EntityKind::File => FILES,
    }
}

/// Authoritative metadata storage: one table per entity kind keyed by
/// record id, plus the tag usage counters.
pub struct DocStore {
    db: Database,
}

impl DocStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(BOOKS)?;
        txn.open_table(FILES)?;
        txn.open_table(TAGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Entity records --

    /// Store a new record under a freshly generated id and return it.
    pub fn insert(
        &self,
        kind: EntityKind,
        title: &str,
        path: &str,
    ) -> Result<EntityRecord> {
        let record = EntityRecord {
            id: uuid::Uuid::new_v4().simple().to_string(),
            title: title.to_string(),
            path: path.to_string(),
            tags: BTreeSet::new(),
        };
        let bytes = serde_json::to_vec(&record)?;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(entity_table(kind))?;
            table.insert(record.id.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(record)
    }

    pub fn find_by_id(&self, kind: EntityKind, id: &str) -> Result<EntityRecord> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(entity_table(kind))?;
        match table.get(id)? {
            Some(bytes) => Ok(serde_json::from_slice(bytes.value())?),
            None => Err(Error::not_found(kind.index_name(), id)),
        }
    }

    /// Overwrite the mutable fields of an existing record.
    pub fn update(
        &self,
        kind: EntityKind,
        id: &str,
        title: &str,
        tags: &BTreeSet<String>,
    ) -> Result<()> {
        let txn = self.db.begin_write()?;
        let found = {
            let mut table = txn.open_table(entity_table(kind))?;
            let current = table.get(id)?.map(|v| v.value().to_vec());
            match current {
                Some(bytes) => {
                    let mut record: EntityRecord =
                        serde_json::from_slice(&bytes)?;
                    record.title = title.to_string();
                    record.tags = tags.clone();
                    let bytes = serde_json::to_vec(&record)?;
                    table.insert(id, bytes.as_slice())?;
                    true
                }
                None => false,
            }
        };

        if !found {
            txn.abort()?;
            return Err(Error::not_found(kind.index_name(), id));
        }
        txn.commit()?;
        Ok(())
    }

    /// Remove a record, returning what was stored.
    pub fn delete(&self, kind: EntityKind, id: &str) -> Result<EntityRecord> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(entity_table(kind))?;
            table.remove(id)?.map(|v| v.value().to_vec())
        };

        let Some(bytes) = removed else {
            txn.abort()?;
            return Err(Error::not_found(kind.index_name(), id));
        };
        txn.commit()?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Return every record of a kind in a single read transaction.
    pub fn list(&self, kind: EntityKind) -> Result<Vec<EntityRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(entity_table(kind))?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_k, v) = entry?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    // -- Tags --

    /// Apply a tag diff in one write transaction.
    ///
    /// Names in `add` are incremented, creating them at 1 when absent.
    /// Names in `remove` are decremented only while above zero.
    pub fn apply_tag_diff(&self, add: &[String], remove: &[String]) -> Result<()> {
        if add.is_empty() && remove.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TAGS)?;
            for name in add {
                let count = table.get(name.as_str())?.map_or(0, |v| v.value());
                table.insert(name.as_str(), count + 1)?;
            }
            for name in remove {
                let count = table.get(name.as_str())?.map_or(0, |v| v.value());
                if count > 0 {
                    table.insert(name.as_str(), count - 1)?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn tag_count(&self, name: &str) -> Result<Option<u64>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TAGS)?;
        Ok(table.get(name)?.map(|v| v.value()))
    }

    /// All tags with their usage counts, in name order.
    pub fn list_tags(&self) -> Result<Vec<(String, u64)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TAGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value()));
        }
        Ok(result)
    }

    /// Replace every tag count with `counts`. Known tags missing from
    /// `counts` are kept at zero.
    pub fn reset_tag_counts(&self, counts: &BTreeMap<String, u64>) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(TAGS)?;
            let mut known = Vec::new();
            for entry in table.iter()? {
                let (k, _v) = entry?;
                known.push(k.value().to_string());
            }
            for name in &known {
                table.insert(name.as_str(), 0)?;
            }
            for (name, count) in counts {
                table.insert(name.as_str(), *count)?;
            }
        }
        txn.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for DocStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, DocStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = DocStore::open(&tmp.path().join("store.redb")).unwrap();
        (tmp, store)
    }

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn records_crud() {
        let (_tmp, store) = test_store();

        let record = store
            .insert(EntityKind::Book, "Rust in Action", "/b/rust.pdf")
            .unwrap();
        assert_eq!(record.id.len(), 32);
        assert!(record.tags.is_empty());

        let found = store.find_by_id(EntityKind::Book, &record.id).unwrap();
        assert_eq!(found, record);

        let new_tags = BTreeSet::from(["rust".to_string()]);
        store
            .update(EntityKind::Book, &record.id, "Rust", &new_tags)
            .unwrap();
        let found = store.find_by_id(EntityKind::Book, &record.id).unwrap();
        assert_eq!(found.title, "Rust");
        assert_eq!(found.path, "/b/rust.pdf");
        assert_eq!(found.tags, new_tags);

        let removed = store.delete(EntityKind::Book, &record.id).unwrap();
        assert_eq!(removed.tags, new_tags);
        assert!(matches!(
            store.find_by_id(EntityKind::Book, &record.id),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn ids_are_unique() {
        let (_tmp, store) = test_store();
        let a = store.insert(EntityKind::File, "a", "/f/a").unwrap();
        let b = store.insert(EntityKind::File, "a", "/f/a").unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.list(EntityKind::File).unwrap().len(), 2);
    }

    #[test]
    fn kinds_are_separate_tables() {
        let (_tmp, store) = test_store();
        let book = store.insert(EntityKind::Book, "a", "/b/a").unwrap();

        assert!(store.find_by_id(EntityKind::File, &book.id).is_err());
        assert!(store.list(EntityKind::File).unwrap().is_empty());
    }

    #[test]
    fn missing_records_are_not_found() {
        let (_tmp, store) = test_store();
        let none = BTreeSet::new();

        assert!(matches!(
            store.update(EntityKind::Book, "ghost", "t", &none),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            store.delete(EntityKind::Book, "ghost"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn tag_diff_upserts_and_floors_at_zero() {
        let (_tmp, store) = test_store();

        store.apply_tag_diff(&tags(&["go", "rust"]), &[]).unwrap();
        assert_eq!(store.tag_count("go").unwrap(), Some(1));
        assert_eq!(store.tag_count("rust").unwrap(), Some(1));

        store.apply_tag_diff(&[], &tags(&["go"])).unwrap();
        store.apply_tag_diff(&[], &tags(&["go"])).unwrap();
        assert_eq!(store.tag_count("go").unwrap(), Some(0));

        // Decrementing an unknown tag neither fails nor creates it.
        store.apply_tag_diff(&[], &tags(&["zig"])).unwrap();
        assert_eq!(store.tag_count("zig").unwrap(), None);

        assert_eq!(
            store.list_tags().unwrap(),
            vec![("go".to_string(), 0), ("rust".to_string(), 1)]
        );
    }

    #[test]
    fn reset_tag_counts_zeroes_unlisted() {
        let (_tmp, store) = test_store();
        store.apply_tag_diff(&tags(&["go", "rust"]), &[]).unwrap();

        let counts = BTreeMap::from([("rust".to_string(), 3)]);
        store.reset_tag_counts(&counts).unwrap();

        assert_eq!(store.tag_count("go").unwrap(), Some(0));
        assert_eq!(store.tag_count("rust").unwrap(), Some(3));
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.redb");

        let id = {
            let store = DocStore::open(&path).unwrap();
            store.apply_tag_diff(&tags(&["go"]), &[]).unwrap();
            store.insert(EntityKind::Book, "Go", "/b/go.pdf").unwrap().id
        };

        {
            let store = DocStore::open(&path).unwrap();
            assert_eq!(
                store.find_by_id(EntityKind::Book, &id).unwrap().title,
                "Go"
            );
            assert_eq!(store.tag_count("go").unwrap(), Some(1));
        }
    }
}
