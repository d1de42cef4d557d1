//! Reference-counted registry of the tag names attached to records.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use crate::{entity::EntityRecord, error::Result, stores::Stores};

/// Tag names gained and lost between two versions of a record's tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl TagDiff {
    pub fn between(old: &BTreeSet<String>, new: &BTreeSet<String>) -> Self {
        Self {
            add: new.difference(old).cloned().collect(),
            remove: old.difference(new).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TagLedger {
    stores: Arc<Stores>,
}

impl TagLedger {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }

    /// Adjust usage counts for a record whose tags changed from `old` to
    /// `new`. Every name in the diff is applied in one store transaction.
    pub fn update_tags(
        &self,
        old: &BTreeSet<String>,
        new: &BTreeSet<String>,
    ) -> Result<TagDiff> {
        let diff = TagDiff::between(old, new);
        if diff.is_empty() {
            return Ok(diff);
        }

        self.stores.doc_store.apply_tag_diff(&diff.add, &diff.remove)?;
        tracing::debug!(
            added = diff.add.len(),
            removed = diff.remove.len(),
            "updated tag counts"
        );
        Ok(diff)
    }

    /// Tags currently in use, for autocomplete.
    pub fn suggest_tags(&self) -> Result<Vec<String>> {
        Ok(self
            .stores
            .doc_store
            .list_tags()?
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(name, _)| name)
            .collect())
    }

    /// Every tag ever used, including those no longer referenced.
    pub fn list_all(&self) -> Result<Vec<String>> {
        Ok(self
            .stores
            .doc_store
            .list_tags()?
            .into_iter()
            .map(|(name, _)| name)
            .collect())
    }

    pub fn usage_count(&self, name: &str) -> Result<u64> {
        Ok(self.stores.doc_store.tag_count(name)?.unwrap_or(0))
    }

    /// Recompute every count from `records`. Returns the number of tags
    /// referenced by at least one record.
    pub fn recount<'a, I>(&self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a EntityRecord>,
    {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for record in records {
            for tag in &record.tags {
                *counts.entry(tag.clone()).or_default() += 1;
            }
        }

        self.stores.doc_store.reset_tag_counts(&counts)?;
        tracing::info!(tags = counts.len(), "recounted tag usage");
        Ok(counts.len())
    }
}
