//! In-memory [`CollectionStore`] implementation.
//!
//! Uses a `HashMap` of fragment lists behind `std::sync::RwLock`. Search is
//! the substring ranking from [`rank_by_containment`]. This is the fallback
//! backend when the durable store cannot be opened, and the backend used by
//! tests and the one-shot `qnode local` command.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Fragment;

use super::{rank_by_containment, CollectionStore};

/// Process-local collection store. Contents vanish with the process.
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Vec<Fragment>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Names of all collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CollectionStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(collections.contains_key(name))
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        collections.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn save_documents(&self, name: &str, docs: &[Fragment]) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        collections
            .entry(name.to_string())
            .or_default()
            .extend(docs.iter().cloned());
        Ok(())
    }

    async fn document_count(&self, name: &str) -> Result<usize> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(collections.get(name).map(Vec::len).unwrap_or(0))
    }

    async fn search(&self, name: &str, query: &str, limit: usize) -> Result<Vec<String>> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(docs) = collections.get(name) else {
            return Ok(Vec::new());
        };
        Ok(rank_by_containment(
            docs.iter().map(|f| f.text.as_str()),
            query,
            limit,
        ))
    }
}
