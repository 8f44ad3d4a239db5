//! Collection storage abstraction.
//!
//! The [`CollectionStore`] trait is the capability set the resolver needs
//! from a document store: named collections that can be created, appended
//! to, counted and searched. Two implementations exist:
//!
//! - [`memory::InMemoryStore`]: process-local, substring ranking.
//! - `SqliteStore` in the application crate: durable, FTS5 ranking.
//!
//! The variant is chosen once at startup and handed to the resolver as an
//! `Arc<dyn CollectionStore>`; the resolver never knows which one it holds.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Fragment;

/// Abstract collection backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`has_collection`](CollectionStore::has_collection) | Existence check |
/// | [`create_collection`](CollectionStore::create_collection) | Create; no-op if it already exists |
/// | [`save_documents`](CollectionStore::save_documents) | Append fragments, atomically |
/// | [`document_count`](CollectionStore::document_count) | Number of stored fragments |
/// | [`search`](CollectionStore::search) | Top `limit` fragment texts for a query |
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Short backend label for logs (`"memory"`, `"sqlite"`).
    fn backend(&self) -> &'static str;

    async fn has_collection(&self, name: &str) -> Result<bool>;

    /// Create `name`. Creating an existing collection is a no-op.
    async fn create_collection(&self, name: &str) -> Result<()>;

    /// Append `docs` to `name` in their given order.
    ///
    /// Either every fragment becomes visible or none does. Saving into a
    /// collection that does not exist yet creates it.
    async fn save_documents(&self, name: &str, docs: &[Fragment]) -> Result<()>;

    /// Number of fragments in `name` (`0` when the collection is missing).
    async fn document_count(&self, name: &str) -> Result<usize>;

    /// Return at most `limit` fragment texts from `name`, most relevant first.
    ///
    /// Searching a missing collection yields an empty list.
    async fn search(&self, name: &str, query: &str, limit: usize) -> Result<Vec<String>>;
}

/// Substring-containment ranking used when no semantic index is available.
///
/// Fragments containing `query` (case-insensitive) come first, the rest
/// follow; insertion order is kept inside each partition and the result is
/// truncated to `limit`. Identical inputs always give identical output.
pub fn rank_by_containment<'a, I>(docs: I, query: &str, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let needle = query.to_lowercase();
    let (mut hits, misses): (Vec<&str>, Vec<&str>) = docs
        .into_iter()
        .partition(|d| d.to_lowercase().contains(&needle));
    hits.extend(misses);
    hits.into_iter().take(limit).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_containing_fragment_ranks_first() {
        let ranked = rank_by_containment(["cooking recipes", "AI and Web3"], "web3", 3);
        assert_eq!(ranked, vec!["AI and Web3", "cooking recipes"]);
    }

    #[test]
    fn test_insertion_order_preserved_within_partitions() {
        let docs = ["b miss", "a hit", "c miss", "d hit"];
        let ranked = rank_by_containment(docs, "HIT", 10);
        assert_eq!(ranked, vec!["a hit", "d hit", "b miss", "c miss"]);
    }

    #[test]
    fn test_truncates_to_limit() {
        let ranked = rank_by_containment(["x1", "x2", "x3"], "x", 2);
        assert_eq!(ranked, vec!["x1", "x2"]);
        assert!(rank_by_containment(["x1"], "x", 0).is_empty());
    }

    #[test]
    fn test_empty_query_keeps_insertion_order() {
        let ranked = rank_by_containment(["one", "two"], "", 5);
        assert_eq!(ranked, vec!["one", "two"]);
    }
}
