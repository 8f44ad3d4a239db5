//! SQLite-backed [`CollectionStore`] implementation.
//!
//! Collections survive restarts. Each fragment is written to `fragments`
//! (insertion order via `id`) and mirrored into the `fragments_fts` FTS5
//! index used for ranking.
//!
//! # Ranking
//!
//! 1. Fragments matching any query term through FTS5, ordered by bm25 rank,
//!    ties broken by insertion order.
//! 2. The remaining fragments in insertion order.
//! 3. Truncate to `limit`.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use query_node_core::models::Fragment;
use query_node_core::store::CollectionStore;

use crate::{db, migrate};

/// SQLite implementation of the [`CollectionStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

/// Per-collection fragment count, for operator listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStat {
    pub name: String,
    pub fragments: i64,
    pub created_at: i64,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the database at `path` and bring its schema up to date.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn collection_stats(&self) -> Result<Vec<CollectionStat>> {
        let rows = sqlx::query(
            r#"
            SELECT c.name, c.created_at, COUNT(f.id) AS fragments
            FROM collections c
            LEFT JOIN fragments f ON f.collection = c.name
            GROUP BY c.name, c.created_at
            ORDER BY c.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| CollectionStat {
                name: row.get("name"),
                fragments: row.get("fragments"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

/// Build an FTS5 match expression that ORs the query's terms.
///
/// Terms are quoted so that user input can never be parsed as FTS5
/// syntax. Returns `None` when the query has no word characters.
fn fts_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

#[async_trait]
impl CollectionStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_documents(&self, name: &str, docs: &[Fragment]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;

        for doc in docs {
            let id = sqlx::query(
                "INSERT INTO fragments (collection, position, text, hash) VALUES (?, ?, ?, ?)",
            )
            .bind(name)
            .bind(doc.index as i64)
            .bind(&doc.text)
            .bind(&doc.hash)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            sqlx::query("INSERT INTO fragments_fts (fragment_id, collection, text) VALUES (?, ?, ?)")
                .bind(id)
                .bind(name)
                .bind(&doc.text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn document_count(&self, name: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fragments WHERE collection = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn search(&self, name: &str, query: &str, limit: usize) -> Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut seen: HashSet<i64> = HashSet::new();
        let mut results: Vec<String> = Vec::with_capacity(limit);

        if let Some(expr) = fts_expression(query) {
            let rows = sqlx::query(
                r#"
                SELECT CAST(fragment_id AS INTEGER) AS fragment_id, text
                FROM fragments_fts
                WHERE fragments_fts MATCH ? AND collection = ?
                ORDER BY rank, CAST(fragment_id AS INTEGER)
                LIMIT ?
                "#,
            )
            .bind(&expr)
            .bind(name)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

            for row in &rows {
                seen.insert(row.get("fragment_id"));
                results.push(row.get("text"));
            }
        }

        if results.len() < limit {
            let rows = sqlx::query(
                "SELECT id, text FROM fragments WHERE collection = ? ORDER BY id LIMIT ?",
            )
            .bind(name)
            .bind((limit + seen.len()) as i64)
            .fetch_all(&self.pool)
            .await?;

            for row in &rows {
                let id: i64 = row.get("id");
                if seen.contains(&id) {
                    continue;
                }
                results.push(row.get("text"));
                if results.len() == limit {
                    break;
                }
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use query_node_core::chunk::make_fragment;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("data/qnode.sqlite"))
            .await
            .unwrap();
        (tmp, store)
    }

    fn fragments(texts: &[&str]) -> Vec<Fragment> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| make_fragment(i, t))
            .collect()
    }

    #[test]
    fn test_fts_expression_quotes_terms() {
        assert_eq!(
            fts_expression("what's Web3?").as_deref(),
            Some("\"what\" OR \"s\" OR \"Web3\"")
        );
        assert_eq!(fts_expression("  ?! "), None);
    }

    #[tokio::test]
    async fn test_create_and_count() {
        let (_tmp, store) = open_temp().await;
        assert!(!store.has_collection("c").await.unwrap());
        store.create_collection("c").await.unwrap();
        store.create_collection("c").await.unwrap();
        assert!(store.has_collection("c").await.unwrap());
        assert_eq!(store.document_count("c").await.unwrap(), 0);

        store
            .save_documents("c", &fragments(&["one", "two"]))
            .await
            .unwrap();
        assert_eq!(store.document_count("c").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_matching_fragments_rank_first() {
        let (_tmp, store) = open_temp().await;
        store
            .save_documents("c", &fragments(&["cooking recipes", "AI and Web3", "gardening"]))
            .await
            .unwrap();

        let results = store.search("c", "web3", 3).await.unwrap();
        assert_eq!(results, vec!["AI and Web3", "cooking recipes", "gardening"]);

        let results = store.search("c", "web3", 1).await.unwrap();
        assert_eq!(results, vec!["AI and Web3"]);
    }

    #[tokio::test]
    async fn test_punctuation_query_falls_back_to_insertion_order() {
        let (_tmp, store) = open_temp().await;
        store
            .save_documents("c", &fragments(&["first", "second"]))
            .await
            .unwrap();
        let results = store.search("c", "\"*:(", 5).await.unwrap();
        assert_eq!(results, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let (_tmp, store) = open_temp().await;
        store
            .save_documents("a", &fragments(&["python in a"]))
            .await
            .unwrap();
        store
            .save_documents("b", &fragments(&["python in b"]))
            .await
            .unwrap();

        assert_eq!(
            store.search("a", "python", 5).await.unwrap(),
            vec!["python in a"]
        );
        assert!(store.search("missing", "python", 5).await.unwrap().is_empty());

        let stats = store.collection_stats().await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].name, "a");
        assert_eq!(stats[0].fragments, 1);
    }

    #[tokio::test]
    async fn test_contents_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("qnode.sqlite");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store
                .save_documents("query_abc", &fragments(&["persisted"]))
                .await
                .unwrap();
        }
        let store = SqliteStore::open(&path).await.unwrap();
        assert!(store.has_collection("query_abc").await.unwrap());
        assert_eq!(
            store.search("query_abc", "persisted", 3).await.unwrap(),
            vec!["persisted"]
        );
    }
}
