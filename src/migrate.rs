//! Schema for the durable collection store.
//!
//! All statements are idempotent. `fragments_fts` requires SQLite's FTS5
//! extension; a build without it fails here, which makes store selection
//! fall back to memory.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // `id` order is insertion order and breaks ranking ties.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fragments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            position INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fragments_collection ON fragments(collection, id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS fragments_fts USING fts5(
            fragment_id UNINDEXED,
            collection UNINDEXED,
            text
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create FTS5 index (is FTS5 available?)")?;

    Ok(())
}
