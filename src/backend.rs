//! Collection store selection.
//!
//! The backend is chosen once at startup and fixed for the process
//! lifetime. A durable store that fails to initialize falls back to the
//! in-memory store instead of aborting startup.

use std::sync::Arc;

use tracing::{info, warn};

use query_node_core::store::memory::InMemoryStore;
use query_node_core::store::CollectionStore;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

pub async fn open_store(config: &Config) -> Arc<dyn CollectionStore> {
    let store: Arc<dyn CollectionStore> = match config.store.backend.as_str() {
        "memory" => Arc::new(InMemoryStore::new()),
        _ => match SqliteStore::open(&config.store.path).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(
                    path = %config.store.path.display(),
                    error = format!("{:#}", e),
                    "durable store unavailable, falling back to in-memory store"
                );
                Arc::new(InMemoryStore::new())
            }
        },
    };

    info!(backend = store.backend(), "collection store ready");
    store
}
