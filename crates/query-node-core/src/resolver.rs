//! Query resolution and the collection cache.
//!
//! The [`Resolver`] turns a [`QueryRequest`] into ranked fragments:
//!
//! 1. Validate the query text and limit (no external I/O yet).
//! 2. Resolve the file locator: a URL goes through the registry, a bare id
//!    is used as is. Neither ⇒ `InvalidRequest`; URL resolving to `0` ⇒ `NotFound`.
//! 3. Fetch the [`FileRecord`] under the lookup timeout.
//! 4. Derive the collection name from the content hash. A populated
//!    collection is a cache hit: go straight to step 7.
//! 5. Cache miss: join or start the population attempt for the collection,
//!    which fetches the permission key and decrypts the payload, each under
//!    its own timeout.
//! 6. Chunk the plaintext and save the fragments into the collection.
//! 7. Search the collection for the top `limit` fragments.
//!
//! Steps 5–6 run at most once per content hash. Concurrent misses for the
//! same hash share one [`InFlight`] attempt and all receive its outcome, so a
//! stalled upstream costs each of them one timeout, not one per queued
//! request. A failed attempt is not cached; the next request retries.
//!
//! The attempt runs in a spawned task, so a caller that goes away
//! mid-population neither aborts it nor leaves a half-written collection
//! behind for the next request.
//!
//! A collection counts as populated once it holds at least one fragment.
//! Stores save a batch atomically and the chunker never returns an empty
//! batch, so "non-empty" and "fully indexed" coincide.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::chunk::{Chunker, ParagraphChunker};
use crate::error::{classify_failure, QueryError, Stage};
use crate::flight::InFlight;
use crate::gateway::{Decryptor, Registry};
use crate::locks::KeyedLocks;
use crate::models::{
    collection_name, FileRecord, LocalQueryRequest, LocalQueryResponse, QueryRequest,
    QueryResponse,
};
use crate::store::CollectionStore;

/// Resolver tuning, decoupled from the application config file.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Prepended to the content hash to form a cache collection name.
    pub collection_prefix: String,
    /// Grantee address used when asking the registry for a permission key.
    pub registry_address: String,
    pub default_limit: usize,
    /// Requested limits above this are clamped.
    pub max_limit: usize,
    /// Collection used by the local variant when the caller names none.
    pub local_collection: String,
    /// Bound on URL resolution and file record lookups.
    pub lookup_timeout: Duration,
    pub permission_timeout: Duration,
    pub decrypt_timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            collection_prefix: "query_".to_string(),
            registry_address: String::new(),
            default_limit: 3,
            max_limit: 50,
            local_collection: "local_default".to_string(),
            lookup_timeout: Duration::from_secs(8),
            permission_timeout: Duration::from_secs(8),
            decrypt_timeout: Duration::from_secs(10),
        }
    }
}

/// Orchestrates registry, decryption gateway, chunker and collection store.
///
/// Cheap to clone; every collaborator sits behind an `Arc`.
#[derive(Clone)]
pub struct Resolver {
    registry: Arc<dyn Registry>,
    decryptor: Arc<dyn Decryptor>,
    store: Arc<dyn CollectionStore>,
    chunker: Arc<dyn Chunker>,
    settings: Arc<ResolverSettings>,
    flights: Arc<InFlight>,
    /// Serializes appends to local collections.
    locks: Arc<KeyedLocks>,
}

impl Resolver {
    pub fn new(
        registry: Arc<dyn Registry>,
        decryptor: Arc<dyn Decryptor>,
        store: Arc<dyn CollectionStore>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            registry,
            decryptor,
            store,
            chunker: Arc::new(ParagraphChunker::new(200)),
            settings: Arc::new(settings),
            flights: Arc::new(InFlight::new()),
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    /// Answer `req` against the registry file it names.
    pub async fn resolve(&self, req: &QueryRequest) -> Result<QueryResponse, QueryError> {
        let span = info_span!(
            "resolve",
            file_id = tracing::field::Empty,
            collection = tracing::field::Empty
        );
        self.resolve_inner(req).instrument(span).await
    }

    async fn resolve_inner(&self, req: &QueryRequest) -> Result<QueryResponse, QueryError> {
        let query = req.query.as_str();
        if query.trim().is_empty() {
            return Err(QueryError::invalid("'query' is required"));
        }
        let limit = self.effective_limit(req.limit)?;

        let file_id = self.locate(req).await?;
        Span::current().record("file_id", file_id);

        let record = self.fetch_record(file_id).await?;
        let collection = collection_name(&self.settings.collection_prefix, &record.content_hash);
        Span::current().record("collection", collection.as_str());

        if self.is_populated(&collection).await? {
            debug!("cache hit");
        } else {
            self.populate_once(&record, &collection).await?;
        }

        let data = self
            .store
            .search(&collection, query, limit)
            .await
            .map_err(|e| store_failure(Stage::Search, &e))?;

        info!(results = data.len(), "query answered");
        Ok(QueryResponse {
            data,
            owner: record.owner,
            file_id: record.file_id,
            file_url: record.storage_locator,
            file_hash: record.content_hash,
        })
    }

    /// Index caller-supplied content into a caller-named collection and
    /// search it. Registry and decryption are not involved.
    ///
    /// Unlike registry collections, local collections are appended to on
    /// every call.
    pub async fn query_local(
        &self,
        req: &LocalQueryRequest,
    ) -> Result<LocalQueryResponse, QueryError> {
        let query = req.query.as_str();
        if req.content.trim().is_empty() || query.trim().is_empty() {
            return Err(QueryError::invalid(
                "Both 'content' and 'query' are required",
            ));
        }
        let limit = self.effective_limit(req.limit)?;

        let collection = req
            .collection
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.settings.local_collection)
            .to_string();
        if collection.starts_with(&self.settings.collection_prefix) {
            return Err(QueryError::invalid(format!(
                "collection names starting with '{}' are reserved",
                self.settings.collection_prefix
            )));
        }

        {
            let _guard = self.locks.lock_for(&collection).await;
            let saved = self.index(&collection, &req.content).await?;
            debug!(collection = %collection, fragments = saved, "local content indexed");
        }

        let data = self
            .store
            .search(&collection, query, limit)
            .await
            .map_err(|e| store_failure(Stage::Search, &e))?;
        Ok(LocalQueryResponse { data, collection })
    }

    fn effective_limit(&self, requested: Option<usize>) -> Result<usize, QueryError> {
        match requested {
            None => Ok(self.settings.default_limit),
            Some(0) => Err(QueryError::invalid("'limit' must be a positive integer")),
            Some(n) => Ok(n.min(self.settings.max_limit)),
        }
    }

    async fn locate(&self, req: &QueryRequest) -> Result<u64, QueryError> {
        let url = req
            .file_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());

        let Some(url) = url else {
            return match req.file_id {
                Some(id) if id != 0 => Ok(id),
                _ => Err(QueryError::invalid("File ID or URL is required")),
            };
        };

        let id = bounded(
            Stage::ResolveUrl,
            self.settings.lookup_timeout,
            self.registry.resolve_file_id(url),
        )
        .await?;
        if id == 0 {
            warn!(url, "url is not registered");
            return Err(QueryError::not_found(format!(
                "No file registered for url {}",
                url
            )));
        }
        Ok(id)
    }

    async fn fetch_record(&self, file_id: u64) -> Result<FileRecord, QueryError> {
        let record = bounded(
            Stage::FileLookup,
            self.settings.lookup_timeout,
            self.registry.get_file(file_id),
        )
        .await?;

        let record = match record {
            Some(r) if r.file_id != 0 => r,
            _ => {
                warn!("registry has no record");
                return Err(QueryError::not_found(format!("File {} not found", file_id)));
            }
        };
        if record.content_hash.trim().is_empty() {
            let err = QueryError::upstream(
                Stage::FileLookup,
                format!("registry record for file {} has no content hash", file_id),
            );
            warn!(error = %err, "unusable file record");
            return Err(err);
        }
        Ok(record)
    }

    async fn is_populated(&self, collection: &str) -> Result<bool, QueryError> {
        let exists = self
            .store
            .has_collection(collection)
            .await
            .map_err(|e| store_failure(Stage::CacheLookup, &e))?;
        if !exists {
            return Ok(false);
        }
        let count = self
            .store
            .document_count(collection)
            .await
            .map_err(|e| store_failure(Stage::CacheLookup, &e))?;
        Ok(count > 0)
    }

    /// Populate `collection` unless another request already did, sharing
    /// the outcome with every request that misses while it runs.
    async fn populate_once(&self, record: &FileRecord, collection: &str) -> Result<(), QueryError> {
        let this = self.clone();
        let record = record.clone();
        let name = collection.to_string();
        self.flights
            .run(collection, move || {
                async move {
                    if this.is_populated(&name).await? {
                        debug!("populated by an earlier request");
                        return Ok(());
                    }
                    this.populate(&record, &name).await
                }
                .in_current_span()
            })
            .await
    }

    async fn populate(&self, record: &FileRecord, collection: &str) -> Result<(), QueryError> {
        let started = Instant::now();

        let key = bounded(
            Stage::Permission,
            self.settings.permission_timeout,
            self.registry
                .get_permission(record.file_id, &self.settings.registry_address),
        )
        .await?;

        let bytes = bounded(
            Stage::Decrypt,
            self.settings.decrypt_timeout,
            self.decryptor.decrypt(&record.storage_locator, &key),
        )
        .await?;

        let text = String::from_utf8(bytes).map_err(|e| {
            let err = QueryError::upstream(
                Stage::Decode,
                format!("decrypted content is not valid UTF-8: {}", e),
            );
            warn!(error = %err, "decode failed");
            err
        })?;

        let fragments = self.index(collection, &text).await?;
        info!(
            fragments,
            backend = self.store.backend(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "collection populated"
        );
        Ok(())
    }

    /// Chunk `text` and append the fragments to `collection`.
    async fn index(&self, collection: &str, text: &str) -> Result<usize, QueryError> {
        let fragments = self.chunker.chunk(text);
        self.store
            .create_collection(collection)
            .await
            .map_err(|e| store_failure(Stage::Index, &e))?;
        self.store
            .save_documents(collection, &fragments)
            .await
            .map_err(|e| store_failure(Stage::Index, &e))?;
        Ok(fragments.len())
    }
}

/// Run one collaborator call under `limit`, mapping its failure onto the
/// taxonomy at the call site.
async fn bounded<T, F>(stage: Stage, limit: Duration, call: F) -> Result<T, QueryError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            let err = classify_failure(stage, &e);
            warn!(stage = %stage, kind = err.error_type(), error = %err, "upstream call failed");
            Err(err)
        }
        Err(_) => {
            let err = QueryError::upstream(
                stage,
                format!("timed out after {}ms", limit.as_millis()),
            );
            warn!(stage = %stage, error = %err, "upstream call timed out");
            Err(err)
        }
    }
}

fn store_failure(stage: Stage, err: &anyhow::Error) -> QueryError {
    let err = QueryError::internal(format!("collection store failed during {}: {:#}", stage, err));
    tracing::error!(stage = %stage, error = %err, "store failure");
    err
}
