//! Core data models used throughout the query node.
//!
//! These types describe the registry-held file records, the fragments that
//! flow into a collection, and the request/response shapes of the two query
//! entry points.

use serde::{Deserialize, Serialize};

/// Registry-held metadata for one encrypted artifact.
///
/// A `file_id` of `0` is the registry's "not found" sentinel and never
/// appears in a record handed to the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: u64,
    pub owner: String,
    /// Where the encrypted payload lives (usually an IPFS share link).
    pub storage_locator: String,
    /// Hex digest of the plaintext; doubles as the collection cache key.
    pub content_hash: String,
}

/// One indexed text fragment of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Position of the fragment within the text it was cut from.
    pub index: usize,
    pub text: String,
    /// SHA-256 of `text`, lowercase hex.
    pub hash: String,
}

/// Body of `POST /query/rag`.
///
/// Exactly one of `file_id` / `file_url` has to resolve to a non-zero id.
/// When both are present the URL wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub file_id: Option<u64>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QueryRequest {
    pub fn by_id(file_id: u64, query: impl Into<String>) -> Self {
        Self {
            file_id: Some(file_id),
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn by_url(file_url: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            file_url: Some(file_url.into()),
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Ranked fragments for a registry file, plus the record they came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResponse {
    pub data: Vec<String>,
    pub owner: String,
    pub file_id: u64,
    pub file_url: String,
    pub file_hash: String,
}

/// Body of `POST /query/local`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocalQueryRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalQueryResponse {
    pub data: Vec<String>,
    pub collection: String,
}

/// Name of the collection caching the indexed form of `content_hash`.
pub fn collection_name(prefix: &str, content_hash: &str) -> String {
    format!("{}{}", prefix, content_hash)
}
