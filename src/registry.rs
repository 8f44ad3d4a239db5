//! HTTP client for the file registry.
//!
//! Talks to a JSON registry gateway that fronts the on-chain data registry:
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `GET` | `/files/by-url?url=<url>` | `{ "file_id": 42 }` (`0` when unregistered) |
//! | `GET` | `/files/{id}` | `{ "id", "owner", "url", "hash" }`, `404` when absent |
//! | `GET` | `/files/{id}/permissions/{address}` | `{ "key": "<hex>" }` |
//!
//! Non-success statuses become errors that carry the response body, so the
//! resolver can tell a rejected key from an unreachable gateway.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use query_node_core::gateway::Registry;
use query_node_core::models::FileRecord;
use query_node_core::KeyRejected;

use crate::config::RegistryConfig;

pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct FileIdBody {
    file_id: u64,
}

/// Wire shape of a registry file entry.
#[derive(Deserialize)]
struct FileBody {
    id: u64,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    hash: String,
}

#[derive(Deserialize)]
struct PermissionBody {
    key: String,
}

impl HttpRegistry {
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        // The resolver enforces its own per-call bound; this one only
        // keeps abandoned connections from lingering.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_mul(2)))
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("registry request to {} failed", url))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("registry returned {}: {}", status, body.trim());
        }

        let parsed = response
            .json::<T>()
            .await
            .with_context(|| format!("invalid registry response from {}", url))?;
        Ok(Some(parsed))
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn resolve_file_id(&self, url: &str) -> Result<u64> {
        let body: Option<FileIdBody> = self.get_json("/files/by-url", &[("url", url)]).await?;
        Ok(body.map(|b| b.file_id).unwrap_or(0))
    }

    async fn get_file(&self, file_id: u64) -> Result<Option<FileRecord>> {
        let body: Option<FileBody> = self.get_json(&format!("/files/{}", file_id), &[]).await?;
        Ok(body.filter(|b| b.id != 0).map(|b| FileRecord {
            file_id: b.id,
            owner: b.owner,
            storage_locator: b.url,
            content_hash: b.hash,
        }))
    }

    async fn get_permission(&self, file_id: u64, grantee: &str) -> Result<String> {
        let body: Option<PermissionBody> = self
            .get_json(&format!("/files/{}/permissions/{}", file_id, grantee), &[])
            .await?;
        match body {
            Some(b) if !b.key.trim().is_empty() => Ok(b.key),
            Some(_) => Err(KeyRejected(format!(
                "registry returned an empty encryption key for file {}",
                file_id
            ))
            .into()),
            None => bail!("no permission granted on file {} to {}", file_id, grantee),
        }
    }
}
