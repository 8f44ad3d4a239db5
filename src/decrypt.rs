//! HTTP decryption gateway client.
//!
//! Decryption happens in a separate service that holds the node's private
//! key. This client downloads the ciphertext from the storage locator and
//! posts it together with the granted key:
//!
//! ```text
//! POST {url}/decrypt
//! { "key": "<granted key>", "data": "<base64 ciphertext>" }
//! → { "data": "<base64 plaintext>" }
//! ```
//!
//! If `decryption.token_env` names a set environment variable, its value is
//! sent as a bearer token.
//!
//! A `400`, `401`, `403` or `422` from `/decrypt` means the key or token was
//! refused and is reported as [`KeyRejected`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use query_node_core::gateway::Decryptor;
use query_node_core::KeyRejected;

use crate::config::DecryptionConfig;

pub struct HttpDecryptor {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct DecryptRequest<'a> {
    key: &'a str,
    data: String,
}

#[derive(Deserialize)]
struct DecryptResponse {
    data: String,
}

/// Statuses with which the gateway refuses the key or the bearer token,
/// as opposed to failing on its own.
fn rejects_key(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_REQUEST
            | StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::UNPROCESSABLE_ENTITY
    )
}

impl HttpDecryptor {
    pub fn new(config: &DecryptionConfig) -> Result<Self> {
        let token = config
            .token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_mul(2)))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Download the ciphertext. The locator only ever appears in the
    /// context layer, never in the root cause.
    async fn fetch_ciphertext(&self, locator: &str) -> Result<Vec<u8>> {
        self.download(locator)
            .await
            .with_context(|| format!("failed to download {}", locator))
    }

    async fn download(&self, locator: &str) -> Result<Vec<u8>> {
        let response = self.client.get(locator).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("storage returned {}", status);
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Decryptor for HttpDecryptor {
    async fn decrypt(&self, storage_locator: &str, key: &str) -> Result<Vec<u8>> {
        let ciphertext = self.fetch_ciphertext(storage_locator).await?;

        let mut request = self
            .client
            .post(format!("{}/decrypt", self.base_url))
            .json(&DecryptRequest {
                key,
                data: BASE64.encode(&ciphertext),
            });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("decryption gateway request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("decryption gateway returned {}: {}", status, body.trim());
            if rejects_key(status) {
                return Err(KeyRejected(message).into());
            }
            bail!(message);
        }

        let body: DecryptResponse = response
            .json()
            .await
            .context("invalid decryption gateway response")?;
        BASE64
            .decode(body.data.as_bytes())
            .context("decryption gateway returned invalid base64")
    }
}
