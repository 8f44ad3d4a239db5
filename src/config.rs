//! TOML configuration parsing and validation.
//!
//! The node reads a single TOML file (default `./config/qnode.toml`).
//! Every section except `[registry]` and `[decryption]` has defaults, so a
//! minimal file only needs the two upstream endpoints and the registry
//! address the node holds grants for.
//!
//! ```toml
//! [registry]
//! url = "http://127.0.0.1:9000"
//! address = "0xD878Fa6c04d99654Fb38d1245Fc6Ec2acE8913f0"
//!
//! [decryption]
//! url = "http://127.0.0.1:9100"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use query_node_core::ResolverSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub decryption: DecryptionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `"sqlite"` (durable, falls back to memory on failure) or `"memory"`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./data/qnode.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    pub url: String,
    /// Data registry address; permission grants are looked up for it.
    pub address: String,
    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,
}

fn default_registry_timeout() -> u64 {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct DecryptionConfig {
    pub url: String,
    #[serde(default = "default_decrypt_timeout")]
    pub timeout_secs: u64,
    /// Name of the env var holding a bearer token for the gateway.
    #[serde(default)]
    pub token_env: Option<String>,
}

fn default_decrypt_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_local_collection")]
    pub local_collection: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            collection_prefix: default_collection_prefix(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            local_collection: default_local_collection(),
        }
    }
}

fn default_collection_prefix() -> String {
    "query_".to_string()
}
fn default_limit() -> usize {
    3
}
fn default_max_limit() -> usize {
    50
}
fn default_local_collection() -> String {
    "local_default".to_string()
}

impl Config {
    /// A config for running only the local-content pipeline: in-memory
    /// store, placeholder upstreams that are never contacted.
    pub fn local_only() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig {
                backend: "memory".to_string(),
                path: default_store_path(),
            },
            registry: RegistryConfig {
                url: "http://127.0.0.1:0".to_string(),
                address: "local".to_string(),
                timeout_secs: default_registry_timeout(),
            },
            decryption: DecryptionConfig {
                url: "http://127.0.0.1:0".to_string(),
                timeout_secs: default_decrypt_timeout(),
                token_env: None,
            },
            chunking: ChunkingConfig::default(),
            query: QueryConfig::default(),
        }
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        let lookup = Duration::from_secs(self.registry.timeout_secs);
        ResolverSettings {
            collection_prefix: self.query.collection_prefix.clone(),
            registry_address: self.registry.address.clone(),
            default_limit: self.query.default_limit,
            max_limit: self.query.max_limit,
            local_collection: self.query.local_collection.clone(),
            lookup_timeout: lookup,
            permission_timeout: lookup,
            decrypt_timeout: Duration::from_secs(self.decryption.timeout_secs),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.query.default_limit < 1 {
        anyhow::bail!("query.default_limit must be >= 1");
    }
    if config.query.max_limit < config.query.default_limit {
        anyhow::bail!("query.max_limit must be >= query.default_limit");
    }
    if config.query.collection_prefix.is_empty() {
        anyhow::bail!("query.collection_prefix must not be empty");
    }
    if config
        .query
        .local_collection
        .starts_with(&config.query.collection_prefix)
    {
        anyhow::bail!(
            "query.local_collection must not start with the collection prefix '{}'",
            config.query.collection_prefix
        );
    }

    if config.registry.timeout_secs == 0 {
        anyhow::bail!("registry.timeout_secs must be > 0");
    }
    if config.decryption.timeout_secs == 0 {
        anyhow::bail!("decryption.timeout_secs must be > 0");
    }
    if config.registry.address.trim().is_empty() {
        anyhow::bail!("registry.address must not be empty");
    }
    for (name, url) in [
        ("registry.url", &config.registry.url),
        ("decryption.url", &config.decryption.url),
    ] {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("{} must be an http(s) URL, got '{}'", name, url);
        }
    }

    match config.store.backend.as_str() {
        "sqlite" | "memory" => {}
        other => anyhow::bail!(
            "Unknown store backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    Ok(())
}
