//! Interfaces of the external collaborators the resolver orchestrates.
//!
//! The registry (file metadata and permission grants) and the decryption
//! gateway are black boxes; the application crate provides HTTP-backed
//! implementations and tests provide counting mocks. Both are treated as
//! stateless and reentrant, so a single instance is shared by every request.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::FileRecord;

/// Registry of encrypted files and the grants that unlock them.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Map a storage URL to its file id. `0` means the URL is not registered.
    async fn resolve_file_id(&self, url: &str) -> Result<u64>;

    /// Fetch the record for `file_id`, or `None` when the registry has none.
    async fn get_file(&self, file_id: u64) -> Result<Option<FileRecord>>;

    /// Fetch the encryption key granted on `file_id` to `grantee`.
    async fn get_permission(&self, file_id: u64, grantee: &str) -> Result<String>;
}

/// Turns an encrypted artifact plus its granted key into plaintext bytes.
#[async_trait]
pub trait Decryptor: Send + Sync {
    async fn decrypt(&self, storage_locator: &str, key: &str) -> Result<Vec<u8>>;
}
