use crate::storage::error::StorageResult;
use async_trait::async_trait;
use std::time::Duration;

/// Durable object storage reachable through pre-signed write URLs
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Mint a URL that accepts one PUT of `path` until `ttl` elapses
    async fn sign_upload(&self, path: &str, ttl: Duration) -> StorageResult<String>;

    /// Size of a stored object, `None` if nothing is stored at `path`
    async fn object_size(&self, path: &str) -> StorageResult<Option<u64>>;

    /// Public reference URL of `path`
    fn public_url(&self, path: &str) -> String;
}
