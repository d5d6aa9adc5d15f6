// src/storage/mod.rs
pub mod client;
pub mod credentials;
pub mod uri;

pub use client::BlobServiceClient;
pub use credentials::{is_channel_required, StorageCredentials};
pub use uri::BlobUri;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Largest payload accepted by a single Put Page call.
pub const MAX_PAGE_WRITE: u64 = 4 * 1024 * 1024;

/// Blob service operations the provisioning pipeline depends on.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Names of all containers in the account behind `base_uri`.
    async fn list_containers(
        &self,
        base_uri: &str,
        credentials: &StorageCredentials,
    ) -> Result<Vec<String>>;

    /// Creates the blob's container if it does not already exist.
    async fn create_container_if_not_exists(
        &self,
        blob: &BlobUri,
        credentials: &StorageCredentials,
    ) -> Result<()>;

    /// Whether a page blob exists at `blob`.
    async fn page_blob_exists(&self, blob: &BlobUri, credentials: &StorageCredentials)
        -> Result<bool>;

    /// Creates (or overwrites) an empty page blob of `size` bytes.
    async fn create_page_blob(
        &self,
        blob: &BlobUri,
        size: u64,
        credentials: &StorageCredentials,
    ) -> Result<()>;

    /// Writes `data` at `offset`; both must be 512-byte aligned.
    async fn put_page(
        &self,
        blob: &BlobUri,
        offset: u64,
        data: Bytes,
        credentials: &StorageCredentials,
    ) -> Result<()>;
}
