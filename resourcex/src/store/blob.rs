use anyhow::Result;
use async_trait::async_trait;

use crate::core::checksum::Checksum;

/// A deduplicated byte store keyed by SHA-256 digest.
///
/// `put` is idempotent: identical content produces the identical digest, and
/// re-putting bytes already present performs no second physical write.
/// `delete` is permitted even on referenced blobs; garbage collection is the
/// sole intended caller.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch blob bytes. Fails with a `BlobNotFound` kind when absent.
    async fn get(&self, digest: &Checksum) -> Result<Vec<u8>>;

    /// Store bytes, returning their digest. Writes only if absent.
    async fn put(&self, bytes: &[u8]) -> Result<Checksum>;

    async fn has(&self, digest: &Checksum) -> Result<bool>;

    /// Remove a blob. Removing an absent digest is a no-op.
    async fn delete(&self, digest: &Checksum) -> Result<()>;

    /// Every digest successfully `put` and not since deleted.
    async fn list(&self) -> Result<Vec<Checksum>>;
}
