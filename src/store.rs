use async_trait::async_trait;
use bytes::Bytes;

use crate::{ByteStream, PartReceipt, TransferResult, UploadId};

/// Remote object-storage operations - must be implemented by all backends
///
/// One store handle serves every bucket on its endpoint, so operations are
/// addressed by (bucket, key). Implementations are constructed once at
/// startup and shared as `Arc<dyn ObjectStore>` across engines and relays.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a whole object from a stream
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
        body: ByteStream,
        content_length: Option<u64>,
    ) -> TransferResult<PutResult>;

    /// Fetch an object as a stream with its backend-reported digest and length
    async fn get(&self, bucket: &str, key: &str) -> TransferResult<GetResult>;

    /// Begin a multipart upload, returning the backend-issued upload id
    async fn init_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> TransferResult<UploadId>;

    /// Upload one part under (upload id, part number)
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> TransferResult<PartReceipt>;

    /// Commit a multipart upload from the ordered part list
    async fn commit_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &UploadId,
        parts: &[PartReceipt],
    ) -> TransferResult<CommitResult>;

    /// Release backend resources held for an uncommitted upload.
    /// Callers treat failure here as best-effort: it is logged, not escalated.
    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &UploadId,
    ) -> TransferResult<()>;
}

/// Result of a successful whole-object put
#[derive(Debug, Clone)]
pub struct PutResult {
    /// Backend-reported content digest
    pub digest: Option<String>,
    pub size_bytes: u64,
}

/// Result of a get operation
pub struct GetResult {
    pub stream: ByteStream,
    /// Backend-reported content digest
    pub digest: Option<String>,
    pub size_bytes: Option<u64>,
    pub content_type: Option<String>,
}

/// Result of committing a multipart upload
#[derive(Debug, Clone)]
pub struct CommitResult {
    /// Backend-computed digest over the committed object, directly comparable
    /// to a source-side digest when present
    pub combined_digest: Option<String>,
    pub size_bytes: Option<u64>,
}
