use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::chunk::PartSplitter;
use crate::config::TransferConfig;
use crate::dispatch::{TaskDispatcher, TaskHandle};
use crate::store::{CommitResult, GetResult, ObjectStore};
use crate::types::{ByteStream, PartReceipt, PutRequest, TransferMethod, TransferReceipt, UploadId};
use crate::{TransferError, TransferResult};

/// The transfer engine - what services embed to move objects in and out of
/// a storage endpoint
#[derive(Clone)]
pub struct TransferEngine {
    store: Arc<dyn ObjectStore>,
    config: TransferConfig,
}

impl TransferEngine {
    /// Create a new transfer engine owning its backend handle
    pub fn new<S: ObjectStore + 'static>(store: S, config: TransferConfig) -> Self {
        Self {
            store: Arc::new(store),
            config,
        }
    }

    /// Create over an already-shared backend handle
    pub fn with_store(store: Arc<dyn ObjectStore>, config: TransferConfig) -> Self {
        Self { store, config }
    }

    /// Store an object, choosing the simple or multipart path by declared size
    #[instrument(skip(self, request, body), fields(bucket = %request.bucket, key = %request.key))]
    pub async fn put(
        &self,
        request: PutRequest,
        body: ByteStream,
    ) -> TransferResult<TransferReceipt> {
        self.put_cancellable(request, body, &CancellationToken::new())
            .await
    }

    /// Store an object, stopping between parts if `cancel` fires.
    ///
    /// A part upload already dispatched to the backend is allowed to finish;
    /// cancellation takes effect before the next part is issued.
    pub async fn put_cancellable(
        &self,
        request: PutRequest,
        body: ByteStream,
        cancel: &CancellationToken,
    ) -> TransferResult<TransferReceipt> {
        match request.declared_size {
            Some(size) if size < self.config.multipart_threshold => {
                self.put_simple(request, body).await
            }
            // Unknown sizes stream through the multipart path so the object
            // is never fully buffered.
            _ => self.put_multipart_cancellable(request, body, cancel).await,
        }
    }

    /// Single-call whole-object put, for objects below the multipart
    /// threshold or callers that already hold the full object
    pub async fn put_simple(
        &self,
        request: PutRequest,
        body: ByteStream,
    ) -> TransferResult<TransferReceipt> {
        validate_request(&request)?;
        let started = Instant::now();

        let result = self
            .store
            .put(
                &request.bucket,
                &request.key,
                request.content_type.as_deref(),
                body,
                request.declared_size,
            )
            .await?;

        let digest = match result.digest {
            Some(digest) => digest,
            None => {
                return Err(TransferError::integrity(
                    request
                        .expected_digest
                        .unwrap_or_else(|| "a content digest".to_string()),
                    "none",
                ))
            }
        };
        if let Some(expected) = &request.expected_digest {
            if *expected != digest {
                return Err(TransferError::integrity(expected, digest));
            }
        }

        info!(
            bytes = result.size_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "object stored"
        );

        Ok(
            TransferReceipt::new(request.bucket, request.key, result.size_bytes)
                .with_digest(digest),
        )
    }

    /// Multipart put regardless of size thresholds
    pub async fn put_multipart(
        &self,
        request: PutRequest,
        body: ByteStream,
    ) -> TransferResult<TransferReceipt> {
        self.put_multipart_cancellable(request, body, &CancellationToken::new())
            .await
    }

    async fn put_multipart_cancellable(
        &self,
        request: PutRequest,
        body: ByteStream,
        cancel: &CancellationToken,
    ) -> TransferResult<TransferReceipt> {
        validate_request(&request)?;
        MultipartTransfer::new(self.store.clone(), &self.config, request)?
            .run(body, cancel)
            .await
    }

    /// Fetch an object as a stream.
    ///
    /// Ownership of the stream passes to the caller; exactly one consumer
    /// reads it to end-of-stream.
    pub async fn get(&self, bucket: &str, key: &str) -> TransferResult<GetResult> {
        validate_target(bucket, key)?;
        self.store.get(bucket, key).await
    }

    /// Stream an object to a local file, creating parent directories.
    ///
    /// No file is created when the object is absent.
    pub async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        path: impl AsRef<Path>,
    ) -> TransferResult<u64> {
        let started = Instant::now();
        let result = self.get(bucket, key).await?;

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = result.stream;
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!(
            bucket,
            key,
            bytes = written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "object downloaded to disk"
        );
        Ok(written)
    }

    /// Run a put on a dispatcher's worker pool, returning a pending handle.
    ///
    /// The calling boundary is released immediately; completion (success,
    /// failure, or integrity mismatch) arrives through the handle, which can
    /// also request cancellation.
    pub async fn put_dispatched(
        &self,
        dispatcher: &TaskDispatcher,
        request: PutRequest,
        body: ByteStream,
    ) -> TaskHandle<TransferResult<TransferReceipt>> {
        let engine = self.clone();
        dispatcher
            .dispatch(move |cancel| async move {
                engine.put_cancellable(request, body, &cancel).await
            })
            .await
    }

    /// Upload a local file, declaring its on-disk size
    pub async fn put_file(
        &self,
        mut request: PutRequest,
        path: impl AsRef<Path>,
    ) -> TransferResult<TransferReceipt> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        if request.declared_size.is_none() {
            request.declared_size = Some(file.metadata().await?.len());
        }
        let stream: ByteStream = Box::pin(ReaderStream::new(file));
        self.put(request, stream).await
    }

    /// Get configuration
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }
}

fn validate_target(bucket: &str, key: &str) -> TransferResult<()> {
    if bucket.is_empty() {
        return Err(TransferError::invalid("bucket name is required"));
    }
    if key.is_empty() {
        return Err(TransferError::invalid("object key is required"));
    }
    Ok(())
}

fn validate_request(request: &PutRequest) -> TransferResult<()> {
    validate_target(&request.bucket, &request.key)?;
    if request.declared_size == Some(0) {
        return Err(TransferError::invalid("source size must be greater than zero"));
    }
    Ok(())
}

/// Multipart transfer session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferState {
    Created,
    Initiated,
    PartsInFlight,
    PartsComplete,
    Committed,
    Aborted,
}

/// Drives one multipart upload from initiation to commit or abort.
///
/// Owned exclusively by the call driving it; reaches exactly one terminal
/// state before that call returns. Part uploads are strictly sequential, so
/// no two parts of the same session are ever in flight together.
struct MultipartTransfer {
    store: Arc<dyn ObjectStore>,
    request: PutRequest,
    part_size: u64,
    max_parts: u32,
    state: TransferState,
    upload_id: Option<UploadId>,
    parts: Vec<PartReceipt>,
}

impl MultipartTransfer {
    fn new(
        store: Arc<dyn ObjectStore>,
        config: &TransferConfig,
        request: PutRequest,
    ) -> TransferResult<Self> {
        let part_size = request.part_size.unwrap_or(config.part_size);
        if part_size < config.min_part_size {
            return Err(TransferError::invalid(format!(
                "part size {} is below the backend minimum {}",
                part_size, config.min_part_size
            )));
        }

        Ok(Self {
            store,
            request,
            part_size,
            max_parts: config.max_parts,
            state: TransferState::Created,
            upload_id: None,
            parts: Vec::new(),
        })
    }

    async fn run(
        mut self,
        body: ByteStream,
        cancel: &CancellationToken,
    ) -> TransferResult<TransferReceipt> {
        let started = Instant::now();

        // Initiation failure leaves nothing to clean up.
        let upload_id = self
            .store
            .init_multipart(
                &self.request.bucket,
                &self.request.key,
                self.request.content_type.as_deref(),
            )
            .await?;
        debug!(upload_id = %upload_id, "multipart upload initiated");
        self.upload_id = Some(upload_id.clone());
        self.state = TransferState::Initiated;

        let uploaded = match self.upload_parts(body, cancel).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.abort().await;
                return Err(err);
            }
        };

        let commit = match self.commit().await {
            Ok(commit) => commit,
            Err(err) => {
                self.abort().await;
                return Err(err);
            }
        };
        self.state = TransferState::Committed;

        // A mismatch here surfaces as IntegrityMismatch while the committed
        // object stays in place: commit is not reversible, the caller decides
        // what to do with the known-bad object.
        self.verify(&commit)?;

        info!(
            bucket = %self.request.bucket,
            key = %self.request.key,
            parts = self.parts.len(),
            bytes = uploaded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "multipart upload committed"
        );

        let mut receipt = TransferReceipt::new(&self.request.bucket, &self.request.key, uploaded)
            .with_method(TransferMethod::Multipart {
                upload_id,
                part_size: self.part_size,
                parts: self.parts.len() as u32,
            });
        if let Some(digest) = commit.combined_digest {
            receipt = receipt.with_digest(digest);
        }
        Ok(receipt)
    }

    /// Upload parts strictly in sequence; the first failure halts the loop
    async fn upload_parts(
        &mut self,
        body: ByteStream,
        cancel: &CancellationToken,
    ) -> TransferResult<u64> {
        let upload_id = match &self.upload_id {
            Some(id) => id.clone(),
            None => {
                return Err(TransferError::part_sequence(
                    "part upload attempted before initiation",
                ))
            }
        };
        self.state = TransferState::PartsInFlight;

        let mut splitter = PartSplitter::new(body, self.part_size, self.request.declared_size);
        let mut next_number: u32 = 1;

        while let Some(chunk) = splitter.next_part().await? {
            if cancel.is_cancelled() {
                debug!(part = next_number, "cancellation requested, stopping part uploads");
                return Err(TransferError::Cancelled);
            }
            if next_number > self.max_parts {
                return Err(TransferError::invalid(format!(
                    "transfer exceeds {} parts, increase the part size",
                    self.max_parts
                )));
            }

            let receipt = self
                .store
                .upload_part(
                    &self.request.bucket,
                    &self.request.key,
                    &upload_id,
                    next_number,
                    chunk,
                )
                .await?;
            if receipt.part_number != next_number {
                return Err(TransferError::part_sequence(format!(
                    "backend acknowledged part {} while part {} was in flight",
                    receipt.part_number, next_number
                )));
            }

            debug!(
                part = receipt.part_number,
                size = receipt.size_bytes,
                etag = %receipt.etag,
                "part uploaded"
            );
            self.parts.push(receipt);
            next_number += 1;
        }

        if self.parts.is_empty() {
            return Err(TransferError::invalid("source stream was empty"));
        }
        self.state = TransferState::PartsComplete;
        Ok(splitter.bytes_consumed())
    }

    async fn commit(&mut self) -> TransferResult<CommitResult> {
        if self.state != TransferState::PartsComplete {
            return Err(TransferError::part_sequence(format!(
                "commit attempted in state {:?}",
                self.state
            )));
        }
        let upload_id = match &self.upload_id {
            Some(id) => id.clone(),
            None => return Err(TransferError::part_sequence("commit without an upload id")),
        };
        self.store
            .commit_multipart(
                &self.request.bucket,
                &self.request.key,
                &upload_id,
                &self.parts,
            )
            .await
    }

    fn verify(&self, commit: &CommitResult) -> TransferResult<()> {
        let expected = match &self.request.expected_digest {
            Some(expected) => expected,
            None => return Ok(()),
        };

        match &commit.combined_digest {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(TransferError::integrity(expected, actual)),
            None => {
                // Deprecated fallback: without a combined digest the only
                // available check is committed length against declared size.
                debug!("backend reported no combined digest, comparing lengths instead");
                match (self.request.declared_size, commit.size_bytes) {
                    (Some(declared), Some(committed)) if declared != committed => {
                        Err(TransferError::integrity(
                            format!("{} bytes", declared),
                            format!("{} bytes", committed),
                        ))
                    }
                    _ => Ok(()),
                }
            }
        }
    }

    /// Best-effort release of backend-held resources; failure is logged,
    /// never escalated - the caller already has a failed transfer regardless
    async fn abort(&mut self) {
        if let Some(upload_id) = &self.upload_id {
            if let Err(err) = self
                .store
                .abort_multipart(&self.request.bucket, &self.request.key, upload_id)
                .await
            {
                warn!(
                    upload_id = %upload_id,
                    error = %err,
                    "failed to abort multipart upload"
                );
            }
        }
        self.state = TransferState::Aborted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryObjectStore;
    use bytes::Bytes;
    use futures_util::stream;

    fn test_config() -> TransferConfig {
        TransferConfig::new()
            .with_part_size(100)
            .with_min_part_size(1)
            .with_multipart_threshold(100)
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 239) as u8).collect()
    }

    fn byte_stream(data: Vec<u8>) -> ByteStream {
        let chunks: Vec<Result<Bytes, std::io::Error>> = data
            .chunks(37)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    fn engine_with(store: &Arc<MemoryObjectStore>) -> TransferEngine {
        TransferEngine::with_store(store.clone(), test_config())
    }

    #[tokio::test]
    async fn multipart_commits_ordered_gap_free_parts() {
        let store = Arc::new(MemoryObjectStore::new());
        let engine = engine_with(&store);
        let data = payload(250);

        let receipt = engine
            .put(
                PutRequest::new("bucket", "large").with_declared_size(250),
                byte_stream(data.clone()),
            )
            .await
            .unwrap();

        assert_eq!(receipt.bytes_transferred, 250);
        assert_eq!(receipt.parts(), 3);
        assert!(matches!(
            receipt.method,
            TransferMethod::Multipart { parts: 3, .. }
        ));
        assert_eq!(store.commit_attempts(), 1);
        assert_eq!(store.pending_upload_count(), 0);
        assert_eq!(store.object("bucket", "large").unwrap().to_vec(), data);
    }

    #[tokio::test]
    async fn part_failure_at_every_index_aborts_without_commit() {
        for failing_part in 1..=3u32 {
            let store = Arc::new(MemoryObjectStore::new());
            store.fail_part_uploads_at(failing_part);
            let engine = engine_with(&store);

            let err = engine
                .put(
                    PutRequest::new("bucket", "large").with_declared_size(250),
                    byte_stream(payload(250)),
                )
                .await
                .unwrap_err();

            assert!(
                matches!(err, TransferError::Backend { .. }),
                "part {} should surface a backend error",
                failing_part
            );
            assert_eq!(store.commit_attempts(), 0);
            assert_eq!(store.abort_calls(), 1);
            assert_eq!(store.pending_upload_count(), 0);
            assert!(!store.contains("bucket", "large"));
        }
    }

    #[tokio::test]
    async fn commit_failure_aborts_the_session() {
        let store = Arc::new(MemoryObjectStore::new());
        store.fail_commits();
        let engine = engine_with(&store);

        let err = engine
            .put(
                PutRequest::new("bucket", "large").with_declared_size(250),
                byte_stream(payload(250)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Backend { .. }));
        assert_eq!(store.commit_attempts(), 1);
        assert_eq!(store.abort_calls(), 1);
        assert_eq!(store.pending_upload_count(), 0);
    }

    #[tokio::test]
    async fn abort_failure_is_swallowed_and_logged() {
        let store = Arc::new(MemoryObjectStore::new());
        store.fail_commits();
        store.fail_aborts();
        let engine = engine_with(&store);

        let err = engine
            .put(
                PutRequest::new("bucket", "large").with_declared_size(250),
                byte_stream(payload(250)),
            )
            .await
            .unwrap_err();

        // The commit failure is what the caller sees, not the abort failure.
        assert!(matches!(err, TransferError::Backend { .. }));
        assert_eq!(store.abort_calls(), 1);
    }

    #[tokio::test]
    async fn multipart_verifies_combined_digest() {
        let data = payload(250);
        let expected = crate::digest::content_digest(&data);

        let store = Arc::new(MemoryObjectStore::new());
        let engine = engine_with(&store);
        let receipt = engine
            .put(
                PutRequest::new("bucket", "verified")
                    .with_declared_size(250)
                    .with_expected_digest(expected.clone()),
                byte_stream(data.clone()),
            )
            .await
            .unwrap();
        assert_eq!(receipt.digest.as_deref(), Some(expected.as_str()));

        // A wrong expectation fails the transfer but leaves the committed
        // object in place.
        let err = engine
            .put(
                PutRequest::new("bucket", "tampered")
                    .with_declared_size(250)
                    .with_expected_digest("bogus-digest"),
                byte_stream(data),
            )
            .await
            .unwrap_err();
        assert!(err.is_integrity_mismatch());
        assert!(store.contains("bucket", "tampered"));
    }

    #[tokio::test]
    async fn simple_path_verifies_backend_digest() {
        let data = payload(40);
        let expected = crate::digest::content_digest(&data);

        let store = Arc::new(MemoryObjectStore::new());
        let engine = engine_with(&store);

        let receipt = engine
            .put(
                PutRequest::new("bucket", "small")
                    .with_declared_size(40)
                    .with_expected_digest(expected),
                byte_stream(data.clone()),
            )
            .await
            .unwrap();
        assert!(matches!(receipt.method, TransferMethod::Single));

        let err = engine
            .put(
                PutRequest::new("bucket", "small")
                    .with_declared_size(40)
                    .with_expected_digest("not-the-digest"),
                byte_stream(data),
            )
            .await
            .unwrap_err();
        assert!(err.is_integrity_mismatch());
    }

    #[tokio::test]
    async fn rejects_invalid_requests_before_any_backend_call() {
        let store = Arc::new(MemoryObjectStore::new());
        let engine = engine_with(&store);

        let err = engine
            .put(
                PutRequest::new("", "key").with_declared_size(10),
                byte_stream(payload(10)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidRequest { .. }));

        let err = engine
            .put(
                PutRequest::new("bucket", "key").with_declared_size(0),
                byte_stream(Vec::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidRequest { .. }));

        let err = engine
            .put(
                PutRequest::new("bucket", "key")
                    .with_declared_size(500)
                    .with_part_size(0),
                byte_stream(payload(500)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidRequest { .. }));

        assert_eq!(store.commit_attempts(), 0);
        assert_eq!(store.pending_upload_count(), 0);
        assert!(!store.contains("bucket", "key"));
    }

    #[tokio::test]
    async fn cancellation_stops_part_uploads_and_aborts() {
        let store = Arc::new(MemoryObjectStore::new());
        let engine = engine_with(&store);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .put_cancellable(
                PutRequest::new("bucket", "cancelled").with_declared_size(250),
                byte_stream(payload(250)),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Cancelled));
        assert_eq!(store.commit_attempts(), 0);
        assert_eq!(store.pending_upload_count(), 0);
        assert!(!store.contains("bucket", "cancelled"));
    }
}
