use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::digest::content_digest;
use crate::store::{CommitResult, GetResult, ObjectStore, PutResult};
use crate::{ByteStream, PartReceipt, TransferError, TransferResult, UploadId};

const STREAM_CHUNK: usize = 64 * 1024;

struct StoredObject {
    data: Bytes,
    digest: String,
    content_type: Option<String>,
}

struct StoredPart {
    part_number: u32,
    etag: String,
    data: Bytes,
}

struct PendingUpload {
    bucket: String,
    key: String,
    content_type: Option<String>,
    parts: Vec<StoredPart>,
}

/// In-memory object store for tests and local development.
///
/// Reports real content digests (base64 MD5) for puts and commits, and
/// exposes failure-injection switches so transfer failure paths can be
/// exercised deterministically.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    commit_attempts: AtomicU32,
    abort_calls: AtomicU32,
    fail_part: Mutex<Option<u32>>,
    fail_puts: AtomicBool,
    fail_commit: AtomicBool,
    fail_abort: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every whole-object put fail with a backend error
    pub fn fail_puts(&self) {
        self.fail_puts.store(true, Ordering::SeqCst);
    }

    /// Make part uploads for the given part number fail with a backend error
    pub fn fail_part_uploads_at(&self, part_number: u32) {
        *self.fail_part.lock() = Some(part_number);
    }

    /// Make every commit fail with a backend error
    pub fn fail_commits(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    /// Make every abort fail with a backend error
    pub fn fail_aborts(&self) {
        self.fail_abort.store(true, Ordering::SeqCst);
    }

    /// Stored bytes for an object, if present
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    /// Multipart sessions neither committed nor aborted
    pub fn pending_upload_count(&self) -> usize {
        self.uploads.lock().len()
    }

    pub fn commit_attempts(&self) -> u32 {
        self.commit_attempts.load(Ordering::SeqCst)
    }

    pub fn abort_calls(&self) -> u32 {
        self.abort_calls.load(Ordering::SeqCst)
    }

    /// Seed an object directly, bypassing the transfer paths
    pub fn insert_object(&self, bucket: &str, key: &str, data: Bytes) {
        let digest = content_digest(&data);
        self.objects.lock().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                digest,
                content_type: None,
            },
        );
    }

    fn injected(what: &str) -> TransferError {
        TransferError::backend(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("injected {} failure", what),
        ))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
        mut body: ByteStream,
        _content_length: Option<u64>,
    ) -> TransferResult<PutResult> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Self::injected("put"));
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let data = buf.freeze();
        let digest = content_digest(&data);
        let size_bytes = data.len() as u64;

        self.objects.lock().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                digest: digest.clone(),
                content_type: content_type.map(str::to_string),
            },
        );

        Ok(PutResult {
            digest: Some(digest),
            size_bytes,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> TransferResult<GetResult> {
        let (data, digest, content_type) = {
            let objects = self.objects.lock();
            let stored = objects
                .get(&(bucket.to_string(), key.to_string()))
                .ok_or_else(|| TransferError::not_found(bucket, key))?;
            (
                stored.data.clone(),
                stored.digest.clone(),
                stored.content_type.clone(),
            )
        };

        let size_bytes = data.len() as u64;
        let stream = async_stream::stream! {
            let mut offset = 0;
            while offset < data.len() {
                let end = (offset + STREAM_CHUNK).min(data.len());
                yield Ok(data.slice(offset..end));
                offset = end;
            }
        };

        Ok(GetResult {
            stream: Box::pin(stream),
            digest: Some(digest),
            size_bytes: Some(size_bytes),
            content_type,
        })
    }

    async fn init_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> TransferResult<UploadId> {
        let upload_id = UploadId::new();
        self.uploads.lock().insert(
            upload_id.as_str().to_string(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                content_type: content_type.map(str::to_string),
                parts: Vec::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> TransferResult<PartReceipt> {
        if *self.fail_part.lock() == Some(part_number) {
            return Err(Self::injected("part upload"));
        }

        let etag = format!("etag-{}", Uuid::new_v4().simple());
        let digest = content_digest(&body);
        let size_bytes = body.len() as u64;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(upload_id.as_str())
            .ok_or_else(|| Self::injected("unknown upload id"))?;
        upload.parts.push(StoredPart {
            part_number,
            etag: etag.clone(),
            data: body,
        });

        Ok(PartReceipt {
            part_number,
            size_bytes,
            etag,
            digest: Some(digest),
            uploaded_at: now,
        })
    }

    async fn commit_multipart(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &UploadId,
        parts: &[PartReceipt],
    ) -> TransferResult<CommitResult> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(Self::injected("commit"));
        }

        let upload = self
            .uploads
            .lock()
            .remove(upload_id.as_str())
            .ok_or_else(|| Self::injected("unknown upload id"))?;

        // The backend rejects a commit whose part list does not match what
        // was uploaded: same count, matching acknowledgement tokens, part
        // numbers 1..=k in ascending order.
        if parts.len() != upload.parts.len() {
            return Err(Self::injected("part count mismatch"));
        }
        let mut buf = BytesMut::new();
        for (i, (claimed, stored)) in parts.iter().zip(upload.parts.iter()).enumerate() {
            let expected_number = (i + 1) as u32;
            if claimed.part_number != expected_number
                || stored.part_number != expected_number
                || claimed.etag != stored.etag
            {
                return Err(Self::injected("part list mismatch"));
            }
            buf.extend_from_slice(&stored.data);
        }

        let data = buf.freeze();
        let combined_digest = content_digest(&data);
        let size_bytes = data.len() as u64;
        self.objects.lock().insert(
            (upload.bucket, upload.key),
            StoredObject {
                data,
                digest: combined_digest.clone(),
                content_type: upload.content_type,
            },
        );

        Ok(CommitResult {
            combined_digest: Some(combined_digest),
            size_bytes: Some(size_bytes),
        })
    }

    async fn abort_multipart(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &UploadId,
    ) -> TransferResult<()> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_abort.load(Ordering::SeqCst) {
            return Err(Self::injected("abort"));
        }
        self.uploads.lock().remove(upload_id.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn one_chunk_stream(data: &[u8]) -> ByteStream {
        Box::pin(stream::iter(vec![Ok(Bytes::copy_from_slice(data))]))
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryObjectStore::new();

        let put = store
            .put(
                "bucket",
                "key",
                Some("application/octet-stream"),
                one_chunk_stream(b"payload"),
                Some(7),
            )
            .await
            .unwrap();
        assert_eq!(put.size_bytes, 7);
        assert_eq!(put.digest.as_deref(), Some(content_digest(b"payload").as_str()));

        let got = store.get("bucket", "key").await.unwrap();
        assert_eq!(got.size_bytes, Some(7));

        let mut stream = got.stream;
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(data, b"payload");
    }

    #[tokio::test]
    async fn get_missing_object_is_not_found() {
        let store = MemoryObjectStore::new();
        let err = store.get("bucket", "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn commit_rejects_reordered_part_list() {
        let store = MemoryObjectStore::new();
        let upload_id = store.init_multipart("bucket", "key", None).await.unwrap();

        let first = store
            .upload_part("bucket", "key", &upload_id, 1, Bytes::from_static(b"aa"))
            .await
            .unwrap();
        let second = store
            .upload_part("bucket", "key", &upload_id, 2, Bytes::from_static(b"bb"))
            .await
            .unwrap();

        let result = store
            .commit_multipart("bucket", "key", &upload_id, &[second, first])
            .await;
        assert!(result.is_err());
    }
}
