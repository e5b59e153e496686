use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use uuid::Uuid;

/// Stream of bytes for object content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Backend-issued identifier for an in-progress multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(pub String);

impl UploadId {
    /// Generate a new random upload ID (used by backends that mint their own)
    pub fn new() -> Self {
        Self(format!("upl_{}", Uuid::new_v4().simple()))
    }

    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request to store an object. Immutable once a transfer starts.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub bucket: String,
    pub key: String,
    /// Total source size in bytes, when the caller knows it.
    /// Also caps how far the part splitter reads.
    pub declared_size: Option<u64>,
    /// Source digest to verify the committed object against
    pub expected_digest: Option<String>,
    pub content_type: Option<String>,
    /// Per-request override of the configured part size
    pub part_size: Option<u64>,
}

impl PutRequest {
    pub fn new<B: Into<String>, K: Into<String>>(bucket: B, key: K) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            declared_size: None,
            expected_digest: None,
            content_type: None,
            part_size: None,
        }
    }

    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }

    pub fn with_expected_digest<S: Into<String>>(mut self, digest: S) -> Self {
        self.expected_digest = Some(digest.into());
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_part_size(mut self, bytes: u64) -> Self {
        self.part_size = Some(bytes);
        self
    }
}

/// Receipt for one uploaded part of a multipart transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartReceipt {
    /// 1-based, strictly increasing, no gaps
    pub part_number: u32,
    pub size_bytes: u64,
    /// Backend acknowledgement token, required at commit time
    pub etag: String,
    /// Locally computed digest of the part bytes
    pub digest: Option<String>,
    pub uploaded_at: i64,
}

/// Receipt returned after a completed transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub bucket: String,
    pub key: String,
    pub bytes_transferred: u64,
    /// Backend-reported digest of the stored object, when available
    pub digest: Option<String>,
    pub method: TransferMethod,
    pub completed_at: i64,
}

/// How the object was transferred
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransferMethod {
    /// Single-call whole-object put
    Single,
    /// Multipart transfer
    Multipart {
        upload_id: UploadId,
        part_size: u64,
        parts: u32,
    },
}

impl TransferReceipt {
    pub fn new<B: Into<String>, K: Into<String>>(bucket: B, key: K, bytes_transferred: u64) -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        Self {
            bucket: bucket.into(),
            key: key.into(),
            bytes_transferred,
            digest: None,
            method: TransferMethod::Single,
            completed_at: now,
        }
    }

    /// Set the backend-reported digest
    pub fn with_digest<S: Into<String>>(mut self, digest: S) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Set how the object was transferred
    pub fn with_method(mut self, method: TransferMethod) -> Self {
        self.method = method;
        self
    }

    /// Number of parts the transfer committed (1 for the single-call path)
    pub fn parts(&self) -> u32 {
        match &self.method {
            TransferMethod::Single => 1,
            TransferMethod::Multipart { parts, .. } => *parts,
        }
    }
}
