use async_trait::async_trait;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::digest::content_digest;
use crate::store::{CommitResult, GetResult, ObjectStore, PutResult};
use crate::{ByteStream, PartReceipt, TransferError, TransferResult, UploadId};

/// Configuration for S3-compatible storage
#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, Ceph, ...)
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Path-style addressing, required by most S3-compatible endpoints
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        }
    }
}

impl S3Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from standard AWS environment variables
    pub fn from_env() -> Self {
        let endpoint = std::env::var("AWS_ENDPOINT_URL").ok();
        Self {
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            force_path_style: endpoint.is_some(),
            endpoint,
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
        }
    }

    pub fn with_region<S: Into<String>>(mut self, region: S) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_credentials<A: Into<String>, S: Into<String>>(
        mut self,
        access_key_id: A,
        secret_access_key: S,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_path_style(mut self) -> Self {
        self.force_path_style = true;
        self
    }
}

/// S3-compatible [`ObjectStore`].
///
/// Construct once at startup and share as `Arc<dyn ObjectStore>` across
/// engines and relays - the inner SDK client pools its connections.
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Build a client from explicit configuration
    pub async fn new(config: S3Config) -> TransferResult<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    Credentials::new(access_key.clone(), secret_key.clone(), None, None, "static");
                loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
            }
            (None, None) => {}
            _ => {
                return Err(TransferError::invalid(
                    "both access key id and secret access key must be provided",
                ))
            }
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }

    /// Build a client from standard AWS environment variables
    pub async fn from_env() -> TransferResult<Self> {
        Self::new(S3Config::from_env()).await
    }

    /// Wrap an existing SDK client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn trim_etag(tag: &str) -> String {
    tag.trim_matches('"').to_string()
}

fn missing_field(what: &str) -> TransferError {
    TransferError::backend(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("backend response missing {}", what),
    ))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
        mut body: ByteStream,
        content_length: Option<u64>,
    ) -> TransferResult<PutResult> {
        // The single-call path only carries objects below the multipart
        // threshold, so buffering one object here is bounded.
        let mut buf = match content_length {
            Some(length) => BytesMut::with_capacity(length as usize),
            None => BytesMut::new(),
        };
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let data = buf.freeze();
        let size_bytes = data.len() as u64;

        let mut put = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(AwsByteStream::from(data));
        if let Some(content_type) = content_type {
            put = put.content_type(content_type);
        }
        let resp = put.send().await.map_err(TransferError::backend)?;

        Ok(PutResult {
            digest: resp.e_tag().map(trim_etag),
            size_bytes,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> TransferResult<GetResult> {
        let resp = match self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    return Err(TransferError::not_found(bucket, key));
                }
                return Err(TransferError::backend(service));
            }
        };

        let digest = resp.e_tag().map(trim_etag);
        let size_bytes = resp.content_length().and_then(|l| u64::try_from(l).ok());
        let content_type = resp.content_type().map(str::to_string);
        let stream: ByteStream = Box::pin(ReaderStream::new(resp.body.into_async_read()));

        Ok(GetResult {
            stream,
            digest,
            size_bytes,
            content_type,
        })
    }

    async fn init_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> TransferResult<UploadId> {
        let mut create = self.client.create_multipart_upload().bucket(bucket).key(key);
        if let Some(content_type) = content_type {
            create = create.content_type(content_type);
        }
        let resp = create.send().await.map_err(TransferError::backend)?;

        resp.upload_id()
            .map(|id| UploadId::from_string(id.to_string()))
            .ok_or_else(|| missing_field("upload id"))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> TransferResult<PartReceipt> {
        let size_bytes = body.len() as u64;
        let digest = content_digest(&body);
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        let resp = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .part_number(part_number as i32)
            .body(AwsByteStream::from(body))
            .send()
            .await
            .map_err(TransferError::backend)?;

        let etag = resp.e_tag().map(trim_etag).ok_or_else(|| missing_field("part etag"))?;

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
        bucket: &str,
        key: &str,
        upload_id: &UploadId,
        parts: &[PartReceipt],
    ) -> TransferResult<CommitResult> {
        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number as i32)
                    .e_tag(&part.etag)
                    .build()
            })
            .collect();

        let resp = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(TransferError::backend)?;

        let combined_digest = resp.e_tag().map(trim_etag);

        // Committed length comes from a follow-up head; losing it only costs
        // the weaker length fallback during verification.
        let size_bytes = match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(head) => head.content_length().and_then(|l| u64::try_from(l).ok()),
            Err(err) => {
                debug!(error = %err, "head after commit failed");
                None
            }
        };

        Ok(CommitResult {
            combined_digest,
            size_bytes,
        })
    }

    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &UploadId,
    ) -> TransferResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id.as_str())
            .send()
            .await
            .map_err(TransferError::backend)?;
        Ok(())
    }
}
