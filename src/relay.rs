use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::config::TransferConfig;
use crate::dispatch::{TaskDispatcher, TaskHandle};
use crate::store::ObjectStore;
use crate::transfer::TransferEngine;
use crate::types::{PutRequest, TransferReceipt};
use crate::{TransferError, TransferResult};

/// A cross-endpoint copy: download from the source endpoint, upload to the
/// destination
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub source_bucket: String,
    pub source_key: String,
    pub dest_bucket: String,
    pub dest_key: String,
}

impl RelayRequest {
    pub fn new<SB, SK, DB, DK>(
        source_bucket: SB,
        source_key: SK,
        dest_bucket: DB,
        dest_key: DK,
    ) -> Self
    where
        SB: Into<String>,
        SK: Into<String>,
        DB: Into<String>,
        DK: Into<String>,
    {
        Self {
            source_bucket: source_bucket.into(),
            source_key: source_key.into(),
            dest_bucket: dest_bucket.into(),
            dest_key: dest_key.into(),
        }
    }
}

/// Pipes objects between two storage endpoints without materializing them.
///
/// One relay serves any pair of endpoints: it is parameterized by the two
/// injected store handles, and the download stream feeds the upload path
/// directly. The source's reported digest becomes the destination's expected
/// digest, so every relay self-verifies end to end.
pub struct RelayService {
    source: Arc<dyn ObjectStore>,
    dest: Arc<dyn ObjectStore>,
    dispatcher: Arc<TaskDispatcher>,
    config: TransferConfig,
}

impl RelayService {
    pub fn new(
        source: Arc<dyn ObjectStore>,
        dest: Arc<dyn ObjectStore>,
        dispatcher: Arc<TaskDispatcher>,
        config: TransferConfig,
    ) -> Self {
        Self {
            source,
            dest,
            dispatcher,
            config,
        }
    }

    /// Start a relay and return a pending handle immediately.
    ///
    /// Completion (success, failure, or integrity mismatch) is delivered
    /// through the handle; the caller is never blocked for the duration of
    /// the transfer.
    #[instrument(skip(self, request), fields(
        source_bucket = %request.source_bucket,
        source_key = %request.source_key,
        dest_bucket = %request.dest_bucket,
        dest_key = %request.dest_key,
    ))]
    pub async fn relay(
        &self,
        request: RelayRequest,
    ) -> TaskHandle<TransferResult<TransferReceipt>> {
        let source = self.source.clone();
        let dest = self.dest.clone();
        let config = self.config.clone();

        self.dispatcher
            .dispatch(move |cancel| async move {
                Self::execute(source, dest, config, request, cancel).await
            })
            .await
    }

    /// Run a relay inline on the calling task
    pub async fn relay_inline(
        &self,
        request: RelayRequest,
    ) -> TransferResult<TransferReceipt> {
        Self::execute(
            self.source.clone(),
            self.dest.clone(),
            self.config.clone(),
            request,
            CancellationToken::new(),
        )
        .await
    }

    async fn execute(
        source: Arc<dyn ObjectStore>,
        dest: Arc<dyn ObjectStore>,
        config: TransferConfig,
        request: RelayRequest,
        cancel: CancellationToken,
    ) -> TransferResult<TransferReceipt> {
        if request.source_bucket.is_empty() || request.source_key.is_empty() {
            return Err(TransferError::invalid("source bucket and key are required"));
        }
        if request.dest_bucket.is_empty() || request.dest_key.is_empty() {
            return Err(TransferError::invalid(
                "destination bucket and key are required",
            ));
        }

        let started = Instant::now();

        // A missing source completes the relay without ever contacting the
        // destination.
        let got = source
            .get(&request.source_bucket, &request.source_key)
            .await?;

        let mut put = PutRequest::new(&request.dest_bucket, &request.dest_key);
        if let Some(length) = got.size_bytes {
            put = put.with_declared_size(length);
        }
        if let Some(digest) = got.digest {
            put = put.with_expected_digest(digest);
        }
        if let Some(content_type) = got.content_type {
            put = put.with_content_type(content_type);
        }

        let engine = TransferEngine::with_store(dest, config);
        let receipt = engine.put_cancellable(put, got.stream, &cancel).await?;

        info!(
            source_bucket = %request.source_bucket,
            source_key = %request.source_key,
            dest_bucket = %request.dest_bucket,
            dest_key = %request.dest_key,
            bytes = receipt.bytes_transferred,
            parts = receipt.parts(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "relay completed"
        );
        Ok(receipt)
    }
}
