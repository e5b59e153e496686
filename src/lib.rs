//! # object-ferry: Streaming object-transfer infrastructure
//!
//! `object-ferry` moves byte streams between a local boundary and
//! S3-compatible object storage, handling objects too large to buffer in
//! memory. The core is the multipart transfer engine: split a stream into
//! bounded-size parts, upload them strictly in order, collect per-part
//! acknowledgements, and commit or abort the whole session atomically.
//!
//! ## Key Features
//!
//! - **Streaming-first**: large objects flow through one part-sized buffer,
//!   never fully materialized
//! - **Atomic multipart sessions**: every session ends committed or aborted,
//!   with best-effort backend cleanup on every failure path
//! - **End-to-end integrity**: digests travel with the bytes, and mismatches
//!   surface as a distinct outcome rather than a silent success
//! - **Cross-endpoint relays**: pipe a download from one endpoint straight
//!   into an upload to another, self-verifying via the source digest
//! - **Bounded concurrency**: a worker pool runs transfers off the
//!   request-handling path and reports completion asynchronously
//! - **Storage agnostic**: any backend implementing [`ObjectStore`] works;
//!   an S3 implementation and an in-memory store ship in the box
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use object_ferry::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> TransferResult<()> {
//! // 1. One backend client per endpoint, built once at startup
//! let store = object_ferry::S3ObjectStore::from_env().await?;
//! let engine = TransferEngine::new(store, TransferConfig::default());
//!
//! // 2. Upload a local file; the engine picks the simple or multipart path
//! let receipt = engine
//!     .put_file(PutRequest::new("archive", "backups/db.tar"), "/tmp/db.tar")
//!     .await?;
//! println!("stored {} bytes as {} parts", receipt.bytes_transferred, receipt.parts());
//!
//! // 3. Download straight to disk
//! engine.download_to_file("archive", "backups/db.tar", "/tmp/restore.tar").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  Your boundary   │  ← HTTP handlers, CLI, background jobs
//! ├──────────────────┤
//! │  TransferEngine  │  ← path selection, splitting, commit/abort
//! │  RelayService    │  ← endpoint-to-endpoint piping
//! │  TaskDispatcher  │  ← bounded workers, async completion
//! ├──────────────────┤
//! │  ObjectStore     │  ← storage primitives (S3, memory, custom)
//! └──────────────────┘
//! ```
//!
//! Within one transfer, part uploads are strictly sequential - the ordered,
//! gap-free part list is the invariant the commit depends on. Concurrency
//! lives a level up: independent transfers run side by side on the
//! dispatcher's workers.

mod chunk;
mod config;
pub mod digest;
mod dispatch;
mod error;
mod memory_store;
mod relay;
mod s3_store;
pub mod store;
mod transfer;
mod types;

// Re-export main types for clean API
pub use chunk::PartSplitter;
pub use config::TransferConfig;
pub use digest::{content_digest, DigestAccumulator};
pub use dispatch::{TaskDispatcher, TaskHandle};
pub use error::{TransferError, TransferResult};
pub use memory_store::MemoryObjectStore;
pub use relay::{RelayRequest, RelayService};
pub use s3_store::{S3Config, S3ObjectStore};
pub use store::{CommitResult, GetResult, ObjectStore, PutResult};
pub use transfer::TransferEngine;
pub use types::{
    ByteStream, PartReceipt, PutRequest, TransferMethod, TransferReceipt, UploadId,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ByteStream, ObjectStore, PutRequest, TransferConfig, TransferEngine, TransferError,
        TransferReceipt, TransferResult,
    };
}
