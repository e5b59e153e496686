use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use md5::{Digest, Md5};

/// Compute the content digest of a byte range.
///
/// Base64-encoded MD5, the encoding object-storage backends report in their
/// content-digest headers, so source and destination digests are directly
/// comparable.
pub fn content_digest(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    STANDARD.encode(hasher.finalize())
}

/// Incremental digest over a stream of chunks.
///
/// Feeding the same bytes chunk-by-chunk yields the same digest as a single
/// [`content_digest`] call over the concatenation.
#[derive(Default)]
pub struct DigestAccumulator {
    hasher: Md5,
    bytes_seen: u64,
}

impl DigestAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes_seen += chunk.len() as u64;
    }

    /// Total bytes fed so far
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Finish and return the digest
    pub fn finalize(self) -> String {
        STANDARD.encode(self.hasher.finalize())
    }
}
