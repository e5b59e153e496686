/// Configuration for transfer operations
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Standard part size (bytes) for multipart transfers
    pub part_size: u64,

    /// Backend-imposed floor for every part except the final one.
    /// Requests with a smaller part size are rejected before any backend call.
    pub min_part_size: u64,

    /// Objects at or above this size always take the multipart path
    pub multipart_threshold: u64,

    /// Upper bound to protect memory/state
    pub max_parts: u32,

    /// Worker tasks executing dispatched transfers
    pub worker_count: usize,

    /// Transfers that may sit queued beyond the active workers before
    /// intake starts waiting
    pub queue_depth: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            part_size: 100 * 1024 * 1024,           // 100MB
            min_part_size: 10 * 1024 * 1024,        // 10MB backend minimum
            multipart_threshold: 100 * 1024 * 1024, // objects >= one part go multipart
            max_parts: 10_000,
            worker_count: 10,
            queue_depth: 32,
        }
    }
}

impl TransferConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set part size
    pub fn with_part_size(mut self, bytes: u64) -> Self {
        self.part_size = bytes;
        self
    }

    /// Set the backend part-size floor
    pub fn with_min_part_size(mut self, bytes: u64) -> Self {
        self.min_part_size = bytes;
        self
    }

    /// Set multipart threshold
    pub fn with_multipart_threshold(mut self, bytes: u64) -> Self {
        self.multipart_threshold = bytes;
        self
    }

    /// Set max parts
    pub fn with_max_parts(mut self, max: u32) -> Self {
        self.max_parts = max;
        self
    }

    /// Set worker pool size
    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    /// Set dispatch queue depth
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }
}
