use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;

use crate::{ByteStream, TransferResult};

/// Splits a byte stream into bounded-size parts.
///
/// Produces a lazy, forward-only sequence of chunks, each of exactly
/// `part_size` bytes except possibly the last. At most one part is buffered
/// at a time. Reading stops at end-of-stream or once `declared_size` bytes
/// have been consumed, whichever comes first. A zero-byte final remainder is
/// never emitted.
pub struct PartSplitter {
    source: ByteStream,
    part_size: usize,
    declared_size: Option<u64>,
    consumed: u64,
    /// Tail of a source chunk that crossed a part boundary
    pending: Option<Bytes>,
    source_done: bool,
}

impl PartSplitter {
    pub fn new(source: ByteStream, part_size: u64, declared_size: Option<u64>) -> Self {
        Self {
            source,
            part_size: part_size as usize,
            declared_size,
            consumed: 0,
            pending: None,
            source_done: false,
        }
    }

    /// Next part, or `None` once the source is exhausted
    pub async fn next_part(&mut self) -> TransferResult<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(self.part_size.min(64 * 1024));

        loop {
            let mut budget = self.part_size - buf.len();
            if let Some(declared) = self.declared_size {
                let remaining = declared.saturating_sub(self.consumed);
                budget = budget.min(remaining as usize);
            }
            if budget == 0 {
                break;
            }

            let mut chunk = match self.pending.take() {
                Some(chunk) => chunk,
                None => {
                    if self.source_done {
                        break;
                    }
                    match self.source.next().await {
                        Some(Ok(chunk)) => chunk,
                        Some(Err(err)) => return Err(err.into()),
                        None => {
                            self.source_done = true;
                            break;
                        }
                    }
                }
            };
            if chunk.is_empty() {
                continue;
            }

            let take = chunk.len().min(budget);
            let rest = chunk.split_off(take);
            buf.extend_from_slice(&chunk);
            self.consumed += take as u64;
            if !rest.is_empty() {
                self.pending = Some(rest);
            }
        }

        if buf.is_empty() {
            Ok(None)
        } else {
            Ok(Some(buf.freeze()))
        }
    }

    /// Total bytes consumed from the source so far
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn byte_stream(data: Vec<u8>, chunk_len: usize) -> ByteStream {
        let chunks: Vec<Result<Bytes, std::io::Error>> = data
            .chunks(chunk_len.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn collect_parts(splitter: &mut PartSplitter) -> Vec<Bytes> {
        let mut parts = Vec::new();
        while let Some(part) = splitter.next_part().await.unwrap() {
            parts.push(part);
        }
        parts
    }

    #[tokio::test]
    async fn splits_into_exact_parts_with_remainder() {
        let data = pattern(250);
        let mut splitter = PartSplitter::new(byte_stream(data.clone(), 33), 100, Some(250));

        let parts = collect_parts(&mut splitter).await;

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 100);
        assert_eq!(parts[1].len(), 100);
        assert_eq!(parts[2].len(), 50);
        assert_eq!(splitter.bytes_consumed(), 250);

        let rejoined: Vec<u8> = parts.iter().flat_map(|p| p.to_vec()).collect();
        assert_eq!(rejoined, data);
    }

    #[tokio::test]
    async fn suppresses_zero_byte_final_part() {
        let data = pattern(200);
        let mut splitter = PartSplitter::new(byte_stream(data, 64), 100, Some(200));

        let parts = collect_parts(&mut splitter).await;

        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.len() == 100));
        assert!(splitter.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn single_part_when_source_smaller_than_part_size() {
        let data = pattern(42);
        let mut splitter = PartSplitter::new(byte_stream(data.clone(), 7), 100, None);

        let parts = collect_parts(&mut splitter).await;

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].to_vec(), data);
    }

    #[tokio::test]
    async fn declared_size_caps_reading() {
        // Source holds more than the declared size; reading stops at the cap.
        let data = pattern(500);
        let mut splitter = PartSplitter::new(byte_stream(data.clone(), 90), 100, Some(250));

        let parts = collect_parts(&mut splitter).await;

        assert_eq!(parts.len(), 3);
        assert_eq!(splitter.bytes_consumed(), 250);
        let rejoined: Vec<u8> = parts.iter().flat_map(|p| p.to_vec()).collect();
        assert_eq!(rejoined, &data[..250]);
    }

    #[tokio::test]
    async fn stops_at_end_of_stream_before_declared_size() {
        let data = pattern(130);
        let mut splitter = PartSplitter::new(byte_stream(data, 50), 100, Some(1000));

        let parts = collect_parts(&mut splitter).await;

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 100);
        assert_eq!(parts[1].len(), 30);
        assert_eq!(splitter.bytes_consumed(), 130);
    }

    #[tokio::test]
    async fn empty_source_yields_no_parts() {
        let mut splitter = PartSplitter::new(byte_stream(Vec::new(), 1), 100, None);
        assert!(splitter.next_part().await.unwrap().is_none());
        assert_eq!(splitter.bytes_consumed(), 0);
    }

    #[tokio::test]
    async fn unknown_size_reads_to_exhaustion() {
        let data = pattern(1024);
        let mut splitter = PartSplitter::new(byte_stream(data.clone(), 100), 256, None);

        let parts = collect_parts(&mut splitter).await;

        assert_eq!(parts.len(), 4);
        assert!(parts.iter().all(|p| p.len() == 256));
        let rejoined: Vec<u8> = parts.iter().flat_map(|p| p.to_vec()).collect();
        assert_eq!(rejoined, data);
    }
}
